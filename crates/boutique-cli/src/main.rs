//! boutique - sign in to the storefront from the terminal.
//!
//! Drives the shopper session: password + passcode sign-in, silent renewal,
//! status and sign-out. The session is stored in the configured store so it
//! survives between runs.

mod prompt;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use boutique_core::auth::{
    format_countdown, AuthError, ErrorKind, RestoreOutcome, SessionController, SessionSnapshot,
    ValidationError,
};
use boutique_core::{Config, CredentialState, HttpTransport};

const USAGE: &str = "\
Usage: boutique <command>

Commands:
  login [--remember]   Sign in with email, password and passcode
  status               Show the stored session
  renew                Renew the access token now
  logout               Sign out and forget the stored session
  watch                Keep the session alive until Ctrl+C

Environment:
  BOUTIQUE_API_URL     Auth API base URL
  BOUTIQUE_STORE       Session store: file | keyring
  BOUTIQUE_LOG_DIR     Also write logs to a daily file in this directory
  RUST_LOG             Log filter (default: warn)";

const ALREADY_SIGNED_IN: &str =
    "Already signed in. Run `boutique logout` first to switch accounts.";

/// Initialize the tracing subscriber for logging.
/// The returned guard must stay alive for file logs to be flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("BOUTIQUE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "boutique.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    config.apply_env()?;
    info!(api = %config.api_base_url, store = ?config.store_backend, "Configuration loaded");

    let store = config.open_store().context("Failed to open session store")?;
    let transport = Arc::new(HttpTransport::from_config(&config)?);
    let controller = SessionController::new(transport, store, &config);

    match command {
        "login" => {
            let remember = args.iter().any(|a| a == "--remember");
            login(&controller, &mut config, remember).await
        }
        "status" => status(&controller).await,
        "renew" => renew(&controller).await,
        "logout" => logout(&controller).await,
        "watch" => watch(&controller).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn restore(controller: &SessionController) -> RestoreOutcome {
    let outcome = controller.startup_restore().await;
    match outcome {
        RestoreOutcome::KeptCached => {
            println!("Could not reach the server; using the stored session for now.")
        }
        RestoreOutcome::Cleared => {
            println!("Your stored session has expired. Please sign in again.")
        }
        _ => {}
    }
    outcome
}

async fn login(
    controller: &SessionController,
    config: &mut Config,
    remember_flag: bool,
) -> Result<()> {
    // A transiently kept session with a cached token counts as signed in too
    restore(controller).await;
    if controller.credential_state().await == CredentialState::Authenticated {
        print_snapshot(&controller.snapshot().await);
        println!("{}", ALREADY_SIGNED_IN);
        return Ok(());
    }

    println!("\n=== Boutique Sign-in ===\n");

    let pending = loop {
        let email = prompt::prompt_email(config.last_email.as_deref())?;
        let password = prompt::prompt_password()?;

        println!("\nChecking credentials...");
        match controller.submit_credentials(&email, &password).await {
            Ok(pending) => break pending,
            Err(e) if retry_credentials(&e) => println!("{}\n", e),
            Err(AuthError::Validation(ValidationError::AlreadyAuthenticated)) => {
                println!("{}", ALREADY_SIGNED_IN);
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::Transient => {
                println!("Unable to reach the store right now: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    };

    config.last_email = Some(pending.email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("A passcode was sent to {}.", pending.email);
    let remember = remember_flag || prompt::prompt_yes_no("Keep me signed in?", true)?;

    loop {
        let remaining = controller.otp_time_remaining().await.unwrap_or_default();
        let code = prompt::read_line(&format!(
            "Passcode (expires in {}, empty to cancel): ",
            format_countdown(remaining)
        ))?;
        if code.is_empty() {
            controller.cancel_otp().await;
            println!("Sign-in cancelled.");
            return Ok(());
        }

        match controller.confirm_otp(&code, remember).await {
            Ok(user) => {
                let name = user.display_name().unwrap_or_else(|| pending.email.clone());
                println!("\nWelcome back, {}!", name);
                return Ok(());
            }
            Err(AuthError::Validation(ValidationError::OtpExpired)) => {
                println!("The passcode expired. Run `boutique login` to start over.");
                return Ok(());
            }
            Err(AuthError::Validation(ValidationError::NoPendingLogin)) => {
                println!("This sign-in is no longer active. Run `boutique login` to start over.");
                return Ok(());
            }
            Err(e @ AuthError::Storage(_)) => return Err(e.into()),
            Err(e) => println!("{}", e),
        }
    }
}

/// Whether the credentials prompt should ask again after `err`
fn retry_credentials(err: &AuthError) -> bool {
    matches!(
        err,
        AuthError::Rejected(_) | AuthError::Validation(ValidationError::EmptyCredentials)
    )
}

async fn status(controller: &SessionController) -> Result<()> {
    if restore(controller).await == RestoreOutcome::NoSession {
        println!("Not signed in.");
        return Ok(());
    }
    print_snapshot(&controller.snapshot().await);
    Ok(())
}

async fn renew(controller: &SessionController) -> Result<()> {
    match restore(controller).await {
        RestoreOutcome::NoSession | RestoreOutcome::Cleared => {
            println!("Not signed in.");
            return Ok(());
        }
        RestoreOutcome::Restored => {
            println!("Session renewed.");
            return Ok(());
        }
        _ => {}
    }
    match controller.renew_now().await {
        Ok(_) => println!("Session renewed."),
        Err(e) => println!("Renewal failed: {}", e),
    }
    Ok(())
}

async fn logout(controller: &SessionController) -> Result<()> {
    restore(controller).await;
    controller.logout().await;
    println!("Signed out.");
    Ok(())
}

async fn watch(controller: &SessionController) -> Result<()> {
    if matches!(restore(controller).await, RestoreOutcome::NoSession | RestoreOutcome::Cleared) {
        println!("Not signed in.");
        return Ok(());
    }

    print_snapshot(&controller.snapshot().await);
    println!("Keeping the session alive. Press Ctrl+C to stop.");

    let mut changes = controller.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped; the session stays stored.");
                return Ok(());
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = *changes.borrow_and_update();
                println!("[{}] Session {}", Local::now().format("%H:%M:%S"), state);
                if state == CredentialState::Anonymous {
                    println!("Signed out by the server. Run `boutique login` to sign in again.");
                    return Ok(());
                }
            }
        }
    }
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("State:       {}", snapshot.state);
    if let Some(user) = &snapshot.user {
        let name = user.display_name().unwrap_or_else(|| "(unnamed)".to_string());
        println!("User:        {}", name);
        if let Some(email) = user.email() {
            println!("Email:       {}", email);
        }
    }
    if let Some(device_id) = &snapshot.device_id {
        println!("Device:      {}", device_id);
    }
    if let Some(remaining) = snapshot.otp_remaining {
        println!("Passcode:    expires in {}", format_countdown(remaining));
    }
    if let Some(at) = snapshot.authenticated_at {
        println!("Signed in:   {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    }
    if let Some(at) = snapshot.token_expires_at {
        println!("Token until: {}", at.with_timezone(&Local).format("%H:%M:%S"));
    }
    println!("Remembered:  {}", if snapshot.remembered { "yes" } else { "no" });
    println!("Auto-renew:  {}", if snapshot.renewal_armed { "on" } else { "off" });
}
