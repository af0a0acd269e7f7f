//! The session controller: the one owner of the shopper's sign-in state.
//!
//! All state and the renewal timer live behind a single async mutex. The
//! lock is never held across a network call; instead each operation
//! snapshots what it needs, releases the lock, awaits the transport, then
//! re-acquires the lock and checks the session `epoch` before applying the
//! result. Store writes happen under the lock, in the same step as the
//! in-memory change they mirror.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::{AuthTransport, OtpSubmission, TokenGrant};
use crate::config::Config;
use crate::store::KeyValueStore;

use super::error::{AuthError, ErrorKind, ValidationError};
use super::otp::validate_otp;
use super::renewal::RenewalTimer;
use super::session::{
    CachedSession, CredentialState, PendingLogin, Session, SessionSnapshot, UserProfile,
};

/// What `startup_restore` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No stored session marker; nothing was sent over the network
    NoSession,
    /// The stored session was renewed and is active
    Restored,
    /// Renewal failed transiently; the stored session is kept and retried on the next tick
    KeptCached,
    /// The server rejected the stored credential; the stored session was cleared
    Cleared,
    /// A session was already active or being established; nothing was done
    AlreadyActive,
    /// The session changed (logout, new login) while restoration was in flight
    Superseded,
}

/// Successful `renew_now` results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The session changed while the call was in flight; the result was dropped
    Discarded,
}

struct Guarded {
    session: Session,
    timer: Option<RenewalTimer>,
    timer_generation: u64,
}

pub(crate) struct Inner {
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn KeyValueStore>,
    renewal_interval: Duration,
    otp_ttl: Duration,
    guarded: Mutex<Guarded>,
    events: watch::Sender<CredentialState>,
}

/// Cheap-to-clone handle to the session. All clones share one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn KeyValueStore>,
        config: &Config,
    ) -> Self {
        Self::with_timing(transport, store, config.renewal_interval(), config.otp_ttl())
    }

    pub fn with_timing(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn KeyValueStore>,
        renewal_interval: Duration,
        otp_ttl: Duration,
    ) -> Self {
        let (events, _) = watch::channel(CredentialState::Anonymous);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                renewal_interval,
                otp_ttl,
                guarded: Mutex::new(Guarded {
                    session: Session::default(),
                    timer: None,
                    timer_generation: 0,
                }),
                events,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    async fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.inner.guarded.lock().await
    }

    fn publish(&self, guarded: &Guarded) {
        let state = guarded.session.state;
        self.inner.events.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn expire_if_due(&self, guarded: &mut Guarded) -> bool {
        if guarded.session.expire_pending_if_due() {
            info!("Passcode window closed, sign-in abandoned");
            self.publish(guarded);
            true
        } else {
            false
        }
    }

    /// Start a fresh renewal timer, replacing any running one
    fn arm_locked(&self, guarded: &mut Guarded) {
        guarded.timer = None;
        guarded.timer_generation += 1;
        guarded.timer = Some(RenewalTimer::spawn(
            Arc::downgrade(&self.inner),
            self.inner.renewal_interval,
            guarded.timer_generation,
        ));
        debug!(generation = guarded.timer_generation, "Renewal timer armed");
    }

    fn disarm_locked(&self, guarded: &mut Guarded) {
        if let Some(timer) = guarded.timer.take() {
            debug!(generation = timer.generation(), "Renewal timer disarmed");
        }
    }

    /// Back to anonymous: forget everything, clear the store, stop renewing
    fn end_session_locked(&self, guarded: &mut Guarded) {
        guarded.session.reset();
        if let Err(e) = self.inner.store.write_batch(&Session::clear_ops()) {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.disarm_locked(guarded);
        self.publish(guarded);
    }

    /// Persist `next` and make it the current session
    fn commit_locked(&self, guarded: &mut Guarded, next: Session) -> Result<(), AuthError> {
        self.inner.store.write_batch(&next.persist_ops()?)?;
        guarded.session = next;
        Ok(())
    }

    // =========================================================================
    // Sign-in flow
    // =========================================================================

    /// Send email and password. On success the server has sent a passcode
    /// and the controller waits for it.
    pub async fn submit_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PendingLogin, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ValidationError::EmptyCredentials.into());
        }

        {
            let mut guarded = self.lock().await;
            self.expire_if_due(&mut guarded);
            if guarded.session.state == CredentialState::Authenticated {
                return Err(ValidationError::AlreadyAuthenticated.into());
            }
        }

        info!(email = email, "Submitting credentials");
        let result = self.inner.transport.login(email, password).await;

        let mut guarded = self.lock().await;
        if guarded.session.state == CredentialState::Authenticated {
            return Err(ValidationError::AlreadyAuthenticated.into());
        }

        match result {
            Ok(challenge) => {
                // A fresh sign-in supersedes a restoration still being retried,
                // and the stored session it was retrying goes with it
                if guarded.session.restore_pending {
                    self.inner.store.write_batch(&Session::clear_ops())?;
                    info!("Stored session discarded for a new sign-in");
                }
                self.disarm_locked(&mut guarded);
                let pending = guarded.session.begin_otp(challenge, self.inner.otp_ttl);
                self.publish(&guarded);
                info!(email = %pending.email, device_id = %pending.device_id, "Passcode requested");
                Ok(pending)
            }
            Err(e) => {
                let err = AuthError::from_flow_failure(e);
                warn!(error = %err, kind = ?err.kind(), "Sign-in failed");
                if guarded.session.cancel_pending() {
                    self.publish(&guarded);
                }
                Err(err)
            }
        }
    }

    /// Confirm the passcode sent after `submit_credentials`.
    ///
    /// With `remember_me` the refresh token is persisted so the session
    /// survives restarts; without it only the access token is kept.
    pub async fn confirm_otp(
        &self,
        code: &str,
        remember_me: bool,
    ) -> Result<UserProfile, AuthError> {
        let (pending, epoch, code) = {
            let mut guarded = self.lock().await;
            if self.expire_if_due(&mut guarded) {
                return Err(ValidationError::OtpExpired.into());
            }
            let Some(pending) = guarded.session.pending.clone() else {
                return Err(ValidationError::NoPendingLogin.into());
            };
            let code = validate_otp(code)?.to_string();
            (pending, guarded.session.epoch, code)
        };

        let result = self
            .inner
            .transport
            .verify_otp(OtpSubmission {
                email: &pending.email,
                device_id: &pending.device_id,
                code: &code,
                remember_me,
            })
            .await;

        let mut guarded = self.lock().await;
        if guarded.session.epoch != epoch {
            debug!("Sign-in was cancelled or restarted while the passcode was checked");
            return Err(ValidationError::NoPendingLogin.into());
        }

        match result {
            Ok(grant) => {
                let grant = TokenGrant {
                    refresh_token: if remember_me { grant.refresh_token } else { None },
                    ..grant
                };
                let user = grant.user.clone();
                let mut next = guarded.session.clone();
                next.authenticate(grant, Some(pending.device_id), None);
                self.commit_locked(&mut guarded, next)?;
                self.arm_locked(&mut guarded);
                self.publish(&guarded);
                info!(user_id = ?user.id(), remember_me, "Signed in");
                Ok(user)
            }
            Err(e) => {
                let err = AuthError::from_flow_failure(e);
                if self.expire_if_due(&mut guarded) {
                    return Err(ValidationError::OtpExpired.into());
                }
                warn!(error = %err, kind = ?err.kind(), "Passcode confirmation failed");
                Err(err)
            }
        }
    }

    /// Abandon a sign-in waiting for its passcode. No-op otherwise.
    pub async fn cancel_otp(&self) {
        let mut guarded = self.lock().await;
        if guarded.session.cancel_pending() {
            info!("Sign-in cancelled");
            self.publish(&guarded);
        }
    }

    // =========================================================================
    // Restoration and renewal
    // =========================================================================

    /// Bring back a stored session at process start.
    ///
    /// Visitors who never signed in cause no network traffic. A transient
    /// failure keeps the stored session and lets the renewal timer retry.
    pub async fn startup_restore(&self) -> RestoreOutcome {
        let cached = match CachedSession::load(self.inner.store.as_ref()) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Stored session unreadable, discarding it");
                if let Err(e) = self.inner.store.write_batch(&Session::clear_ops()) {
                    warn!(error = %e, "Failed to clear stored session");
                }
                return RestoreOutcome::NoSession;
            }
        };

        if !cached.has_marker {
            debug!("No stored session");
            return RestoreOutcome::NoSession;
        }

        let epoch = {
            let mut guarded = self.lock().await;
            if guarded.session.is_active()
                || guarded.session.state == CredentialState::AwaitingOtp
            {
                return RestoreOutcome::AlreadyActive;
            }
            guarded.session.begin_restore(&cached);
            guarded.session.epoch
        };

        info!("Restoring stored session");
        match self.renew_now().await {
            Ok(RenewOutcome::Renewed) => RestoreOutcome::Restored,
            Ok(RenewOutcome::Discarded) => RestoreOutcome::Superseded,
            Err(e) if e.kind() == ErrorKind::Rejection => RestoreOutcome::Cleared,
            Err(e) => {
                let mut guarded = self.lock().await;
                if guarded.session.epoch != epoch || !guarded.session.restore_pending {
                    return RestoreOutcome::Superseded;
                }
                warn!(error = %e, "Could not confirm stored session, keeping it for now");
                guarded.session.keep_cached(cached);
                self.arm_locked(&mut guarded);
                self.publish(&guarded);
                RestoreOutcome::KeptCached
            }
        }
    }

    /// Exchange the refresh credential for a fresh access token.
    ///
    /// Only runs while a session is believed active. A transient failure
    /// changes nothing; a rejection ends the session. A result that arrives
    /// after the session changed is dropped.
    pub async fn renew_now(&self) -> Result<RenewOutcome, AuthError> {
        let (epoch, device_id, refresh_token) = {
            let guarded = self.lock().await;
            if !guarded.session.is_active() {
                return Err(ValidationError::NotAuthenticated.into());
            }
            (
                guarded.session.epoch,
                guarded.session.device_id.clone(),
                guarded.session.refresh_token.clone(),
            )
        };

        debug!("Renewing access token");
        let result = self.inner.transport.refresh(refresh_token.as_deref()).await;

        let mut guarded = self.lock().await;
        if !guarded.session.is_current(epoch, device_id.as_deref()) {
            info!("Session changed during renewal, discarding result");
            return Ok(RenewOutcome::Discarded);
        }

        match result {
            Ok(grant) => {
                let restoring = guarded.session.state != CredentialState::Authenticated;
                let mut next = guarded.session.clone();
                next.apply_renewal(grant);
                self.commit_locked(&mut guarded, next)?;
                if restoring {
                    if guarded.timer.is_none() {
                        self.arm_locked(&mut guarded);
                    }
                    self.publish(&guarded);
                    let user_id = guarded.session.user.as_ref().and_then(UserProfile::id);
                    info!(user_id = ?user_id, "Session restored");
                } else {
                    debug!("Access token renewed");
                }
                Ok(RenewOutcome::Renewed)
            }
            Err(e) => {
                let err = AuthError::from_renewal_failure(e);
                if err.kind() == ErrorKind::Rejection {
                    warn!(error = %err, "Refresh credential rejected, signing out");
                    self.end_session_locked(&mut guarded);
                } else {
                    warn!(error = %err, "Renewal failed, keeping current session");
                }
                Err(err)
            }
        }
    }

    /// Sign out. Local state is cleared first and unconditionally; the
    /// server is told afterwards on a best-effort basis.
    pub async fn logout(&self) {
        let (device_id, access_token) = {
            let mut guarded = self.lock().await;
            let device_id = guarded
                .session
                .device_id
                .clone()
                .or_else(|| guarded.session.pending.as_ref().map(|p| p.device_id.clone()));
            let access_token = guarded.session.access_token.clone();
            self.end_session_locked(&mut guarded);
            (device_id, access_token)
        };

        if let Some(device_id) = device_id {
            if let Err(e) = self.inner.transport.logout(&device_id, access_token.as_deref()).await {
                warn!(error = %e, "Server sign-out failed, local session already cleared");
            }
        }
        info!("Signed out");
    }

    // =========================================================================
    // Timer control
    // =========================================================================

    /// (Re)start the renewal timer. Any running timer is stopped first.
    /// Returns false when no session is active.
    pub async fn arm_renewal(&self) -> bool {
        let mut guarded = self.lock().await;
        if !guarded.session.is_active() {
            return false;
        }
        self.arm_locked(&mut guarded);
        true
    }

    pub async fn disarm_renewal(&self) {
        let mut guarded = self.lock().await;
        self.disarm_locked(&mut guarded);
    }

    pub async fn is_renewal_armed(&self) -> bool {
        self.lock().await.timer.is_some()
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub async fn credential_state(&self) -> CredentialState {
        let mut guarded = self.lock().await;
        self.expire_if_due(&mut guarded);
        guarded.session.state
    }

    /// Bearer token for API calls, if signed in
    pub async fn access_token(&self) -> Option<String> {
        self.lock().await.session.access_token.clone()
    }

    pub async fn user(&self) -> Option<UserProfile> {
        let guarded = self.lock().await;
        match guarded.session.state {
            CredentialState::Authenticated => guarded.session.user.clone(),
            _ => None,
        }
    }

    pub async fn pending_login(&self) -> Option<PendingLogin> {
        let mut guarded = self.lock().await;
        self.expire_if_due(&mut guarded);
        guarded.session.pending.clone()
    }

    /// Passcode countdown; `None` when no sign-in is waiting
    pub async fn otp_time_remaining(&self) -> Option<Duration> {
        self.pending_login().await.map(|pending| pending.remaining())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let mut guarded = self.lock().await;
        self.expire_if_due(&mut guarded);
        guarded.session.snapshot(guarded.timer.is_some())
    }

    /// Watch sign-in/sign-out transitions (for cart, wishlist and similar views)
    pub fn subscribe(&self) -> watch::Receiver<CredentialState> {
        self.inner.events.subscribe()
    }
}
