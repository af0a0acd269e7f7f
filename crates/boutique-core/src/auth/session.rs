use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::api::{LoginChallenge, TokenGrant};
use crate::store::keys;
use crate::store::{KeyValueStore, StoreOp};

/// Where the shopper is in the sign-in lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CredentialState {
    #[default]
    Anonymous,
    AwaitingOtp,
    Authenticated,
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CredentialState::Anonymous => "signed out",
            CredentialState::AwaitingOtp => "waiting for passcode",
            CredentialState::Authenticated => "signed in",
        };
        f.write_str(label)
    }
}

/// The signed-in shopper's profile as returned by the backend.
/// Kept as raw JSON; only a few well-known fields are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Value);

impl From<Value> for UserProfile {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl UserProfile {
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    fn field(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|name| self.0.get(*name)).filter(|v| !v.is_null())
    }

    /// User identifier, whether the backend sends it as a number or a string
    pub fn id(&self) -> Option<String> {
        match self.field(&["id", "_id", "userId"])? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.field(&["email"]).and_then(Value::as_str)
    }

    /// Best name to greet the shopper with
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.field(&["name", "fullName"]).and_then(Value::as_str) {
            return Some(name.to_string());
        }
        let first = self.field(&["firstName"]).and_then(Value::as_str);
        let last = self.field(&["lastName"]).and_then(Value::as_str);
        match (first, last) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(f), None) => Some(f.to_string()),
            (None, Some(l)) => Some(l.to_string()),
            (None, None) => self.email().map(str::to_string),
        }
    }
}

/// A sign-in that has passed the password step and waits for its passcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub email: String,
    pub device_id: String,
    pub expires_at: Instant,
}

impl PendingLogin {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Countdown until the passcode can no longer be entered
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Session values read back from the store at startup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedSession {
    pub has_marker: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub device_id: Option<String>,
    pub user: Option<UserProfile>,
}

impl CachedSession {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let non_empty = |key: &str| -> Result<Option<String>> {
            Ok(store.get(key)?.filter(|v| !v.is_empty()))
        };
        let user = match non_empty(keys::USER_PROFILE)? {
            Some(raw) => Some(
                serde_json::from_str::<UserProfile>(&raw)
                    .context("Failed to parse stored user profile")?,
            ),
            None => None,
        };
        Ok(Self {
            has_marker: non_empty(keys::HAS_ACTIVE_SESSION)?.as_deref() == Some("true"),
            access_token: non_empty(keys::ACCESS_TOKEN)?,
            refresh_token: non_empty(keys::REFRESH_TOKEN)?,
            device_id: non_empty(keys::DEVICE_ID)?,
            user,
        })
    }
}

/// Read-only view of the session for callers
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: CredentialState,
    pub user: Option<UserProfile>,
    pub device_id: Option<String>,
    pub pending_email: Option<String>,
    pub otp_remaining: Option<Duration>,
    pub remembered: bool,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub renewal_armed: bool,
}

/// In-memory session state.
///
/// Every method is a pure state change; persistence is driven by the
/// controller from `persist_ops`/`clear_ops`. Lifecycle transitions bump
/// `epoch` so results of calls started before the transition can be told
/// apart from current ones.
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    pub state: CredentialState,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub device_id: Option<String>,
    pub user: Option<UserProfile>,
    pub pending: Option<PendingLogin>,
    /// A stored session whose restoration hit a transient failure; the
    /// renewal timer keeps retrying it.
    pub restore_pending: bool,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub epoch: u64,
}

fn expiry_from(expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in?).ok()?;
    Some(Utc::now() + chrono::Duration::seconds(secs))
}

impl Session {
    /// A session is believed active while signed in, or while a stored
    /// session is still being restored.
    pub fn is_active(&self) -> bool {
        self.state == CredentialState::Authenticated || self.restore_pending
    }

    /// Whether the renewal result captured at `epoch` for `device_id` still applies
    pub fn is_current(&self, epoch: u64, device_id: Option<&str>) -> bool {
        self.epoch == epoch && self.is_active() && self.device_id.as_deref() == device_id
    }

    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Session {
            epoch,
            ..Session::default()
        };
    }

    pub fn begin_otp(&mut self, challenge: LoginChallenge, fallback_ttl: Duration) -> PendingLogin {
        self.reset();
        let ttl = challenge.expires_in.map(Duration::from_secs).unwrap_or(fallback_ttl);
        let pending = PendingLogin {
            email: challenge.email,
            device_id: challenge.device_id,
            expires_at: Instant::now() + ttl,
        };
        self.state = CredentialState::AwaitingOtp;
        self.pending = Some(pending.clone());
        pending
    }

    /// Drop the pending login. Returns false when there was none.
    pub fn cancel_pending(&mut self) -> bool {
        if self.state != CredentialState::AwaitingOtp {
            return false;
        }
        self.reset();
        true
    }

    /// Drop the pending login if its passcode window has closed
    pub fn expire_pending_if_due(&mut self) -> bool {
        let expired = self.pending.as_ref().is_some_and(PendingLogin::is_expired);
        if expired {
            self.reset();
        }
        expired
    }

    pub fn authenticate(
        &mut self,
        grant: TokenGrant,
        device_id: Option<String>,
        refresh_token: Option<String>,
    ) {
        self.epoch += 1;
        self.state = CredentialState::Authenticated;
        self.pending = None;
        self.restore_pending = false;
        self.access_token = Some(grant.access_token);
        self.refresh_token = grant.refresh_token.or(refresh_token);
        self.device_id = device_id;
        self.user = Some(grant.user);
        self.authenticated_at = Some(Utc::now());
        self.token_expires_at = expiry_from(grant.expires_in);
    }

    /// Swap in renewed tokens. Not a lifecycle transition: overlapping
    /// renewals for the same session all apply, last one wins.
    pub fn apply_renewal(&mut self, grant: TokenGrant) {
        if self.state != CredentialState::Authenticated {
            let device_id = self.device_id.clone();
            let refresh_token = self.refresh_token.clone();
            self.authenticate(grant, device_id, refresh_token);
            return;
        }
        self.access_token = Some(grant.access_token);
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        self.user = Some(grant.user);
        self.token_expires_at = expiry_from(grant.expires_in);
    }

    /// Load stored credentials ahead of a restoration renewal.
    /// The access token stays out of memory until the session is confirmed.
    pub fn begin_restore(&mut self, cached: &CachedSession) {
        self.reset();
        self.refresh_token = cached.refresh_token.clone();
        self.device_id = cached.device_id.clone();
        self.user = cached.user.clone();
        self.restore_pending = true;
    }

    /// Adopt what the store holds after a restoration attempt failed transiently
    pub fn keep_cached(&mut self, cached: CachedSession) {
        self.epoch += 1;
        self.pending = None;
        self.refresh_token = cached.refresh_token;
        self.device_id = cached.device_id;
        self.user = cached.user;
        match cached.access_token {
            Some(token) => {
                self.state = CredentialState::Authenticated;
                self.access_token = Some(token);
                self.restore_pending = false;
            }
            None => {
                self.state = CredentialState::Anonymous;
                self.access_token = None;
                self.restore_pending = true;
            }
        }
    }

    /// Store writes that make the persisted session match this one
    pub fn persist_ops(&self) -> Result<Vec<StoreOp>> {
        let mut ops = Vec::with_capacity(keys::SESSION_KEYS.len());
        match &self.access_token {
            Some(token) => ops.push(StoreOp::Set(keys::ACCESS_TOKEN, token.clone())),
            None => ops.push(StoreOp::Remove(keys::ACCESS_TOKEN)),
        }
        match &self.refresh_token {
            Some(token) => ops.push(StoreOp::Set(keys::REFRESH_TOKEN, token.clone())),
            None => ops.push(StoreOp::Remove(keys::REFRESH_TOKEN)),
        }
        match &self.user {
            Some(user) => ops.push(StoreOp::Set(
                keys::USER_PROFILE,
                serde_json::to_string(user).context("Failed to serialize user profile")?,
            )),
            None => ops.push(StoreOp::Remove(keys::USER_PROFILE)),
        }
        match &self.device_id {
            Some(device_id) => ops.push(StoreOp::Set(keys::DEVICE_ID, device_id.clone())),
            None => ops.push(StoreOp::Remove(keys::DEVICE_ID)),
        }
        if self.is_active() {
            ops.push(StoreOp::Set(keys::HAS_ACTIVE_SESSION, "true".to_string()));
        } else {
            ops.push(StoreOp::Remove(keys::HAS_ACTIVE_SESSION));
        }
        Ok(ops)
    }

    pub fn clear_ops() -> Vec<StoreOp> {
        keys::SESSION_KEYS.into_iter().map(StoreOp::Remove).collect()
    }

    pub fn snapshot(&self, renewal_armed: bool) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            user: self.user.clone(),
            device_id: self
                .device_id
                .clone()
                .or_else(|| self.pending.as_ref().map(|p| p.device_id.clone())),
            pending_email: self.pending.as_ref().map(|p| p.email.clone()),
            otp_remaining: self.pending.as_ref().map(PendingLogin::remaining),
            remembered: self.refresh_token.is_some(),
            authenticated_at: self.authenticated_at,
            token_expires_at: self.token_expires_at,
            renewal_armed,
        }
    }
}
