//! In-process `AuthTransport` for controller tests.
//!
//! Each operation pops a queued response; when the queue is empty a default
//! success is returned. Passcode checks and refreshes can be held at a gate
//! to simulate a slow network round-trip.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::auth::UserProfile;

use super::transport::{AuthTransport, LoginChallenge, OtpSubmission, TokenGrant};
use super::ApiError;

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    logins: Mutex<VecDeque<Result<LoginChallenge, ApiError>>>,
    verifies: Mutex<VecDeque<Result<TokenGrant, ApiError>>>,
    refreshes: Mutex<VecDeque<Result<TokenGrant, ApiError>>>,
    logouts: Mutex<VecDeque<Result<(), ApiError>>>,
    verify_gate: Mutex<Option<Arc<Notify>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    seen_refresh_tokens: Mutex<Vec<Option<String>>>,
    seen_submissions: Mutex<Vec<(String, String, String, bool)>>,
    pub login_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

pub(crate) fn challenge(email: &str, device_id: &str) -> LoginChallenge {
    LoginChallenge {
        email: email.to_string(),
        device_id: device_id.to_string(),
        expires_in: Some(300),
    }
}

pub(crate) fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        user: UserProfile::from(json!({"id": 1, "email": "a@b.com", "name": "Ada"})),
        expires_in: Some(900),
    }
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap().pop_front()
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, result: Result<LoginChallenge, ApiError>) {
        self.logins.lock().unwrap().push_back(result);
    }

    pub fn push_verify(&self, result: Result<TokenGrant, ApiError>) {
        self.verifies.lock().unwrap().push_back(result);
    }

    pub fn push_refresh(&self, result: Result<TokenGrant, ApiError>) {
        self.refreshes.lock().unwrap().push_back(result);
    }

    pub fn push_logout(&self, result: Result<(), ApiError>) {
        self.logouts.lock().unwrap().push_back(result);
    }

    /// Hold every subsequent passcode check until the returned notifier fires
    pub fn gate_verify(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.verify_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold every subsequent refresh until the returned notifier fires
    pub fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn refresh_tokens_seen(&self) -> Vec<Option<String>> {
        self.seen_refresh_tokens.lock().unwrap().clone()
    }

    pub fn submissions_seen(&self) -> Vec<(String, String, String, bool)> {
        self.seen_submissions.lock().unwrap().clone()
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthTransport for ScriptedTransport {
    async fn login(&self, email: &str, _password: &str) -> Result<LoginChallenge, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        pop(&self.logins).unwrap_or_else(|| Ok(challenge(email, "D1")))
    }

    async fn verify_otp(&self, submission: OtpSubmission<'_>) -> Result<TokenGrant, ApiError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_submissions.lock().unwrap().push((
            submission.email.to_string(),
            submission.device_id.to_string(),
            submission.code.to_string(),
            submission.remember_me,
        ));
        let gate = self.verify_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        pop(&self.verifies).unwrap_or_else(|| Ok(grant("T1", Some("R1"))))
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenGrant, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens
            .lock()
            .unwrap()
            .push(refresh_token.map(str::to_string));
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        pop(&self.refreshes).unwrap_or_else(|| Ok(grant("T-renewed", None)))
    }

    async fn logout(&self, _device_id: &str, _access_token: Option<&str>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        pop(&self.logouts).unwrap_or(Ok(()))
    }
}
