//! Core library for the boutique storefront session.
//!
//! This crate owns the shopper's authenticated-session lifecycle: credential
//! submission, one-time-passcode confirmation, token persistence, silent
//! periodic renewal and logout.
//!
//! - `auth`: the `SessionController` state machine and its renewal timer
//! - `api`: the `AuthTransport` seam and its REST implementation
//! - `store`: durable key-value stores the session is persisted to
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod store;

pub use api::{AuthTransport, HttpTransport};
pub use auth::{AuthError, CredentialState, ErrorKind, SessionController};
pub use config::Config;
pub use store::KeyValueStore;
