//! Durable key-value storage for the session.
//!
//! The store is shared with other parts of the storefront (cart count,
//! wishlist count, language preference). The session controller only ever
//! touches the keys listed in `keys::SESSION_KEYS`.
//!
//! Implementations:
//! - `MemoryStore`: process-local, used in tests and for ephemeral sessions
//! - `FileStore`: a JSON object on disk, rewritten atomically per batch
//! - `KeyringStore`: one OS keychain entry per key

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Key names owned by the session controller
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const USER_PROFILE: &str = "userProfile";
    pub const DEVICE_ID: &str = "deviceId";
    pub const HAS_ACTIVE_SESSION: &str = "hasActiveSession";

    pub const SESSION_KEYS: [&str; 5] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        USER_PROFILE,
        DEVICE_ID,
        HAS_ACTIVE_SESSION,
    ];
}

/// A single mutation in a batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set(&'static str, String),
    Remove(&'static str),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Apply several mutations as one step.
    /// Stores that can write everything at once should override this.
    fn write_batch(&self, ops: &[StoreOp]) -> Result<()> {
        for op in ops {
            match op {
                StoreOp::Set(key, value) => self.set(key, value)?,
                StoreOp::Remove(key) => self.remove(key)?,
            }
        }
        Ok(())
    }
}
