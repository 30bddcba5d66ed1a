//! Key/value token persistence.
//!
//! This module provides the `TokenStore` trait plus three backends:
//! - `MemoryStore`: process-local, for tests and ephemeral sessions
//! - `FileStore`: a JSON file in the data directory
//! - `KeyringStore`: the OS keychain via keyring
//!
//! Keys are fixed strings; see `keys`.

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

/// Fixed storage keys.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "mindfuel_access_token";
    pub const REFRESH_TOKEN: &str = "mindfuel_refresh_token";

    pub const SPOTIFY_ACCESS_TOKEN: &str = "spotify_access_token";
    pub const SPOTIFY_REFRESH_TOKEN: &str = "spotify_refresh_token";
    /// Epoch milliseconds.
    pub const SPOTIFY_TOKEN_EXPIRES: &str = "spotify_token_expires";
    /// `state` of an authorization started in an earlier process.
    pub const SPOTIFY_AUTH_STATE: &str = "spotify_auth_state";
}

/// Synchronous string storage, shared across tasks.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
