//! Server configuration loaded from environment variables.

use rand::RngCore;

/// Process-wide configuration. Loaded once in `main` after `.env` handling.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the HTTP/WebSocket listener binds to.
    pub port: u16,
    /// Symmetric key for session token signatures.
    pub token_secret: [u8; 32],
    /// Unique identity of this server instance, used for leader leases.
    pub instance_id: String,
    /// Leader lease time-to-live in milliseconds.
    pub lease_ttl_ms: u64,
    /// Leader lease renewal interval in milliseconds.
    pub lease_renew_ms: u64,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// `NOCTURNE_TOKEN_SECRET` must be 64 hex characters; when absent a
    /// random key is generated, which invalidates all tokens on restart.
    pub fn from_env() -> Self {
        let port = std::env::var("NOCTURNE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(7420);

        let token_secret = std::env::var("NOCTURNE_TOKEN_SECRET")
            .ok()
            .and_then(|hex_key| hex::decode(hex_key).ok())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "NOCTURNE_TOKEN_SECRET not set or invalid; generating a random key. \
                     Sessions will not survive a restart."
                );
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            });

        let instance_id = std::env::var("NOCTURNE_INSTANCE_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(crate::types::new_id);

        Self {
            port,
            token_secret,
            instance_id,
            lease_ttl_ms: 10_000,
            lease_renew_ms: 3_000,
        }
    }
}
