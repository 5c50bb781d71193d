//! Venue API configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use serde::{Deserialize, Serialize};
use std::env;

/// Venue API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// HTTP listen port
    pub http_port: u16,

    /// SQLite database path (or `sqlite::memory:` for ephemeral runs)
    pub database_url: String,

    /// JWT secret key for signing device credentials
    pub jwt_secret: String,

    /// Device credential lifetime in seconds (default: 30 days)
    pub jwt_device_lifetime_secs: i64,

    /// Public base URL used to build pairing direct links,
    /// e.g. `https://venue.example.com`
    pub public_base_url: String,

    /// Shared secret required on admin routes
    pub admin_token: String,

    /// Pairing token time-to-live in seconds
    pub pairing_token_ttl_secs: i64,

    /// Maximum records accepted in one sync batch
    pub sync_batch_size_limit: usize,
}

impl VenueConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = VenueConfig {
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("HTTP_PORT".to_string()))?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://venue.db".to_string()),

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                // Generate-once default for development
                // In production, this MUST be set via environment variable
                "atrio-venue-dev-secret-change-in-production".to_string()
            }),

            jwt_device_lifetime_secs: env::var("JWT_DEVICE_LIFETIME_SECS")
                .unwrap_or_else(|_| "2592000".to_string()) // 30 days
                .parse()
                .map_err(|_| ConfigError::InvalidValue("JWT_DEVICE_LIFETIME_SECS".to_string()))?,

            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            admin_token: env::var("ADMIN_TOKEN")
                .map_err(|_| ConfigError::MissingRequired("ADMIN_TOKEN".to_string()))?,

            pairing_token_ttl_secs: env::var("PAIRING_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string()) // 10 minutes
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAIRING_TOKEN_TTL_SECS".to_string()))?,

            sync_batch_size_limit: env::var("SYNC_BATCH_SIZE_LIMIT")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SYNC_BATCH_SIZE_LIMIT".to_string()))?,
        };

        if config.jwt_device_lifetime_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "JWT_DEVICE_LIFETIME_SECS".to_string(),
            ));
        }
        if config.pairing_token_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "PAIRING_TOKEN_TTL_SECS".to_string(),
            ));
        }

        Ok(config)
    }
}

impl Default for VenueConfig {
    /// Defaults suitable for tests; never used for a production listener.
    fn default() -> Self {
        VenueConfig {
            http_port: 8080,
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_device_lifetime_secs: 2_592_000,
            public_base_url: "http://localhost:8080".to_string(),
            admin_token: "test-admin-token".to_string(),
            pairing_token_ttl_secs: 600,
            sync_batch_size_limit: 200,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
