//! Device credential management for the Venue API.
//!
//! Two concerns live here:
//! - JWT device credentials (issued at pairing / PIN login, 30-day lifetime)
//! - Argon2 hashing for device PINs

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VenueError;

// =============================================================================
// JWT Claims
// =============================================================================

/// Claims embedded in a device credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClaims {
    /// Subject: the device id
    pub sub: String,

    /// Issued at (unix timestamp)
    pub iat: i64,

    /// Expiration (unix timestamp)
    pub exp: i64,

    /// Unique token id
    pub jti: String,

    /// Always "device"; rejects tokens minted for other audiences
    pub token_type: String,
}

// =============================================================================
// JWT Manager
// =============================================================================

/// Signs and validates device credentials.
#[derive(Clone)]
pub struct JwtManager {
    secret: String,
    device_lifetime_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager.
    pub fn new(secret: String, device_lifetime_secs: i64) -> Self {
        JwtManager {
            secret,
            device_lifetime_secs,
        }
    }

    /// Generate a device credential for a paired terminal.
    pub fn generate_device_token(&self, device_id: &str) -> Result<String, VenueError> {
        let now = Utc::now().timestamp();
        let claims = DeviceClaims {
            sub: device_id.to_string(),
            iat: now,
            exp: now + self.device_lifetime_secs,
            jti: Uuid::new_v4().to_string(),
            token_type: "device".to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| VenueError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Validate a device credential and return its claims.
    pub fn validate_device_token(&self, token: &str) -> Result<DeviceClaims, VenueError> {
        let data = decode::<DeviceClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| VenueError::AuthFailed(format!("Invalid credential: {}", e)))?;

        if data.claims.token_type != "device" {
            return Err(VenueError::AuthFailed("Not a device credential".to_string()));
        }

        Ok(data.claims)
    }
}

/// Extract a bearer token from an Authorization header value.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

// =============================================================================
// PIN Hashing
// =============================================================================

/// Hash a device PIN with Argon2.
pub fn hash_pin(pin: &str) -> Result<String, VenueError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VenueError::Internal(format!("PIN hashing failed: {}", e)))
}

/// Verify a PIN against its stored hash. Malformed hashes verify as false.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(pin.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
