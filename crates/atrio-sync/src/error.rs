//! # Sync Error Types
//!
//! Error types for terminal-side sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Pairing/Auth  │  │     Transport           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  PairingExpired │  │  TransientNetwork       │ │
//! │  │  MissingServer  │  │  AlreadyClaimed │  │  Timeout                │ │
//! │  │  InvalidUrl     │  │  InvalidCred    │  │  UnexpectedStatus       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │     Queue       │  │      Protocol           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  CorruptRecord  │  │  SerializationFailed    │ │
//! │  │                 │  │  MaxAttempts    │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all terminal-side sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Venue server URL not configured.
    #[error("Venue server URL not configured. Run initial setup first.")]
    MissingServerUrl,

    /// Invalid server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Failed to read or write the credential file.
    #[error("Credential store error: {0}")]
    CredentialStoreFailed(String),

    // =========================================================================
    // Pairing & Credential Errors
    // =========================================================================
    /// The pairing token or code is past its expiry.
    ///
    /// ## When This Occurs
    /// - Token claimed more than 60 minutes after issue
    /// - Token claimed after an administrator issued a replacement
    #[error("Pairing token expired. Ask an administrator for a new one.")]
    PairingExpired,

    /// The pairing token was already claimed by a terminal.
    ///
    /// Claims are first-wins: exactly one terminal receives the credential.
    #[error("Pairing token already claimed by another terminal.")]
    PairingAlreadyClaimed,

    /// The venue server rejected our device credential (401/403).
    ///
    /// Sync and heartbeat halt until the terminal is re-paired or the
    /// operator logs in with a PIN.
    #[error("Device credential rejected: {0}")]
    InvalidCredential(String),

    /// No device credential stored yet; the terminal has never paired.
    #[error("Terminal is not paired with a venue server")]
    NotPaired,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The request failed before producing an HTTP response.
    ///
    /// ## When This Occurs
    /// - DNS failure, connection refused, link down
    /// - Request or connect timeout in reqwest
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// A sync pass exceeded its time budget and was abandoned.
    #[error("Sync pass timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered with a status the protocol does not define.
    #[error("Unexpected server response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a response body.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A queued payload failed the structural monetary checks.
    ///
    /// The record is quarantined locally and never submitted.
    #[error("Queue record {id} is corrupt: {reason}")]
    CorruptRecord { id: i64, reason: String },

    /// The server refused a record; it stays queued under bounded retry.
    #[error("Record rejected by server: {reason}")]
    ValidationRejected { reason: String },

    /// Automatic retry stopped for a record; it stays visible for the
    /// operator but is excluded from further passes.
    #[error("Record {id} exhausted {attempts} submission attempts")]
    MaxAttemptsExceeded { id: i64, attempts: i64 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<atrio_db::DbError> for SyncError {
    fn from(err: atrio_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Classify reqwest failures: anything that never produced a usable response
/// is transient (the caller retries with backoff); a body we could not decode
/// is a protocol error and is not retried.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::TransientNetwork(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can be
    /// retried with backoff.
    ///
    /// ## Retryable Errors
    /// - Network failures (link down, DNS, refused)
    /// - Timeouts
    /// - Server 5xx responses
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Credential rejection (needs re-pairing, not retrying)
    /// - Corrupt/exhausted records
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientNetwork(_) | SyncError::Timeout(_) => true,
            SyncError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error ends automatic processing for the record
    /// or session it concerns. Terminal errors surface to the operator
    /// instead of re-entering the backoff schedule.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::PairingExpired
                | SyncError::PairingAlreadyClaimed
                | SyncError::InvalidCredential(_)
                | SyncError::NotPaired
                | SyncError::CorruptRecord { .. }
                | SyncError::MaxAttemptsExceeded { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingServerUrl
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::TransientNetwork("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout(25).is_retryable());
        assert!(SyncError::UnexpectedStatus {
            status: 503,
            body: "unavailable".into()
        }
        .is_retryable());

        assert!(!SyncError::UnexpectedStatus {
            status: 418,
            body: "teapot".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidCredential("expired".into()).is_retryable());
        assert!(!SyncError::PairingExpired.is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(SyncError::PairingAlreadyClaimed.is_terminal());
        assert!(SyncError::InvalidCredential("revoked".into()).is_terminal());
        assert!(SyncError::CorruptRecord {
            id: 7,
            reason: "total mismatch".into()
        }
        .is_terminal());

        assert!(!SyncError::TransientNetwork("dns".into()).is_terminal());
        assert!(!SyncError::ValidationRejected {
            reason: "unknown operator".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::MaxAttemptsExceeded {
            id: 42,
            attempts: 10,
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("10"));
    }
}
