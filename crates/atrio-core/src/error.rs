//! # Error Types
//!
//! Domain-specific error types for atrio-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  atrio-core errors (this file)                                         │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Payload validation failures                    │
//! │                                                                         │
//! │  atrio-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  atrio-sync errors (separate crate)                                    │
//! │  └── SyncError        - Pairing / transport / retry taxonomy           │
//! │                                                                         │
//! │  venue-api errors (in app)                                             │
//! │  └── ApiError         - What clients see (HTTP status + body)          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError/ApiError → caller       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (sale id, field name, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload JSON could not be parsed into a `SalePayload`.
    ///
    /// ## When This Occurs
    /// - The stored queue payload is truncated or garbled
    /// - A register shipped a payload from an incompatible schema version
    ///
    /// Records with this error are quarantined, never retried.
    #[error("Sale payload is not valid JSON: {0}")]
    MalformedPayload(String),

    /// Payload parsed but failed structural monetary checks.
    ///
    /// ## When This Occurs
    /// - Empty line items or tenders
    /// - Non-positive total
    /// - Total disagrees with line totals or tender amounts
    ///
    /// Records with this error are quarantined, never retried.
    #[error("Sale {sale_id} failed integrity check: {source}")]
    CorruptSale {
        sale_id: String,
        source: ValidationError,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Payload validation errors.
///
/// Used on both sides of the wire: the terminal quarantines on these before
/// spending a network call, the server rejects on them at intake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Collection has too many entries.
    #[error("{field} must have at most {max} entries")]
    TooMany { field: String, max: usize },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two monetary figures that must agree do not.
    ///
    /// The load-bearing check of the whole pipeline: a sale whose total does
    /// not reconcile with its parts must never reach the ledger.
    #[error("{field} is {actual} cents but {expected_from} sums to {expected} cents")]
    AmountMismatch {
        field: String,
        actual: i64,
        expected: i64,
        expected_from: String,
    },

    /// Arithmetic over the payload overflowed i64.
    #[error("{field} overflows during summation")]
    Overflow { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::AmountMismatch {
            field: "totalCents".to_string(),
            actual: 1300,
            expected: 1200,
            expected_from: "lines".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "totalCents is 1300 cents but lines sums to 1200 cents"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "lines".to_string(),
        };
        assert_eq!(err.to_string(), "lines is required");

        let err = ValidationError::MustBePositive {
            field: "totalCents".to_string(),
        };
        assert_eq!(err.to_string(), "totalCents must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "tenders".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
