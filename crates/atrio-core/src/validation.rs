//! # Validation Module
//!
//! Payload validation for Atrio POS sync.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Terminal, before the network                                 │
//! │  ├── verify_stored_payload on every queued row                         │
//! │  └── Structural failure → quarantine, no network call spent            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Venue server, at batch intake                                │
//! │  ├── Same checks re-run on the submitted payload                       │
//! │  └── Failure → per-record `rejected` outcome, other records unaffected │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database constraints                                         │
//! │  ├── UNIQUE on idempotency_key (exactly-once)                          │
//! │  └── NOT NULL on monetary columns                                      │
//! │                                                                         │
//! │  The same module runs on both sides: a payload the terminal would     │
//! │  quarantine is exactly a payload the server would reject.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, ValidationError};
use crate::money::Money;
use crate::types::SalePayload;
use crate::{MAX_LINE_QUANTITY, MAX_SALE_LINES, MAX_TENDERS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use atrio_core::validation::validate_uuid;
///
/// assert!(validate_uuid("sale_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("sale_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Sale Payload Integrity
// =============================================================================

/// Checks the structural monetary integrity of a sale payload.
///
/// ## Rules
/// - `sale_id` must be a UUID; `device_id` and `operator_id` must be present
/// - At least one line item, at most [`MAX_SALE_LINES`]
/// - At least one tender, at most [`MAX_TENDERS`]
/// - Quantities in `1..=MAX_LINE_QUANTITY`, unit prices non-negative
/// - Every `line_total_cents` equals `unit_price_cents × quantity`
/// - `total_cents` positive, equal to Σ line totals, equal to Σ tenders
///
/// ## Why so strict?
/// ```text
/// Register bug writes total_cents = 0
///      │
///      ▼
/// check_sale_payload ← THIS FUNCTION
///      │
///      ├── terminal: row quarantined, rest of the queue keeps draining
///      │
///      └── server: record rejected, rest of the batch keeps applying
/// ```
/// A sale that fails these checks can never be applied correctly; retrying
/// it only burns attempts. Quarantine is the only sane disposition.
pub fn check_sale_payload(payload: &SalePayload) -> ValidationResult<()> {
    validate_uuid("saleId", &payload.sale_id)?;

    if payload.device_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "deviceId".to_string(),
        });
    }
    if payload.operator_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "operatorId".to_string(),
        });
    }

    // Line items
    if payload.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }
    if payload.lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::TooMany {
            field: "lines".to_string(),
            max: MAX_SALE_LINES,
        });
    }

    let mut line_sum = Money::zero();
    for line in &payload.lines {
        if line.quantity <= 0 || line.quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: 1,
                max: MAX_LINE_QUANTITY,
            });
        }
        if line.unit_price_cents < 0 {
            return Err(ValidationError::MustBePositive {
                field: "unitPriceCents".to_string(),
            });
        }

        let expected = line
            .unit_price()
            .checked_multiply_quantity(line.quantity)
            .ok_or_else(|| ValidationError::Overflow {
                field: "lineTotalCents".to_string(),
            })?;
        if expected.cents() != line.line_total_cents {
            return Err(ValidationError::AmountMismatch {
                field: "lineTotalCents".to_string(),
                actual: line.line_total_cents,
                expected: expected.cents(),
                expected_from: "unitPrice × quantity".to_string(),
            });
        }

        line_sum = line_sum
            .checked_add(line.line_total())
            .ok_or_else(|| ValidationError::Overflow {
                field: "lines".to_string(),
            })?;
    }

    // Tenders
    if payload.tenders.is_empty() {
        return Err(ValidationError::Required {
            field: "tenders".to_string(),
        });
    }
    if payload.tenders.len() > MAX_TENDERS {
        return Err(ValidationError::TooMany {
            field: "tenders".to_string(),
            max: MAX_TENDERS,
        });
    }

    let mut tender_sum = Money::zero();
    for tender in &payload.tenders {
        if tender.amount_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "amountCents".to_string(),
            });
        }
        tender_sum = tender_sum
            .checked_add(tender.amount())
            .ok_or_else(|| ValidationError::Overflow {
                field: "tenders".to_string(),
            })?;
    }

    // Totals must reconcile three ways
    if payload.total_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "totalCents".to_string(),
        });
    }
    if payload.total_cents != line_sum.cents() {
        return Err(ValidationError::AmountMismatch {
            field: "totalCents".to_string(),
            actual: payload.total_cents,
            expected: line_sum.cents(),
            expected_from: "lines".to_string(),
        });
    }
    if payload.total_cents != tender_sum.cents() {
        return Err(ValidationError::AmountMismatch {
            field: "totalCents".to_string(),
            actual: payload.total_cents,
            expected: tender_sum.cents(),
            expected_from: "tenders".to_string(),
        });
    }

    Ok(())
}

/// Parses and integrity-checks a stored payload JSON string.
///
/// Both failure modes mean "quarantine" to the caller:
/// - [`CoreError::MalformedPayload`] - not parseable at all
/// - [`CoreError::CorruptSale`] - parseable, but monetary fields do not hold
pub fn verify_stored_payload(json: &str) -> Result<SalePayload, CoreError> {
    let payload: SalePayload =
        serde_json::from_str(json).map_err(|e| CoreError::MalformedPayload(e.to_string()))?;

    check_sale_payload(&payload).map_err(|source| CoreError::CorruptSale {
        sale_id: payload.sale_id.clone(),
        source,
    })?;

    Ok(payload)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SaleLine, TenderMethod, TenderSplit};
    use chrono::Utc;

    fn valid_payload() -> SalePayload {
        SalePayload {
            sale_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            device_id: "device-1".to_string(),
            operator_id: "op-1".to_string(),
            lines: vec![
                SaleLine {
                    product_id: "prod-1".to_string(),
                    name: "Draft Lager".to_string(),
                    unit_price_cents: 650,
                    quantity: 2,
                    line_total_cents: 1300,
                },
                SaleLine {
                    product_id: "prod-2".to_string(),
                    name: "Peanuts".to_string(),
                    unit_price_cents: 400,
                    quantity: 1,
                    line_total_cents: 400,
                },
            ],
            total_cents: 1700,
            tenders: vec![
                TenderSplit {
                    method: TenderMethod::Cash,
                    amount_cents: 1000,
                },
                TenderSplit {
                    method: TenderMethod::Card,
                    amount_cents: 700,
                },
            ],
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(check_sale_payload(&valid_payload()).is_ok());
    }

    #[test]
    fn test_empty_lines_rejected() {
        let mut p = valid_payload();
        p.lines.clear();
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::Required { field }) if field == "lines"
        ));
    }

    #[test]
    fn test_empty_tenders_rejected() {
        let mut p = valid_payload();
        p.tenders.clear();
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::Required { field }) if field == "tenders"
        ));
    }

    #[test]
    fn test_zero_total_rejected() {
        let mut p = valid_payload();
        p.total_cents = 0;
        // Line sum no longer matches either, but the positivity check fires first
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::MustBePositive { field }) if field == "totalCents"
        ));
    }

    #[test]
    fn test_total_line_mismatch_rejected() {
        let mut p = valid_payload();
        p.total_cents = 1800;
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::AmountMismatch { expected_from, .. }) if expected_from == "lines"
        ));
    }

    #[test]
    fn test_total_tender_mismatch_rejected() {
        let mut p = valid_payload();
        p.tenders[1].amount_cents = 800; // tenders now sum to 1800
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::AmountMismatch { expected_from, .. }) if expected_from == "tenders"
        ));
    }

    #[test]
    fn test_line_total_must_match_unit_times_qty() {
        let mut p = valid_payload();
        p.lines[0].line_total_cents = 1299;
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::AmountMismatch { field, .. }) if field == "lineTotalCents"
        ));
    }

    #[test]
    fn test_bad_quantity_rejected() {
        let mut p = valid_payload();
        p.lines[0].quantity = 0;
        assert!(check_sale_payload(&p).is_err());

        p.lines[0].quantity = MAX_LINE_QUANTITY + 1;
        assert!(check_sale_payload(&p).is_err());
    }

    #[test]
    fn test_overflow_does_not_panic() {
        let mut p = valid_payload();
        p.lines[0].unit_price_cents = i64::MAX;
        p.lines[0].quantity = 2;
        assert!(matches!(
            check_sale_payload(&p),
            Err(ValidationError::Overflow { .. })
        ));
    }

    #[test]
    fn test_verify_stored_payload_malformed() {
        let err = verify_stored_payload("{truncated").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload(_)));
    }

    #[test]
    fn test_verify_stored_payload_missing_monetary_field() {
        // A payload with no totalCents at all: serde refuses it, which is
        // the same quarantine disposition as a failing integrity check.
        let json = r#"{"saleId":"550e8400-e29b-41d4-a716-446655440000","deviceId":"d","operatorId":"o","lines":[],"tenders":[],"createdAt":"2026-01-01T00:00:00Z"}"#;
        let err = verify_stored_payload(json).unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload(_)));
    }

    #[test]
    fn test_verify_stored_payload_corrupt() {
        let mut p = valid_payload();
        p.total_cents = 9999;
        let json = serde_json::to_string(&p).unwrap();
        let err = verify_stored_payload(&json).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSale { .. }));
    }

    #[test]
    fn test_verify_stored_payload_ok() {
        let json = serde_json::to_string(&valid_payload()).unwrap();
        let parsed = verify_stored_payload(&json).unwrap();
        assert_eq!(parsed.total_cents, 1700);
    }
}
