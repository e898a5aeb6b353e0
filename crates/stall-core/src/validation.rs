//! # Validation Module
//!
//! Input rules applied before any register or sale mutation.
//!
//! ## Sale Validation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate_sale_request(request)                                         │
//! │                                                                         │
//! │  1. items      non-empty, unit price > 0, quantity > 0 unless override, │
//! │                subtotal == quantity × unit price,                       │
//! │                Σ subtotal == total                 → ItemTotalMismatch  │
//! │  2. payments   non-empty, amount > 0                                    │
//! │  3. Σ payments == total                        → PaymentTotalMismatch  │
//! │                                                                         │
//! │  (4. open register: checked by the store inside the commit transaction)│
//! │                                                                         │
//! │  First failure wins. Nothing has been written yet.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stall_core::validation::validate_sale_request;
//! use stall_core::{CommitSaleRequest, Money, NewSaleItem, NewSalePayment, PaymentMethod, Quantity};
//!
//! let request = CommitSaleRequest::new(
//!     vec![NewSaleItem::priced("var-1", Quantity::from_units(2), Money::from_minor(2500))],
//!     vec![NewSalePayment::new(PaymentMethod::Cash, Money::from_minor(5000))],
//! );
//! assert!(validate_sale_request(&request).is_ok());
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{CommitSaleRequest, NewSaleItem, NewSalePayment};
use crate::{
    MAX_AMOUNT, MAX_CLIENT_KEY_LEN, MAX_NOTES_LEN, MAX_QUANTITY_UNITS, MAX_SALE_ITEMS,
    MAX_SALE_PAYMENTS, TOTAL_TOLERANCE,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Register Validators
// =============================================================================

/// Opening balance must be zero or more.
pub fn validate_opening_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "openingAmount".to_string(),
        });
    }
    Ok(())
}

/// Counted cash at close, when supplied, must be zero or more.
pub fn validate_closing_amount(amount: Option<Money>) -> ValidationResult<()> {
    match amount {
        Some(a) if a.is_negative() => Err(ValidationError::MustNotBeNegative {
            field: "closingAmount".to_string(),
        }),
        _ => Ok(()),
    }
}

pub fn validate_notes(notes: Option<&str>) -> ValidationResult<()> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Sale Validators
// =============================================================================

/// Validates a single sale line.
///
/// `index` is only used to build the field path in errors.
pub fn validate_item(index: usize, item: &NewSaleItem) -> ValidationResult<()> {
    let field = |name: &str| format!("items[{}].{}", index, name);

    if item.variety_id.trim().is_empty() {
        return Err(ValidationError::required(field("varietyId")));
    }

    if !item.unit_price.is_positive() {
        return Err(ValidationError::must_be_positive(field("unitPrice")));
    }
    if item.unit_price > MAX_AMOUNT {
        return Err(too_large(field("unitPrice"), MAX_AMOUNT));
    }
    if let Some(q) = item.quantity {
        if q > Quantity::from_units(MAX_QUANTITY_UNITS) {
            return Err(too_large(field("quantity"), MAX_QUANTITY_UNITS));
        }
    }

    match item.quantity {
        Some(q) if !q.is_positive() => {
            return Err(ValidationError::must_be_positive(field("quantity")));
        }
        None if !item.is_manual_override => {
            return Err(ValidationError::required(field("quantity")));
        }
        _ => {}
    }

    let expected = item
        .expected_subtotal()
        .ok_or_else(|| ValidationError::Overflow { field: field("subtotal") })?;
    if item.subtotal != expected {
        return Err(ValidationError::SubtotalMismatch {
            field: field("subtotal"),
            expected,
            actual: item.subtotal,
        });
    }

    Ok(())
}

/// Validates a single tender line. Method membership is enforced by the type.
pub fn validate_payment(index: usize, payment: &NewSalePayment) -> ValidationResult<()> {
    if !payment.amount.is_positive() {
        return Err(ValidationError::must_be_positive(format!(
            "payments[{}].amount",
            index
        )));
    }
    if payment.amount > MAX_AMOUNT {
        return Err(too_large(format!("payments[{}].amount", index), MAX_AMOUNT));
    }
    Ok(())
}

fn too_large(field: String, max: impl std::fmt::Display) -> ValidationError {
    ValidationError::TooLarge {
        field,
        max: max.to_string(),
    }
}

/// Validates an idempotency key if one was supplied.
pub fn validate_client_key(key: Option<&str>) -> ValidationResult<()> {
    let Some(key) = key else {
        return Ok(());
    };

    if key.trim().is_empty() {
        return Err(ValidationError::required("clientKey"));
    }
    if key.len() > MAX_CLIENT_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "clientKey".to_string(),
            max: MAX_CLIENT_KEY_LEN,
        });
    }
    Ok(())
}

/// Runs every payload rule of a sale commit, in order.
pub fn validate_sale_request(request: &CommitSaleRequest) -> CoreResult<()> {
    validate_client_key(request.client_key.as_deref())?;

    // 1. items
    if request.items.is_empty() {
        return Err(ValidationError::required("items").into());
    }
    if request.items.len() > MAX_SALE_ITEMS {
        return Err(ValidationError::TooMany {
            field: "items".to_string(),
            max: MAX_SALE_ITEMS,
        }
        .into());
    }
    for (i, item) in request.items.iter().enumerate() {
        validate_item(i, item)?;
    }
    let items_total = request
        .items_total()
        .ok_or_else(|| ValidationError::Overflow { field: "items".to_string() })?;
    if !items_total.within(request.total, TOTAL_TOLERANCE) {
        return Err(CoreError::ItemTotalMismatch {
            total: request.total,
            items: items_total,
        });
    }

    // 2. payments
    if request.payments.is_empty() {
        return Err(ValidationError::required("payments").into());
    }
    if request.payments.len() > MAX_SALE_PAYMENTS {
        return Err(ValidationError::TooMany {
            field: "payments".to_string(),
            max: MAX_SALE_PAYMENTS,
        }
        .into());
    }
    for (i, payment) in request.payments.iter().enumerate() {
        validate_payment(i, payment)?;
    }

    // 3. payments cover the total exactly
    let paid = request
        .payments_total()
        .ok_or_else(|| ValidationError::Overflow { field: "payments".to_string() })?;
    if !paid.within(request.total, TOTAL_TOLERANCE) {
        return Err(CoreError::PaymentTotalMismatch {
            total: request.total,
            paid,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
