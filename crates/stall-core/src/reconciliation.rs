//! # Register Reconciliation
//!
//! Close-of-day arithmetic for a cash register.
//!
//! ```text
//!   expected   = opening + Σ sale.total
//!   closing    = counted cash, or expected when the operator trusts the ledger
//!   difference = closing − expected          (+ surplus / − shortage)
//!   by_method  = Σ payment.amount grouped by method
//! ```
//!
//! Sums are order-independent, so sales replayed from a device queue in a
//! different order than they were rung up reconcile to the same figures.

use std::collections::BTreeMap;

use crate::money::Money;
use crate::types::{PaymentMethod, ReconciliationSummary};

/// Builds the close summary for a register.
///
/// ## Arguments
/// * `opening` - Opening drawer balance
/// * `closing` - Counted cash, `None` to close at the expected amount
/// * `sale_totals` - Total of every sale committed against the register
/// * `payments` - Every payment line of those sales
///
/// ## Example
/// ```rust
/// use stall_core::reconciliation::summarize;
/// use stall_core::{Money, PaymentMethod};
///
/// let summary = summarize(
///     Money::from_minor(10_000),
///     None,
///     [Money::from_minor(5_000)],
///     [(PaymentMethod::Cash, Money::from_minor(5_000))],
/// );
/// assert_eq!(summary.expected_amount.minor(), 15_000);
/// assert_eq!(summary.closing_amount.minor(), 15_000);
/// assert!(summary.difference.is_zero());
/// ```
pub fn summarize(
    opening: Money,
    closing: Option<Money>,
    sale_totals: impl IntoIterator<Item = Money>,
    payments: impl IntoIterator<Item = (PaymentMethod, Money)>,
) -> ReconciliationSummary {
    let mut total_sales = Money::zero();
    let mut sales_count = 0i64;
    for total in sale_totals {
        total_sales += total;
        sales_count += 1;
    }

    let mut by_method: BTreeMap<PaymentMethod, Money> = BTreeMap::new();
    for (method, amount) in payments {
        *by_method.entry(method).or_default() += amount;
    }

    let expected_amount = opening + total_sales;
    let closing_amount = closing.unwrap_or(expected_amount);

    ReconciliationSummary {
        opening_amount: opening,
        closing_amount,
        total_sales,
        sales_count,
        expected_amount,
        difference: closing_amount - expected_amount,
        by_method,
    }
}
