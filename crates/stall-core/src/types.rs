//! # Domain Types
//!
//! Registers, sales, catalog entities and the request shapes that cross the
//! wire.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐        ┌─────────────────┐                        │
//! │  │    Register     │ 1    * │      Sale       │                        │
//! │  │  ─────────────  │◄───────│  ─────────────  │                        │
//! │  │  status         │        │  register_id    │                        │
//! │  │  opening_amount │        │  client_key?    │                        │
//! │  │  closing_amount?│        │  total          │                        │
//! │  └─────────────────┘        └───┬─────────┬───┘                        │
//! │                               * │         │ *                          │
//! │                    ┌────────────▼──┐   ┌──▼────────────┐               │
//! │                    │   SaleItem    │   │  SalePayment  │               │
//! │                    │  variety_id   │   │  method       │               │
//! │                    │  quantity?    │   │  amount       │               │
//! │                    │  override?    │   │  reference?   │               │
//! │                    └───────────────┘   └───────────────┘               │
//! │                                                                         │
//! │  Catalog (read-only here): Variety ─ Supplier ─ Location               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-Phase Sale Identity
//! A sale created offline carries a client-generated `client_key` from the
//! moment it is rung up. The server assigns `id` only when it commits the
//! sale. The two are stored side by side and never substituted for each
//! other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Operator Context
// =============================================================================

/// The already-authenticated caller of every register and sale operation.
///
/// Resolution from a session happens upstream; this crate trusts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorContext {
    pub tenant_id: String,
    pub operator_id: String,
}

impl OperatorContext {
    pub fn new(tenant_id: impl Into<String>, operator_id: impl Into<String>) -> Self {
        OperatorContext {
            tenant_id: tenant_id.into(),
            operator_id: operator_id.into(),
        }
    }
}

// =============================================================================
// Register
// =============================================================================

/// Lifecycle state of a register. `Open → Closed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum RegisterStatus {
    Open,
    Closed,
}

/// One cash-drawer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Register {
    pub id: String,
    pub tenant_id: String,
    pub operator_id: String,
    pub status: RegisterStatus,

    /// Cash in the drawer when the session started.
    pub opening_amount: Money,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,

    /// Counted cash at close. `None` while open.
    pub closing_amount: Option<Money>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,

    pub location_id: Option<String>,
    pub notes: Option<String>,
}

impl Register {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == RegisterStatus::Open
    }
}

/// Request to open a register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OpenRegisterRequest {
    pub opening_amount: Money,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request to close the caller's open register.
///
/// Omitting `closing_amount` trusts the ledger: the register closes at the
/// expected amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CloseRegisterRequest {
    #[serde(default)]
    pub closing_amount: Option<Money>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Reconciliation figures produced when a register closes.
///
/// `difference` is positive for a surplus and negative for a shortage. A
/// shortage is a business fact, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ReconciliationSummary {
    pub opening_amount: Money,
    pub closing_amount: Money,
    pub total_sales: Money,
    pub sales_count: i64,
    pub expected_amount: Money,
    pub difference: Money,
    /// Σ payment amount per method across every sale of the register.
    pub by_method: BTreeMap<PaymentMethod, Money>,
}

/// Response of a register close: the now-immutable register plus its
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterClosure {
    pub register: Register,
    pub summary: ReconciliationSummary,
}

// =============================================================================
// Payment Method
// =============================================================================

/// The fixed set of tender types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PaymentMethod {
    Cash,
    Debit,
    Credit,
    Transfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Cash,
        PaymentMethod::Debit,
        PaymentMethod::Credit,
        PaymentMethod::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "method".to_string(),
                allowed: PaymentMethod::ALL
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
            })
    }
}

// =============================================================================
// Sale Commit Request
// =============================================================================

/// One line of a sale as submitted by the till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewSaleItem {
    pub variety_id: String,
    /// Absent only for manual-override lines that do not track units.
    #[serde(default)]
    pub quantity: Option<Quantity>,
    pub unit_price: Money,
    pub subtotal: Money,
    #[serde(default)]
    pub is_manual_override: bool,
}

impl NewSaleItem {
    /// A catalog line: subtotal computed from quantity and unit price.
    ///
    /// A product that does not fit in `Money` leaves a zero subtotal, which
    /// validation rejects.
    pub fn priced(variety_id: impl Into<String>, quantity: Quantity, unit_price: Money) -> Self {
        NewSaleItem {
            variety_id: variety_id.into(),
            quantity: Some(quantity),
            unit_price,
            subtotal: quantity.price(unit_price).unwrap_or_default(),
            is_manual_override: false,
        }
    }

    /// A manual-override line priced by the operator.
    pub fn manual(
        variety_id: impl Into<String>,
        quantity: Option<Quantity>,
        unit_price: Money,
    ) -> Self {
        let subtotal = quantity
            .unwrap_or(Quantity::ONE)
            .price(unit_price)
            .unwrap_or_default();
        NewSaleItem {
            variety_id: variety_id.into(),
            quantity,
            unit_price,
            subtotal,
            is_manual_override: true,
        }
    }

    /// Subtotal the line must carry. Untracked override lines count as one
    /// unit. `None` when the product overflows.
    pub fn expected_subtotal(&self) -> Option<Money> {
        self.quantity.unwrap_or(Quantity::ONE).price(self.unit_price)
    }

    /// Quantity to take out of stock, if any.
    pub fn stock_quantity(&self) -> Option<Quantity> {
        if self.is_manual_override {
            None
        } else {
            self.quantity
        }
    }
}

/// One tender line as submitted by the till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewSalePayment {
    pub method: PaymentMethod,
    pub amount: Money,
    #[serde(default)]
    pub reference: Option<String>,
}

impl NewSalePayment {
    pub fn new(method: PaymentMethod, amount: Money) -> Self {
        NewSalePayment {
            method,
            amount,
            reference: None,
        }
    }
}

/// The sale-commit wire request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CommitSaleRequest {
    pub items: Vec<NewSaleItem>,
    pub payments: Vec<NewSalePayment>,
    pub total: Money,
    #[serde(default)]
    pub location_id: Option<String>,
    /// Idempotency key. Always present for sales that may be replayed.
    #[serde(default)]
    pub client_key: Option<String>,
    /// When the sale was rung up, for sales replayed after the fact. The
    /// ledger stamps its own clock when absent or in the future.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl CommitSaleRequest {
    /// Builds a request whose total is the sum of the item subtotals.
    pub fn new(items: Vec<NewSaleItem>, payments: Vec<NewSalePayment>) -> Self {
        let total = Money::checked_sum(items.iter().map(|i| i.subtotal)).unwrap_or_default();
        CommitSaleRequest {
            items,
            payments,
            total,
            location_id: None,
            client_key: None,
            occurred_at: None,
        }
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// `None` if the subtotals overflow.
    pub fn items_total(&self) -> Option<Money> {
        Money::checked_sum(self.items.iter().map(|i| i.subtotal))
    }

    /// `None` if the amounts overflow.
    pub fn payments_total(&self) -> Option<Money> {
        Money::checked_sum(self.payments.iter().map(|p| p.amount))
    }
}

// =============================================================================
// Committed Sale
// =============================================================================

/// A committed, immutable sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Sale {
    /// Server-assigned identifier.
    pub id: String,
    /// Client idempotency key, when the sale came through the device queue.
    pub client_key: Option<String>,
    pub tenant_id: String,
    pub operator_id: String,
    pub register_id: String,
    pub location_id: Option<String>,
    pub total: Money,
    /// Set when a stock decrement for this sale could not be applied.
    pub stock_reconciliation_pending: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub items: Vec<SaleItem>,
    pub payments: Vec<SalePayment>,
}

/// A committed sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    /// Position within the sale, starting at 0.
    pub line_no: i64,
    pub variety_id: String,
    pub quantity: Option<Quantity>,
    pub unit_price: Money,
    pub subtotal: Money,
    pub is_manual_override: bool,
}

/// A committed tender line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SalePayment {
    pub id: String,
    pub sale_id: String,
    pub line_no: i64,
    pub method: PaymentMethod,
    pub amount: Money,
    pub reference: Option<String>,
}

/// Result of a commit.
///
/// A replayed `client_key` is a safe no-op that hands back the sale stored
/// the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Created(Sale),
    AlreadyCommitted(Sale),
}

impl CommitOutcome {
    pub fn sale(&self) -> &Sale {
        match self {
            CommitOutcome::Created(sale) | CommitOutcome::AlreadyCommitted(sale) => sale,
        }
    }

    pub fn into_sale(self) -> Sale {
        match self {
            CommitOutcome::Created(sale) | CommitOutcome::AlreadyCommitted(sale) => sale,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, CommitOutcome::AlreadyCommitted(_))
    }
}

/// A stock decrement that could not be applied to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StockDiscrepancy {
    pub id: String,
    pub tenant_id: String,
    pub sale_id: String,
    pub variety_id: String,
    pub quantity: Quantity,
    pub reason: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Catalog
// =============================================================================

/// A sellable variety (a product in a particular size, cut or grade).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Variety {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub sku: Option<String>,
    pub price: Money,
    /// `None` means stock is not tracked for this variety.
    pub stock: Option<Quantity>,
    pub supplier_id: Option<String>,
    pub location_id: Option<String>,
    pub is_active: bool,
}

impl Variety {
    #[inline]
    pub fn tracks_stock(&self) -> bool {
        self.stock.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Supplier {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Location {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub address: Option<String>,
}

/// Everything a device needs to ring up sales while disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CatalogSnapshot {
    pub tenant_id: String,
    pub varieties: Vec<Variety>,
    pub suppliers: Vec<Supplier>,
    pub locations: Vec<Location>,
    #[ts(as = "String")]
    pub fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn empty(tenant_id: impl Into<String>) -> Self {
        CatalogSnapshot {
            tenant_id: tenant_id.into(),
            varieties: Vec::new(),
            suppliers: Vec::new(),
            locations: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn variety(&self, id: &str) -> Option<&Variety> {
        self.varieties.iter().find(|v| v.id == id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!("DEBIT".parse::<PaymentMethod>().unwrap(), PaymentMethod::Debit);
        assert_eq!(" transfer ".parse::<PaymentMethod>().unwrap(), PaymentMethod::Transfer);

        let err = "cheque".parse::<PaymentMethod>().unwrap_err();
        assert!(matches!(err, ValidationError::NotAllowed { .. }));
    }

    #[test]
    fn test_manual_item_has_no_stock_effect() {
        let item = NewSaleItem::manual("var-1", Some(Quantity::from_units(5)), Money::from_minor(1000));
        assert_eq!(item.stock_quantity(), None);
        assert_eq!(item.subtotal.minor(), 5000);

        let untracked = NewSaleItem::manual("var-1", None, Money::from_minor(750));
        assert_eq!(untracked.subtotal.minor(), 750);
        assert_eq!(untracked.expected_subtotal(), Some(Money::from_minor(750)));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = CommitSaleRequest::new(
            vec![NewSaleItem::priced("var-1", Quantity::from_units(2), Money::from_minor(2500))],
            vec![NewSalePayment::new(PaymentMethod::Cash, Money::from_minor(5000))],
        )
        .with_client_key("abc123");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["total"], 5000);
        assert_eq!(json["clientKey"], "abc123");
        assert_eq!(json["items"][0]["varietyId"], "var-1");
        assert_eq!(json["items"][0]["isManualOverride"], false);
        assert_eq!(json["payments"][0]["method"], "cash");
    }

    #[test]
    fn test_item_quantity_is_a_decimal_on_the_wire() {
        let json = r#"{"varietyId": "tomato", "quantity": 1.5, "unitPrice": 180, "subtotal": 270}"#;
        let item: NewSaleItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.quantity, Some(Quantity::from_milli(1500)));
        assert_eq!(item.expected_subtotal(), Some(Money::from_minor(270)));

        let item = NewSaleItem::priced("tomato", Quantity::from_milli(1250), Money::from_minor(180));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["quantity"], 1.25);
    }

    #[test]
    fn test_request_accepts_minimal_json() {
        let json = r#"{
            "items": [{"varietyId": "v", "unitPrice": 300, "subtotal": 300, "isManualOverride": true}],
            "payments": [{"method": "transfer", "amount": 300}],
            "total": 300
        }"#;
        let request: CommitSaleRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.items[0].quantity, None);
        assert_eq!(request.client_key, None);
        assert_eq!(request.payments_total(), Some(Money::from_minor(300)));
    }
}
