//! Ledger API facade: one client per account, typed at the capability level.
//!
//! Scenario handlers only ever talk to `dyn LedgerApi`; the production
//! implementation (`HttpLedger`) speaks the platform's REST dialect, the
//! test implementation records calls.

mod http;
mod object;

#[cfg(test)]
pub(crate) mod mock;

pub use http::{HttpLedger, HttpLedgerFactory};
pub use object::LedgerObject;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AccountConfig;
use crate::error::AppResult;

/// Object kinds the orchestration touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Invoice,
    InvoiceItem,
    Subscription,
    Customer,
    PaymentMethod,
    PaymentIntent,
    PaymentRecord,
    CreditNote,
    TaxRate,
}

impl ObjectKind {
    /// REST collection segment for this kind.
    pub fn path(&self) -> &'static str {
        match self {
            ObjectKind::Invoice => "invoices",
            ObjectKind::InvoiceItem => "invoiceitems",
            ObjectKind::Subscription => "subscriptions",
            ObjectKind::Customer => "customers",
            ObjectKind::PaymentMethod => "payment_methods",
            ObjectKind::PaymentIntent => "payment_intents",
            ObjectKind::PaymentRecord => "payment_records",
            ObjectKind::CreditNote => "credit_notes",
            ObjectKind::TaxRate => "tax_rates",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// What gets attached to an invoice as its payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAttachment {
    Record(String),
    Intent(String),
}

/// Capability set of one ledger account.
///
/// All calls are synchronous remote calls with their own timeout and failure
/// mode; handlers issue them strictly in sequence. `get` fails with
/// `RemoteError::NotFound` for missing objects, `find_by_metadata` returns
/// an empty vec instead.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn get(&self, kind: ObjectKind, id: &str, expand: &[&str]) -> AppResult<LedgerObject>;

    async fn create(&self, kind: ObjectKind, params: Value) -> AppResult<LedgerObject>;

    async fn update(&self, kind: ObjectKind, id: &str, params: Value) -> AppResult<LedgerObject>;

    /// Search a collection by exact metadata key/value.
    async fn find_by_metadata(
        &self,
        kind: ObjectKind,
        key: &str,
        value: &str,
    ) -> AppResult<Vec<LedgerObject>>;

    async fn attach_payment(
        &self,
        invoice_id: &str,
        attachment: PaymentAttachment,
    ) -> AppResult<LedgerObject>;

    /// Report an externally collected payment; returns the payment record.
    async fn report_payment(&self, params: Value) -> AppResult<LedgerObject>;

    /// Amend an existing payment record with a refund report.
    async fn report_refund(&self, record_id: &str, params: Value) -> AppResult<LedgerObject>;

    async fn pay_invoice(&self, invoice_id: &str, off_session: bool) -> AppResult<LedgerObject>;

    async fn finalize_invoice(&self, invoice_id: &str) -> AppResult<LedgerObject>;

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> AppResult<LedgerObject>;

    async fn list_payment_methods(
        &self,
        customer_id: &str,
        type_filter: &str,
    ) -> AppResult<Vec<LedgerObject>>;

    async fn create_credit_note(&self, params: Value) -> AppResult<LedgerObject>;
}

/// Builds a `LedgerApi` client for an account. Handlers resolve clients
/// through this seam so tests can substitute recording mocks per alias.
pub trait LedgerClientFactory: Send + Sync {
    fn client(&self, alias: &str, account: &AccountConfig) -> Arc<dyn LedgerApi>;
}
