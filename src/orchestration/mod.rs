//! Scenario routing: one closed sum type over the seven reconciliation
//! flows, matched on (account role, event type, guard).
//!
//! `classify` returning `None` means "no scenario applies" and the event is
//! acknowledged without any ledger call. Guards live here so the match table
//! stays exhaustive and readable in one place; handlers only see events they
//! are responsible for.

mod customer_updated;
mod dispute;
mod initial_payment;
mod invoice_failed;
mod invoice_paid;
mod mirror_invoice;
mod refund;

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::config::{AccountRole, RuntimeConfig};
use crate::error::AppResult;
use crate::event::WebhookEvent;
use crate::ledger::{LedgerApi, LedgerClientFactory};
use crate::metadata::{self, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Processing `payment_intent.succeeded` carrying INITIAL_PAYMENT=true.
    InitialPayment,
    /// Master `invoice.payment_attempt_required`: mirror onto processing.
    MirrorInvoice,
    /// Processing `invoice.paid`: report a guaranteed payment on master.
    InvoicePaid,
    /// Processing `invoice.payment_failed`: report a failed payment.
    InvoiceFailed,
    /// Processing `refund.created`: report a refund + master credit note.
    RefundCreated,
    /// Processing `charge.dispute.closed` with status=lost.
    DisputeClosed,
    /// Processing `customer.updated` changing the default payment method.
    CustomerUpdated,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::InitialPayment => "initial_payment",
            Scenario::MirrorInvoice => "mirror_invoice",
            Scenario::InvoicePaid => "invoice_paid",
            Scenario::InvoiceFailed => "invoice_failed",
            Scenario::RefundCreated => "refund_created",
            Scenario::DisputeClosed => "dispute_closed_lost",
            Scenario::CustomerUpdated => "customer_default_pm_changed",
        }
    }

    /// Match an event against the scenario table. `None` is a deliberate
    /// no-op, not an error.
    pub fn classify(role: AccountRole, event: &WebhookEvent) -> Option<Scenario> {
        match (role, event.event_type.as_str()) {
            (AccountRole::Processing, "payment_intent.succeeded") => {
                let md = event.object_metadata();
                let flag = metadata::get(&md, keys::INITIAL_PAYMENT)?;
                flag.eq_ignore_ascii_case("true").then_some(Scenario::InitialPayment)
            }
            (AccountRole::Master, "invoice.payment_attempt_required") => {
                Some(Scenario::MirrorInvoice)
            }
            (AccountRole::Processing, "invoice.paid") => Some(Scenario::InvoicePaid),
            (AccountRole::Processing, "invoice.payment_failed") => Some(Scenario::InvoiceFailed),
            (AccountRole::Processing, "refund.created") => Some(Scenario::RefundCreated),
            (AccountRole::Processing, "charge.dispute.closed") => {
                let status = event
                    .data
                    .object
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                status.trim().eq_ignore_ascii_case("lost").then_some(Scenario::DisputeClosed)
            }
            (AccountRole::Processing, "customer.updated") => {
                // Only when the platform flags the default payment method as
                // changed; the key's presence in previous_attributes is the
                // change signal, its old value is irrelevant.
                let changed = event
                    .data
                    .previous_attributes
                    .as_ref()
                    .and_then(|prev| prev.get("invoice_settings"))
                    .and_then(Value::as_object)
                    .map(|settings| settings.contains_key("default_payment_method"))
                    .unwrap_or(false);
                changed.then_some(Scenario::CustomerUpdated)
            }
            _ => None,
        }
    }
}

/// Per-event view of everything a handler needs: the origin alias, its
/// resolved platform account id, one immutable config snapshot, and the
/// client factory. Built once per request, never re-read mid-handler.
pub struct ScenarioContext {
    pub alias: String,
    pub account_id: String,
    pub config: Arc<RuntimeConfig>,
    pub clients: Arc<dyn LedgerClientFactory>,
}

impl ScenarioContext {
    pub fn new(
        alias: impl Into<String>,
        config: Arc<RuntimeConfig>,
        clients: Arc<dyn LedgerClientFactory>,
    ) -> AppResult<Self> {
        let alias = alias.into();
        let account_id = config.account(&alias)?.account_id.clone();
        Ok(Self {
            alias,
            account_id,
            config,
            clients,
        })
    }

    pub fn master_alias(&self) -> &str {
        self.config.master_alias()
    }

    pub fn client_for(&self, alias: &str) -> AppResult<Arc<dyn LedgerApi>> {
        let account = self.config.account(alias)?;
        Ok(self.clients.client(alias, account))
    }

    /// Client for the alias the event arrived on.
    pub fn origin(&self) -> AppResult<Arc<dyn LedgerApi>> {
        self.client_for(&self.alias)
    }

    pub fn master(&self) -> AppResult<Arc<dyn LedgerApi>> {
        self.client_for(self.master_alias())
    }
}

/// Run exactly one handler for a classified event.
pub async fn dispatch(
    scenario: Scenario,
    ctx: &ScenarioContext,
    event: &WebhookEvent,
) -> AppResult<()> {
    info!(
        scenario = scenario.name(),
        alias = %ctx.alias,
        event_type = %event.event_type,
        "dispatching scenario"
    );
    match scenario {
        Scenario::InitialPayment => initial_payment::run(ctx, event).await,
        Scenario::MirrorInvoice => mirror_invoice::run(ctx, event).await,
        Scenario::InvoicePaid => invoice_paid::run(ctx, event).await,
        Scenario::InvoiceFailed => invoice_failed::run(ctx, event).await,
        Scenario::RefundCreated => refund::run(ctx, event).await,
        Scenario::DisputeClosed => dispute::run(ctx, event).await,
        Scenario::CustomerUpdated => customer_updated::run(ctx, event).await,
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::event;
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_payment_requires_the_flag() {
        let with_flag = event(json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "metadata": {"INITIAL_PAYMENT": "True"}}}
        }));
        assert_eq!(
            Scenario::classify(AccountRole::Processing, &with_flag),
            Some(Scenario::InitialPayment)
        );

        let without = event(json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "metadata": {}}}
        }));
        assert_eq!(Scenario::classify(AccountRole::Processing, &without), None);

        // Master-side payment successes never trigger the scenario.
        assert_eq!(Scenario::classify(AccountRole::Master, &with_flag), None);
    }

    #[test]
    fn mirror_invoice_only_fires_on_master() {
        let ev = event(json!({
            "type": "invoice.payment_attempt_required",
            "data": {"object": {"id": "in_1"}}
        }));
        assert_eq!(
            Scenario::classify(AccountRole::Master, &ev),
            Some(Scenario::MirrorInvoice)
        );
        assert_eq!(Scenario::classify(AccountRole::Processing, &ev), None);
    }

    #[test]
    fn dispute_guard_requires_lost_status() {
        let lost = event(json!({
            "type": "charge.dispute.closed",
            "data": {"object": {"id": "dp_1", "status": "lost"}}
        }));
        assert_eq!(
            Scenario::classify(AccountRole::Processing, &lost),
            Some(Scenario::DisputeClosed)
        );

        let won = event(json!({
            "type": "charge.dispute.closed",
            "data": {"object": {"id": "dp_1", "status": "won"}}
        }));
        assert_eq!(Scenario::classify(AccountRole::Processing, &won), None);
    }

    #[test]
    fn customer_updated_guard_checks_previous_attributes() {
        let changed = event(json!({
            "type": "customer.updated",
            "data": {
                "object": {"id": "cus_1"},
                "previous_attributes": {"invoice_settings": {"default_payment_method": "pm_old"}}
            }
        }));
        assert_eq!(
            Scenario::classify(AccountRole::Processing, &changed),
            Some(Scenario::CustomerUpdated)
        );

        let unrelated = event(json!({
            "type": "customer.updated",
            "data": {
                "object": {"id": "cus_1"},
                "previous_attributes": {"email": "old@example.com"}
            }
        }));
        assert_eq!(Scenario::classify(AccountRole::Processing, &unrelated), None);
    }

    #[test]
    fn unknown_event_types_do_not_route() {
        let ev = event(json!({
            "type": "invoice.voided",
            "data": {"object": {"id": "in_1"}}
        }));
        assert_eq!(Scenario::classify(AccountRole::Processing, &ev), None);
        assert_eq!(Scenario::classify(AccountRole::Master, &ev), None);
    }
}
