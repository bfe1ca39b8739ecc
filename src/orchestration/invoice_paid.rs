//! Scenario 3: a processing mirror invoice got paid; report it back to the
//! master account as a guaranteed payment record.
//!
//! Webhook payloads routinely omit `payment_intent` or arrive before
//! `status_transitions.paid_at` is set, so the invoice is re-retrieved as
//! source of truth with a bounded readiness poll instead of trusting the
//! delivered object.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerApi, LedgerObject, ObjectKind, PaymentAttachment};
use crate::metadata::{self, keys};
use crate::timestamps;

const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

struct ReadyInvoice {
    invoice: LedgerObject,
    payment_intent: String,
    payment_method: String,
    paid_at: i64,
}

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let invoice_id = event
        .object_id()
        .ok_or_else(|| AppError::InvalidEvent("invoice has no id".to_string()))?
        .to_string();

    let processing = ctx.origin()?;
    let Some(ready) = poll_until_ready(processing.as_ref(), &invoice_id).await? else {
        // Mirror of an initial payment: scenario 1 already reported it.
        info!(
            scenario = "invoice_paid",
            invoice_id = %invoice_id,
            "initial payment already reconciled, skipping"
        );
        return Ok(());
    };

    let md = ready.invoice.metadata();
    let master_invoice_id = metadata::require(&invoice_id, &md, keys::MASTER_ACCOUNT_INVOICE_ID)?;
    let master_subscription_id =
        metadata::require(&invoice_id, &md, keys::MASTER_ACCOUNT_SUBSCRIPTION_ID)?;
    // Optional enrichers: older mirror invoices may not carry these.
    let master_customer_id = metadata::get(&md, keys::MASTER_ACCOUNT_CUSTOMER_ID);
    let master_account_id = metadata::get(&md, keys::MASTER_ACCOUNT_ID);

    let currency = ready
        .invoice
        .str_field("currency")
        .ok_or_else(|| AppError::Internal(format!("invoice {} has no currency", invoice_id)))?
        .to_string();
    let amount = ready
        .invoice
        .int_field("amount_paid")
        .filter(|v| *v > 0)
        .or_else(|| ready.invoice.int_field("amount_due"))
        .or_else(|| ready.invoice.int_field("total"))
        .ok_or_else(|| AppError::Internal(format!("invoice {} has no amount", invoice_id)))?;

    let master = ctx.master()?;
    let cpm_id = master_subscription_cpm(master.as_ref(), &master_subscription_id).await?;

    let report_ts = timestamps::normalize_now(ready.paid_at);
    let mut record_metadata = vec![
        (
            keys::PROCESSING_ACCOUNT_PAYMENT_INTENT_ID,
            ready.payment_intent.as_str(),
        ),
        (
            keys::PROCESSING_ACCOUNT_PAYMENT_METHOD_ID,
            ready.payment_method.as_str(),
        ),
        (keys::MASTER_ACCOUNT_INVOICE_ID, master_invoice_id.as_str()),
        (
            keys::MASTER_ACCOUNT_SUBSCRIPTION_ID,
            master_subscription_id.as_str(),
        ),
    ];
    if let Some(id) = master_account_id {
        record_metadata.push((keys::MASTER_ACCOUNT_ID, id));
    }

    let mut params = json!({
        "amount_requested": {"currency": currency, "value": amount},
        "initiated_at": report_ts,
        "outcome": "guaranteed",
        "guaranteed": {"guaranteed_at": report_ts},
        "metadata": metadata::pairs(&record_metadata),
        "payment_method_details": {"payment_method": cpm_id},
        "processor_details": {"type": "custom", "custom": {"payment_reference": ready.payment_intent}},
    });
    if let Some(customer) = master_customer_id {
        params["customer_details"] = json!({"customer": customer});
    }

    let record = master.report_payment(params).await?;
    let record_id = record
        .id()
        .ok_or_else(|| AppError::Internal("payment record has no id".to_string()))?
        .to_string();

    master
        .attach_payment(
            &master_invoice_id,
            PaymentAttachment::Record(record_id.clone()),
        )
        .await?;
    master
        .update(
            ObjectKind::Invoice,
            &master_invoice_id,
            json!({"metadata": metadata::pairs(&[(
                keys::MASTER_ACCOUNT_PAYMENT_RECORD_ID,
                &record_id,
            )])}),
        )
        .await?;

    info!(
        scenario = "invoice_paid",
        alias = %ctx.alias,
        invoice_id = %invoice_id,
        master_invoice_id = %master_invoice_id,
        payment_record_id = %record_id,
        "payment reported on master account"
    );
    Ok(())
}

/// Re-retrieve the invoice until `default_payment_method`, `payment_intent`
/// and `paid_at` are all populated. Returns `None` when the invoice turns
/// out to be an already-reconciled initial payment.
async fn poll_until_ready(
    processing: &dyn LedgerApi,
    invoice_id: &str,
) -> AppResult<Option<ReadyInvoice>> {
    for attempt in 1..=POLL_ATTEMPTS {
        let invoice = processing.get(ObjectKind::Invoice, invoice_id, &[]).await?;

        if metadata::get(&invoice.metadata(), keys::IS_INITIAL_PAYMENT) == Some("true") {
            return Ok(None);
        }

        let payment_method = invoice.ref_id("default_payment_method").map(str::to_owned);
        let payment_intent = invoice.ref_id("payment_intent").map(str::to_owned);
        let paid_at = invoice.path_int(&["status_transitions", "paid_at"]);

        if let (Some(payment_method), Some(payment_intent), Some(paid_at)) =
            (payment_method, payment_intent, paid_at)
        {
            return Ok(Some(ReadyInvoice {
                invoice,
                payment_intent,
                payment_method,
                paid_at,
            }));
        }

        debug!(
            invoice_id = %invoice_id,
            attempt,
            "invoice not ready yet, waiting"
        );
        if attempt < POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
    Err(AppError::Internal(format!(
        "invoice {} still incomplete after {} retrievals",
        invoice_id, POLL_ATTEMPTS
    )))
}

/// The master subscription's default payment method is the CPM minted by
/// scenario 1; its id is what payment records reference.
pub(super) async fn master_subscription_cpm(
    master: &dyn LedgerApi,
    subscription_id: &str,
) -> AppResult<String> {
    let subscription = master
        .get(
            ObjectKind::Subscription,
            subscription_id,
            &["default_payment_method"],
        )
        .await?;
    subscription
        .ref_id("default_payment_method")
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "master subscription {} has no default payment method",
                subscription_id
            ))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testutil::{event, processing_ctx};
    use super::*;
    use crate::ledger::mock::{Call, MockLedger};

    fn paid_invoice() -> serde_json::Value {
        json!({
            "id": "in_paid",
            "currency": "usd",
            "amount_paid": 4500,
            "default_payment_method": "pm_proc",
            "payment_intent": "pi_proc",
            "status_transitions": {"paid_at": 1_700_000_100i64},
            "metadata": {
                "MASTER_ACCOUNT_INVOICE_ID": "inv_123",
                "MASTER_ACCOUNT_SUBSCRIPTION_ID": "sub_123",
                "MASTER_ACCOUNT_CUSTOMER_ID": "cus_master",
                "MASTER_ACCOUNT_ID": "acct_eu",
            },
        })
    }

    fn seeded_master() -> std::sync::Arc<MockLedger> {
        let master = MockLedger::new();
        master.put(
            ObjectKind::Subscription,
            "sub_123",
            json!({"id": "sub_123", "default_payment_method": {"id": "pm_cpm"}}),
        );
        master.put(
            ObjectKind::Invoice,
            "inv_123",
            json!({"id": "inv_123", "metadata": {}}),
        );
        master
    }

    fn paid_event() -> crate::event::WebhookEvent {
        // Delivered payload is intentionally thin; the handler re-retrieves.
        event(json!({
            "type": "invoice.paid",
            "data": {"object": {"id": "in_paid"}}
        }))
    }

    #[tokio::test]
    async fn reports_guaranteed_payment_and_links_record() {
        let master = seeded_master();
        let processing = MockLedger::new();
        processing.put(ObjectKind::Invoice, "in_paid", paid_invoice());
        let ctx = processing_ctx(master.clone(), processing);

        run(&ctx, &paid_event()).await.unwrap();

        let report = master
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::ReportPayment { params } => Some(params.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(report["outcome"], "guaranteed");
        assert_eq!(report["amount_requested"]["value"], 4500);
        assert_eq!(report["guaranteed"]["guaranteed_at"], 1_700_000_100i64);
        assert_eq!(report["customer_details"]["customer"], "cus_master");
        assert_eq!(report["payment_method_details"]["payment_method"], "pm_cpm");
        assert_eq!(
            report["metadata"]["PROCESSING_ACCOUNT_PAYMENT_INTENT_ID"],
            "pi_proc"
        );

        assert!(master.calls().iter().any(|c| matches!(
            c,
            Call::AttachPayment { invoice_id, attachment: PaymentAttachment::Record(_) }
                if invoice_id == "inv_123"
        )));
        let inv = master.object(ObjectKind::Invoice, "inv_123").unwrap();
        assert!(inv["metadata"]["MASTER_ACCOUNT_PAYMENT_RECORD_ID"]
            .as_str()
            .is_some());
    }

    #[tokio::test]
    async fn initial_payment_mirror_is_skipped() {
        let master = seeded_master();
        let processing = MockLedger::new();
        let mut invoice = paid_invoice();
        invoice["metadata"]["IS_INITIAL_PAYMENT"] = json!("true");
        processing.put(ObjectKind::Invoice, "in_paid", invoice);
        let ctx = processing_ctx(master.clone(), processing);

        run(&ctx, &paid_event()).await.unwrap();

        assert!(master.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_invoice_errors_after_bounded_poll() {
        let master = seeded_master();
        let processing = MockLedger::new();
        let mut invoice = paid_invoice();
        invoice["payment_intent"] = json!(null);
        processing.put(ObjectKind::Invoice, "in_paid", invoice);
        let ctx = processing_ctx(master.clone(), processing.clone());

        let err = run(&ctx, &paid_event()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let gets = processing
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Get { .. }))
            .count();
        assert_eq!(gets, POLL_ATTEMPTS as usize);
        assert!(master.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_payment_intent_is_picked_up_on_retry() {
        let master = seeded_master();
        let processing = MockLedger::new();
        let mut invoice = paid_invoice();
        invoice["payment_intent"] = json!(null);
        processing.put(ObjectKind::Invoice, "in_paid", invoice);
        let ctx = processing_ctx(master.clone(), processing.clone());

        let handle = {
            let processing = processing.clone();
            tokio::spawn(async move {
                // Let a few poll rounds pass before the field materializes.
                tokio::time::sleep(Duration::from_millis(2500)).await;
                let mut ready = paid_invoice();
                ready["payment_intent"] = json!("pi_proc");
                processing.put(ObjectKind::Invoice, "in_paid", ready);
            })
        };

        run(&ctx, &paid_event()).await.unwrap();
        handle.await.unwrap();

        assert!(master
            .calls()
            .iter()
            .any(|c| matches!(c, Call::ReportPayment { .. })));
    }

    #[tokio::test]
    async fn missing_master_links_abort_with_linkage() {
        let master = seeded_master();
        let processing = MockLedger::new();
        let mut invoice = paid_invoice();
        invoice["metadata"] = json!({});
        processing.put(ObjectKind::Invoice, "in_paid", invoice);
        let ctx = processing_ctx(master.clone(), processing);

        let err = run(&ctx, &paid_event()).await.unwrap_err();
        assert!(matches!(err, AppError::Linkage { .. }));
        assert!(master.writes().is_empty());
    }
}
