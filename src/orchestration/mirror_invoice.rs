//! Scenario 2: a master invoice wants a payment attempt and the money must
//! be collected on a processing account.
//!
//! The subscription's default payment method is a CPM whose metadata names
//! the real processing payment method and customer. An existence search by
//! `MASTER_ACCOUNT_INVOICE_ID` is the only duplicate guard; two concurrent
//! deliveries for the same invoice can still double-create (accepted risk,
//! no cross-account lock exists).

use serde_json::json;
use tracing::{info, warn};

use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerObject, ObjectKind};
use crate::metadata::{self, keys};

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let invoice = LedgerObject::new(event.data.object.clone());
    let master_invoice_id = invoice
        .id()
        .ok_or_else(|| AppError::InvalidEvent("invoice has no id".to_string()))?
        .to_string();
    let currency = invoice
        .str_field("currency")
        .ok_or_else(|| AppError::InvalidEvent("invoice has no currency".to_string()))?
        .to_string();
    let amount_due = invoice
        .int_field("amount_due")
        .ok_or_else(|| AppError::InvalidEvent("invoice has no amount_due".to_string()))?;
    let master_customer_id = invoice
        .ref_id("customer")
        .ok_or_else(|| AppError::InvalidEvent("invoice has no customer".to_string()))?
        .to_string();
    let period_start = invoice
        .int_field("period_start")
        .ok_or_else(|| AppError::InvalidEvent("invoice has no period_start".to_string()))?;
    let period_end = invoice
        .int_field("period_end")
        .ok_or_else(|| AppError::InvalidEvent("invoice has no period_end".to_string()))?;

    let description = invoice
        .list_data("lines")
        .first()
        .and_then(|line| line.str_field("description").map(str::to_owned))
        .unwrap_or_default();

    let subscription_details =
        invoice.path(&["parent", "subscription_details"]).cloned().map(LedgerObject::new);
    let subscription_details = subscription_details.ok_or_else(|| {
        AppError::InvalidEvent("invoice has no parent.subscription_details".to_string())
    })?;
    let master_subscription_id = subscription_details
        .ref_id("subscription")
        .ok_or_else(|| {
            AppError::InvalidEvent("subscription_details has no subscription".to_string())
        })?
        .to_string();
    let sd_md = subscription_details.metadata();
    let processing_account_id =
        metadata::require(&master_subscription_id, &sd_md, keys::PROCESSING_ACCOUNT_ID)?;
    let skip_ns_invoice_sync = metadata::get(&sd_md, keys::SKIP_NS_INVOICE_SYNC);

    let master = ctx.master()?;

    // Propagate the subscription's sync-skip marker onto the invoice so
    // downstream invoice sync sees it without resolving the subscription.
    if ctx.config.skip_sync_non_master_invoice {
        if let Some(value) = skip_ns_invoice_sync {
            if let Err(e) = master
                .update(
                    ObjectKind::Invoice,
                    &master_invoice_id,
                    json!({"metadata": metadata::pairs(&[(keys::SKIP_NS_INVOICE_SYNC, value)])}),
                )
                .await
            {
                warn!(
                    master_invoice_id = %master_invoice_id,
                    error = %e,
                    "failed to persist SKIP_NS_INVOICE_SYNC on master invoice"
                );
            }
        }
    }

    let subscription = master
        .get(
            ObjectKind::Subscription,
            &master_subscription_id,
            &["default_payment_method"],
        )
        .await?;
    let cpm = subscription.expanded("default_payment_method").ok_or_else(|| {
        AppError::Internal(format!(
            "master subscription {} has no expanded default_payment_method",
            master_subscription_id
        ))
    })?;
    let cpm_id = cpm
        .id()
        .ok_or_else(|| AppError::Internal("default payment method has no id".to_string()))?
        .to_string();
    let cpm_md = cpm.metadata();
    let processing_pm_id =
        metadata::require(&cpm_id, &cpm_md, keys::PROCESSING_ACCOUNT_PAYMENT_METHOD_ID)?;
    let processing_customer_id =
        metadata::require(&cpm_id, &cpm_md, keys::PROCESSING_ACCOUNT_CUSTOMER_ID)?;

    // The webhook payload omits the assigned invoice number; fetch it so the
    // mirror carries the same number.
    let invoice_number = master
        .get(ObjectKind::Invoice, &master_invoice_id, &[])
        .await?
        .str_field("number")
        .map(str::to_owned);

    let processing_alias = ctx.config.alias_by_account_id(&processing_account_id)?;
    let processing = ctx.client_for(&processing_alias)?;

    let existing = processing
        .find_by_metadata(
            ObjectKind::Invoice,
            keys::MASTER_ACCOUNT_INVOICE_ID,
            &master_invoice_id,
        )
        .await?;
    if !existing.is_empty() {
        info!(
            scenario = "mirror_invoice",
            master_invoice_id = %master_invoice_id,
            processing_alias = %processing_alias,
            "mirror invoice already exists, skipping"
        );
        return Ok(());
    }

    processing
        .create(
            ObjectKind::InvoiceItem,
            json!({
                "customer": processing_customer_id,
                "currency": currency,
                "amount": amount_due,
                "description": description,
                "period": {"start": period_start, "end": period_end},
            }),
        )
        .await?;

    let mirror = processing
        .create(
            ObjectKind::Invoice,
            json!({
                "customer": processing_customer_id,
                "currency": currency,
                "collection_method": "charge_automatically",
                "auto_advance": true,
                "pending_invoice_items_behavior": "include",
                "default_payment_method": processing_pm_id,
                "number": invoice_number,
                "metadata": metadata::pairs(&[
                    (keys::MASTER_ACCOUNT_INVOICE_ID, &master_invoice_id),
                    (keys::MASTER_ACCOUNT_CUSTOMER_ID, &master_customer_id),
                    (keys::MASTER_ACCOUNT_SUBSCRIPTION_ID, &master_subscription_id),
                    (keys::MASTER_ACCOUNT_ID, &ctx.account_id),
                ]),
            }),
        )
        .await?;
    let mirror_id = mirror
        .id()
        .ok_or_else(|| AppError::Internal("mirror invoice has no id".to_string()))?
        .to_string();

    // An attempt, not a guarantee: a decline surfaces later as its own
    // invoice.payment_failed event on the processing account.
    if let Err(e) = processing.pay_invoice(&mirror_id, true).await {
        warn!(
            mirror_invoice_id = %mirror_id,
            error = %e,
            "off-session payment attempt on mirror invoice failed"
        );
    }

    info!(
        scenario = "mirror_invoice",
        master_invoice_id = %master_invoice_id,
        processing_alias = %processing_alias,
        mirror_invoice_id = %mirror_id,
        "created mirror invoice"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testutil::{event, master_ctx};
    use super::*;
    use crate::ledger::mock::{Call, MockLedger};

    fn seeded_master() -> std::sync::Arc<MockLedger> {
        let master = MockLedger::new();
        master.put(
            ObjectKind::Subscription,
            "sub_123",
            json!({
                "id": "sub_123",
                "default_payment_method": {
                    "id": "pm_cpm",
                    "metadata": {
                        "PROCESSING_ACCOUNT_PAYMENT_METHOD_ID": "pm_proc",
                        "PROCESSING_ACCOUNT_CUSTOMER_ID": "cus_proc",
                    },
                },
            }),
        );
        master.put(
            ObjectKind::Invoice,
            "inv_123",
            json!({"id": "inv_123", "number": "INV-7", "metadata": {}}),
        );
        master
    }

    fn attempt_required() -> crate::event::WebhookEvent {
        event(json!({
            "type": "invoice.payment_attempt_required",
            "data": {"object": {
                "id": "inv_123",
                "currency": "eur",
                "amount_due": 4500,
                "customer": "cus_master",
                "period_start": 1_700_000_000i64,
                "period_end": 1_702_592_000i64,
                "lines": {"data": [{"description": "Monthly plan"}]},
                "parent": {"subscription_details": {
                    "subscription": "sub_123",
                    "metadata": {
                        "PROCESSING_ACCOUNT_ID": "acct_us",
                        "SKIP_NS_INVOICE_SYNC": "true",
                    },
                }},
            }}
        }))
    }

    #[tokio::test]
    async fn creates_exactly_one_mirror_invoice() {
        let master = seeded_master();
        let processing = MockLedger::new();
        let ctx = master_ctx(master.clone(), processing.clone());

        run(&ctx, &attempt_required()).await.unwrap();

        let invoices: Vec<_> = processing
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Create {
                    kind: ObjectKind::Invoice,
                    params,
                } => Some(params.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(invoices.len(), 1);
        let mirror = &invoices[0];
        assert_eq!(mirror["metadata"]["MASTER_ACCOUNT_INVOICE_ID"], "inv_123");
        assert_eq!(mirror["metadata"]["MASTER_ACCOUNT_ID"], "acct_eu");
        assert_eq!(mirror["default_payment_method"], "pm_proc");
        assert_eq!(mirror["collection_method"], "charge_automatically");
        assert_eq!(mirror["number"], "INV-7");

        let item = processing
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::Create {
                    kind: ObjectKind::InvoiceItem,
                    params,
                } => Some(params.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(item["customer"], "cus_proc");
        assert_eq!(item["amount"], 4500);
        assert_eq!(item["period"]["start"], 1_700_000_000i64);
        assert_eq!(item["description"], "Monthly plan");

        assert!(processing
            .calls()
            .iter()
            .any(|c| matches!(c, Call::PayInvoice { off_session: true, .. })));

        // SKIP_NS_INVOICE_SYNC propagated onto the master invoice.
        let inv = master.object(ObjectKind::Invoice, "inv_123").unwrap();
        assert_eq!(inv["metadata"]["SKIP_NS_INVOICE_SYNC"], "true");
    }

    #[tokio::test]
    async fn existing_mirror_invoice_short_circuits() {
        let master = seeded_master();
        let processing = MockLedger::new();
        // Simulate a previous delivery having already created the mirror.
        processing.put(
            ObjectKind::Invoice,
            "in_existing",
            json!({
                "id": "in_existing",
                "metadata": {"MASTER_ACCOUNT_INVOICE_ID": "inv_123"},
            }),
        );
        let ctx = master_ctx(master, processing.clone());

        run(&ctx, &attempt_required()).await.unwrap();

        assert!(processing.writes().is_empty());
    }

    #[tokio::test]
    async fn pay_failure_does_not_fail_the_scenario() {
        let master = seeded_master();
        let processing = MockLedger::new();
        processing.fail_pay_invoice("card_declined");
        let ctx = master_ctx(master, processing.clone());

        run(&ctx, &attempt_required()).await.unwrap();

        // Invoice was still created; the decline is left to its own event.
        assert!(processing.calls().iter().any(|c| matches!(
            c,
            Call::Create {
                kind: ObjectKind::Invoice,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn missing_cpm_linkage_aborts_before_processing_writes() {
        let master = MockLedger::new();
        master.put(
            ObjectKind::Subscription,
            "sub_123",
            json!({
                "id": "sub_123",
                "default_payment_method": {"id": "pm_cpm", "metadata": {}},
            }),
        );
        let processing = MockLedger::new();
        let ctx = master_ctx(master, processing.clone());

        let err = run(&ctx, &attempt_required()).await.unwrap_err();
        assert!(matches!(err, AppError::Linkage { .. }));
        assert!(processing.calls().is_empty());
    }
}
