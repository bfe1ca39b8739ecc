//! Scenario 4: a payment attempt on a processing mirror invoice failed.
//! The master account gets a payment record with outcome `failed` attached
//! to the original invoice so dunning state stays in sync.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use super::invoice_paid::master_subscription_cpm;
use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerApi, LedgerObject, ObjectKind, PaymentAttachment};
use crate::metadata::{self, keys};
use crate::timestamps;

const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let invoice_id = event
        .object_id()
        .ok_or_else(|| AppError::InvalidEvent("invoice has no id".to_string()))?
        .to_string();

    let processing = ctx.origin()?;
    let (invoice, payment_intent, payment_method) =
        poll_until_ready(processing.as_ref(), &invoice_id).await?;

    let failed_at = failure_timestamp(&invoice).ok_or_else(|| {
        AppError::InvalidEvent(format!(
            "invoice {} has no usable failure timestamp",
            invoice_id
        ))
    })?;

    let md = invoice.metadata();
    let master_invoice_id = metadata::require(&invoice_id, &md, keys::MASTER_ACCOUNT_INVOICE_ID)?;
    let master_subscription_id =
        metadata::require(&invoice_id, &md, keys::MASTER_ACCOUNT_SUBSCRIPTION_ID)?;
    let master_customer_id = metadata::get(&md, keys::MASTER_ACCOUNT_CUSTOMER_ID);
    let master_account_id = metadata::get(&md, keys::MASTER_ACCOUNT_ID);

    let currency = invoice
        .str_field("currency")
        .ok_or_else(|| AppError::Internal(format!("invoice {} has no currency", invoice_id)))?
        .to_string();
    let amount = invoice
        .int_field("amount_due")
        .or_else(|| invoice.int_field("total"))
        .ok_or_else(|| AppError::Internal(format!("invoice {} has no amount", invoice_id)))?;

    let master = ctx.master()?;
    let cpm_id = master_subscription_cpm(master.as_ref(), &master_subscription_id).await?;

    let report_ts = timestamps::normalize_now(failed_at);
    let mut record_metadata = vec![
        (
            keys::PROCESSING_ACCOUNT_PAYMENT_INTENT_ID,
            payment_intent.as_str(),
        ),
        (
            keys::PROCESSING_ACCOUNT_PAYMENT_METHOD_ID,
            payment_method.as_str(),
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
        "outcome": "failed",
        "failed": {"failed_at": report_ts},
        "metadata": metadata::pairs(&record_metadata),
        "payment_method_details": {"payment_method": cpm_id},
        "processor_details": {"type": "custom", "custom": {"payment_reference": payment_intent}},
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
        .attach_payment(&master_invoice_id, PaymentAttachment::Record(record_id.clone()))
        .await?;

    info!(
        scenario = "invoice_failed",
        alias = %ctx.alias,
        invoice_id = %invoice_id,
        master_invoice_id = %master_invoice_id,
        payment_record_id = %record_id,
        "failed payment reported on master account"
    );
    Ok(())
}

/// Best-available failure timestamp, in order of preference. The invoice's
/// `created` is the final fallback; with none of these present the invoice
/// cannot be reported.
fn failure_timestamp(invoice: &LedgerObject) -> Option<i64> {
    ["paid_at", "finalized_at", "marked_uncollectible_at", "voided_at"]
        .into_iter()
        .find_map(|field| invoice.path_int(&["status_transitions", field]))
        .or_else(|| invoice.int_field("created"))
}

async fn poll_until_ready(
    processing: &dyn LedgerApi,
    invoice_id: &str,
) -> AppResult<(LedgerObject, String, String)> {
    for attempt in 1..=POLL_ATTEMPTS {
        let invoice = processing.get(ObjectKind::Invoice, invoice_id, &[]).await?;
        let payment_method = invoice.ref_id("default_payment_method").map(str::to_owned);
        let payment_intent = invoice.ref_id("payment_intent").map(str::to_owned);

        if let (Some(payment_method), Some(payment_intent)) = (payment_method, payment_intent) {
            return Ok((invoice, payment_intent, payment_method));
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
