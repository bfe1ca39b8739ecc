//! Scenario 5: a refund was issued on a processing account. The master
//! payment record is amended with a refund report and the master invoice
//! gets an out-of-band credit note for the refunded amount.
//!
//! Scenario 6 (lost dispute) shares the whole effect sequence and only
//! differs in which metadata key carries the processing-side reference, so
//! both handlers funnel into [`report_reversal`].

use serde_json::json;
use tracing::{info, warn};

use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerApi, LedgerObject, ObjectKind};
use crate::metadata::{self, keys};
use crate::timestamps;

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let reversal = Reversal::from_event(event, "refund")?;
    report_reversal(ctx, reversal, keys::PROCESSING_ACCOUNT_REFUND_ID, "refund_created").await
}

/// Common shape of a refund or lost dispute: the money went back, the master
/// record must say so.
pub(super) struct Reversal {
    pub id: String,
    pub payment_intent: String,
    pub amount: i64,
    pub currency: String,
    pub created: i64,
}

impl Reversal {
    pub fn from_event(event: &WebhookEvent, what: &str) -> AppResult<Self> {
        let object = LedgerObject::new(event.data.object.clone());
        let missing =
            |field: &str| AppError::InvalidEvent(format!("{} has no {}", what, field));
        Ok(Self {
            id: object.id().ok_or_else(|| missing("id"))?.to_string(),
            payment_intent: object
                .ref_id("payment_intent")
                .ok_or_else(|| missing("payment_intent"))?
                .to_string(),
            amount: object.int_field("amount").ok_or_else(|| missing("amount"))?,
            currency: object
                .str_field("currency")
                .ok_or_else(|| missing("currency"))?
                .to_string(),
            created: object.int_field("created").ok_or_else(|| missing("created"))?,
        })
    }
}

pub(super) async fn report_reversal(
    ctx: &ScenarioContext,
    reversal: Reversal,
    reference_key: &'static str,
    scenario: &'static str,
) -> AppResult<()> {
    let processing = ctx.origin()?;
    let pi = processing
        .get(
            ObjectKind::PaymentIntent,
            &reversal.payment_intent,
            &["invoice"],
        )
        .await?;
    let master_invoice_id = master_invoice_link(&pi).ok_or_else(|| {
        AppError::linkage(reversal.payment_intent.as_str(), keys::MASTER_ACCOUNT_INVOICE_ID)
    })?;

    let master = ctx.master()?;
    let master_invoice = master
        .get(ObjectKind::Invoice, &master_invoice_id, &[])
        .await?;
    let record_id = metadata::require(
        &master_invoice_id,
        &master_invoice.metadata(),
        keys::MASTER_ACCOUNT_PAYMENT_RECORD_ID,
    )?;

    let report_ts = timestamps::normalize_now(reversal.created);
    master
        .report_refund(
            &record_id,
            json!({
                "processor_details": {"type": "custom", "custom": {"refund_reference": reversal.id}},
                "outcome": "refunded",
                "refunded": {"refunded_at": report_ts},
                "amount": {"currency": reversal.currency, "value": reversal.amount},
                "initiated_at": report_ts,
                "metadata": metadata::pairs(&[(reference_key, &reversal.id)]),
            }),
        )
        .await?;

    // The credit note keeps master-side revenue reporting honest but is not
    // part of the reconciliation contract; a failure is logged, not raised.
    if let Err(e) = credit_master_invoice(
        master.as_ref(),
        &master_invoice,
        &master_invoice_id,
        reversal.amount,
        reference_key,
        &reversal.id,
    )
    .await
    {
        warn!(
            master_invoice_id = %master_invoice_id,
            error = %e,
            "failed to create credit note on master invoice"
        );
    }

    info!(
        scenario = scenario,
        alias = %ctx.alias,
        reference_id = %reversal.id,
        master_invoice_id = %master_invoice_id,
        master_payment_record_id = %record_id,
        "reversal reported on master account"
    );
    Ok(())
}

/// Master linkage lives on the invoice expanded into the payment intent when
/// one exists (mirror flows); initial payments have no invoice, so the
/// intent's own metadata is the fallback.
fn master_invoice_link(pi: &LedgerObject) -> Option<String> {
    if let Some(invoice) = pi.expanded("invoice") {
        let md = invoice.metadata();
        if md.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
            return metadata::get(&md, keys::MASTER_ACCOUNT_INVOICE_ID).map(str::to_owned);
        }
    }
    let md = pi.metadata();
    metadata::get(&md, keys::MASTER_ACCOUNT_INVOICE_ID).map(str::to_owned)
}

async fn credit_master_invoice(
    master: &dyn LedgerApi,
    master_invoice: &LedgerObject,
    master_invoice_id: &str,
    amount: i64,
    reference_key: &str,
    reference_id: &str,
) -> AppResult<()> {
    let lines = master_invoice.list_data("lines");
    let first_line_id = lines
        .first()
        .and_then(LedgerObject::id)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "master invoice {} has no line items for a credit note",
                master_invoice_id
            ))
        })?;

    master
        .create_credit_note(json!({
            "invoice": master_invoice_id,
            "lines": [{
                "invoice_line_item": first_line_id,
                "quantity": 1,
                "type": "invoice_line_item",
            }],
            "out_of_band_amount": amount,
            "metadata": metadata::pairs(&[(reference_key, reference_id)]),
        }))
        .await?;
    Ok(())
}
