//! Scenario 1: a processing-account payment intent succeeded for the very
//! first payment of a subscription.
//!
//! The master account learns about it by getting a custom payment method
//! (CPM) standing in for the processing card, a guaranteed payment record
//! attached to the master invoice, and the CPM set as the subscription's
//! default for future cycles. Re-delivery creates a second CPM and record;
//! there is no event-id dedup layer in front of this handler.

use serde_json::{json, Value};
use tracing::{info, warn};

use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerApi, LedgerObject, ObjectKind, PaymentAttachment};
use crate::metadata::{self, keys};
use crate::timestamps;

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let pi = LedgerObject::new(event.data.object.clone());
    let pi_id = pi
        .id()
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no id".to_string()))?
        .to_string();
    let processing_pm = pi
        .ref_id("payment_method")
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no payment_method".to_string()))?
        .to_string();
    let processing_customer = pi
        .ref_id("customer")
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no customer".to_string()))?
        .to_string();
    let currency = pi
        .str_field("currency")
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no currency".to_string()))?
        .to_string();
    let amount = pi
        .int_field("amount_received")
        .filter(|v| *v > 0)
        .or_else(|| pi.int_field("amount"))
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no amount".to_string()))?;
    let created = pi
        .int_field("created")
        .ok_or_else(|| AppError::InvalidEvent("payment intent has no created".to_string()))?;

    let pi_md = pi.metadata();
    let master_invoice_id = metadata::require(&pi_id, &pi_md, keys::MASTER_ACCOUNT_INVOICE_ID)?;
    let master_subscription_id =
        metadata::require(&pi_id, &pi_md, keys::MASTER_ACCOUNT_SUBSCRIPTION_ID)?;

    let cpm_type = ctx.config.cpm_type(&ctx.alias)?.to_string();
    let master = ctx.master()?;

    let invoice = master.get(ObjectKind::Invoice, &master_invoice_id, &[]).await?;
    let master_customer = invoice
        .ref_id("customer")
        .ok_or_else(|| {
            AppError::Internal(format!(
                "master invoice {} has no customer",
                master_invoice_id
            ))
        })?
        .to_string();

    let cpm = master
        .create(
            ObjectKind::PaymentMethod,
            json!({
                "type": "custom",
                "custom": {"type": cpm_type},
                "metadata": metadata::pairs(&[
                    (keys::PROCESSING_ACCOUNT_PAYMENT_METHOD_ID, &processing_pm),
                    (keys::MASTER_ACCOUNT_CUSTOMER_ID, &master_customer),
                    (keys::PROCESSING_ACCOUNT_CUSTOMER_ID, &processing_customer),
                ]),
            }),
        )
        .await?;
    let cpm_id = cpm
        .id()
        .ok_or_else(|| AppError::Internal("created payment method has no id".to_string()))?
        .to_string();

    master.attach_payment_method(&cpm_id, &master_customer).await?;

    let report_ts = timestamps::normalize_now(created);
    let record = master
        .report_payment(json!({
            "amount_requested": {"currency": currency, "value": amount},
            "initiated_at": report_ts,
            "customer_details": {"customer": master_customer},
            "outcome": "guaranteed",
            "guaranteed": {"guaranteed_at": report_ts},
            "metadata": metadata::pairs(&[
                (keys::PROCESSING_ACCOUNT_PAYMENT_INTENT_ID, &pi_id),
                (keys::MASTER_ACCOUNT_INVOICE_ID, &master_invoice_id),
                (keys::MASTER_ACCOUNT_SUBSCRIPTION_ID, &master_subscription_id),
            ]),
            "payment_method_details": {"payment_method": cpm_id},
            "processor_details": {"type": "custom", "custom": {"payment_reference": pi_id}},
        }))
        .await?;
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
    master
        .update(
            ObjectKind::Subscription,
            &master_subscription_id,
            json!({"default_payment_method": cpm_id}),
        )
        .await?;

    if ctx.config.propagate_tax_to_processing {
        // Best-effort: the reconciliation above already succeeded, so a
        // failure while mirroring must not fail the event.
        if let Err(e) = mirror_to_processing(
            ctx,
            master.as_ref(),
            &invoice,
            &master_invoice_id,
            &master_subscription_id,
            &processing_customer,
            &pi_id,
            &currency,
        )
        .await
        {
            warn!(
                alias = %ctx.alias,
                master_invoice_id = %master_invoice_id,
                error = %e,
                "failed to mirror master invoice onto processing account"
            );
        }
    }

    info!(
        scenario = "initial_payment",
        alias = %ctx.alias,
        payment_intent = %pi_id,
        master_invoice_id = %master_invoice_id,
        cpm_id = %cpm_id,
        payment_record_id = %record_id,
        "initial payment reconciled"
    );
    Ok(())
}

/// Rebuild the master invoice on the processing account as a `send_invoice`
/// invoice, with per-line tax details carried as a JSON blob in `TAXES`
/// metadata, so downstream invoicing systems see identical data on both
/// accounts.
#[allow(clippy::too_many_arguments)]
async fn mirror_to_processing(
    ctx: &ScenarioContext,
    master: &dyn LedgerApi,
    master_invoice: &LedgerObject,
    master_invoice_id: &str,
    master_subscription_id: &str,
    processing_customer: &str,
    pi_id: &str,
    fallback_currency: &str,
) -> AppResult<()> {
    let processing = ctx.origin()?;
    let master_account_id = ctx.config.master_account()?.account_id.clone();

    let invoice_number = match master_invoice.str_field("number") {
        Some(n) => Some(n.to_string()),
        // Some retrieval shapes omit the number; fetch once more.
        None => master
            .get(ObjectKind::Invoice, master_invoice_id, &[])
            .await?
            .str_field("number")
            .map(str::to_owned),
    };

    for line in master_invoice.list_data("lines") {
        let taxes = line_taxes(master, &line).await?;
        let item_currency = line
            .str_field("currency")
            .unwrap_or(fallback_currency)
            .to_string();
        let item_amount = line
            .int_field("amount")
            .or_else(|| line.int_field("subtotal"))
            .ok_or_else(|| {
                AppError::Internal("master invoice line has no amount".to_string())
            })?;
        let description = line.str_field("description").unwrap_or_default();

        processing
            .create(
                ObjectKind::InvoiceItem,
                json!({
                    "customer": processing_customer,
                    "currency": item_currency,
                    "amount": item_amount,
                    "description": description,
                    "metadata": {keys::TAXES: serde_json::to_string(&taxes)?},
                }),
            )
            .await?;
    }

    let mirror = processing
        .create(
            ObjectKind::Invoice,
            json!({
                "customer": processing_customer,
                "pending_invoice_items_behavior": "include",
                "collection_method": "send_invoice",
                "days_until_due": 1,
                "number": invoice_number,
                "metadata": metadata::pairs(&[
                    (keys::MASTER_ACCOUNT_INVOICE_ID, master_invoice_id),
                    (keys::MASTER_ACCOUNT_SUBSCRIPTION_ID, master_subscription_id),
                    (keys::MASTER_ACCOUNT_ID, &master_account_id),
                ]),
            }),
        )
        .await?;
    let mirror_id = mirror
        .id()
        .ok_or_else(|| AppError::Internal("mirror invoice has no id".to_string()))?
        .to_string();

    processing.finalize_invoice(&mirror_id).await?;

    // Tag the mirror so a later invoice.paid delivery for it is skipped, and
    // keep the originating payment intent reachable for traceability.
    processing
        .update(
            ObjectKind::Invoice,
            &mirror_id,
            json!({"metadata": metadata::pairs(&[
                (keys::PROCESSING_ACCOUNT_PAYMENT_INTENT_ID, pi_id),
                (keys::IS_INITIAL_PAYMENT, "true"),
            ])}),
        )
        .await?;

    // The platform does not always allow attaching an existing payment
    // intent to a send_invoice invoice; tolerate a rejection here.
    if let Err(e) = processing
        .attach_payment(&mirror_id, PaymentAttachment::Intent(pi_id.to_string()))
        .await
    {
        warn!(
            mirror_invoice_id = %mirror_id,
            error = %e,
            "could not attach payment intent to mirror invoice"
        );
    }

    info!(
        alias = %ctx.alias,
        master_invoice_id = %master_invoice_id,
        mirror_invoice_id = %mirror_id,
        "mirrored master invoice onto processing account"
    );
    Ok(())
}

/// Tax data for one master invoice line, shaped for the `TAXES` metadata
/// blob. Rates are resolved against the master account's tax rate objects.
async fn line_taxes(master: &dyn LedgerApi, line: &LedgerObject) -> AppResult<Vec<Value>> {
    let mut out = Vec::new();
    let Some(taxes) = line.0.get("taxes").and_then(Value::as_array) else {
        return Ok(out);
    };

    for tax in taxes {
        let tax = LedgerObject::new(tax.clone());
        let Some(rate_id) = tax.path_str(&["tax_rate_details", "tax_rate"]) else {
            continue;
        };
        let rate = master.get(ObjectKind::TaxRate, rate_id, &[]).await?;
        let display_name = rate.str_field("display_name").unwrap_or_default();
        let jurisdiction = rate.str_field("jurisdiction").unwrap_or_default();
        let label = [display_name, jurisdiction]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("-");
        let inclusive = tax
            .str_field("tax_behavior")
            .map(|b| b.eq_ignore_ascii_case("inclusive"))
            .unwrap_or(false);

        out.push(json!({
            "amount": tax.int_field("amount").unwrap_or(0),
            "taxable_amount": tax.int_field("taxable_amount").unwrap_or(0),
            "tax_rate_data": {
                "inclusive": inclusive,
                "display_name": label,
                "percentage": rate.0.get("effective_percentage").cloned().unwrap_or(Value::Null),
            },
        }));
    }
    Ok(out)
}
