//! Scenario 7: a processing customer switched default payment method. Every
//! master CPM minted for that customer points at the old processing payment
//! method; overwrite the pointer so future mirror invoices charge the right
//! card. Last writer wins, so re-delivery converges naturally.

use serde_json::json;
use tracing::info;

use super::ScenarioContext;
use crate::error::{AppError, AppResult};
use crate::event::WebhookEvent;
use crate::ledger::{LedgerObject, ObjectKind};
use crate::metadata::{self, keys};

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let customer = LedgerObject::new(event.data.object.clone());
    let customer_id = customer
        .id()
        .ok_or_else(|| AppError::InvalidEvent("customer has no id".to_string()))?
        .to_string();
    let new_pm_id = customer
        .path_str(&["invoice_settings", "default_payment_method"])
        .ok_or_else(|| {
            AppError::InvalidEvent(
                "customer has no invoice_settings.default_payment_method".to_string(),
            )
        })?
        .to_string();

    let master = ctx.master()?;
    let cpms = master.list_payment_methods(&customer_id, "custom").await?;

    let mut updated = 0usize;
    for cpm in &cpms {
        let Some(cpm_id) = cpm.id() else { continue };
        master
            .update(
                ObjectKind::PaymentMethod,
                cpm_id,
                json!({"metadata": metadata::pairs(&[(
                    keys::PROCESSING_ACCOUNT_PAYMENT_METHOD_ID,
                    &new_pm_id,
                )])}),
            )
            .await?;
        updated += 1;
    }

    info!(
        scenario = "customer_default_pm_changed",
        alias = %ctx.alias,
        customer_id = %customer_id,
        new_payment_method_id = %new_pm_id,
        updated_cpms = updated,
        "realigned master custom payment methods"
    );
    Ok(())
}
