//! Scenario 6: a dispute on a processing charge closed as lost. The money
//! is gone, which is a refund as far as the master ledger is concerned; the
//! record's metadata carries the dispute id instead of a refund id.

use super::refund::{report_reversal, Reversal};
use super::ScenarioContext;
use crate::error::AppResult;
use crate::event::WebhookEvent;
use crate::metadata::keys;

pub async fn run(ctx: &ScenarioContext, event: &WebhookEvent) -> AppResult<()> {
    let reversal = Reversal::from_event(event, "dispute")?;
    report_reversal(
        ctx,
        reversal,
        keys::PROCESSING_ACCOUNT_DISPUTE_ID,
        "dispute_closed_lost",
    )
    .await
}
