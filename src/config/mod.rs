//! Runtime configuration: account registry, master alias, custom payment
//! method mapping, and orchestration feature flags.
//!
//! Configuration is read-mostly and hot-reloadable. Every request takes one
//! immutable snapshot at entry and never re-reads mid-handler, so a reload
//! cannot produce a torn read within a single event's processing.

mod store;

pub use store::ConfigStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Role an account plays in the reconciliation protocol. Exactly one account
/// holds `Master` at any time; all others collect payments locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    Master,
    Processing,
}

/// Normalize an alias the way the routing layer expects it: trimmed,
/// upper-case.
pub fn normalize_alias(alias: &str) -> String {
    alias.trim().to_uppercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    pub secret_key: String,
    #[serde(default)]
    pub publishable_key: String,
    #[serde(default)]
    pub webhook_signing_secret: String,
    /// Optional ISO 2-letter country code, UI hint only.
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_master_alias")]
    pub master_account_alias: String,
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
    /// Custom payment method type to create on the master account, per
    /// processing alias.
    #[serde(default)]
    pub master_custom_payment_methods: HashMap<String, String>,
    /// When processing != master, tag the subscription and master invoice
    /// with SKIP_NS_INVOICE_SYNC so downstream invoice sync skips them.
    #[serde(default = "default_true")]
    pub skip_sync_non_master_invoice: bool,
    /// Scenario 1: mirror the master invoice (including tax details) onto
    /// the processing account as a send_invoice invoice.
    #[serde(default = "default_true")]
    pub propagate_tax_to_processing: bool,
}

fn default_master_alias() -> String {
    "EU".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            master_account_alias: default_master_alias(),
            accounts: HashMap::new(),
            master_custom_payment_methods: HashMap::new(),
            skip_sync_non_master_invoice: true,
            propagate_tax_to_processing: true,
        }
    }
}

impl RuntimeConfig {
    pub fn master_alias(&self) -> &str {
        &self.master_account_alias
    }

    pub fn role(&self, alias: &str) -> AccountRole {
        if alias == self.master_account_alias {
            AccountRole::Master
        } else {
            AccountRole::Processing
        }
    }

    pub fn account(&self, alias: &str) -> AppResult<&AccountConfig> {
        self.accounts
            .get(alias)
            .ok_or_else(|| AppError::UnknownAlias(alias.to_string()))
    }

    pub fn master_account(&self) -> AppResult<&AccountConfig> {
        self.account(&self.master_account_alias)
    }

    /// Webhook signing secret for an alias. Failing fast here avoids silent
    /// misrouting: a request for an alias without a secret is rejected
    /// before any ledger call.
    pub fn signing_secret(&self, alias: &str) -> AppResult<&str> {
        let account = self.account(alias)?;
        let secret = account.webhook_signing_secret.trim();
        if secret.is_empty() {
            return Err(crate::error::SignatureError::MissingSecret(alias.to_string()).into());
        }
        Ok(secret)
    }

    /// Custom payment method type for a given processing alias.
    pub fn cpm_type(&self, processing_alias: &str) -> AppResult<&str> {
        self.master_custom_payment_methods
            .get(processing_alias)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Missing master custom payment method type for alias {}",
                    processing_alias
                ))
            })
    }

    /// Reverse lookup: platform account id -> configured alias. Used when an
    /// object carries a PROCESSING_ACCOUNT_ID and the handler needs the
    /// matching credentials.
    pub fn alias_by_account_id(&self, account_id: &str) -> AppResult<String> {
        let target = account_id.trim();
        if target.is_empty() {
            return Err(AppError::Config(
                "Missing account_id for alias lookup".to_string(),
            ));
        }
        self.accounts
            .iter()
            .find(|(_, acc)| acc.account_id.trim() == target)
            .map(|(alias, _)| alias.clone())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Unable to resolve alias for account_id={}",
                    target
                ))
            })
    }
}
