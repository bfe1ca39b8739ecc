//! Metadata linker: the only join mechanism between master and processing
//! objects.
//!
//! Every key this service reads or writes is upper-case and compared
//! case-sensitively. An absent upper-case key means "not linked"; no
//! fallback to differently-cased keys is ever attempted.

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// Canonical metadata keys.
pub mod keys {
    pub const MASTER_ACCOUNT_ID: &str = "MASTER_ACCOUNT_ID";
    pub const MASTER_ACCOUNT_INVOICE_ID: &str = "MASTER_ACCOUNT_INVOICE_ID";
    pub const MASTER_ACCOUNT_SUBSCRIPTION_ID: &str = "MASTER_ACCOUNT_SUBSCRIPTION_ID";
    pub const MASTER_ACCOUNT_CUSTOMER_ID: &str = "MASTER_ACCOUNT_CUSTOMER_ID";
    pub const MASTER_ACCOUNT_PAYMENT_RECORD_ID: &str = "MASTER_ACCOUNT_PAYMENT_RECORD_ID";
    pub const PROCESSING_ACCOUNT_ID: &str = "PROCESSING_ACCOUNT_ID";
    pub const PROCESSING_ACCOUNT_CUSTOMER_ID: &str = "PROCESSING_ACCOUNT_CUSTOMER_ID";
    pub const PROCESSING_ACCOUNT_PAYMENT_METHOD_ID: &str = "PROCESSING_ACCOUNT_PAYMENT_METHOD_ID";
    pub const PROCESSING_ACCOUNT_PAYMENT_INTENT_ID: &str = "PROCESSING_ACCOUNT_PAYMENT_INTENT_ID";
    pub const PROCESSING_ACCOUNT_REFUND_ID: &str = "PROCESSING_ACCOUNT_REFUND_ID";
    pub const PROCESSING_ACCOUNT_DISPUTE_ID: &str = "PROCESSING_ACCOUNT_DISPUTE_ID";
    pub const INITIAL_PAYMENT: &str = "INITIAL_PAYMENT";
    pub const IS_INITIAL_PAYMENT: &str = "IS_INITIAL_PAYMENT";
    pub const SKIP_NS_INVOICE_SYNC: &str = "SKIP_NS_INVOICE_SYNC";
    pub const TAXES: &str = "TAXES";
}

/// Read a metadata value by exact (case-sensitive) key. Values are trimmed;
/// empty or whitespace-only values count as absent.
pub fn get<'a>(metadata: &'a Value, key: &str) -> Option<&'a str> {
    let value = metadata.as_object()?.get(key)?;
    let s = value.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Like [`get`] but fails with `LinkageMissing` when the key is absent.
/// `object_id` identifies the retrieved object for manual reconciliation.
pub fn require(object_id: &str, metadata: &Value, key: &str) -> AppResult<String> {
    get(metadata, key)
        .map(str::to_owned)
        .ok_or_else(|| AppError::linkage(object_id, key))
}

/// Build a metadata object from key/value pairs. Writing a metadata object
/// through the ledger API upserts the given keys and leaves all others
/// untouched.
pub fn pairs(entries: &[(&str, &str)]) -> Value {
    let mut map = Map::with_capacity(entries.len());
    for (k, v) in entries {
        map.insert((*k).to_string(), Value::String((*v).to_string()));
    }
    Value::Object(map)
}
