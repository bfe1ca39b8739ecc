//! Recording in-memory ledger used by scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{LedgerApi, LedgerClientFactory, LedgerObject, ObjectKind, PaymentAttachment};
use crate::config::AccountConfig;
use crate::error::{AppResult, RemoteError};
use crate::metadata;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get {
        kind: ObjectKind,
        id: String,
    },
    Create {
        kind: ObjectKind,
        params: Value,
    },
    Update {
        kind: ObjectKind,
        id: String,
        params: Value,
    },
    Find {
        kind: ObjectKind,
        key: String,
        value: String,
    },
    AttachPayment {
        invoice_id: String,
        attachment: PaymentAttachment,
    },
    ReportPayment {
        params: Value,
    },
    ReportRefund {
        record_id: String,
        params: Value,
    },
    PayInvoice {
        invoice_id: String,
        off_session: bool,
    },
    FinalizeInvoice {
        invoice_id: String,
    },
    AttachPaymentMethod {
        payment_method_id: String,
        customer_id: String,
    },
    ListPaymentMethods {
        customer_id: String,
        type_filter: String,
    },
    CreateCreditNote {
        params: Value,
    },
}

impl Call {
    /// True for calls that mutate remote state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Call::Get { .. } | Call::Find { .. } | Call::ListPaymentMethods { .. }
        )
    }
}

#[derive(Default)]
pub struct MockLedger {
    objects: Mutex<HashMap<(ObjectKind, String), Value>>,
    calls: Mutex<Vec<Call>>,
    seq: AtomicU64,
    fail_pay_invoice: Mutex<Option<String>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, kind: ObjectKind, id: &str, value: Value) {
        self.objects
            .lock()
            .insert((kind, id.to_string()), value);
    }

    pub fn object(&self, kind: ObjectKind, id: &str) -> Option<Value> {
        self.objects.lock().get(&(kind, id.to_string())).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    /// Make the next `pay_invoice` calls fail with the given decline code.
    pub fn fail_pay_invoice(&self, code: &str) {
        *self.fail_pay_invoice.lock() = Some(code.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next_id(&self, kind: ObjectKind) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let prefix = match kind {
            ObjectKind::Invoice => "in",
            ObjectKind::InvoiceItem => "ii",
            ObjectKind::Subscription => "sub",
            ObjectKind::Customer => "cus",
            ObjectKind::PaymentMethod => "pm",
            ObjectKind::PaymentIntent => "pi",
            ObjectKind::PaymentRecord => "pr",
            ObjectKind::CreditNote => "cn",
            ObjectKind::TaxRate => "txr",
        };
        format!("{}_mock_{}", prefix, n)
    }
}

#[async_trait]
impl LedgerApi for MockLedger {
    async fn get(&self, kind: ObjectKind, id: &str, _expand: &[&str]) -> AppResult<LedgerObject> {
        self.record(Call::Get {
            kind,
            id: id.to_string(),
        });
        self.object(kind, id)
            .map(LedgerObject)
            .ok_or_else(|| {
                RemoteError::NotFound {
                    kind: kind.to_string(),
                    id: id.to_string(),
                }
                .into()
            })
    }

    async fn create(&self, kind: ObjectKind, params: Value) -> AppResult<LedgerObject> {
        self.record(Call::Create {
            kind,
            params: params.clone(),
        });
        let id = self.next_id(kind);
        let mut object = params;
        object["id"] = Value::String(id.clone());
        self.put(kind, &id, object.clone());
        Ok(LedgerObject(object))
    }

    async fn update(&self, kind: ObjectKind, id: &str, params: Value) -> AppResult<LedgerObject> {
        self.record(Call::Update {
            kind,
            id: id.to_string(),
            params: params.clone(),
        });
        let mut objects = self.objects.lock();
        let stored = objects
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| RemoteError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            })?;
        merge_update(stored, &params);
        Ok(LedgerObject(stored.clone()))
    }

    async fn find_by_metadata(
        &self,
        kind: ObjectKind,
        key: &str,
        value: &str,
    ) -> AppResult<Vec<LedgerObject>> {
        self.record(Call::Find {
            kind,
            key: key.to_string(),
            value: value.to_string(),
        });
        let objects = self.objects.lock();
        Ok(objects
            .iter()
            .filter(|((k, _), obj)| {
                *k == kind
                    && obj
                        .get("metadata")
                        .map(|md| metadata::get(md, key) == Some(value))
                        .unwrap_or(false)
            })
            .map(|(_, obj)| LedgerObject(obj.clone()))
            .collect())
    }

    async fn attach_payment(
        &self,
        invoice_id: &str,
        attachment: PaymentAttachment,
    ) -> AppResult<LedgerObject> {
        self.record(Call::AttachPayment {
            invoice_id: invoice_id.to_string(),
            attachment,
        });
        Ok(LedgerObject(json!({ "id": invoice_id })))
    }

    async fn report_payment(&self, params: Value) -> AppResult<LedgerObject> {
        self.record(Call::ReportPayment {
            params: params.clone(),
        });
        let id = self.next_id(ObjectKind::PaymentRecord);
        let mut record = params;
        record["id"] = Value::String(id.clone());
        self.put(ObjectKind::PaymentRecord, &id, record.clone());
        Ok(LedgerObject(record))
    }

    async fn report_refund(&self, record_id: &str, params: Value) -> AppResult<LedgerObject> {
        self.record(Call::ReportRefund {
            record_id: record_id.to_string(),
            params,
        });
        Ok(LedgerObject(json!({ "id": record_id })))
    }

    async fn pay_invoice(&self, invoice_id: &str, off_session: bool) -> AppResult<LedgerObject> {
        self.record(Call::PayInvoice {
            invoice_id: invoice_id.to_string(),
            off_session,
        });
        if let Some(code) = self.fail_pay_invoice.lock().clone() {
            return Err(RemoteError::Api {
                status: 402,
                code,
                message: "payment attempt failed".to_string(),
            }
            .into());
        }
        Ok(LedgerObject(json!({ "id": invoice_id, "status": "paid" })))
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> AppResult<LedgerObject> {
        self.record(Call::FinalizeInvoice {
            invoice_id: invoice_id.to_string(),
        });
        Ok(LedgerObject(json!({ "id": invoice_id, "status": "open" })))
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> AppResult<LedgerObject> {
        self.record(Call::AttachPaymentMethod {
            payment_method_id: payment_method_id.to_string(),
            customer_id: customer_id.to_string(),
        });
        Ok(LedgerObject(json!({ "id": payment_method_id })))
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
        type_filter: &str,
    ) -> AppResult<Vec<LedgerObject>> {
        self.record(Call::ListPaymentMethods {
            customer_id: customer_id.to_string(),
            type_filter: type_filter.to_string(),
        });
        let objects = self.objects.lock();
        Ok(objects
            .iter()
            .filter(|((kind, _), obj)| {
                *kind == ObjectKind::PaymentMethod
                    && obj.get("customer").and_then(Value::as_str) == Some(customer_id)
                    && obj.get("type").and_then(Value::as_str) == Some(type_filter)
            })
            .map(|(_, obj)| LedgerObject(obj.clone()))
            .collect())
    }

    async fn create_credit_note(&self, params: Value) -> AppResult<LedgerObject> {
        self.record(Call::CreateCreditNote {
            params: params.clone(),
        });
        let id = self.next_id(ObjectKind::CreditNote);
        Ok(LedgerObject(json!({ "id": id })))
    }
}

/// Platform update semantics: metadata keys are upserted, everything else is
/// overwritten field-by-field.
fn merge_update(stored: &mut Value, params: &Value) {
    let Some(updates) = params.as_object() else {
        return;
    };
    for (key, value) in updates {
        if key == "metadata" {
            let target = stored
                .as_object_mut()
                .expect("stored objects are maps")
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let (Some(target), Some(upserts)) = (target.as_object_mut(), value.as_object()) {
                for (k, v) in upserts {
                    target.insert(k.clone(), v.clone());
                }
            }
        } else {
            stored[key] = value.clone();
        }
    }
}

/// Factory handing out one mock per alias.
#[derive(Default)]
pub struct MockFactory {
    clients: HashMap<String, Arc<MockLedger>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alias: &str, ledger: Arc<MockLedger>) -> Self {
        self.clients.insert(alias.to_string(), ledger);
        self
    }
}

impl LedgerClientFactory for MockFactory {
    fn client(&self, alias: &str, _account: &AccountConfig) -> Arc<dyn LedgerApi> {
        self.clients
            .get(alias)
            .cloned()
            .unwrap_or_else(|| panic!("no mock ledger registered for alias {alias}"))
    }
}
