//! HTTP implementation of the Ledger API facade.
//!
//! The platform's REST dialect: bearer auth per account secret, JSON
//! responses, form-encoded request bodies with bracket nesting for maps and
//! arrays (`metadata[KEY]=value`, `lines[0][id]=...`), `expand[i]=path`
//! query parameters, and a metadata search endpoint taking
//! `metadata['KEY']:'value'` queries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use super::{LedgerApi, LedgerClientFactory, LedgerObject, ObjectKind, PaymentAttachment};
use crate::config::AccountConfig;
use crate::error::{AppResult, RemoteError};

pub const DEFAULT_BASE_URL: &str = "https://api.ledger.example.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpLedger {
    http: Client,
    base_url: String,
    secret_key: String,
}

impl HttpLedger {
    pub fn new(http: Client, base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path);
        self.http
            .request(method, url)
            .bearer_auth(&self.secret_key)
    }

    async fn execute(&self, builder: RequestBuilder) -> AppResult<Value> {
        let response = builder.send().await.map_err(RemoteError::from)?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::Object(Default::default()));

        if status.is_success() {
            return Ok(body);
        }

        let code = body
            .pointer("/error/code")
            .or_else(|| body.pointer("/error/type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("no error message")
            .to_string();
        debug!(status = status.as_u16(), code, "ledger API rejected request");
        Err(RemoteError::Api {
            status: status.as_u16(),
            code,
            message,
        }
        .into())
    }

    async fn get_object(
        &self,
        kind: ObjectKind,
        id: &str,
        expand: &[&str],
    ) -> AppResult<LedgerObject> {
        let mut builder = self.request(Method::GET, &format!("{}/{}", kind.path(), id));
        for (i, path) in expand.iter().enumerate() {
            builder = builder.query(&[(format!("expand[{}]", i), *path)]);
        }
        match self.execute(builder).await {
            Ok(body) => Ok(LedgerObject(body)),
            Err(crate::error::AppError::Remote(RemoteError::Api { status: 404, .. })) => {
                Err(RemoteError::NotFound {
                    kind: kind.to_string(),
                    id: id.to_string(),
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    async fn post_form(&self, path: &str, params: Value) -> AppResult<LedgerObject> {
        let form = flatten_params(&params);
        let body = self
            .execute(self.request(Method::POST, path).form(&form))
            .await?;
        Ok(LedgerObject(body))
    }
}

#[async_trait]
impl LedgerApi for HttpLedger {
    async fn get(&self, kind: ObjectKind, id: &str, expand: &[&str]) -> AppResult<LedgerObject> {
        self.get_object(kind, id, expand).await
    }

    async fn create(&self, kind: ObjectKind, params: Value) -> AppResult<LedgerObject> {
        self.post_form(kind.path(), params).await
    }

    async fn update(&self, kind: ObjectKind, id: &str, params: Value) -> AppResult<LedgerObject> {
        self.post_form(&format!("{}/{}", kind.path(), id), params)
            .await
    }

    async fn find_by_metadata(
        &self,
        kind: ObjectKind,
        key: &str,
        value: &str,
    ) -> AppResult<Vec<LedgerObject>> {
        let query = format!("metadata['{}']:'{}'", key, value);
        let builder = self
            .request(Method::GET, &format!("{}/search", kind.path()))
            .query(&[("query", query.as_str()), ("limit", "100")]);
        let body = self.execute(builder).await?;
        Ok(LedgerObject(body).list_data_root())
    }

    async fn attach_payment(
        &self,
        invoice_id: &str,
        attachment: PaymentAttachment,
    ) -> AppResult<LedgerObject> {
        let params = match attachment {
            PaymentAttachment::Record(id) => serde_json::json!({ "payment_record": id }),
            PaymentAttachment::Intent(id) => serde_json::json!({ "payment_intent": id }),
        };
        self.post_form(&format!("invoices/{}/attach_payment", invoice_id), params)
            .await
    }

    async fn report_payment(&self, params: Value) -> AppResult<LedgerObject> {
        self.post_form("payment_records/report_payment", params)
            .await
    }

    async fn report_refund(&self, record_id: &str, params: Value) -> AppResult<LedgerObject> {
        self.post_form(
            &format!("payment_records/{}/report_refund", record_id),
            params,
        )
        .await
    }

    async fn pay_invoice(&self, invoice_id: &str, off_session: bool) -> AppResult<LedgerObject> {
        self.post_form(
            &format!("invoices/{}/pay", invoice_id),
            serde_json::json!({ "off_session": off_session }),
        )
        .await
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> AppResult<LedgerObject> {
        self.post_form(
            &format!("invoices/{}/finalize", invoice_id),
            Value::Object(Default::default()),
        )
        .await
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> AppResult<LedgerObject> {
        self.post_form(
            &format!("payment_methods/{}/attach", payment_method_id),
            serde_json::json!({ "customer": customer_id }),
        )
        .await
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
        type_filter: &str,
    ) -> AppResult<Vec<LedgerObject>> {
        let builder = self
            .request(
                Method::GET,
                &format!("customers/{}/payment_methods", customer_id),
            )
            .query(&[("type", type_filter)]);
        let body = self.execute(builder).await?;
        Ok(LedgerObject(body).list_data_root())
    }

    async fn create_credit_note(&self, params: Value) -> AppResult<LedgerObject> {
        self.post_form("credit_notes", params).await
    }
}

impl LedgerObject {
    /// Items of a top-level list response (`{"object": "list", "data": [..]}`).
    fn list_data_root(&self) -> Vec<LedgerObject> {
        self.0
            .get("data")
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().map(LedgerObject::new).collect())
            .unwrap_or_default()
    }
}

/// Flatten a JSON params tree into bracket-nested form pairs.
fn flatten_params(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}

fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}[{}]", prefix, key)
                };
                walk(&key, nested, out);
            }
        }
        Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                walk(&format!("{}[{}]", prefix, i), nested, out);
            }
        }
        // Null params are omitted, matching optional fields.
        Value::Null => {}
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
    }
}

pub struct HttpLedgerFactory {
    http: Client,
    base_url: String,
}

impl HttpLedgerFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("LEDGER_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }
}

impl LedgerClientFactory for HttpLedgerFactory {
    fn client(&self, _alias: &str, account: &AccountConfig) -> Arc<dyn LedgerApi> {
        Arc::new(HttpLedger::new(
            self.http.clone(),
            self.base_url.clone(),
            account.secret_key.clone(),
        ))
    }
}
