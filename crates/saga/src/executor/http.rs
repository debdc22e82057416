//! HTTP step executor backed by [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use domain::StepKind;
use reqwest::Url;
use serde_json::{Value, json};

use super::{StepExecutor, StepFailure, StepPayload, StepResult, StepSuccess, classify_status};
use crate::config::{SagaConfig, ServiceUrls};
use crate::error::Result;
use crate::idempotency::IdempotencyKey;

/// Header carrying the `(transaction, step)` key on side-effecting calls.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const REFUND_REASON: &str = "Transaction failed";

/// Executes saga steps as HTTP calls to the collaborator services.
///
/// | Step | Request |
/// |---|---|
/// | select-product | `GET {catalog}/products/{product_ref}` |
/// | charge-payment | `POST {payments}/payments` |
/// | decrement-inventory | `POST {inventory}/inventory/decrease` |
/// | register-purchase | `POST {purchases}/purchases` |
/// | refund-payment | `POST {payments}/payments/{payment_id}/refund` |
/// | cancel-purchase | `DELETE {purchases}/purchases/{purchase_id}/cancel` |
#[derive(Debug, Clone)]
pub struct HttpStepExecutor {
    client: reqwest::Client,
    urls: ServiceUrls,
}

impl HttpStepExecutor {
    /// Creates an executor with a fresh connection pool.
    pub fn new(urls: ServiceUrls) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, urls })
    }

    /// Creates an executor reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, urls: ServiceUrls) -> Self {
        Self { client, urls }
    }

    /// Creates an executor for the collaborators named in `config`.
    pub fn from_config(config: &SagaConfig) -> Result<Self> {
        Self::new(config.services.clone())
    }

    fn build_request(
        &self,
        kind: StepKind,
        payload: &StepPayload,
    ) -> std::result::Result<reqwest::RequestBuilder, StepFailure> {
        let key = IdempotencyKey::new(payload.transaction_id, kind).to_string();
        let request = match kind {
            StepKind::SelectProduct => {
                let url = endpoint(&self.urls.catalog, &["products", payload.product_ref.as_str()])?;
                return Ok(self.client.get(url));
            }
            StepKind::ChargePayment => self
                .client
                .post(endpoint(&self.urls.payments, &["payments"])?)
                .json(&json!({
                    "user_id": payload.user_ref,
                    "transaction_id": payload.transaction_id,
                    "amount": payload.amount,
                    "product_id": payload.product_id(),
                })),
            StepKind::DecrementInventory => self
                .client
                .post(endpoint(&self.urls.inventory, &["inventory", "decrease"])?)
                .json(&json!({
                    "product_id": payload.product_id(),
                    "quantity": payload.quantity,
                    "operation_id": key,
                    "transaction_id": payload.transaction_id,
                })),
            StepKind::RegisterPurchase => self
                .client
                .post(endpoint(&self.urls.purchases, &["purchases"])?)
                .json(&json!({
                    "transaction_id": payload.transaction_id,
                    "user_id": payload.user_ref,
                    "product_id": payload.product_id(),
                    "payment_id": payload.payment_id,
                    "amount": payload.amount,
                })),
            StepKind::RefundPayment => {
                let payment_id = payload.require_payment_id()?;
                self.client
                    .post(endpoint(
                        &self.urls.payments,
                        &["payments", payment_id, "refund"],
                    )?)
                    .json(&json!({
                        "reason": REFUND_REASON,
                        "transaction_id": payload.transaction_id,
                    }))
            }
            StepKind::CancelPurchase => {
                let purchase_id = payload.require_purchase_id()?;
                self.client.delete(endpoint(
                    &self.urls.purchases,
                    &["purchases", purchase_id, "cancel"],
                )?)
            }
        };
        Ok(request.header(IDEMPOTENCY_KEY_HEADER, key))
    }
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    #[tracing::instrument(skip(self, payload), fields(transaction_id = %payload.transaction_id))]
    async fn execute(&self, kind: StepKind, payload: &StepPayload, timeout: Duration) -> StepResult {
        let request = self.build_request(kind, payload)?.timeout(timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(StepFailure::timed_out(kind, timeout)),
            Err(e) => return Err(StepFailure::transient(format!("{kind} request failed: {e}"))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(StepFailure::timed_out(kind, timeout)),
            Err(e) => {
                return Err(StepFailure::transient(format!(
                    "{kind} response unreadable: {e}"
                )));
            }
        };

        if let Some(class) = classify_status(status.as_u16()) {
            return Err(StepFailure {
                class,
                reason: format!("{kind} returned {}: {}", status.as_u16(), error_detail(&body)),
            });
        }

        extract_reference(kind, payload, &body)
    }
}

/// Appends `segments` to `base`, percent-encoding each one so a reference
/// can never change the path, query or fragment of the request.
fn endpoint(base: &str, segments: &[&str]) -> std::result::Result<Url, StepFailure> {
    let invalid = || StepFailure::transient(format!("invalid service url '{base}'"));
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Pulls the collaborator-assigned reference out of a 2xx body.
fn extract_reference(kind: StepKind, payload: &StepPayload, body: &str) -> StepResult {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |names: &[&str]| {
        parsed
            .as_ref()
            .and_then(|v| names.iter().find_map(|name| reference_value(v.get(*name)?)))
    };
    let malformed = |what: &str| {
        StepFailure::transient(format!("{kind} returned a malformed response: missing {what}"))
    };

    let reference = match kind {
        StepKind::SelectProduct => {
            Some(field(&["product_id", "id"]).ok_or_else(|| malformed("product_id"))?)
        }
        StepKind::ChargePayment => {
            Some(field(&["payment_id", "id"]).ok_or_else(|| malformed("payment_id"))?)
        }
        StepKind::DecrementInventory => field(&["operation_id"]),
        StepKind::RegisterPurchase => Some(
            field(&["purchase_id", "id"]).unwrap_or_else(|| payload.transaction_id.to_string()),
        ),
        StepKind::RefundPayment => payload.payment_id.clone(),
        StepKind::CancelPurchase => payload.purchase_id.clone(),
    };

    Ok(StepSuccess {
        external_reference: reference,
    })
}

/// Accepts string or numeric identifiers.
fn reference_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Failure detail from a JSON `error`/`message`/`detail` field, else the raw body.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(detail) = ["error", "message", "detail"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
    {
        return detail.to_string();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TransactionId;
    use domain::{Money, ProductRef, UserRef};

    fn payload() -> StepPayload {
        StepPayload {
            transaction_id: TransactionId::new(),
            user_ref: UserRef::new("u1").unwrap(),
            product_ref: ProductRef::new("p1").unwrap(),
            amount: Money::from_cents(9999),
            quantity: 1,
            product_id: None,
            payment_id: Some("PAY-0001".into()),
            purchase_id: None,
        }
    }

    fn executor() -> HttpStepExecutor {
        HttpStepExecutor::new(ServiceUrls::default()).unwrap()
    }

    #[test]
    fn test_reserved_characters_stay_in_one_segment() {
        let mut p = payload();
        p.product_ref = ProductRef::new("other?x=1").unwrap();
        let request = executor()
            .build_request(StepKind::SelectProduct, &p)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/products/other%3Fx=1");
        assert_eq!(request.url().query(), None);

        p.product_ref = ProductRef::new("../payments/PAY-1/refund").unwrap();
        let request = executor()
            .build_request(StepKind::SelectProduct, &p)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/products/..%2Fpayments%2FPAY-1%2Frefund");

        p.payment_id = Some("PAY#1/2".into());
        let request = executor()
            .build_request(StepKind::RefundPayment, &p)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/payments/PAY%231%2F2/refund");
        assert_eq!(request.url().fragment(), None);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = endpoint("http://gateway:8080/api/", &["purchases", "PUR 1", "cancel"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway:8080/api/purchases/PUR%201/cancel");

        let failure = endpoint("not a url", &["products"]).unwrap_err();
        assert_eq!(failure.class, domain::FailureClass::Transient);
    }

    #[test]
    fn test_error_detail_prefers_json_fields() {
        assert_eq!(error_detail(r#"{"error":"insufficient stock"}"#), "insufficient stock");
        assert_eq!(error_detail(r#"{"message":"declined"}"#), "declined");
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_detail("  "), "empty response");
    }

    #[test]
    fn test_numeric_references_accepted() {
        let result = extract_reference(StepKind::SelectProduct, &payload(), r#"{"product_id":123}"#);
        assert_eq!(result.unwrap().external_reference.as_deref(), Some("123"));
    }

    #[test]
    fn test_missing_required_reference_is_transient() {
        let failure =
            extract_reference(StepKind::ChargePayment, &payload(), r#"{"status":"ok"}"#).unwrap_err();
        assert_eq!(failure.class, domain::FailureClass::Transient);
        assert!(failure.reason.contains("payment_id"));

        let failure = extract_reference(StepKind::SelectProduct, &payload(), "<html>").unwrap_err();
        assert_eq!(failure.class, domain::FailureClass::Transient);
    }

    #[test]
    fn test_optional_references() {
        let p = payload();
        let inventory = extract_reference(StepKind::DecrementInventory, &p, "").unwrap();
        assert_eq!(inventory.external_reference, None);

        let purchase = extract_reference(StepKind::RegisterPurchase, &p, "{}").unwrap();
        assert_eq!(
            purchase.external_reference,
            Some(p.transaction_id.to_string())
        );

        let refund = extract_reference(StepKind::RefundPayment, &p, "{}").unwrap();
        assert_eq!(refund.external_reference.as_deref(), Some("PAY-0001"));
    }
}
