//! Payment processor collaborator.
//!
//! The processor holds the money: payment intents for buyers, connected
//! accounts for sellers, and transfers between them. [`StripeProcessor`] talks
//! to a Stripe-compatible REST API; [`MockProcessor`] keeps everything in
//! memory for development and tests while still honouring idempotency keys.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dealhub_common::settlement::SettlementStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("payment processor timed out")]
    Timeout,
    #[error("payment processor rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("payment processor unreachable: {0}")]
    Transport(String),
    #[error("no such processor object: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
}

impl IntentStatus {
    pub fn settlement_status(self) -> SettlementStatus {
        match self {
            IntentStatus::Succeeded => SettlementStatus::Succeeded,
            IntentStatus::Canceled => SettlementStatus::Canceled,
            _ => SettlementStatus::RequiresPayment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: u64,
    pub currency: String,
    pub status: IntentStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub transfer_group: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateIntent {
    pub amount: u64,
    pub currency: String,
    pub idempotency_key: String,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct IntentUpdate {
    pub metadata: BTreeMap<String, String>,
    pub receipt_email: Option<String>,
    pub transfer_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub seller_id: String,
    pub country: String,
    pub business_type: &'static str,
    pub email: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingLink {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateTransfer {
    pub amount: u64,
    pub currency: String,
    pub destination: String,
    pub transfer_group: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: u64,
    pub destination: String,
    #[serde(default)]
    pub transfer_group: Option<String>,
}

/// Contract the settlement core needs from the payment processor.
///
/// Idempotency keys must be honoured server-side: two creates with the same
/// key return the same object.
pub trait PaymentProcessor: Send + Sync + 'static {
    fn create_payment_intent(
        &self,
        request: CreateIntent,
    ) -> impl Future<Output = Result<PaymentIntent, ProcessorError>> + Send;

    fn retrieve_payment_intent(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PaymentIntent, ProcessorError>> + Send;

    fn update_payment_intent(
        &self,
        id: &str,
        update: IntentUpdate,
    ) -> impl Future<Output = Result<PaymentIntent, ProcessorError>> + Send;

    fn create_connected_account(
        &self,
        request: CreateAccount,
    ) -> impl Future<Output = Result<ConnectedAccount, ProcessorError>> + Send;

    fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> impl Future<Output = Result<OnboardingLink, ProcessorError>> + Send;

    fn retrieve_account(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<ConnectedAccount, ProcessorError>> + Send;

    fn create_transfer(
        &self,
        request: CreateTransfer,
    ) -> impl Future<Output = Result<Transfer, ProcessorError>> + Send;

    fn name(&self) -> &'static str;
}

// ─── Stripe REST client ─────────────────────────────────────────────────────

const DEFAULT_STRIPE_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeProcessor {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

type FormParams = Vec<(String, String)>;

fn push_metadata(params: &mut FormParams, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("metadata[{key}]"), value.clone()));
    }
}

impl StripeProcessor {
    pub fn new(
        secret_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_STRIPE_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            secret_key,
        })
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProcessorError> {
        let resp = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::Timeout
                } else {
                    ProcessorError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| ProcessorError::Transport(format!("bad response body: {e}")));
        }

        let message = resp
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| status.to_string());
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProcessorError::NotFound(message));
        }
        Err(ProcessorError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn post(&self, path: &str, params: &FormParams, idempotency_key: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(format!("{}/v1/{path}", self.base_url))
            .form(params);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        req
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(format!("{}/v1/{path}", self.base_url))
    }
}

impl PaymentProcessor for StripeProcessor {
    async fn create_payment_intent(
        &self,
        request: CreateIntent,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut params: FormParams = vec![
            ("amount".into(), request.amount.to_string()),
            ("currency".into(), request.currency.clone()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        if let Some(description) = &request.description {
            params.push(("description".into(), description.clone()));
        }
        if let Some(email) = &request.receipt_email {
            params.push(("receipt_email".into(), email.clone()));
        }
        push_metadata(&mut params, &request.metadata);
        debug!(idempotency_key = %request.idempotency_key, amount = request.amount, "creating payment intent");
        self.send(self.post("payment_intents", &params, Some(&request.idempotency_key)))
            .await
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError> {
        self.send(self.get(&format!("payment_intents/{id}"))).await
    }

    async fn update_payment_intent(
        &self,
        id: &str,
        update: IntentUpdate,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut params = FormParams::new();
        if let Some(email) = &update.receipt_email {
            params.push(("receipt_email".into(), email.clone()));
        }
        if let Some(group) = &update.transfer_group {
            params.push(("transfer_group".into(), group.clone()));
        }
        push_metadata(&mut params, &update.metadata);
        self.send(self.post(&format!("payment_intents/{id}"), &params, None))
            .await
    }

    async fn create_connected_account(
        &self,
        request: CreateAccount,
    ) -> Result<ConnectedAccount, ProcessorError> {
        let mut params: FormParams = vec![
            ("type".into(), "express".into()),
            ("country".into(), request.country.clone()),
            ("business_type".into(), request.business_type.into()),
            ("capabilities[transfers][requested]".into(), "true".into()),
            ("metadata[seller_id]".into(), request.seller_id.clone()),
        ];
        if let Some(email) = &request.email {
            params.push(("email".into(), email.clone()));
        }
        self.send(self.post("accounts", &params, Some(&request.idempotency_key)))
            .await
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingLink, ProcessorError> {
        let params: FormParams = vec![
            ("account".into(), account_id.into()),
            ("refresh_url".into(), refresh_url.into()),
            ("return_url".into(), return_url.into()),
            ("type".into(), "account_onboarding".into()),
        ];
        self.send(self.post("account_links", &params, None)).await
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        self.send(self.get(&format!("accounts/{account_id}"))).await
    }

    async fn create_transfer(&self, request: CreateTransfer) -> Result<Transfer, ProcessorError> {
        let params: FormParams = vec![
            ("amount".into(), request.amount.to_string()),
            ("currency".into(), request.currency.clone()),
            ("destination".into(), request.destination.clone()),
            ("transfer_group".into(), request.transfer_group.clone()),
        ];
        self.send(self.post("transfers", &params, Some(&request.idempotency_key)))
            .await
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}

// ─── In-memory processor ────────────────────────────────────────────────────

fn random_id(prefix: &str) -> String {
    format!("{prefix}_{}", hex::encode(rand::random::<[u8; 12]>()))
}

/// In-memory processor for development and tests.
///
/// Payments never complete on their own; call [`MockProcessor::set_status`]
/// to simulate the buyer paying or abandoning.
#[derive(Default)]
pub struct MockProcessor {
    intents: DashMap<String, PaymentIntent>,
    accounts: DashMap<String, ConnectedAccount>,
    transfers: DashMap<String, Transfer>,
    /// idempotency key -> object id
    idempotency: DashMap<String, String>,
    intent_creations: AtomicUsize,
    account_creations: AtomicUsize,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct payment intents created (idempotent replays excluded).
    pub fn intent_creations(&self) -> usize {
        self.intent_creations.load(Ordering::SeqCst)
    }

    pub fn account_creations(&self) -> usize {
        self.account_creations.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        match self.intents.get_mut(intent_id) {
            Some(mut intent) => {
                intent.status = status;
                true
            }
            None => false,
        }
    }

    pub fn enable_account(&self, account_id: &str) -> bool {
        match self.accounts.get_mut(account_id) {
            Some(mut account) => {
                account.charges_enabled = true;
                account.payouts_enabled = true;
                account.details_submitted = true;
                true
            }
            None => false,
        }
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.iter().map(|t| t.value().clone()).collect()
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.get(id).map(|i| i.value().clone())
    }
}

impl PaymentProcessor for MockProcessor {
    async fn create_payment_intent(
        &self,
        request: CreateIntent,
    ) -> Result<PaymentIntent, ProcessorError> {
        // The idempotency entry is held while the intent is minted, so racing
        // creates with one key collapse onto a single intent.
        let id = self
            .idempotency
            .entry(format!("pi:{}", request.idempotency_key))
            .or_insert_with(|| {
                let id = random_id("pi");
                let intent = PaymentIntent {
                    client_secret: format!("{id}_secret_{}", hex::encode(rand::random::<[u8; 8]>())),
                    id: id.clone(),
                    amount: request.amount,
                    currency: request.currency.clone(),
                    status: IntentStatus::RequiresPaymentMethod,
                    metadata: request.metadata.clone(),
                    receipt_email: request.receipt_email.clone(),
                    transfer_group: None,
                };
                self.intents.insert(id.clone(), intent);
                self.intent_creations.fetch_add(1, Ordering::SeqCst);
                info!(intent_id = %id, amount = request.amount, "mock payment intent created");
                id
            })
            .clone();
        self.retrieve_payment_intent(&id).await
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError> {
        self.intents
            .get(id)
            .map(|i| i.value().clone())
            .ok_or_else(|| ProcessorError::NotFound(format!("payment intent {id}")))
    }

    async fn update_payment_intent(
        &self,
        id: &str,
        update: IntentUpdate,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut intent = self
            .intents
            .get_mut(id)
            .ok_or_else(|| ProcessorError::NotFound(format!("payment intent {id}")))?;
        intent.metadata.extend(update.metadata);
        if update.receipt_email.is_some() {
            intent.receipt_email = update.receipt_email;
        }
        if update.transfer_group.is_some() {
            intent.transfer_group = update.transfer_group;
        }
        Ok(intent.clone())
    }

    async fn create_connected_account(
        &self,
        request: CreateAccount,
    ) -> Result<ConnectedAccount, ProcessorError> {
        let id = self
            .idempotency
            .entry(format!("acct:{}", request.idempotency_key))
            .or_insert_with(|| {
                let id = random_id("acct");
                self.accounts.insert(
                    id.clone(),
                    ConnectedAccount {
                        id: id.clone(),
                        charges_enabled: false,
                        payouts_enabled: false,
                        details_submitted: false,
                    },
                );
                self.account_creations.fetch_add(1, Ordering::SeqCst);
                id
            })
            .clone();
        self.retrieve_account(&id).await
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingLink, ProcessorError> {
        if !self.accounts.contains_key(account_id) {
            return Err(ProcessorError::NotFound(format!("account {account_id}")));
        }
        Ok(OnboardingLink {
            url: format!(
                "https://connect.example.test/setup/{account_id}?refresh={refresh_url}&return={return_url}"
            ),
            expires_at: Some(chrono::Utc::now().timestamp() + 300),
        })
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        self.accounts
            .get(account_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| ProcessorError::NotFound(format!("account {account_id}")))
    }

    async fn create_transfer(&self, request: CreateTransfer) -> Result<Transfer, ProcessorError> {
        if !self.accounts.contains_key(&request.destination) {
            return Err(ProcessorError::Api {
                status: 400,
                message: format!("no such destination: {}", request.destination),
            });
        }
        let id = self
            .idempotency
            .entry(format!("tr:{}", request.idempotency_key))
            .or_insert_with(|| {
                let id = random_id("tr");
                self.transfers.insert(
                    id.clone(),
                    Transfer {
                        id: id.clone(),
                        amount: request.amount,
                        destination: request.destination.clone(),
                        transfer_group: Some(request.transfer_group.clone()),
                    },
                );
                id
            })
            .clone();
        self.transfers
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or_else(|| ProcessorError::NotFound(format!("transfer {id}")))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent_request(key: &str) -> CreateIntent {
        CreateIntent {
            amount: 1500,
            currency: "usd".into(),
            idempotency_key: key.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_honours_idempotency_keys() {
        let processor = MockProcessor::new();
        let a = processor.create_payment_intent(intent_request("k-1")).await.unwrap();
        let b = processor.create_payment_intent(intent_request("k-1")).await.unwrap();
        let c = processor.create_payment_intent(intent_request("k-2")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.client_secret, b.client_secret);
        assert_ne!(a.id, c.id);
        assert_eq!(processor.intent_creations(), 2);
    }

    #[tokio::test]
    async fn mock_update_merges_metadata() {
        let processor = MockProcessor::new();
        let mut request = intent_request("k-1");
        request.metadata.insert("subtotal".into(), "1500".into());
        let intent = processor.create_payment_intent(request).await.unwrap();

        let mut update = IntentUpdate {
            transfer_group: Some(intent.id.clone()),
            ..Default::default()
        };
        update.metadata.insert("buyer_id".into(), "b-1".into());
        let updated = processor
            .update_payment_intent(&intent.id, update)
            .await
            .unwrap();
        assert_eq!(updated.metadata.len(), 2);
        assert_eq!(updated.transfer_group.as_deref(), Some(intent.id.as_str()));
    }

    #[test]
    fn intent_status_maps_to_settlement_status() {
        assert_eq!(
            IntentStatus::Processing.settlement_status(),
            SettlementStatus::RequiresPayment
        );
        assert_eq!(
            IntentStatus::Succeeded.settlement_status(),
            SettlementStatus::Succeeded
        );
        assert_eq!(
            IntentStatus::Canceled.settlement_status(),
            SettlementStatus::Canceled
        );
    }

    #[test]
    fn stripe_intent_payload_parses() {
        let json = r#"{
            "id": "pi_123", "object": "payment_intent", "client_secret": "pi_123_secret_abc",
            "amount": 2099, "currency": "usd", "status": "requires_payment_method",
            "metadata": {"cart_fingerprint": "cart_abc"}, "receipt_email": null, "transfer_group": null
        }"#;
        let intent: PaymentIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        assert_eq!(intent.metadata["cart_fingerprint"], "cart_abc");
    }
}
