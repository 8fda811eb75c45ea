use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde::Serialize;
use serde_json::Value;

use dealhub_common::listing::Listing;
use dealhub_common::seller::{PayoutAccountId, SellerAccount};
use dealhub_common::settings::MarketSettings;
use dealhub_server::identity::{issue_token, Claims, IdentityVerifier};
use dealhub_server::processor::{CreateAccount, MockProcessor, PaymentProcessor};
use dealhub_server::store::{DocumentStore, MemoryStore};
use dealhub_server::{router, AppState, OnboardingUrls};

pub type TestState = AppState<MemoryStore, MockProcessor>;

/// A running server plus direct access to its collaborators.
pub struct TestHarness {
    pub base_url: String,
    pub state: Arc<TestState>,
    pub http: reqwest::Client,
    issuer: SigningKey,
}

/// Status code and decoded JSON body of a response.
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl TestHarness {
    pub async fn start() -> Self {
        Self::start_with(MarketSettings::default()).await
    }

    pub async fn start_with(settings: MarketSettings) -> Self {
        tracing_subscriber::fmt::try_init().ok();

        let issuer = SigningKey::generate(&mut rand::rngs::OsRng);
        let state = Arc::new(AppState::new(
            MemoryStore::new(),
            MockProcessor::new(),
            settings,
            IdentityVerifier::new(issuer.verifying_key()),
            OnboardingUrls::default(),
            Duration::from_secs(5),
        ));
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            http: reqwest::Client::new(),
            issuer,
        }
    }

    /// Bearer credential for `sub`, optionally carrying a role claim.
    pub fn token(&self, sub: &str, role: Option<&str>) -> String {
        issue_token(
            &self.issuer,
            &Claims {
                sub: sub.into(),
                role: role.map(String::from),
                email: None,
                exp: Utc::now() + chrono::Duration::hours(1),
            },
        )
        .expect("sign test claims")
    }

    pub async fn put_listing(&self, listing: Listing) {
        self.state.store.put_listing(listing).await.unwrap();
    }

    pub async fn put_seller(&self, seller: SellerAccount) {
        self.state.store.put_seller(seller).await.unwrap();
    }

    /// An approved seller with a real (mock) payout account.
    pub async fn onboarded_seller(&self, id: &str) -> PayoutAccountId {
        let account = self
            .state
            .processor
            .create_connected_account(CreateAccount {
                seller_id: id.into(),
                country: "US".into(),
                business_type: "company",
                email: None,
                idempotency_key: format!("harness:{id}"),
            })
            .await
            .unwrap();
        let payout = PayoutAccountId(account.id);
        self.put_seller(crate::make_approved_seller(id, Some(&payout.0)))
            .await;
        payout
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B, token: Option<&str>) -> Reply {
        let mut req = self.http.post(format!("{}{path}", self.base_url)).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Self::reply(req).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Reply {
        let mut req = self.http.get(format!("{}{path}", self.base_url));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Self::reply(req).await
    }

    async fn reply(req: reqwest::RequestBuilder) -> Reply {
        let resp = req.send().await.expect("request failed");
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Reply { status, body }
    }
}
