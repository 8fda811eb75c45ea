use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::SigningKey;

use dealhub_common::listing::{Listing, ListingId};
use dealhub_common::seller::{
    resolve_role, PayoutAccountId, SellerAccount, SellerAccountKind, SellerId,
};
use dealhub_common::settings::MarketSettings;

use crate::identity::{Caller, Claims, IdentityVerifier};
use crate::processor::{CreateAccount, MockProcessor, PaymentProcessor};
use crate::state::{AppState, OnboardingUrls};
use crate::store::{DocumentStore, MemoryStore};

pub(crate) type TestState = AppState<MemoryStore, MockProcessor>;

pub(crate) fn test_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub(crate) fn test_state() -> TestState {
    test_state_with(MarketSettings::default())
}

pub(crate) fn test_state_with(settings: MarketSettings) -> TestState {
    AppState::new(
        MemoryStore::new(),
        MockProcessor::new(),
        settings,
        IdentityVerifier::new(test_key().verifying_key()),
        OnboardingUrls::default(),
        Duration::from_secs(2),
    )
}

/// An approved seller; with `payout` it also gets a processor account.
pub(crate) async fn seed_seller(state: &TestState, id: &str, payout: bool) -> SellerAccount {
    let mut seller = SellerAccount::signup(SellerId(id.into()), SellerAccountKind::Company, Utc::now());
    seller.approve("seed", Utc::now());
    if payout {
        let account = state
            .processor
            .create_connected_account(CreateAccount {
                seller_id: id.into(),
                country: "US".into(),
                business_type: "company",
                email: None,
                idempotency_key: format!("seed:{id}"),
            })
            .await
            .unwrap();
        seller.payout_account_id = Some(PayoutAccountId(account.id));
    }
    state.store.put_seller(seller.clone()).await.unwrap();
    seller
}

pub(crate) async fn seed_listing(
    state: &TestState,
    id: &str,
    seller: &str,
    price: u64,
    stock: u32,
) -> Listing {
    let listing = Listing {
        id: ListingId(id.into()),
        seller_id: SellerId(seller.into()),
        seller_account_kind: SellerAccountKind::Company,
        title: format!("deal {id}"),
        price,
        promotion_duration_hours: None,
        available_quantity: stock,
        expires_at: None,
        promotion_window: None,
        pending_promotion: None,
        updated_at: Utc::now(),
    };
    state.store.put_listing(listing.clone()).await.unwrap();
    listing
}

pub(crate) fn caller(sub: &str, role: Option<&str>) -> Caller {
    let claims = Claims {
        sub: sub.into(),
        role: role.map(String::from),
        email: None,
        exp: Utc::now() + chrono::Duration::hours(1),
    };
    let role = resolve_role(claims.role.as_deref(), None);
    Caller { claims, role }
}
