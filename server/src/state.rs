use std::time::Duration;

use tokio::sync::Mutex;

use dealhub_common::promotion::PromotionKind;
use dealhub_common::seller::SellerId;
use dealhub_common::settings::MarketSettings;

use crate::identity::IdentityVerifier;
use crate::processor::PaymentProcessor;
use crate::store::DocumentStore;

/// Where the processor sends sellers after onboarding. `{seller_id}` is
/// substituted with the seller's id.
#[derive(Debug, Clone)]
pub struct OnboardingUrls {
    pub return_url: String,
    pub refresh_url: String,
}

impl OnboardingUrls {
    pub fn return_for(&self, seller: &SellerId) -> String {
        self.return_url.replace("{seller_id}", &seller.0)
    }

    pub fn refresh_for(&self, seller: &SellerId) -> String {
        self.refresh_url.replace("{seller_id}", &seller.0)
    }
}

impl Default for OnboardingUrls {
    fn default() -> Self {
        Self {
            return_url: "http://localhost:3000/sellers/{seller_id}/payout/done".into(),
            refresh_url: "http://localhost:3000/sellers/{seller_id}/payout/retry".into(),
        }
    }
}

/// Everything a request needs: collaborators plus the settings resolved at startup.
pub struct AppState<S, P> {
    pub store: S,
    pub processor: P,
    pub settings: MarketSettings,
    pub verifier: IdentityVerifier,
    pub onboarding: OnboardingUrls,
    pub remote_timeout: Duration,
    pub(crate) promotion_locks: PromotionLocks,
}

/// Serialises admission checks and activations per placement kind.
#[derive(Default)]
pub(crate) struct PromotionLocks {
    floating: Mutex<()>,
    banner: Mutex<()>,
}

impl PromotionLocks {
    pub(crate) fn of(&self, kind: PromotionKind) -> &Mutex<()> {
        match kind {
            PromotionKind::Floating => &self.floating,
            PromotionKind::Banner => &self.banner,
        }
    }
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    pub fn new(
        store: S,
        processor: P,
        settings: MarketSettings,
        verifier: IdentityVerifier,
        onboarding: OnboardingUrls,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            settings,
            verifier,
            onboarding,
            remote_timeout,
            promotion_locks: PromotionLocks::default(),
        }
    }
}
