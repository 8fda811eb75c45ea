//! Seller routing: which seller gets paid for each cart line, and through
//! which payout account.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dealhub_common::cart::CartItem;
use dealhub_common::seller::{PayoutAccountId, SellerAccount, SellerAccountKind, SellerId};
use dealhub_common::settlement::{settle_line, SettlementReport};

use crate::error::{bounded, ApiError, ApiResult};
use crate::processor::{CreateAccount, PaymentProcessor};
use crate::state::AppState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOnboarding {
    pub seller_id: SellerId,
    pub payout_account_id: PayoutAccountId,
    /// One-time link the seller must complete before receiving funds.
    /// Absent once the processor reports onboarding as submitted.
    pub onboarding_url: Option<String>,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutStatus {
    pub seller_id: SellerId,
    pub payout_account_id: Option<PayoutAccountId>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

fn business_type(kind: SellerAccountKind) -> &'static str {
    match kind {
        SellerAccountKind::Company => "company",
        SellerAccountKind::Customer => "individual",
    }
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Price every cart line and route it to its seller's payout account.
    ///
    /// Lines whose listing or seller cannot be resolved are recorded as
    /// skipped; only a failing store call aborts the whole cart.
    pub async fn resolve_cart(&self, items: &[CartItem]) -> ApiResult<SettlementReport> {
        let fee_table = self.settings.fee_table();
        let mut sellers: HashMap<SellerId, Option<SellerAccount>> = HashMap::new();
        let mut report = SettlementReport::default();

        for item in items {
            let listing = bounded(
                self.remote_timeout,
                "listing lookup",
                self.store.get_listing(&item.listing_id),
            )
            .await?;

            let seller = match &listing {
                Some(listing) => {
                    if !sellers.contains_key(&listing.seller_id) {
                        let account = bounded(
                            self.remote_timeout,
                            "seller lookup",
                            self.store.get_seller(&listing.seller_id),
                        )
                        .await?;
                        sellers.insert(listing.seller_id.clone(), account);
                    }
                    sellers.get(&listing.seller_id).and_then(Option::as_ref)
                }
                None => None,
            };

            let outcome = settle_line(
                item,
                listing.as_ref(),
                seller,
                &fee_table,
                self.settings.default_duration_hours,
            );
            if let Err(reason) = &outcome {
                debug!(listing_id = %item.listing_id, %reason, "dropping cart line");
            }
            report.record(&item.listing_id, outcome);
        }
        Ok(report)
    }

    /// Return the seller's payout account, creating it at the processor on
    /// first use. Re-entrant: creation only happens while no well-formed
    /// account id is stored, and the processor call carries a per-seller
    /// idempotency key so concurrent first calls share one account.
    pub async fn resolve_or_create_payout_account(
        &self,
        seller_id: &SellerId,
        account_kind: Option<SellerAccountKind>,
    ) -> ApiResult<PayoutOnboarding> {
        let seller = bounded(
            self.remote_timeout,
            "seller lookup",
            self.store.get_seller(seller_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("seller {seller_id} not found")))?;

        let (account_id, created) = match seller.payout_account() {
            Some(existing) => (existing.clone(), false),
            None => {
                let kind = account_kind.unwrap_or(seller.account_kind);
                let account = bounded(
                    self.remote_timeout,
                    "payout account creation",
                    self.processor.create_connected_account(CreateAccount {
                        seller_id: seller_id.0.clone(),
                        country: seller.country.clone(),
                        business_type: business_type(kind),
                        email: seller.email.clone(),
                        idempotency_key: format!("payout-account:{seller_id}"),
                    }),
                )
                .await?;
                let candidate = PayoutAccountId(account.id);
                let stored = bounded(
                    self.remote_timeout,
                    "payout account write",
                    self.store.update_seller(seller_id, |s| match s.payout_account() {
                        Some(existing) => existing.clone(),
                        None => {
                            s.payout_account_id = Some(candidate.clone());
                            candidate.clone()
                        }
                    }),
                )
                .await?
                .ok_or_else(|| ApiError::not_found(format!("seller {seller_id} not found")))?;
                if stored != candidate {
                    warn!(
                        %seller_id,
                        kept = %stored,
                        discarded = %candidate,
                        "payout account raced; keeping the stored one"
                    );
                }
                info!(%seller_id, payout_account_id = %stored, "payout account ready");
                (stored, true)
            }
        };

        let account = bounded(
            self.remote_timeout,
            "payout account lookup",
            self.processor.retrieve_account(&account_id.0),
        )
        .await?;
        let onboarding_url = if account.details_submitted {
            None
        } else {
            let link = bounded(
                self.remote_timeout,
                "onboarding link",
                self.processor.create_onboarding_link(
                    &account_id.0,
                    &self.onboarding.refresh_for(seller_id),
                    &self.onboarding.return_for(seller_id),
                ),
            )
            .await?;
            Some(link.url)
        };

        Ok(PayoutOnboarding {
            seller_id: seller_id.clone(),
            payout_account_id: account_id,
            onboarding_url,
            created,
        })
    }

    pub async fn payout_status(&self, seller_id: &SellerId) -> ApiResult<PayoutStatus> {
        let seller = bounded(
            self.remote_timeout,
            "seller lookup",
            self.store.get_seller(seller_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("seller {seller_id} not found")))?;

        let Some(account_id) = seller.payout_account().cloned() else {
            return Ok(PayoutStatus {
                seller_id: seller_id.clone(),
                payout_account_id: None,
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
            });
        };
        let account = bounded(
            self.remote_timeout,
            "payout account lookup",
            self.processor.retrieve_account(&account_id.0),
        )
        .await?;
        Ok(PayoutStatus {
            seller_id: seller_id.clone(),
            payout_account_id: Some(account_id),
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
        })
    }
}
