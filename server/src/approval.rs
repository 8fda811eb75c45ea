use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use dealhub_common::listing::{Listing, ListingId};
use dealhub_common::promotion::PromotionState;
use dealhub_common::seller::{ApprovalOutcome, LockOutcome, SellerId};

use crate::error::{bounded, ApiError, ApiResult};
use crate::identity::Caller;
use crate::processor::PaymentProcessor;
use crate::state::AppState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReport {
    pub seller_id: SellerId,
    pub outcome: ApprovalOutcome,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReport {
    pub seller_id: SellerId,
    pub outcome: LockOutcome,
    pub locked: bool,
}

/// A listing as the storefront sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub visible: bool,
    pub promotion_state: PromotionState,
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Approve a pending seller. Approving twice keeps the first stamp.
    pub async fn approve_seller(
        &self,
        caller: &Caller,
        seller_id: &SellerId,
    ) -> ApiResult<ApprovalReport> {
        caller.require_privileged()?;
        let approver = caller.claims.sub.clone();
        let now = Utc::now();
        let report = bounded(
            self.remote_timeout,
            "seller write",
            self.store.update_seller(seller_id, move |seller| {
                let outcome = seller.approve(&approver, now);
                ApprovalReport {
                    seller_id: seller.id.clone(),
                    outcome,
                    approved_at: seller.approved_at,
                    approved_by: seller.approved_by.clone(),
                }
            }),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("seller {seller_id} not found")))?;

        if report.outcome == ApprovalOutcome::Approved {
            info!(%seller_id, approved_by = %caller.claims.sub, "seller approved");
        }
        Ok(report)
    }

    /// Lock a seller that is still pending. Approved sellers are skipped.
    pub async fn lock_seller(&self, caller: &Caller, seller_id: &SellerId) -> ApiResult<LockReport> {
        caller.require_privileged()?;
        let report = bounded(
            self.remote_timeout,
            "seller write",
            self.store.update_seller(seller_id, |seller| LockReport {
                seller_id: seller.id.clone(),
                outcome: seller.lock(),
                locked: seller.locked,
            }),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("seller {seller_id} not found")))?;

        info!(%seller_id, outcome = ?report.outcome, "seller lock requested");
        Ok(report)
    }

    pub async fn listing_view(&self, listing_id: &ListingId) -> ApiResult<ListingView> {
        let listing = bounded(
            self.remote_timeout,
            "listing lookup",
            self.store.get_listing(listing_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("listing {listing_id} not found")))?;
        let seller_approved = bounded(
            self.remote_timeout,
            "seller lookup",
            self.store.get_seller(&listing.seller_id),
        )
        .await?
        .is_some_and(|s| s.is_approved());

        let now = Utc::now();
        Ok(ListingView {
            visible: listing.is_visible(now, seller_approved),
            promotion_state: PromotionState::of(&listing, now),
            listing,
        })
    }
}
