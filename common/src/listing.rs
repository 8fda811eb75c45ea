use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::promotion::{PendingPromotion, PromotionWindow};
use crate::seller::{SellerAccountKind, SellerId};

/// Unique deal identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListingId(pub String);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-limited deal offered by a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: ListingId,
    pub seller_id: SellerId,
    pub seller_account_kind: SellerAccountKind,
    #[serde(default)]
    pub title: String,
    /// Unit price in minor currency units.
    pub price: u64,
    /// How long the deal runs; drives the platform fee tier.
    #[serde(default)]
    pub promotion_duration_hours: Option<u32>,
    pub available_quantity: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub promotion_window: Option<PromotionWindow>,
    #[serde(default)]
    pub pending_promotion: Option<PendingPromotion>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// A deal is shown only while it has stock, has not expired and its
    /// seller has been approved.
    pub fn is_visible(&self, now: DateTime<Utc>, seller_approved: bool) -> bool {
        self.available_quantity > 0 && !self.is_expired(now) && seller_approved
    }
}

#[cfg(test)]
pub(crate) fn test_listing(id: &str, seller: &str, price: u64, stock: u32) -> Listing {
    Listing {
        id: ListingId(id.into()),
        seller_id: SellerId(seller.into()),
        seller_account_kind: SellerAccountKind::Company,
        title: format!("Deal {id}"),
        price,
        promotion_duration_hours: Some(24),
        available_quantity: stock,
        expires_at: None,
        promotion_window: None,
        pending_promotion: None,
        updated_at: Utc::now(),
    }
}
