//! HTTP-level tests for the settlement service.
//!
//! Each test spins the real router up on an ephemeral port with the
//! in-memory store and processor, then talks to it with reqwest.

pub mod harness;

use chrono::Utc;

use dealhub_common::listing::{Listing, ListingId};
use dealhub_common::seller::{PayoutAccountId, SellerAccount, SellerAccountKind, SellerId};

/// A listing with no promotion and no expiry.
pub fn make_listing(id: &str, seller: &str, price: u64, stock: u32) -> Listing {
    Listing {
        id: ListingId(id.into()),
        seller_id: SellerId(seller.into()),
        seller_account_kind: SellerAccountKind::Company,
        title: format!("Deal {id}"),
        price,
        promotion_duration_hours: None,
        available_quantity: stock,
        expires_at: None,
        promotion_window: None,
        pending_promotion: None,
        updated_at: Utc::now(),
    }
}

/// A seller fresh from signup: pending approval, no payout account.
pub fn make_pending_seller(id: &str) -> SellerAccount {
    SellerAccount::signup(SellerId(id.into()), SellerAccountKind::Company, Utc::now())
}

/// An approved seller paid out through `payout`.
pub fn make_approved_seller(id: &str, payout: Option<&str>) -> SellerAccount {
    let mut seller = make_pending_seller(id);
    seller.approve("seed", Utc::now());
    seller.payout_account_id = payout.map(|p| PayoutAccountId(p.into()));
    seller
}
