//! Document store collaborator.
//!
//! The marketplace keeps listings, seller accounts, settlement sessions and
//! cart pointers in a managed document store. The core only needs point reads,
//! point writes, single-document updates and two promotion queries, so
//! that is all [`DocumentStore`] exposes. There are no multi-document
//! transactions.

use std::future::Future;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use dealhub_common::fingerprint::CartFingerprint;
use dealhub_common::listing::{Listing, ListingId};
use dealhub_common::promotion::{is_active, PromotionKind};
use dealhub_common::seller::{SellerAccount, SellerId};
use dealhub_common::settlement::{SettlementId, SettlementSession};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("document store timed out")]
    Timeout,
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

pub trait DocumentStore: Send + Sync + 'static {
    fn get_listing(
        &self,
        id: &ListingId,
    ) -> impl Future<Output = Result<Option<Listing>, StoreError>> + Send;

    fn put_listing(&self, listing: Listing)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply `f` to one listing as a single-document update. Returns `None`
    /// if the listing does not exist.
    fn update_listing<F, R>(
        &self,
        id: &ListingId,
        f: F,
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send
    where
        F: FnOnce(&mut Listing) -> R + Send,
        R: Send;

    /// Listings of `kind` whose promotion window overlaps `now`.
    fn active_promotions(
        &self,
        kind: PromotionKind,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Listing>, StoreError>> + Send;

    /// Listings holding a quoted boost of `kind` that has not been activated.
    fn pending_promotions(
        &self,
        kind: PromotionKind,
    ) -> impl Future<Output = Result<Vec<Listing>, StoreError>> + Send;

    fn get_seller(
        &self,
        id: &SellerId,
    ) -> impl Future<Output = Result<Option<SellerAccount>, StoreError>> + Send;

    fn put_seller(
        &self,
        seller: SellerAccount,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_seller<F, R>(
        &self,
        id: &SellerId,
        f: F,
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send
    where
        F: FnOnce(&mut SellerAccount) -> R + Send,
        R: Send;

    fn get_session(
        &self,
        id: &SettlementId,
    ) -> impl Future<Output = Result<Option<SettlementSession>, StoreError>> + Send;

    fn put_session(
        &self,
        session: SettlementSession,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_session<F, R>(
        &self,
        id: &SettlementId,
        f: F,
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send
    where
        F: FnOnce(&mut SettlementSession) -> R + Send,
        R: Send;

    fn get_cart_pointer(
        &self,
        fingerprint: &CartFingerprint,
    ) -> impl Future<Output = Result<Option<SettlementId>, StoreError>> + Send;

    fn put_cart_pointer(
        &self,
        fingerprint: CartFingerprint,
        session: SettlementId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Records loaded into a fresh in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub listings: Vec<Listing>,
    #[serde(default)]
    pub sellers: Vec<SellerAccount>,
}

/// Process-local document store. Each document lives behind its own map
/// entry, so conditional updates are atomic per document.
#[derive(Default)]
pub struct MemoryStore {
    listings: DashMap<ListingId, Listing>,
    sellers: DashMap<SellerId, SellerAccount>,
    sessions: DashMap<SettlementId, SettlementSession>,
    cart_pointers: DashMap<CartFingerprint, SettlementId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        let store = Self::new();
        for listing in seed.listings {
            store.listings.insert(listing.id.clone(), listing);
        }
        for seller in seed.sellers {
            store.sellers.insert(seller.id.clone(), seller);
        }
        store
    }
}

impl DocumentStore for MemoryStore {
    async fn get_listing(&self, id: &ListingId) -> Result<Option<Listing>, StoreError> {
        Ok(self.listings.get(id).map(|l| l.value().clone()))
    }

    async fn put_listing(&self, listing: Listing) -> Result<(), StoreError> {
        self.listings.insert(listing.id.clone(), listing);
        Ok(())
    }

    async fn update_listing<F, R>(&self, id: &ListingId, f: F) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut Listing) -> R + Send,
        R: Send,
    {
        Ok(self.listings.get_mut(id).map(|mut l| f(l.value_mut())))
    }

    async fn active_promotions(
        &self,
        kind: PromotionKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .listings
            .iter()
            .filter(|l| {
                l.promotion_window
                    .as_ref()
                    .is_some_and(|w| w.kind == kind && is_active(w, now))
            })
            .map(|l| l.value().clone())
            .collect())
    }

    async fn pending_promotions(&self, kind: PromotionKind) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .listings
            .iter()
            .filter(|l| l.pending_promotion.as_ref().is_some_and(|p| p.kind == kind))
            .map(|l| l.value().clone())
            .collect())
    }

    async fn get_seller(&self, id: &SellerId) -> Result<Option<SellerAccount>, StoreError> {
        Ok(self.sellers.get(id).map(|s| s.value().clone()))
    }

    async fn put_seller(&self, seller: SellerAccount) -> Result<(), StoreError> {
        self.sellers.insert(seller.id.clone(), seller);
        Ok(())
    }

    async fn update_seller<F, R>(&self, id: &SellerId, f: F) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut SellerAccount) -> R + Send,
        R: Send,
    {
        Ok(self.sellers.get_mut(id).map(|mut s| f(s.value_mut())))
    }

    async fn get_session(
        &self,
        id: &SettlementId,
    ) -> Result<Option<SettlementSession>, StoreError> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn put_session(&self, session: SettlementSession) -> Result<(), StoreError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn update_session<F, R>(
        &self,
        id: &SettlementId,
        f: F,
    ) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut SettlementSession) -> R + Send,
        R: Send,
    {
        Ok(self.sessions.get_mut(id).map(|mut s| f(s.value_mut())))
    }

    async fn get_cart_pointer(
        &self,
        fingerprint: &CartFingerprint,
    ) -> Result<Option<SettlementId>, StoreError> {
        Ok(self.cart_pointers.get(fingerprint).map(|p| p.value().clone()))
    }

    async fn put_cart_pointer(
        &self,
        fingerprint: CartFingerprint,
        session: SettlementId,
    ) -> Result<(), StoreError> {
        self.cart_pointers.insert(fingerprint, session);
        Ok(())
    }
}
