use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dealhub_common::listing::ListingId;

use crate::error::{bounded, ApiResult};
use crate::processor::PaymentProcessor;
use crate::state::AppState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservation {
    pub listing_id: ListingId,
    pub requested: u32,
    pub ok: bool,
    pub remaining: u32,
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Take `quantity` units out of a listing's stock.
    ///
    /// The availability check and the decrement run inside one document
    /// update, so concurrent buyers cannot drive stock below zero. When stock
    /// is short nothing is taken and `ok` is false; callers skip that line.
    pub async fn reserve_and_decrement(
        &self,
        listing_id: &ListingId,
        quantity: u32,
    ) -> ApiResult<StockReservation> {
        let requested = quantity.max(1);
        let outcome = bounded(
            self.remote_timeout,
            "stock update",
            self.store.update_listing(listing_id, |listing| {
                if listing.available_quantity < requested {
                    return (false, listing.available_quantity);
                }
                listing.available_quantity -= requested;
                listing.updated_at = Utc::now();
                (true, listing.available_quantity)
            }),
        )
        .await?;

        let (ok, remaining) = match outcome {
            Some(result) => result,
            None => {
                debug!(%listing_id, "stock update for unknown listing");
                (false, 0)
            }
        };
        if ok {
            info!(%listing_id, requested, remaining, "stock decremented");
        } else {
            debug!(%listing_id, requested, remaining, "insufficient stock; line skipped");
        }
        Ok(StockReservation {
            listing_id: listing_id.clone(),
            requested,
            ok,
            remaining,
        })
    }
}
