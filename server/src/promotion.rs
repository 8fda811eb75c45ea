//! Promotion Admission Controller.
//!
//! A listing moves `none -> pending payment -> active -> expired`. Activity is
//! never stored as a flag: a window is active while `start <= now < end`, so
//! expiry needs no sweep.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dealhub_common::currency::format_amount;
use dealhub_common::listing::ListingId;
use dealhub_common::promotion::{
    check_admission, count_active, is_active, PendingPromotion, PromotionKind, PromotionWindow,
};

use crate::error::{bounded, ApiError, ApiResult};
use crate::identity::Caller;
use crate::processor::{CreateIntent, IntentStatus, PaymentProcessor};
use crate::state::AppState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub kind: PromotionKind,
    pub capacity: u32,
    pub active: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPurchase {
    pub listing_id: ListingId,
    pub kind: PromotionKind,
    pub duration_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionQuote {
    pub listing_id: ListingId,
    pub kind: PromotionKind,
    pub duration_hours: u32,
    pub amount: u64,
    pub currency: String,
    pub display_amount: String,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub reused: bool,
    pub admission: AdmissionStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionActivation {
    pub listing_id: ListingId,
    pub kind: PromotionKind,
    pub duration_hours: u32,
    pub payment_intent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationReport {
    pub listing_id: ListingId,
    pub window: PromotionWindow,
    /// True when this payment had already activated the window.
    pub replayed: bool,
}

const PROMOTION_PURPOSE: &str = "promotion";

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Slots of `kind` in use, as `(active windows, live reservations)`.
    ///
    /// A quoted boost reserves its slot until the reservation period runs out
    /// or the processor reports its payment canceled. `exclude` leaves one
    /// listing out of both counts.
    async fn slot_usage(
        &self,
        kind: PromotionKind,
        exclude: Option<&ListingId>,
    ) -> ApiResult<(u32, u32)> {
        let now = Utc::now();
        let boosted = bounded(
            self.remote_timeout,
            "active promotion query",
            self.store.active_promotions(kind, now),
        )
        .await?;
        let active = count_active(
            boosted.iter().filter(|l| Some(&l.id) != exclude),
            kind,
            now,
        );

        let quoted = bounded(
            self.remote_timeout,
            "pending promotion query",
            self.store.pending_promotions(kind),
        )
        .await?;
        let mut reserved = 0;
        for listing in &quoted {
            if Some(&listing.id) == exclude || boosted.iter().any(|b| b.id == listing.id) {
                continue;
            }
            let Some(quote) = &listing.pending_promotion else {
                continue;
            };
            if quote.kind != kind || !quote.holds_slot(now, self.settings.reservation_minutes) {
                continue;
            }
            let intent = bounded(
                self.remote_timeout,
                "payment intent lookup",
                self.processor.retrieve_payment_intent(&quote.payment_intent_id),
            )
            .await?;
            if intent.status != IntentStatus::Canceled {
                reserved += 1;
            }
        }
        Ok((active, reserved))
    }

    /// Admit a new purchase of `kind` only while a slot is free. A listing
    /// re-quoting its own boost passes itself as `requester` so its earlier
    /// reservation does not count against it.
    pub async fn check_admission(
        &self,
        kind: PromotionKind,
        requester: Option<&ListingId>,
    ) -> ApiResult<AdmissionStatus> {
        let capacity = self.settings.slot_capacity.of(kind);
        let (active, reserved) = self.slot_usage(kind, requester).await?;
        if let Err(denied) = check_admission(kind, active, reserved, capacity) {
            info!(%kind, capacity, active, reserved, "promotion admission rejected");
            return Err(denied.into());
        }
        Ok(AdmissionStatus {
            kind,
            capacity,
            active,
            reserved,
        })
    }

    /// Quote and open a payment for boosting a listing.
    pub async fn purchase_promotion(
        &self,
        caller: &Caller,
        purchase: PromotionPurchase,
    ) -> ApiResult<PromotionQuote> {
        let PromotionPurchase {
            listing_id,
            kind,
            duration_hours,
        } = purchase;
        if duration_hours == 0 || duration_hours > self.settings.max_boost_hours {
            return Err(ApiError::validation(format!(
                "durationHours must be between 1 and {}",
                self.settings.max_boost_hours
            )));
        }
        let amount = self
            .settings
            .boost_price(kind, duration_hours)
            .filter(|a| *a > 0)
            .ok_or_else(|| ApiError::validation(format!("{kind} boosts are not for sale")))?;

        let listing = bounded(
            self.remote_timeout,
            "listing lookup",
            self.store.get_listing(&listing_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("listing {listing_id} not found")))?;
        caller.require_seller_or_admin(&listing.seller_id)?;

        let now = Utc::now();
        if let Some(window) = listing.promotion_window.as_ref().filter(|w| is_active(w, now)) {
            return Err(ApiError::validation(format!(
                "listing is already boosted until {}",
                window.end.to_rfc3339()
            )));
        }

        let _slot = self.promotion_locks.of(kind).lock().await;
        let admission = self.check_admission(kind, Some(&listing_id)).await?;
        let currency = self.settings.currency.clone();

        if let Some(pending) = &listing.pending_promotion {
            if pending.kind == kind && pending.duration_hours == duration_hours {
                let intent = bounded(
                    self.remote_timeout,
                    "payment intent lookup",
                    self.processor.retrieve_payment_intent(&pending.payment_intent_id),
                )
                .await?;
                if intent.status.settlement_status().is_payable() {
                    return Ok(PromotionQuote {
                        listing_id,
                        kind,
                        duration_hours,
                        amount: intent.amount,
                        display_amount: format_amount(intent.amount, &intent.currency),
                        currency: intent.currency,
                        payment_intent_id: intent.id,
                        client_secret: intent.client_secret,
                        reused: true,
                        admission,
                    });
                }
            }
        }

        let previous = listing
            .pending_promotion
            .as_ref()
            .map_or("new", |p| p.payment_intent_id.as_str());
        let mut metadata = BTreeMap::new();
        metadata.insert("purpose".to_string(), PROMOTION_PURPOSE.to_string());
        metadata.insert("listing_id".to_string(), listing_id.0.clone());
        metadata.insert("kind".to_string(), kind.to_string());
        metadata.insert("duration_hours".to_string(), duration_hours.to_string());
        metadata.insert("seller_id".to_string(), listing.seller_id.0.clone());

        let intent = bounded(
            self.remote_timeout,
            "payment intent creation",
            self.processor.create_payment_intent(CreateIntent {
                amount,
                currency: currency.clone(),
                idempotency_key: format!("boost:{listing_id}:{kind}:{duration_hours}:{previous}"),
                description: Some(format!("{kind} boost for {duration_hours}h")),
                receipt_email: None,
                metadata,
            }),
        )
        .await?;

        let pending = PendingPromotion {
            kind,
            duration_hours,
            payment_intent_id: intent.id.clone(),
            requested_at: now,
        };
        bounded(
            self.remote_timeout,
            "listing write",
            self.store.update_listing(&listing_id, move |l| {
                l.pending_promotion = Some(pending);
                l.updated_at = now;
            }),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("listing {listing_id} not found")))?;

        info!(%listing_id, %kind, duration_hours, amount, intent_id = %intent.id, "promotion payment opened");
        Ok(PromotionQuote {
            listing_id,
            kind,
            duration_hours,
            amount,
            display_amount: format_amount(amount, &currency),
            currency,
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            reused: false,
            admission,
        })
    }

    /// Start the promotion window once the processor confirms the boost was
    /// paid for. Replaying the same payment is a no-op.
    pub async fn activate_promotion(
        &self,
        activation: PromotionActivation,
    ) -> ApiResult<ActivationReport> {
        let PromotionActivation {
            listing_id,
            kind,
            duration_hours,
            payment_intent_id,
        } = activation;
        if duration_hours == 0 {
            return Err(ApiError::validation("durationHours must be positive"));
        }

        let listing = bounded(
            self.remote_timeout,
            "listing lookup",
            self.store.get_listing(&listing_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("listing {listing_id} not found")))?;
        if let Some(window) = &listing.promotion_window {
            if window.payment_intent_id.as_deref() == Some(payment_intent_id.as_str()) {
                return Ok(ActivationReport {
                    listing_id,
                    window: window.clone(),
                    replayed: true,
                });
            }
        }

        let intent = bounded(
            self.remote_timeout,
            "payment intent lookup",
            self.processor.retrieve_payment_intent(&payment_intent_id),
        )
        .await?;
        if intent.status != IntentStatus::Succeeded {
            return Err(ApiError::validation("promotion payment has not succeeded"));
        }
        let meta = |key: &str| intent.metadata.get(key).map(String::as_str);
        let duration = duration_hours.to_string();
        let kind_name = kind.to_string();
        if meta("purpose") != Some(PROMOTION_PURPOSE)
            || meta("listing_id") != Some(listing_id.0.as_str())
            || meta("kind") != Some(kind_name.as_str())
            || meta("duration_hours") != Some(duration.as_str())
        {
            return Err(ApiError::validation(
                "payment does not match this promotion",
            ));
        }

        let _slot = self.promotion_locks.of(kind).lock().await;
        let capacity = self.settings.slot_capacity.of(kind);
        let (active, reserved) = self.slot_usage(kind, Some(&listing_id)).await?;
        if active.saturating_add(reserved) >= capacity {
            warn!(
                %listing_id,
                %kind,
                capacity,
                active,
                reserved,
                "activating paid promotion beyond slot capacity"
            );
        }

        let now = Utc::now();
        let pi = payment_intent_id.clone();
        let outcome = bounded(
            self.remote_timeout,
            "listing write",
            self.store.update_listing(&listing_id, move |l| {
                if let Some(window) = &l.promotion_window {
                    if window.payment_intent_id.as_deref() == Some(pi.as_str()) {
                        return (window.clone(), true);
                    }
                }
                let window = PromotionWindow::starting_at(kind, now, duration_hours, Some(pi));
                l.promotion_window = Some(window.clone());
                l.pending_promotion = None;
                l.updated_at = now;
                (window, false)
            }),
        )
        .await?;
        let Some((window, replayed)) = outcome else {
            return Err(ApiError::not_found(format!("listing {listing_id} not found")));
        };

        if !replayed {
            info!(%listing_id, %kind, end = %window.end, "promotion activated");
        }
        Ok(ActivationReport {
            listing_id,
            window,
            replayed,
        })
    }
}
