use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::Listing;

/// Premium placement a listing can be boosted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionKind {
    Floating,
    Banner,
}

impl PromotionKind {
    pub fn all() -> &'static [PromotionKind] {
        &[PromotionKind::Floating, PromotionKind::Banner]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromotionKind::Floating => "floating",
            PromotionKind::Banner => "banner",
        }
    }
}

impl fmt::Display for PromotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromotionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "floating" => Ok(PromotionKind::Floating),
            "banner" => Ok(PromotionKind::Banner),
            other => Err(format!("unknown promotion kind '{other}'")),
        }
    }
}

/// Time window during which a listing occupies a promotional slot.
///
/// There is no expiry event: a window is active while `start <= now < end`
/// and simply stops counting afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionWindow {
    pub kind: PromotionKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Processor payment that paid for this window. Replays of the same
    /// payment do not reopen the window.
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

impl PromotionWindow {
    pub fn starting_at(
        kind: PromotionKind,
        now: DateTime<Utc>,
        duration_hours: u32,
        payment_intent_id: Option<String>,
    ) -> Self {
        Self {
            kind,
            start: now,
            end: now + Duration::hours(i64::from(duration_hours)),
            payment_intent_id,
        }
    }
}

pub fn is_active(window: &PromotionWindow, now: DateTime<Utc>) -> bool {
    window.start <= now && now < window.end
}

/// A boost that has been quoted and is waiting for the processor to confirm payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPromotion {
    pub kind: PromotionKind,
    pub duration_hours: u32,
    pub payment_intent_id: String,
    pub requested_at: DateTime<Utc>,
}

/// How long a quoted but unpaid boost keeps its slot reserved.
pub const DEFAULT_RESERVATION_MINUTES: u32 = 30;

impl PendingPromotion {
    /// Whether this quote still reserves a slot at `now`. Whether its payment
    /// has been canceled is the processor's to say and is checked separately.
    pub fn holds_slot(&self, now: DateTime<Utc>, reservation_minutes: u32) -> bool {
        now < self.requested_at + Duration::minutes(i64::from(reservation_minutes))
    }
}

/// Promotion lifecycle of a single listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromotionState {
    None,
    PendingPayment,
    Active,
    Expired,
}

impl PromotionState {
    /// Derive the state of a listing at `now`. An active or expired window
    /// takes precedence over a newer pending purchase only while it is active.
    pub fn of(listing: &Listing, now: DateTime<Utc>) -> Self {
        match (&listing.promotion_window, &listing.pending_promotion) {
            (Some(window), _) if is_active(window, now) => PromotionState::Active,
            (_, Some(_)) => PromotionState::PendingPayment,
            (Some(window), None) if window.end <= now => PromotionState::Expired,
            // A window scheduled in the future still reads as pending.
            (Some(_), None) => PromotionState::PendingPayment,
            (None, None) => PromotionState::None,
        }
    }
}

/// Fixed concurrent-slot capacity per placement kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCapacity(pub BTreeMap<PromotionKind, u32>);

impl Default for SlotCapacity {
    fn default() -> Self {
        Self(
            PromotionKind::all()
                .iter()
                .map(|kind| (*kind, DEFAULT_SLOT_CAPACITY))
                .collect(),
        )
    }
}

pub const DEFAULT_SLOT_CAPACITY: u32 = 3;

impl SlotCapacity {
    pub fn of(&self, kind: PromotionKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(DEFAULT_SLOT_CAPACITY)
    }
}

/// Number of listings currently occupying a slot of `kind`.
pub fn count_active<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    kind: PromotionKind,
    now: DateTime<Utc>,
) -> u32 {
    listings
        .into_iter()
        .filter_map(|l| l.promotion_window.as_ref())
        .filter(|w| w.kind == kind && is_active(w, now))
        .count() as u32
}

/// Why a promotion purchase was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDenied {
    pub kind: PromotionKind,
    pub capacity: u32,
    pub active: u32,
    /// Quoted boosts still waiting on payment.
    #[serde(default)]
    pub reserved: u32,
}

impl fmt::Display for AdmissionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all {} {} slots are taken ({} active, {} reserved)",
            self.capacity, self.kind, self.active, self.reserved
        )
    }
}

/// Admit a new purchase for `kind` only while active windows plus live
/// reservations leave a slot free.
pub fn check_admission(
    kind: PromotionKind,
    active: u32,
    reserved: u32,
    capacity: u32,
) -> Result<(), AdmissionDenied> {
    if active.saturating_add(reserved) >= capacity {
        Err(AdmissionDenied {
            kind,
            capacity,
            active,
            reserved,
        })
    } else {
        Ok(())
    }
}
