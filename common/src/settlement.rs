use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::{BuyerId, CartItem};
use crate::fee::{fee_for_duration, platform_fee, FeeTable};
use crate::fingerprint::CartFingerprint;
use crate::listing::{Listing, ListingId};
use crate::seller::{PayoutAccountId, SellerAccount, SellerId};
use crate::settings::MarketSettings;

/// Settlement identifier; equal to the processor payment-intent id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(pub String);

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    RequiresPayment,
    Succeeded,
    Canceled,
}

impl SettlementStatus {
    /// Only a session still waiting for payment can be reused or settled.
    pub fn is_payable(self) -> bool {
        self == SettlementStatus::RequiresPayment
    }

    pub fn can_transition_to(self, next: SettlementStatus) -> bool {
        matches!(
            (self, next),
            (SettlementStatus::RequiresPayment, SettlementStatus::Succeeded)
                | (SettlementStatus::RequiresPayment, SettlementStatus::Canceled)
        )
    }
}

/// One payable line of a settlement, priced and routed to its seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSettlement {
    pub listing_id: ListingId,
    pub seller_id: SellerId,
    pub seller_payout_account_id: PayoutAccountId,
    pub unit_price: u64,
    pub quantity: u32,
    pub gross: u64,
    pub fee_percentage: u32,
    pub fee_amount: u64,
}

/// Why a cart line was dropped from a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum SkipReason {
    ListingNotFound,
    SellerNotFound,
    NoPayoutAccount,
    SellerNotApproved,
    InsufficientStock { available: u32, requested: u32 },
    AmountTooLarge,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListingNotFound => write!(f, "listing not found"),
            Self::SellerNotFound => write!(f, "seller not found"),
            Self::NoPayoutAccount => write!(f, "seller has no payout account"),
            Self::SellerNotApproved => write!(f, "seller is not approved"),
            Self::InsufficientStock {
                available,
                requested,
            } => write!(f, "only {available} left, {requested} requested"),
            Self::AmountTooLarge => write!(f, "line amount is too large"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedLine {
    pub listing_id: ListingId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Price and route a single cart line.
///
/// `listing` and `seller` are whatever the store returned for the line; a
/// missing record skips the line instead of failing the cart.
pub fn settle_line(
    item: &CartItem,
    listing: Option<&Listing>,
    seller: Option<&SellerAccount>,
    fee_table: &FeeTable,
    fallback_hours: u32,
) -> Result<LineSettlement, SkipReason> {
    let listing = listing.ok_or(SkipReason::ListingNotFound)?;
    let seller = seller.ok_or(SkipReason::SellerNotFound)?;
    if !seller.is_approved() {
        return Err(SkipReason::SellerNotApproved);
    }
    let payout = seller.payout_account().ok_or(SkipReason::NoPayoutAccount)?;
    let quantity = item.quantity.max(1);
    if listing.available_quantity < quantity {
        return Err(SkipReason::InsufficientStock {
            available: listing.available_quantity,
            requested: quantity,
        });
    }

    let gross = listing
        .price
        .checked_mul(u64::from(quantity))
        .ok_or(SkipReason::AmountTooLarge)?;
    let hours = listing
        .promotion_duration_hours
        .or(item.duration_hours)
        .unwrap_or(fallback_hours);
    let fee_percentage = fee_for_duration(fee_table, hours);
    let fee_amount = platform_fee(gross, fee_percentage).ok_or(SkipReason::AmountTooLarge)?;

    Ok(LineSettlement {
        listing_id: listing.id.clone(),
        seller_id: seller.id.clone(),
        seller_payout_account_id: payout.clone(),
        unit_price: listing.price,
        quantity,
        gross,
        fee_percentage,
        fee_amount,
    })
}

/// Outcome of pricing every line of a cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub lines: Vec<LineSettlement>,
    pub skipped: Vec<SkippedLine>,
}

impl SettlementReport {
    pub fn record(&mut self, listing_id: &ListingId, outcome: Result<LineSettlement, SkipReason>) {
        match outcome {
            Ok(line) => self.lines.push(line),
            Err(reason) => self.skipped.push(SkippedLine {
                listing_id: listing_id.clone(),
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTotals {
    pub subtotal: u64,
    pub platform_fee_total: u64,
    pub shipping_fee: u64,
    pub total: u64,
}

/// Why a cart cannot be turned into a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsError {
    /// Nothing in the cart could be paid for.
    Empty,
    /// The order total does not fit in minor units.
    Overflow,
}

impl fmt::Display for TotalsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no payable items in cart"),
            Self::Overflow => write!(f, "order total is too large"),
        }
    }
}

fn checked_sum(mut amounts: impl Iterator<Item = u64>) -> Result<u64, TotalsError> {
    amounts.try_fold(0u64, |acc, a| acc.checked_add(a).ok_or(TotalsError::Overflow))
}

/// Flat surcharge for orders below the free-shipping threshold.
pub fn shipping_for(subtotal: u64, settings: &MarketSettings) -> u64 {
    if subtotal < settings.shipping_threshold {
        settings.shipping_fee
    } else {
        0
    }
}

pub fn compute_totals(
    lines: &[LineSettlement],
    settings: &MarketSettings,
) -> Result<SettlementTotals, TotalsError> {
    let subtotal = checked_sum(lines.iter().map(|l| l.gross))?;
    if subtotal == 0 {
        return Err(TotalsError::Empty);
    }
    let platform_fee_total = checked_sum(lines.iter().map(|l| l.fee_amount))?;
    let shipping_fee = shipping_for(subtotal, settings);
    Ok(SettlementTotals {
        subtotal,
        platform_fee_total,
        shipping_fee,
        total: subtotal
            .checked_add(shipping_fee)
            .ok_or(TotalsError::Overflow)?,
    })
}

/// What each seller is owed from a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerPayout {
    pub seller_id: SellerId,
    pub payout_account_id: PayoutAccountId,
    pub gross: u64,
    pub fee: u64,
    pub amount: u64,
}

/// Group settled lines by seller: gross minus platform fee per seller.
pub fn group_by_seller(lines: &[LineSettlement]) -> Vec<SellerPayout> {
    let mut grouped: BTreeMap<&SellerId, SellerPayout> = BTreeMap::new();
    for line in lines {
        let entry = grouped
            .entry(&line.seller_id)
            .or_insert_with(|| SellerPayout {
                seller_id: line.seller_id.clone(),
                payout_account_id: line.seller_payout_account_id.clone(),
                gross: 0,
                fee: 0,
                amount: 0,
            });
        entry.gross = entry.gross.saturating_add(line.gross);
        entry.fee = entry.fee.saturating_add(line.fee_amount);
        entry.amount = entry.gross.saturating_sub(entry.fee);
    }
    grouped.into_values().collect()
}

/// Server-side record of one payable checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSession {
    pub id: SettlementId,
    pub cart_fingerprint: CartFingerprint,
    pub currency: String,
    pub line_items: Vec<LineSettlement>,
    #[serde(default)]
    pub skipped: Vec<SkippedLine>,
    pub subtotal: u64,
    pub shipping_fee: u64,
    pub platform_fee_total: u64,
    pub total_amount: u64,
    pub status: SettlementStatus,
    pub buyer_id: Option<BuyerId>,
    pub buyer_email: Option<String>,
    /// Set once purchased quantities have been taken out of stock.
    #[serde(default)]
    pub stock_applied: bool,
    /// Indexes into `line_items` of lines that were short of stock when the
    /// payment was confirmed. Their sellers are not paid for them.
    #[serde(default)]
    pub unfulfilled: Vec<usize>,
    /// Completed seller transfers: seller -> processor transfer id.
    #[serde(default)]
    pub transfers: BTreeMap<SellerId, String>,
    pub created_at: DateTime<Utc>,
}

impl SettlementSession {
    /// Lines whose stock was actually taken.
    pub fn fulfilled_lines(&self) -> Vec<LineSettlement> {
        self.line_items
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.unfulfilled.contains(index))
            .map(|(_, line)| line.clone())
            .collect()
    }
}
