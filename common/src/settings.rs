use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fee::FeeTable;
use crate::promotion::{PromotionKind, SlotCapacity, DEFAULT_RESERVATION_MINUTES};

/// Business settings resolved once at startup and passed to every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketSettings {
    /// Raw fee table as stored by the admin UI: hours -> percent.
    pub fee_table: BTreeMap<String, serde_json::Value>,
    /// Duration used for fee lookup when neither the listing nor the cart line carries one.
    pub default_duration_hours: u32,
    /// Orders with a subtotal below this (minor units) pay the shipping surcharge.
    pub shipping_threshold: u64,
    pub shipping_fee: u64,
    pub currency: String,
    pub slot_capacity: SlotCapacity,
    /// Boost price per hour in minor units, per placement kind.
    pub boost_hourly_price: BTreeMap<PromotionKind, u64>,
    /// Longest boost that can be bought in one purchase.
    pub max_boost_hours: u32,
    /// Minutes a quoted boost holds its slot while payment is outstanding.
    pub reservation_minutes: u32,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            fee_table: BTreeMap::new(),
            default_duration_hours: 24,
            shipping_threshold: 500,
            shipping_fee: 99,
            currency: "usd".to_string(),
            slot_capacity: SlotCapacity::default(),
            boost_hourly_price: [(PromotionKind::Floating, 50), (PromotionKind::Banner, 80)]
                .into_iter()
                .collect(),
            max_boost_hours: 24 * 14,
            reservation_minutes: DEFAULT_RESERVATION_MINUTES,
        }
    }
}

impl MarketSettings {
    pub fn fee_table(&self) -> FeeTable {
        FeeTable::from_raw(&self.fee_table)
    }

    pub fn boost_price(&self, kind: PromotionKind, hours: u32) -> Option<u64> {
        self.boost_hourly_price
            .get(&kind)
            .and_then(|per_hour| per_hour.checked_mul(u64::from(hours)))
    }
}
