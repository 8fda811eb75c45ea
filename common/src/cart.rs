use serde::{Deserialize, Deserializer, Serialize};

use crate::listing::ListingId;
use crate::seller::SellerAccountKind;

/// Identifier of the buyer as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuyerId(pub String);

/// Buyer details attached to a checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    #[serde(default)]
    pub id: Option<BuyerId>,
    #[serde(default)]
    pub email: Option<String>,
}

/// One line of a client-held cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(alias = "id")]
    pub listing_id: ListingId,
    #[serde(default = "default_quantity", deserialize_with = "lenient_quantity")]
    pub quantity: u32,
    #[serde(default, alias = "sellerKind")]
    pub seller_account_kind_hint: Option<SellerAccountKind>,
    /// Duration used to price the platform fee when the listing carries none.
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

impl CartItem {
    pub fn new(listing_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            listing_id: ListingId(listing_id.into()),
            quantity: quantity.max(1),
            seller_account_kind_hint: None,
            duration_hours: None,
        }
    }
}

fn default_quantity() -> u32 {
    1
}

/// Clients send quantities as numbers, numeric strings, floats or nothing at
/// all. Anything that does not coerce to a positive integer counts as 1.
fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_quantity(&value))
}

pub fn coerce_quantity(value: &serde_json::Value) -> u32 {
    let parsed = match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 1.0).map(|f| f.trunc() as u64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 1.0)
                    .map(|f| f.trunc() as u64)
            })
        }
        _ => None,
    };
    match parsed {
        Some(q) if q >= 1 => u32::try_from(q).unwrap_or(u32::MAX),
        _ => 1,
    }
}
