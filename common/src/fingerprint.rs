use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cart::{BuyerId, CartItem};
use crate::listing::ListingId;

/// Number of hex characters kept from the SHA-256 digest (128 bits).
///
/// A collision merges two different carts onto one payment, so this must stay
/// well above 20.
pub const FINGERPRINT_HEX_LEN: usize = 32;

const FINGERPRINT_PREFIX: &str = "cart_";

/// Stable identifier for a cart's logical contents, used as the idempotency
/// key for settlement creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CartFingerprint(pub String);

impl fmt::Display for CartFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl CartFingerprint {
    /// Fingerprint a cart. Order of items does not matter and repeated lines
    /// for the same listing are folded together.
    pub fn compute(items: &[CartItem], buyer: Option<&BuyerId>) -> Self {
        let mut folded: BTreeMap<&ListingId, u64> = BTreeMap::new();
        for item in items {
            *folded.entry(&item.listing_id).or_default() += u64::from(item.quantity.max(1));
        }

        let mut hasher = Sha256::new();
        hasher.update(b"buyer:");
        hasher.update(buyer.map(|b| b.0.as_str()).unwrap_or("").as_bytes());
        for (listing, quantity) in folded {
            hasher.update(b"\n");
            hasher.update(listing.0.as_bytes());
            hasher.update(b"=");
            hasher.update(quantity.to_string().as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "{FINGERPRINT_PREFIX}{}",
            &digest[..FINGERPRINT_HEX_LEN]
        ))
    }

    /// Use a client-supplied idempotency key verbatim, falling back to a
    /// computed fingerprint when the key is absent or blank.
    pub fn resolve(explicit: Option<&str>, items: &[CartItem], buyer: Option<&BuyerId>) -> Self {
        match explicit.map(str::trim) {
            Some(key) if !key.is_empty() => Self(key.to_string()),
            _ => Self::compute(items, buyer),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buyer() -> BuyerId {
        BuyerId("buyer-1".into())
    }

    #[test]
    fn fingerprint_ignores_item_order() {
        let a = vec![CartItem::new("d-1", 2), CartItem::new("d-2", 1), CartItem::new("d-3", 5)];
        let b = vec![CartItem::new("d-3", 5), CartItem::new("d-1", 2), CartItem::new("d-2", 1)];
        assert_eq!(
            CartFingerprint::compute(&a, Some(&buyer())),
            CartFingerprint::compute(&b, Some(&buyer()))
        );
    }

    #[test]
    fn fingerprint_depends_on_buyer_and_quantity() {
        let items = vec![CartItem::new("d-1", 2)];
        let base = CartFingerprint::compute(&items, Some(&buyer()));
        assert_ne!(base, CartFingerprint::compute(&items, None));
        assert_ne!(
            base,
            CartFingerprint::compute(&items, Some(&BuyerId("buyer-2".into())))
        );
        assert_ne!(
            base,
            CartFingerprint::compute(&[CartItem::new("d-1", 3)], Some(&buyer()))
        );
    }

    #[test]
    fn split_lines_fold_together() {
        let split = vec![CartItem::new("d-1", 1), CartItem::new("d-1", 1)];
        let merged = vec![CartItem::new("d-1", 2)];
        assert_eq!(
            CartFingerprint::compute(&split, None),
            CartFingerprint::compute(&merged, None)
        );
    }

    #[test]
    fn fingerprint_has_documented_length() {
        let fp = CartFingerprint::compute(&[CartItem::new("d-1", 1)], None);
        assert_eq!(fp.0.len(), FINGERPRINT_PREFIX.len() + FINGERPRINT_HEX_LEN);
        assert!(fp.0[FINGERPRINT_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn explicit_key_is_used_verbatim() {
        let items = vec![CartItem::new("d-1", 1)];
        assert_eq!(
            CartFingerprint::resolve(Some("client-key-123"), &items, None).0,
            "client-key-123"
        );
        assert_eq!(
            CartFingerprint::resolve(Some("  "), &items, None),
            CartFingerprint::compute(&items, None)
        );
    }
}
