use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Platform fee ladder used when no valid table is configured.
/// Each entry is `(max_hours_inclusive, percent)`; anything longer pays [`DEFAULT_CEILING_PERCENT`].
const DEFAULT_LADDER: [(u32, u32); 7] = [
    (12, 3),
    (24, 4),
    (36, 5),
    (48, 6),
    (72, 7),
    (96, 8),
    (120, 9),
];

const DEFAULT_CEILING_PERCENT: u32 = 10;

/// Duration-tiered platform fee table: hour threshold -> fee percent.
///
/// Built from the raw JSON mapping held in the marketplace settings. Keys are
/// hour thresholds written as strings (JSON object keys), values are integer
/// percentages. A table with any malformed entry is discarded as a whole so a
/// half-parsed table never silently under-charges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTable {
    tiers: BTreeMap<u32, u32>,
}

impl FeeTable {
    pub fn new(tiers: BTreeMap<u32, u32>) -> Self {
        Self { tiers }
    }

    /// Parse a raw settings mapping. Returns an empty table (meaning "use the
    /// default ladder") if any key or value is not a non-negative integer.
    pub fn from_raw(raw: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut tiers = BTreeMap::new();
        for (key, value) in raw {
            let Ok(hours) = key.trim().parse::<u32>() else {
                return Self::default();
            };
            let percent = match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            match percent.and_then(|p| u32::try_from(p).ok()) {
                Some(p) if p <= 100 => {
                    tiers.insert(hours, p);
                }
                _ => return Self::default(),
            }
        }
        Self { tiers }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tiers(&self) -> &BTreeMap<u32, u32> {
        &self.tiers
    }
}

/// Resolve the platform fee percentage for a listing or promotion of `hours`.
///
/// Exact threshold match wins, otherwise the highest threshold not above
/// `hours` applies; durations below the lowest threshold pay the lowest
/// threshold's fee. An empty table falls back to the built-in ladder.
pub fn fee_for_duration(table: &FeeTable, hours: u32) -> u32 {
    if table.is_empty() {
        return default_fee_for_duration(hours);
    }
    if let Some((_, pct)) = table.tiers.range(..=hours).next_back() {
        return *pct;
    }
    // Below the lowest threshold.
    table
        .tiers
        .values()
        .next()
        .copied()
        .unwrap_or_else(|| default_fee_for_duration(hours))
}

fn default_fee_for_duration(hours: u32) -> u32 {
    DEFAULT_LADDER
        .iter()
        .find(|(max_hours, _)| hours <= *max_hours)
        .map(|(_, pct)| *pct)
        .unwrap_or(DEFAULT_CEILING_PERCENT)
}

/// Fee amount in minor units for a gross amount, rounded half up. `None`
/// when the fee does not fit in minor units.
pub fn platform_fee(gross: u64, percent: u32) -> Option<u64> {
    u64::try_from((u128::from(gross) * u128::from(percent) + 50) / 100).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn default_ladder_is_monotonic() {
        let table = FeeTable::default();
        let expected = [
            (12, 3),
            (24, 4),
            (36, 5),
            (48, 6),
            (72, 7),
            (96, 8),
            (120, 9),
            (200, 10),
        ];
        for (hours, pct) in expected {
            assert_eq!(fee_for_duration(&table, hours), pct, "hours={hours}");
        }

        let mut last = 0;
        for hours in 0..300 {
            let pct = fee_for_duration(&table, hours);
            assert!(pct >= last, "fee dropped at {hours}h");
            last = pct;
        }
    }

    #[test]
    fn default_ladder_boundaries() {
        let table = FeeTable::default();
        assert_eq!(fee_for_duration(&table, 0), 3);
        assert_eq!(fee_for_duration(&table, 13), 4);
        assert_eq!(fee_for_duration(&table, 121), 10);
    }

    #[test]
    fn configured_table_exact_and_floor_match() {
        let table = FeeTable::from_raw(&raw(&[
            ("24", json!(5)),
            ("48", json!(7)),
            ("96", json!("9")),
        ]));
        assert_eq!(fee_for_duration(&table, 48), 7);
        assert_eq!(fee_for_duration(&table, 60), 7);
        assert_eq!(fee_for_duration(&table, 500), 9);
    }

    #[test]
    fn below_lowest_threshold_uses_lowest_fee() {
        let table = FeeTable::from_raw(&raw(&[("24", json!(5)), ("48", json!(7))]));
        assert_eq!(fee_for_duration(&table, 1), 5);
    }

    #[test]
    fn malformed_table_falls_back_to_default() {
        let table = FeeTable::from_raw(&raw(&[("24", json!(5)), ("soon", json!(7))]));
        assert!(table.is_empty());
        assert_eq!(fee_for_duration(&table, 24), 4);

        let table = FeeTable::from_raw(&raw(&[("24", json!(-1))]));
        assert!(table.is_empty());

        let table = FeeTable::from_raw(&raw(&[("24", json!(null))]));
        assert!(table.is_empty());
    }

    #[test]
    fn platform_fee_rounds_half_up() {
        assert_eq!(platform_fee(1000, 4), Some(40));
        assert_eq!(platform_fee(1050, 5), Some(53)); // 52.5
        assert_eq!(platform_fee(1049, 5), Some(52)); // 52.45
        assert_eq!(platform_fee(0, 10), Some(0));
        assert_eq!(platform_fee(u64::MAX, 10), Some(u64::MAX / 10 + 1));
        assert_eq!(platform_fee(u64::MAX, 200), None);
    }
}
