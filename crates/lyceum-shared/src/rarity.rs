//! Rarity tiers and the weighted tier draw.
//!
//! The draw walks tiers from rarest to most common, accumulating probability
//! mass, and returns the first tier whose cumulative threshold exceeds the
//! roll. A pity draw drops every tier below the floor and renormalizes the
//! remaining mass, so it can never land below the floor.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GachaError, GachaResult};

/// Allowed deviation of a rate table's total from 1.0
pub const RATE_TOLERANCE: f64 = 1e-6;

/// Ordered rarity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarityTier {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl RarityTier {
    /// All tiers, most common first
    pub const ALL: [RarityTier; 4] = [
        RarityTier::Common,
        RarityTier::Rare,
        RarityTier::Epic,
        RarityTier::Legendary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RarityTier::Common => "common",
            RarityTier::Rare => "rare",
            RarityTier::Epic => "epic",
            RarityTier::Legendary => "legendary",
        }
    }
}

impl std::fmt::Display for RarityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Probability of each tier for a single draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(BTreeMap<RarityTier, f64>);

impl RateTable {
    /// Build from (common, rare, epic, legendary) probabilities
    pub fn new(common: f64, rare: f64, epic: f64, legendary: f64) -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(RarityTier::Common, common);
        rates.insert(RarityTier::Rare, rare);
        rates.insert(RarityTier::Epic, epic);
        rates.insert(RarityTier::Legendary, legendary);
        Self(rates)
    }

    /// Probability of a tier (0.0 when absent)
    pub fn rate(&self, tier: RarityTier) -> f64 {
        self.0.get(&tier).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Probability mass at or above a tier
    pub fn mass_at_or_above(&self, floor: RarityTier) -> f64 {
        RarityTier::ALL
            .iter()
            .filter(|t| **t >= floor)
            .map(|t| self.rate(*t))
            .sum()
    }

    /// Tiers with a positive probability
    pub fn drawable_tiers(&self) -> impl Iterator<Item = RarityTier> + '_ {
        RarityTier::ALL.into_iter().filter(|t| self.rate(*t) > 0.0)
    }

    /// Check the table is a probability distribution
    pub fn validate(&self) -> GachaResult<()> {
        if let Some((tier, rate)) = self.0.iter().find(|(_, r)| !r.is_finite() || **r < 0.0) {
            return Err(GachaError::Configuration(format!(
                "rate for {} is invalid: {}",
                tier, rate
            )));
        }
        let total = self.total();
        if (total - 1.0).abs() > RATE_TOLERANCE {
            return Err(GachaError::Configuration(format!(
                "rates sum to {} instead of 1.0",
                total
            )));
        }
        Ok(())
    }
}

/// Draw a tier using the supplied random source.
///
/// `forced_floor` excludes every tier below it and renormalizes the rest.
pub fn resolve<R: Rng + ?Sized>(
    rates: &RateTable,
    forced_floor: Option<RarityTier>,
    rng: &mut R,
) -> RarityTier {
    let roll: f64 = rng.gen();
    resolve_with_roll(rates, forced_floor, roll)
}

/// Draw a tier for a given roll in `[0, 1)`.
pub fn resolve_with_roll(rates: &RateTable, forced_floor: Option<RarityTier>, roll: f64) -> RarityTier {
    let floor = forced_floor.unwrap_or(RarityTier::Common);
    let mass = rates.mass_at_or_above(floor);
    if mass <= 0.0 {
        return floor;
    }

    let mut cumulative = 0.0;
    for tier in RarityTier::ALL.iter().rev().filter(|t| **t >= floor) {
        cumulative += rates.rate(*tier) / mass;
        if roll < cumulative {
            return *tier;
        }
    }

    // Floating error left the roll above the final threshold
    floor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> RateTable {
        RateTable::new(0.60, 0.30, 0.08, 0.02)
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RarityTier::Common < RarityTier::Rare);
        assert!(RarityTier::Rare < RarityTier::Epic);
        assert!(RarityTier::Epic < RarityTier::Legendary);
    }

    #[test]
    fn test_walk_starts_at_rarest_tier() {
        let rates = standard();
        assert_eq!(resolve_with_roll(&rates, None, 0.0), RarityTier::Legendary);
        assert_eq!(resolve_with_roll(&rates, None, 0.019), RarityTier::Legendary);
        assert_eq!(resolve_with_roll(&rates, None, 0.05), RarityTier::Epic);
        assert_eq!(resolve_with_roll(&rates, None, 0.2), RarityTier::Rare);
        assert_eq!(resolve_with_roll(&rates, None, 0.5), RarityTier::Common);
        assert_eq!(resolve_with_roll(&rates, None, 0.999_999), RarityTier::Common);
    }

    #[test]
    fn test_pity_draw_never_common() {
        let rates = standard();
        for i in 0..1000 {
            let roll = i as f64 / 1000.0;
            assert!(resolve_with_roll(&rates, Some(RarityTier::Rare), roll) >= RarityTier::Rare);
        }
    }

    #[test]
    fn test_pity_draw_renormalizes() {
        // Above-floor mass is 0.40; legendary owns the first 0.05 of it
        let rates = standard();
        assert_eq!(
            resolve_with_roll(&rates, Some(RarityTier::Rare), 0.049),
            RarityTier::Legendary
        );
        assert_eq!(
            resolve_with_roll(&rates, Some(RarityTier::Rare), 0.2),
            RarityTier::Epic
        );
        assert_eq!(
            resolve_with_roll(&rates, Some(RarityTier::Rare), 0.26),
            RarityTier::Rare
        );
    }

    #[test]
    fn test_roll_past_end_defaults_to_floor() {
        let rates = RateTable::new(0.5, 0.2, 0.2, 0.1 - 1e-9);
        assert_eq!(resolve_with_roll(&rates, None, 1.0), RarityTier::Common);
        assert_eq!(
            resolve_with_roll(&rates, Some(RarityTier::Rare), 1.0),
            RarityTier::Rare
        );
    }

    #[test]
    fn test_validate() {
        assert!(standard().validate().is_ok());
        assert!(RateTable::new(0.6, 0.3, 0.08, 0.03).validate().is_err());
        assert!(RateTable::new(1.1, -0.1, 0.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_rate_table_serializes_as_map() {
        let json = serde_json::to_value(standard()).unwrap();
        assert_eq!(json["legendary"], 0.02);
        let back: RateTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, standard());
    }
}
