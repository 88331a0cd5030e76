//! Owned collectibles: duplicates, item levels and derived attributes.
//!
//! ## Attribute formula
//!
//! `enhanced[k] = base[k] * (1 + (level - 1) * LEVEL_BONUS + duplicates * DUPLICATE_BONUS)`
//!
//! ## Item levels
//!
//! Promoting from level L costs `L * 100` experience. Levels stop at
//! `MAX_ITEM_LEVEL`; experience earned past the cap is discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::CollectibleItem;
use crate::error::{GachaError, GachaResult};

pub const MAX_ITEM_LEVEL: u32 = 50;

/// Attribute bonus per level above 1
pub const LEVEL_BONUS: f64 = 0.10;

/// Attribute bonus per held duplicate
pub const DUPLICATE_BONUS: f64 = 0.05;

/// Experience granted when a duplicate is consumed
pub const DUPLICATE_ENHANCE_XP: u64 = 50;

/// Experience needed to promote from `level` to `level + 1`
pub fn xp_to_promote(level: u32) -> u64 {
    u64::from(level) * 100
}

/// Derived attributes for a level and duplicate count
pub fn enhanced_attributes(
    base: &BTreeMap<String, f64>,
    level: u32,
    duplicate_count: u32,
) -> BTreeMap<String, f64> {
    let multiplier = 1.0
        + f64::from(level.saturating_sub(1)) * LEVEL_BONUS
        + f64::from(duplicate_count) * DUPLICATE_BONUS;
    base.iter()
        .map(|(k, v)| (k.clone(), v * multiplier))
        .collect()
}

/// A user's copy of a collectible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedItem {
    pub item_id: String,
    pub level: u32,
    pub experience: u64,
    pub duplicate_count: u32,
    pub enhanced_attributes: BTreeMap<String, f64>,
    pub acquired_at: DateTime<Utc>,
}

/// Result of granting experience to an owned item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLevelChange {
    pub old_level: u32,
    pub new_level: u32,
    /// Level cap hit; surplus experience was dropped
    pub capped: bool,
}

impl ItemLevelChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

impl OwnedItem {
    /// First copy of an item
    pub fn acquire(item: &CollectibleItem, now: DateTime<Utc>) -> Self {
        Self {
            item_id: item.id.clone(),
            level: 1,
            experience: 0,
            duplicate_count: 0,
            enhanced_attributes: item.base_attributes.clone(),
            acquired_at: now,
        }
    }

    /// Record another copy of an already owned item
    pub fn add_duplicate(&mut self, item: &CollectibleItem) {
        self.duplicate_count += 1;
        self.recompute(item);
    }

    /// Grant experience, promoting while the threshold is met
    pub fn add_experience(&mut self, item: &CollectibleItem, amount: u64) -> ItemLevelChange {
        let old_level = self.level;
        let mut capped = false;
        self.experience = self.experience.saturating_add(amount);

        while self.level < MAX_ITEM_LEVEL && self.experience >= xp_to_promote(self.level) {
            self.experience -= xp_to_promote(self.level);
            self.level += 1;
        }
        if self.level >= MAX_ITEM_LEVEL {
            self.level = MAX_ITEM_LEVEL;
            capped = self.experience > 0;
            self.experience = 0;
        }

        self.recompute(item);
        ItemLevelChange {
            old_level,
            new_level: self.level,
            capped,
        }
    }

    /// Spend one duplicate for a flat experience grant
    pub fn consume_duplicate(&mut self, item: &CollectibleItem) -> GachaResult<ItemLevelChange> {
        if self.duplicate_count < 1 {
            return Err(GachaError::NoDuplicatesAvailable {
                item_id: self.item_id.clone(),
            });
        }
        self.duplicate_count -= 1;
        Ok(self.add_experience(item, DUPLICATE_ENHANCE_XP))
    }

    pub fn recompute(&mut self, item: &CollectibleItem) {
        self.enhanced_attributes =
            enhanced_attributes(&item.base_attributes, self.level, self.duplicate_count);
    }
}
