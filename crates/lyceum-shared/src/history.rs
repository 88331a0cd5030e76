//! Draw history records and the pity counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rarity::RarityTier;

/// One resolved draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawHistoryEntry {
    pub id: Uuid,
    pub item_id: String,
    pub pool_id: String,
    pub tier: RarityTier,
    pub timestamp: DateTime<Utc>,
    /// Draw was forced to the pity floor
    #[serde(default)]
    pub pity_forced: bool,
    /// Multi pull this draw belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

impl DrawHistoryEntry {
    pub fn new(item_id: &str, pool_id: &str, tier: RarityTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item_id.to_string(),
            pool_id: pool_id.to_string(),
            tier,
            timestamp: Utc::now(),
            pity_forced: false,
            batch_id: None,
        }
    }

    pub fn forced(mut self, pity_forced: bool) -> Self {
        self.pity_forced = pity_forced;
        self
    }

    pub fn in_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filters for history views
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub pool_id: Option<String>,
    pub min_tier: Option<RarityTier>,
    pub since: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn pool(mut self, pool_id: &str) -> Self {
        self.pool_id = Some(pool_id.to_string());
        self
    }

    pub fn min_tier(mut self, tier: RarityTier) -> Self {
        self.min_tier = Some(tier);
        self
    }

    pub fn matches(&self, entry: &DrawHistoryEntry) -> bool {
        self.pool_id.as_deref().map_or(true, |p| p == entry.pool_id)
            && self.min_tier.map_or(true, |t| entry.tier >= t)
            && self.since.map_or(true, |s| entry.timestamp >= s)
    }
}

/// Count consecutive below-floor draws, newest first.
///
/// Stops at the first draw at or above the floor and never looks past
/// `window` entries.
pub fn pity_counter<'a, I>(newest_first: I, floor: RarityTier, window: u32) -> u32
where
    I: IntoIterator<Item = &'a DrawHistoryEntry>,
{
    newest_first
        .into_iter()
        .take(window as usize)
        .take_while(|e| e.tier < floor)
        .count() as u32
}

/// Pity progress for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PityStatus {
    pub pool_id: String,
    pub counter: u32,
    pub threshold: u32,
    /// Draws until a guaranteed floor result, counting the guaranteed one
    pub draws_until_guarantee: u32,
}

impl PityStatus {
    pub fn new(pool_id: &str, counter: u32, threshold: u32) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            counter,
            threshold,
            draws_until_guarantee: threshold.saturating_sub(counter).max(1),
        }
    }
}
