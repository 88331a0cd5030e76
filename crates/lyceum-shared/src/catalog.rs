//! Reward pools and the collectible catalog.
//!
//! Both are read-only at pull time. A catalog is validated once when it is
//! loaded; any tier a pool can draw must have at least one item, so a runtime
//! miss can only mean the catalog changed underneath us.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{EntityKind, GachaError, GachaResult};
use crate::rarity::{RarityTier, RateTable};

/// Id of the pool every catalog ships with
pub const STANDARD_POOL_ID: &str = "standard";

/// Draws in a multi pull
pub const DEFAULT_MULTI_COUNT: u32 = 10;

/// A named draw configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPool {
    pub id: String,
    pub name: String,
    /// Currency units per single draw
    pub cost: u64,
    pub rates: RateTable,
    /// The Nth draw since the last floor-or-better result is forced
    pub pity_threshold: u32,
    #[serde(default = "default_pity_floor")]
    pub pity_floor: RarityTier,
    #[serde(default = "default_multi_count")]
    pub multi_count: u32,
    /// Bundle price for a multi pull; 10% off by default
    #[serde(default)]
    pub multi_cost: Option<u64>,
    /// Reserved for featured-item weighting; not used by the draw
    #[serde(default)]
    pub featured_item_ids: Vec<String>,
}

fn default_pity_floor() -> RarityTier {
    RarityTier::Rare
}

fn default_multi_count() -> u32 {
    DEFAULT_MULTI_COUNT
}

impl RewardPool {
    pub fn standard() -> Self {
        Self {
            id: STANDARD_POOL_ID.to_string(),
            name: "Standard Symposium".to_string(),
            cost: 1,
            rates: RateTable::new(0.60, 0.30, 0.08, 0.02),
            pity_threshold: 10,
            pity_floor: RarityTier::Rare,
            multi_count: DEFAULT_MULTI_COUNT,
            multi_cost: None,
            featured_item_ids: Vec::new(),
        }
    }

    /// Price of a full multi pull
    pub fn multi_pull_cost(&self) -> u64 {
        self.multi_cost.unwrap_or_else(|| {
            self.cost
                .saturating_mul(u64::from(self.multi_count.saturating_sub(1)))
        })
    }

    /// Whether the next draw must be forced to the pity floor
    pub fn pity_due(&self, pity_counter: u32) -> bool {
        pity_counter + 1 >= self.pity_threshold
    }

    pub fn validate(&self) -> GachaResult<()> {
        self.rates.validate().map_err(|e| match e {
            GachaError::Configuration(msg) => {
                GachaError::Configuration(format!("pool {}: {}", self.id, msg))
            }
            other => other,
        })?;
        if self.pity_threshold == 0 {
            return Err(GachaError::Configuration(format!(
                "pool {}: pity threshold must be at least 1",
                self.id
            )));
        }
        if self.multi_count == 0 {
            return Err(GachaError::Configuration(format!(
                "pool {}: multi pull must contain at least one draw",
                self.id
            )));
        }
        if self.multi_cost.is_none()
            && self
                .cost
                .checked_mul(u64::from(self.multi_count - 1))
                .is_none()
        {
            return Err(GachaError::Configuration(format!(
                "pool {}: multi pull price overflows",
                self.id
            )));
        }
        if self.rates.mass_at_or_above(self.pity_floor) <= 0.0 {
            return Err(GachaError::Configuration(format!(
                "pool {}: no probability mass at or above pity floor {}",
                self.id, self.pity_floor
            )));
        }
        Ok(())
    }
}

/// Static description of a collectible philosopher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectibleItem {
    pub id: String,
    pub name: String,
    pub tier: RarityTier,
    pub base_attributes: BTreeMap<String, f64>,
}

impl CollectibleItem {
    fn philosopher(id: &str, name: &str, tier: RarityTier, stats: [f64; 4]) -> Self {
        let base_attributes = ["wisdom", "logic", "rhetoric", "ethics"]
            .iter()
            .zip(stats)
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tier,
            base_attributes,
        }
    }
}

/// Read-only lookup of collectible items.
///
/// Lookups return absent or empty rather than failing.
pub trait ContentCatalog: Send + Sync {
    fn item(&self, item_id: &str) -> Option<CollectibleItem>;

    fn items_by_tier(&self, tier: RarityTier) -> Vec<CollectibleItem>;
}

/// Lookup of reward pools
pub trait PoolCatalog: Send + Sync {
    fn get_pool(&self, pool_id: &str) -> GachaResult<RewardPool>;

    fn pool_ids(&self) -> Vec<String>;
}

/// Pools and items held in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CatalogDoc")]
pub struct Catalog {
    pub pools: Vec<RewardPool>,
    pub items: Vec<CollectibleItem>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
}

/// On-disk shape; the id index is rebuilt on load
#[derive(Deserialize)]
struct CatalogDoc {
    pools: Vec<RewardPool>,
    items: Vec<CollectibleItem>,
}

impl From<CatalogDoc> for Catalog {
    fn from(doc: CatalogDoc) -> Self {
        Catalog::new(doc.pools, doc.items)
    }
}

impl Catalog {
    pub fn new(pools: Vec<RewardPool>, items: Vec<CollectibleItem>) -> Self {
        let by_id = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
        Self {
            pools,
            items,
            by_id,
        }
    }

    /// Built-in catalog with the standard pool
    pub fn standard() -> Self {
        use RarityTier::*;
        let items = vec![
            CollectibleItem::philosopher("diogenes", "Diogenes", Common, [8.0, 6.0, 12.0, 7.0]),
            CollectibleItem::philosopher("epicurus", "Epicurus", Common, [10.0, 8.0, 7.0, 11.0]),
            CollectibleItem::philosopher("zeno", "Zeno of Elea", Common, [9.0, 13.0, 8.0, 6.0]),
            CollectibleItem::philosopher("hume", "David Hume", Common, [11.0, 12.0, 9.0, 8.0]),
            CollectibleItem::philosopher("seneca", "Seneca", Rare, [14.0, 12.0, 16.0, 15.0]),
            CollectibleItem::philosopher("spinoza", "Baruch Spinoza", Rare, [16.0, 18.0, 10.0, 15.0]),
            CollectibleItem::philosopher("descartes", "René Descartes", Rare, [15.0, 19.0, 12.0, 11.0]),
            CollectibleItem::philosopher("confucius", "Confucius", Epic, [22.0, 17.0, 19.0, 25.0]),
            CollectibleItem::philosopher("kant", "Immanuel Kant", Epic, [23.0, 26.0, 14.0, 24.0]),
            CollectibleItem::philosopher("nietzsche", "Friedrich Nietzsche", Epic, [21.0, 18.0, 27.0, 15.0]),
            CollectibleItem::philosopher("socrates", "Socrates", Legendary, [32.0, 28.0, 30.0, 31.0]),
            CollectibleItem::philosopher("aristotle", "Aristotle", Legendary, [31.0, 34.0, 27.0, 29.0]),
        ];
        Self::new(vec![RewardPool::standard()], items)
    }

    /// Load a catalog from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> GachaResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GachaError::Configuration(format!(
                "cannot read catalog {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let catalog: Catalog = serde_json::from_str(&content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check pools against item contents
    pub fn validate(&self) -> GachaResult<()> {
        if self.by_id.len() != self.items.len() {
            return Err(GachaError::Configuration(
                "catalog contains duplicate item ids".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.id.as_str()) {
                return Err(GachaError::Configuration(format!(
                    "duplicate pool id {}",
                    pool.id
                )));
            }
            pool.validate()?;
            for tier in pool.rates.drawable_tiers() {
                if !self.items.iter().any(|item| item.tier == tier) {
                    return Err(GachaError::Configuration(format!(
                        "pool {} can draw {} but the catalog has no {} items",
                        pool.id, tier, tier
                    )));
                }
            }
            if let Some(missing) = pool
                .featured_item_ids
                .iter()
                .find(|id| !self.by_id.contains_key(*id))
            {
                return Err(GachaError::Configuration(format!(
                    "pool {} features unknown item {}",
                    pool.id, missing
                )));
            }
        }
        Ok(())
    }
}

impl ContentCatalog for Catalog {
    fn item(&self, item_id: &str) -> Option<CollectibleItem> {
        self.by_id.get(item_id).map(|i| self.items[*i].clone())
    }

    fn items_by_tier(&self, tier: RarityTier) -> Vec<CollectibleItem> {
        self.items
            .iter()
            .filter(|item| item.tier == tier)
            .cloned()
            .collect()
    }
}

impl PoolCatalog for Catalog {
    fn get_pool(&self, pool_id: &str) -> GachaResult<RewardPool> {
        self.pools
            .iter()
            .find(|p| p.id == pool_id)
            .cloned()
            .ok_or_else(|| GachaError::not_found(EntityKind::Pool, pool_id))
    }

    fn pool_ids(&self) -> Vec<String> {
        self.pools.iter().map(|p| p.id.clone()).collect()
    }
}
