//! Shared types and pure logic for Lyceum's gacha and progression core.
//!
//! Nothing in this crate performs I/O against the store; the async services
//! in `lyceumd` drive these types through transactions.

pub mod achievements;
pub mod catalog;
pub mod collection;
pub mod error;
pub mod history;
pub mod progression;
pub mod rarity;
pub mod streaks;

pub use catalog::{
    Catalog, CollectibleItem, ContentCatalog, PoolCatalog, RewardPool, STANDARD_POOL_ID,
};
pub use collection::{ItemLevelChange, OwnedItem, MAX_ITEM_LEVEL};
pub use error::{EntityKind, GachaError, GachaResult, Remediation};
pub use history::{pity_counter, DrawHistoryEntry, HistoryFilter, PityStatus};
pub use progression::{level_for_experience, LevelChange, UserProgressionState};
pub use rarity::{resolve, resolve_with_roll, RarityTier, RateTable};
pub use streaks::{advance_streak, StreakChange};
