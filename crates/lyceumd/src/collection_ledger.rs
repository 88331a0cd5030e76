//! Per-user owned items.
//!
//! Each owned item is its own document under `users/{user}/collection/`.
//! Draws, item experience and duplicate enhancement are compare-and-swap
//! updates on that document.

use chrono::{DateTime, Utc};
use lyceum_shared::{
    CollectibleItem, ContentCatalog, EntityKind, GachaError, GachaResult, ItemLevelChange,
    OwnedItem,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::retry::RetryPolicy;
use crate::store::{keys, load_doc, update_doc, KvStore, Precondition, ScanOrder, Update, WriteOp};

/// What recording a drawn item did to the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawApplied {
    pub is_new: bool,
    pub owned: OwnedItem,
}

pub struct CollectionLedger {
    store: Arc<dyn KvStore>,
    catalog: Arc<dyn ContentCatalog>,
    retry: RetryPolicy,
}

impl CollectionLedger {
    pub fn new(
        store: Arc<dyn KvStore>,
        catalog: Arc<dyn ContentCatalog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            retry,
        }
    }

    /// Owned item with its document version
    pub async fn load(&self, user_id: &str, item_id: &str) -> GachaResult<Option<(OwnedItem, u64)>> {
        load_doc(self.store.as_ref(), &keys::owned_item(user_id, item_id)).await
    }

    pub async fn get(&self, user_id: &str, item_id: &str) -> GachaResult<Option<OwnedItem>> {
        Ok(self.load(user_id, item_id).await?.map(|(owned, _)| owned))
    }

    /// Write recording `item` as drawn, on top of what was read
    pub fn stage_draw(
        user_id: &str,
        item: &CollectibleItem,
        current: Option<(OwnedItem, u64)>,
        now: DateTime<Utc>,
    ) -> GachaResult<(WriteOp, DrawApplied)> {
        let key = keys::owned_item(user_id, &item.id);
        let (owned, precondition, is_new) = match current {
            Some((mut owned, version)) => {
                owned.add_duplicate(item);
                (owned, Precondition::Version(version), false)
            }
            None => (OwnedItem::acquire(item, now), Precondition::Absent, true),
        };
        let op = WriteOp::new(key, &owned, precondition)?;
        Ok((op, DrawApplied { is_new, owned }))
    }

    /// Record a draw of `item_id` on its own
    pub async fn apply_draw(&self, user_id: &str, item_id: &str) -> GachaResult<DrawApplied> {
        let item = self.catalog_item(item_id)?;
        let key = keys::owned_item(user_id, item_id);
        let applied = update_doc(self.store.as_ref(), &self.retry, &key, |current: Option<OwnedItem>| {
            let applied = match current {
                Some(mut owned) => {
                    owned.add_duplicate(&item);
                    DrawApplied {
                        is_new: false,
                        owned,
                    }
                }
                None => DrawApplied {
                    is_new: true,
                    owned: OwnedItem::acquire(&item, Utc::now()),
                },
            };
            Ok(Update::write(applied.owned.clone(), applied))
        })
        .await?;
        debug!(user = user_id, item = item_id, is_new = applied.is_new, "draw recorded");
        Ok(applied)
    }

    /// Grant experience to an owned item
    pub async fn add_experience(
        &self,
        user_id: &str,
        item_id: &str,
        amount: u64,
    ) -> GachaResult<ItemLevelChange> {
        let item = self.catalog_item(item_id)?;
        let change = self
            .modify_owned(user_id, &item, |owned| Ok(owned.add_experience(&item, amount)))
            .await?;
        if change.leveled_up() {
            info!(user = user_id, item = item_id, level = change.new_level, "item leveled up");
        }
        Ok(change)
    }

    /// Spend one duplicate on a flat experience grant
    pub async fn consume_duplicate(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> GachaResult<ItemLevelChange> {
        let item = self.catalog_item(item_id)?;
        let change = self
            .modify_owned(user_id, &item, |owned| owned.consume_duplicate(&item))
            .await?;
        debug!(user = user_id, item = item_id, level = change.new_level, "duplicate consumed");
        Ok(change)
    }

    /// Every owned item, ordered by item id
    pub async fn list(&self, user_id: &str) -> GachaResult<Vec<OwnedItem>> {
        self.store
            .scan_prefix(&keys::collection_prefix(user_id), usize::MAX, ScanOrder::Ascending)
            .await?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc.value).map_err(GachaError::from))
            .collect()
    }

    /// Number of distinct items owned
    pub async fn count(&self, user_id: &str) -> GachaResult<usize> {
        Ok(self.list(user_id).await?.len())
    }

    async fn modify_owned<F>(
        &self,
        user_id: &str,
        item: &CollectibleItem,
        mut f: F,
    ) -> GachaResult<ItemLevelChange>
    where
        F: FnMut(&mut OwnedItem) -> GachaResult<ItemLevelChange>,
    {
        let key = keys::owned_item(user_id, &item.id);
        update_doc(self.store.as_ref(), &self.retry, &key, |current: Option<OwnedItem>| {
            let mut owned = current
                .ok_or_else(|| GachaError::not_found(EntityKind::OwnedItem, item.id.as_str()))?;
            let change = f(&mut owned)?;
            Ok(Update::write(owned, change))
        })
        .await
    }

    fn catalog_item(&self, item_id: &str) -> GachaResult<CollectibleItem> {
        self.catalog
            .item(item_id)
            .ok_or_else(|| GachaError::not_found(EntityKind::Item, item_id))
    }
}
