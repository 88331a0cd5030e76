//! Append-only draw history per user and pool.
//!
//! Each pool has a head document holding the last sequence number. Appending
//! writes the entry at `seq + 1` and advances the head in one commit, guarded
//! by the head version, so concurrent appends serialize and the pity counter
//! is always computed against a stable log.

use lyceum_shared::{
    pity_counter, DrawHistoryEntry, GachaError, GachaResult, HistoryFilter, PityStatus,
    RewardPool,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::retry::RetryPolicy;
use crate::store::{keys, load_doc, CommitOutcome, KvStore, Precondition, ScanOrder, WriteOp};

/// Last sequence number written for a user's pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryHead {
    pub seq: u64,
}

/// Head document as read, with its version
#[derive(Debug, Clone, Copy)]
pub struct HeadSnapshot {
    pub head: HistoryHead,
    pub version: Option<u64>,
}

pub struct HistoryLog {
    store: Arc<dyn KvStore>,
    retry: RetryPolicy,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn KvStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn head(&self, user_id: &str, pool_id: &str) -> GachaResult<HeadSnapshot> {
        let key = keys::history_head(user_id, pool_id);
        Ok(match load_doc::<HistoryHead>(self.store.as_ref(), &key).await? {
            Some((head, version)) => HeadSnapshot {
                head,
                version: Some(version),
            },
            None => HeadSnapshot {
                head: HistoryHead::default(),
                version: None,
            },
        })
    }

    /// Writes that append `entry` after `snapshot`; returns them with the new sequence
    pub fn stage_append(
        user_id: &str,
        snapshot: HeadSnapshot,
        entry: &DrawHistoryEntry,
    ) -> GachaResult<(Vec<WriteOp>, u64)> {
        let next = HistoryHead {
            seq: snapshot.head.seq + 1,
        };
        let ops = vec![
            WriteOp::create(keys::history_entry(user_id, &entry.pool_id, next.seq), entry)?,
            WriteOp::new(
                keys::history_head(user_id, &entry.pool_id),
                &next,
                Precondition::observed(snapshot.version),
            )?,
        ];
        Ok((ops, next.seq))
    }

    /// Append a single entry on its own
    pub async fn append(&self, user_id: &str, entry: &DrawHistoryEntry) -> GachaResult<u64> {
        let mut retry = self.retry.start();
        loop {
            let snapshot = self.head(user_id, &entry.pool_id).await?;
            let (ops, seq) = Self::stage_append(user_id, snapshot, entry)?;
            match self.store.commit(ops).await? {
                CommitOutcome::Committed => return Ok(seq),
                CommitOutcome::Conflict { key } => retry.backoff(&key).await?,
            }
        }
    }

    /// Most recent entries for one pool, newest first
    pub async fn recent(
        &self,
        user_id: &str,
        pool_id: &str,
        limit: usize,
    ) -> GachaResult<Vec<DrawHistoryEntry>> {
        let prefix = keys::history_prefix(user_id, pool_id);
        self.store
            .scan_prefix(&prefix, limit, ScanOrder::Descending)
            .await?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc.value).map_err(GachaError::from))
            .collect()
    }

    /// Consecutive below-floor draws, reading at most `pity_threshold` entries
    pub async fn compute_pity_counter(&self, user_id: &str, pool: &RewardPool) -> GachaResult<u32> {
        let window = pool.pity_threshold;
        let recent = self.recent(user_id, &pool.id, window as usize).await?;
        Ok(pity_counter(&recent, pool.pity_floor, window))
    }

    pub async fn pity_status(&self, user_id: &str, pool: &RewardPool) -> GachaResult<PityStatus> {
        let counter = self.compute_pity_counter(user_id, pool).await?;
        Ok(PityStatus::new(&pool.id, counter, pool.pity_threshold))
    }

    /// Entries across `pool_ids`, newest first, after filtering
    pub async fn history(
        &self,
        user_id: &str,
        pool_ids: &[String],
        limit: usize,
        filter: &HistoryFilter,
    ) -> GachaResult<Vec<DrawHistoryEntry>> {
        // Tier and time filters can reject entries, so the per-pool limit
        // only holds when nothing is filtered out
        let per_pool = if filter.min_tier.is_none() && filter.since.is_none() {
            limit
        } else {
            usize::MAX
        };

        let mut entries = Vec::new();
        for pool_id in pool_ids {
            if filter.pool_id.as_deref().map_or(false, |p| p != pool_id.as_str()) {
                continue;
            }
            entries.extend(
                self.recent(user_id, pool_id, per_pool)
                    .await?
                    .into_iter()
                    .filter(|e| filter.matches(e)),
            );
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }
}
