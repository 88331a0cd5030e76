//! Pull orchestration: balance check, debit, rarity draw, persistence.
//!
//! A single pull is one atomic commit of the debited progression document,
//! the owned item, the history entry and head, and the optional submission
//! record. Any concurrent write to one of those keys fails the commit and the
//! whole pull is recomputed, so two devices can never both spend the same
//! currency.
//!
//! A multi pull debits once together with a pending batch record, then runs
//! each draw as its own commit that also advances the batch. If a draw fails
//! the completed draws stay recorded and the batch can be finished later with
//! `resume_pending` without charging again.

use chrono::{DateTime, Utc};
use lyceum_shared::{
    resolve, CollectibleItem, ContentCatalog, DrawHistoryEntry, EntityKind, GachaError,
    GachaResult, PoolCatalog, RarityTier, RewardPool, UserProgressionState,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collection_ledger::CollectionLedger;
use crate::history_log::HistoryLog;
use crate::progression_ledger::ProgressionLedger;
use crate::retry::RetryPolicy;
use crate::store::{keys, load_doc, CommitOutcome, KvStore, Precondition, ScanOrder, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullKind {
    Single,
    Multi,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub user_id: String,
    pub pool_id: String,
    pub kind: PullKind,
    /// Client-generated id; replays return the stored outcome
    pub submission_id: Option<Uuid>,
}

impl PullRequest {
    pub fn single(user_id: &str, pool_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            pool_id: pool_id.to_string(),
            kind: PullKind::Single,
            submission_id: None,
        }
    }

    pub fn multi(user_id: &str, pool_id: &str) -> Self {
        Self {
            kind: PullKind::Multi,
            ..Self::single(user_id, pool_id)
        }
    }

    pub fn with_submission(mut self, submission_id: Uuid) -> Self {
        self.submission_id = Some(submission_id);
        self
    }
}

/// One resolved draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResult {
    pub item: CollectibleItem,
    pub tier: RarityTier,
    pub is_new: bool,
    pub is_duplicate: bool,
    pub pity_forced: bool,
    pub entry_id: Uuid,
}

/// Draws of a multi pull that did not complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteBatch {
    pub batch_id: Uuid,
    pub completed: u32,
    pub remaining: u32,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub pool_id: String,
    pub kind: PullKind,
    pub cost: u64,
    pub results: Vec<PullResult>,
    pub balance_after: u64,
    /// Set when a multi pull stopped early
    pub incomplete: Option<IncompleteBatch>,
    /// No currency was charged by this call
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Completed,
}

/// Persisted progress of a multi pull
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub id: Uuid,
    pub pool_id: String,
    pub cost: u64,
    pub total: u32,
    pub completed: u32,
    pub status: BatchStatus,
    pub results: Vec<PullResult>,
    pub created_at: DateTime<Utc>,
}

impl PendingBatch {
    fn open(id: Uuid, pool: &RewardPool) -> Self {
        Self {
            id,
            pool_id: pool.id.clone(),
            cost: pool.multi_pull_cost(),
            total: pool.multi_count,
            completed: 0,
            status: BatchStatus::Pending,
            results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn record(&mut self, result: PullResult) {
        self.results.push(result);
        self.completed += 1;
        if self.completed >= self.total {
            self.status = BatchStatus::Completed;
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.completed)
    }
}

/// Stages of a pull request, traced at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    Idle,
    ValidatingBalance,
    Aborted,
    Debiting,
    Drawing,
    Resolving,
    Persisting,
    Done,
}

fn enter(user_id: &str, state: PullState) {
    debug!(user = user_id, state = ?state, "pull state");
}

pub struct PullOrchestrator {
    store: Arc<dyn KvStore>,
    pools: Arc<dyn PoolCatalog>,
    content: Arc<dyn ContentCatalog>,
    history: Arc<HistoryLog>,
    collection: Arc<CollectionLedger>,
    progression: Arc<ProgressionLedger>,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl PullOrchestrator {
    pub fn new(
        store: Arc<dyn KvStore>,
        pools: Arc<dyn PoolCatalog>,
        content: Arc<dyn ContentCatalog>,
        retry: RetryPolicy,
    ) -> Self {
        let history = Arc::new(HistoryLog::new(store.clone(), retry.clone()));
        let collection = Arc::new(CollectionLedger::new(
            store.clone(),
            content.clone(),
            retry.clone(),
        ));
        let progression = Arc::new(ProgressionLedger::new(store.clone(), retry.clone()));
        Self {
            store,
            pools,
            content,
            history,
            collection,
            progression,
            retry,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a deterministic random source
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    pub fn collection(&self) -> &Arc<CollectionLedger> {
        &self.collection
    }

    pub fn progression(&self) -> &Arc<ProgressionLedger> {
        &self.progression
    }

    pub async fn pull(&self, request: &PullRequest) -> GachaResult<PullOutcome> {
        enter(&request.user_id, PullState::Idle);
        let pool = self.pools.get_pool(&request.pool_id)?;
        match request.kind {
            PullKind::Single => self.single(request, &pool).await,
            PullKind::Multi => self.multi(request, &pool).await,
        }
    }

    /// Finish every multi pull left pending for `user_id`
    pub async fn resume_pending(&self, user_id: &str) -> GachaResult<Vec<PullOutcome>> {
        let batches = self
            .store
            .scan_prefix(&keys::batch_prefix(user_id), usize::MAX, ScanOrder::Ascending)
            .await?;

        let mut outcomes = Vec::new();
        for (_, doc) in batches {
            let batch: PendingBatch = serde_json::from_value(doc.value)?;
            if batch.is_completed() {
                continue;
            }
            info!(user = user_id, batch = %batch.id, remaining = batch.remaining(), "resuming pending batch");
            let pool = self.pools.get_pool(&batch.pool_id)?;
            let balance = self.progression.balance(user_id).await?;
            outcomes.push(self.finish_batch(user_id, &pool, batch.id, balance, true).await?);
        }
        Ok(outcomes)
    }

    async fn single(&self, request: &PullRequest, pool: &RewardPool) -> GachaResult<PullOutcome> {
        let user_id = request.user_id.as_str();
        let submission_key = request
            .submission_id
            .map(|id| keys::submission(user_id, &id));
        let mut retry = self.retry.start();

        loop {
            if let Some(key) = &submission_key {
                if let Some((mut stored, _)) =
                    load_doc::<PullOutcome>(self.store.as_ref(), key).await?
                {
                    debug!(user = user_id, submission = %key, "replaying stored pull");
                    stored.replayed = true;
                    return Ok(stored);
                }
            }

            let (debit_op, balance_after) = self.stage_debit(user_id, pool.cost).await?;
            let (result, draw_ops) = self.stage_draw(user_id, pool, false, None).await?;

            let outcome = PullOutcome {
                pool_id: pool.id.clone(),
                kind: PullKind::Single,
                cost: pool.cost,
                results: vec![result],
                balance_after,
                incomplete: None,
                replayed: false,
            };

            let mut ops = vec![debit_op];
            ops.extend(draw_ops);
            if let Some(key) = &submission_key {
                ops.push(WriteOp::create(key.as_str(), &outcome)?);
            }

            enter(user_id, PullState::Persisting);
            match self.store.commit(ops).await? {
                CommitOutcome::Committed => {
                    enter(user_id, PullState::Done);
                    self.count_draws(&pool.id, 1).await;
                    info!(
                        user = user_id,
                        pool = %pool.id,
                        tier = %outcome.results[0].tier,
                        balance = balance_after,
                        "single pull"
                    );
                    return Ok(outcome);
                }
                CommitOutcome::Conflict { key } => retry.backoff(&key).await?,
            }
        }
    }

    async fn multi(&self, request: &PullRequest, pool: &RewardPool) -> GachaResult<PullOutcome> {
        let user_id = request.user_id.as_str();
        let batch_id = request.submission_id.unwrap_or_else(Uuid::new_v4);
        let batch_key = keys::batch(user_id, &batch_id);
        let cost = pool.multi_pull_cost();
        let mut retry = self.retry.start();

        loop {
            if let Some((existing, _)) =
                load_doc::<PendingBatch>(self.store.as_ref(), &batch_key).await?
            {
                debug!(user = user_id, batch = %batch_id, completed = existing.completed, "batch already opened");
                // Finish against the pool the batch was charged for
                let opened = if existing.pool_id == pool.id {
                    pool.clone()
                } else {
                    self.pools.get_pool(&existing.pool_id)?
                };
                let balance = self.progression.balance(user_id).await?;
                return self
                    .finish_batch(user_id, &opened, batch_id, balance, true)
                    .await;
            }

            let (debit_op, balance_after) = self.stage_debit(user_id, cost).await?;
            let batch = PendingBatch::open(batch_id, pool);
            let ops = vec![debit_op, WriteOp::create(batch_key.as_str(), &batch)?];

            match self.store.commit(ops).await? {
                CommitOutcome::Committed => {
                    info!(user = user_id, pool = %pool.id, batch = %batch_id, cost, "multi pull charged");
                    return self
                        .finish_batch(user_id, pool, batch_id, balance_after, false)
                        .await;
                }
                CommitOutcome::Conflict { key } => retry.backoff(&key).await?,
            }
        }
    }

    /// Run the remaining draws of a batch and report what was recorded
    async fn finish_batch(
        &self,
        user_id: &str,
        pool: &RewardPool,
        batch_id: Uuid,
        balance_after: u64,
        replayed: bool,
    ) -> GachaResult<PullOutcome> {
        let (batch, incomplete) = match self.run_batch(user_id, pool, batch_id).await {
            Ok(batch) => (batch, None),
            Err(err) => {
                let batch = self.load_batch(user_id, batch_id).await?;
                warn!(
                    user = user_id,
                    batch = %batch_id,
                    completed = batch.completed,
                    remaining = batch.remaining(),
                    error = %err,
                    "multi pull stopped early"
                );
                let incomplete = IncompleteBatch {
                    batch_id,
                    completed: batch.completed,
                    remaining: batch.remaining(),
                    code: err.code(),
                    message: err.user_message(),
                };
                (batch, Some(incomplete))
            }
        };

        Ok(PullOutcome {
            pool_id: pool.id.clone(),
            kind: PullKind::Multi,
            cost: batch.cost,
            results: batch.results,
            balance_after,
            incomplete,
            replayed,
        })
    }

    async fn run_batch(
        &self,
        user_id: &str,
        pool: &RewardPool,
        batch_id: Uuid,
    ) -> GachaResult<PendingBatch> {
        let batch_key = keys::batch(user_id, &batch_id);
        let mut retry = self.retry.start();

        loop {
            let (mut batch, version) = load_doc::<PendingBatch>(self.store.as_ref(), &batch_key)
                .await?
                .ok_or_else(|| GachaError::not_found(EntityKind::Batch, batch_id.to_string()))?;
            if batch.is_completed() {
                return Ok(batch);
            }

            // The last draw of every batch is guaranteed the pity floor
            let last = batch.completed + 1 >= batch.total;
            let (result, mut ops) = self.stage_draw(user_id, pool, last, Some(batch_id)).await?;
            batch.record(result);
            ops.push(WriteOp::new(
                batch_key.as_str(),
                &batch,
                Precondition::Version(version),
            )?);

            enter(user_id, PullState::Persisting);
            match self.store.commit(ops).await? {
                CommitOutcome::Committed => {
                    self.count_draws(&pool.id, 1).await;
                    retry = self.retry.start();
                    if batch.is_completed() {
                        enter(user_id, PullState::Done);
                        return Ok(batch);
                    }
                }
                CommitOutcome::Conflict { key } => retry.backoff(&key).await?,
            }
        }
    }

    async fn load_batch(&self, user_id: &str, batch_id: Uuid) -> GachaResult<PendingBatch> {
        load_doc::<PendingBatch>(self.store.as_ref(), &keys::batch(user_id, &batch_id))
            .await?
            .map(|(batch, _)| batch)
            .ok_or_else(|| GachaError::not_found(EntityKind::Batch, batch_id.to_string()))
    }

    /// Debit write guarded by the version read; fails before any write if short
    async fn stage_debit(&self, user_id: &str, cost: u64) -> GachaResult<(WriteOp, u64)> {
        enter(user_id, PullState::ValidatingBalance);
        let (mut state, version) = match self.progression.load(user_id).await? {
            Some((state, version)) => (state, Some(version)),
            None => (UserProgressionState::default(), None),
        };
        if state.currency_balance < cost {
            enter(user_id, PullState::Aborted);
            debug!(user = user_id, required = cost, available = state.currency_balance, "balance too low");
            return Err(GachaError::InsufficientCurrency {
                required: cost,
                available: state.currency_balance,
            });
        }

        enter(user_id, PullState::Debiting);
        state.currency_balance -= cost;
        state.normalize();
        let op = WriteOp::new(
            keys::progression(user_id),
            &state,
            Precondition::observed(version),
        )?;
        Ok((op, state.currency_balance))
    }

    /// Resolve one draw and stage its collection and history writes
    async fn stage_draw(
        &self,
        user_id: &str,
        pool: &RewardPool,
        force_floor: bool,
        batch_id: Option<Uuid>,
    ) -> GachaResult<(PullResult, Vec<WriteOp>)> {
        enter(user_id, PullState::Drawing);
        // Head first so an append racing the pity read fails the commit
        let head = self.history.head(user_id, &pool.id).await?;
        let counter = self.history.compute_pity_counter(user_id, pool).await?;
        let pity_forced = force_floor || pool.pity_due(counter);
        let floor = pity_forced.then_some(pool.pity_floor);

        let tier = resolve(&pool.rates, floor, &mut *self.rng());

        enter(user_id, PullState::Resolving);
        let candidates = self.content.items_by_tier(tier);
        if candidates.is_empty() {
            error!(user = user_id, pool = %pool.id, tier = %tier, "no catalog items for resolved tier");
            return Err(GachaError::Configuration(format!(
                "pool {} resolved {} but the catalog has no {} items",
                pool.id, tier, tier
            )));
        }
        let pick = self.rng().gen_range(0..candidates.len());
        let item = candidates[pick].clone();

        let now = Utc::now();
        let current = self.collection.load(user_id, &item.id).await?;
        let (owned_op, applied) = CollectionLedger::stage_draw(user_id, &item, current, now)?;

        let mut entry = DrawHistoryEntry::new(&item.id, &pool.id, tier)
            .forced(pity_forced)
            .at(now);
        if let Some(batch_id) = batch_id {
            entry = entry.in_batch(batch_id);
        }
        let (history_ops, seq) = HistoryLog::stage_append(user_id, head, &entry)?;
        debug!(user = user_id, pool = %pool.id, tier = %tier, counter, pity_forced, seq, "draw resolved");

        let mut ops = vec![owned_op];
        ops.extend(history_ops);
        let result = PullResult {
            item,
            tier,
            is_new: applied.is_new,
            is_duplicate: !applied.is_new,
            pity_forced,
            entry_id: entry.id,
        };
        Ok((result, ops))
    }

    async fn count_draws(&self, pool_id: &str, n: i64) {
        if let Err(e) = self.store.increment(&keys::pool_draw_counter(pool_id), n).await {
            warn!(pool = pool_id, error = %e, "failed to bump pool draw counter");
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }
}
