//! User-facing gacha surface.
//!
//! Wraps the orchestrator and ledgers behind the calls the app makes: pull,
//! balance, history, pity status and collection. Collection-size achievements
//! are checked after each pull that added a new item.

use lyceum_shared::achievements::{newly_met, AchievementContext};
use lyceum_shared::{
    Catalog, ContentCatalog, DrawHistoryEntry, GachaResult, HistoryFilter, OwnedItem, PityStatus,
    PoolCatalog,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::collection_ledger::CollectionLedger;
use crate::config::Config;
use crate::outbox::ProgressionOutbox;
use crate::progression_ledger::ProgressionLedger;
use crate::pull::{PullOrchestrator, PullOutcome, PullRequest};
use crate::store::KvStore;

/// A pull and the achievements it unlocked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullReport {
    pub outcome: PullOutcome,
    pub unlocked_achievements: Vec<String>,
}

pub struct GachaService {
    catalog: Arc<Catalog>,
    orchestrator: PullOrchestrator,
    outbox: Arc<ProgressionOutbox>,
    flush_interval: Duration,
}

impl GachaService {
    /// Build the service; fails if the catalog is inconsistent
    pub fn new(store: Arc<dyn KvStore>, catalog: Arc<Catalog>, config: &Config) -> GachaResult<Self> {
        catalog.validate()?;
        let pools: Arc<dyn PoolCatalog> = catalog.clone();
        let content: Arc<dyn ContentCatalog> = catalog.clone();
        let orchestrator = PullOrchestrator::new(store, pools, content, config.retry.policy());
        let outbox = Arc::new(ProgressionOutbox::new(
            orchestrator.progression().clone(),
            config.outbox.capacity,
        ));
        Ok(Self {
            catalog,
            orchestrator,
            outbox,
            flush_interval: Duration::from_secs(config.outbox.flush_interval_secs.max(1)),
        })
    }

    /// Use a deterministic random source for draws
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.orchestrator = self.orchestrator.with_seed(seed);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn progression(&self) -> &ProgressionLedger {
        self.orchestrator.progression()
    }

    pub fn collection_ledger(&self) -> &CollectionLedger {
        self.orchestrator.collection()
    }

    pub fn outbox(&self) -> &Arc<ProgressionOutbox> {
        &self.outbox
    }

    /// Start the periodic outbox flush
    pub fn start_outbox(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.outbox.clone().spawn_flusher(self.flush_interval, shutdown)
    }

    pub async fn pull(&self, request: &PullRequest) -> GachaResult<PullReport> {
        let outcome = self.orchestrator.pull(request).await?;
        let unlocked_achievements = if outcome.results.iter().any(|r| r.is_new) {
            self.check_collection_achievements(&request.user_id).await
        } else {
            Vec::new()
        };
        Ok(PullReport {
            outcome,
            unlocked_achievements,
        })
    }

    pub async fn resume_pending(&self, user_id: &str) -> GachaResult<Vec<PullOutcome>> {
        self.orchestrator.resume_pending(user_id).await
    }

    pub async fn ticket_balance(&self, user_id: &str) -> GachaResult<u64> {
        self.progression().balance(user_id).await
    }

    /// Draws across every pool, newest first
    pub async fn history(
        &self,
        user_id: &str,
        limit: usize,
        filter: &HistoryFilter,
    ) -> GachaResult<Vec<DrawHistoryEntry>> {
        self.orchestrator
            .history()
            .history(user_id, &self.catalog.pool_ids(), limit, filter)
            .await
    }

    pub async fn pity_status(&self, user_id: &str, pool_id: &str) -> GachaResult<PityStatus> {
        let pool = self.catalog.get_pool(pool_id)?;
        self.orchestrator.history().pity_status(user_id, &pool).await
    }

    pub async fn collection(&self, user_id: &str) -> GachaResult<Vec<OwnedItem>> {
        self.collection_ledger().list(user_id).await
    }

    /// Unlock collection-size achievements; failures never fail the pull
    async fn check_collection_achievements(&self, user_id: &str) -> Vec<String> {
        let (size, state) = match (
            self.collection_ledger().count(user_id).await,
            self.progression().state(user_id).await,
        ) {
            (Ok(size), Ok(state)) => (size, state),
            (Err(e), _) | (_, Err(e)) => {
                warn!(user = user_id, error = %e, "skipping achievement check");
                return Vec::new();
            }
        };

        let ctx = AchievementContext::collection(u32::try_from(size).unwrap_or(u32::MAX));
        let mut unlocked = Vec::new();
        for def in newly_met(&ctx, |id| state.achievements.contains_key(id)) {
            match self.progression().check_achievement(user_id, def.id, &ctx).await {
                Ok(outcome) if outcome.unlocked => unlocked.push(outcome.achievement_id),
                Ok(_) => {}
                Err(e) => warn!(user = user_id, achievement = def.id, error = %e, "achievement check failed"),
            }
        }
        unlocked
    }
}
