//! Lyceum gacha and progression services.
//!
//! Async services over a versioned key-value store: draw history, the owned
//! collection, the progression ledger, pull orchestration and the progression
//! outbox. Pure domain logic lives in `lyceum-shared`.

pub mod collection_ledger;
pub mod config;
pub mod history_log;
pub mod outbox;
pub mod progression_ledger;
pub mod pull;
pub mod retry;
pub mod service;
pub mod store;

pub use collection_ledger::{CollectionLedger, DrawApplied};
pub use config::Config;
pub use history_log::HistoryLog;
pub use outbox::{EnqueueOutcome, FlushReport, ProgressionOutbox};
pub use progression_ledger::{
    AchievementOutcome, ExperienceOutcome, LessonOutcome, LevelUpReward, ProgressionLedger,
    StreakOutcome,
};
pub use pull::{
    IncompleteBatch, PendingBatch, PullKind, PullOrchestrator, PullOutcome, PullRequest,
    PullResult,
};
pub use retry::RetryPolicy;
pub use service::{GachaService, PullReport};
pub use store::{KvStore, MemoryStore};
