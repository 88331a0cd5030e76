//! Pull orchestration against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use lyceum_shared::{
    Catalog, CollectibleItem, DrawHistoryEntry, EntityKind, GachaError, HistoryFilter, RarityTier,
    RateTable, RewardPool, STANDARD_POOL_ID,
};
use lyceumd::config::RetryConfig;
use lyceumd::store::KvStore;
use lyceumd::{Config, GachaService, MemoryStore, PullOrchestrator, PullRequest, RetryPolicy};
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        retry: RetryConfig {
            max_attempts: 10,
            base_ms: 0,
            factor: 1.0,
            jitter_percent: 0.0,
            max_ms: 0,
        },
        ..Default::default()
    }
}

fn service(seed: u64) -> GachaService {
    GachaService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Catalog::standard()),
        &test_config(),
    )
    .unwrap()
    .with_seed(seed)
}

/// Orchestrator without the achievement side effects of the service
fn orchestrator(seed: u64) -> PullOrchestrator {
    let catalog = Arc::new(Catalog::standard());
    PullOrchestrator::new(
        Arc::new(MemoryStore::new()),
        catalog.clone(),
        catalog,
        RetryPolicy::immediate(5),
    )
    .with_seed(seed)
}

fn item(id: &str, tier: RarityTier) -> CollectibleItem {
    let mut base_attributes = BTreeMap::new();
    base_attributes.insert("wisdom".to_string(), 10.0);
    CollectibleItem {
        id: id.to_string(),
        name: id.to_string(),
        tier,
        base_attributes,
    }
}

/// Pool that only ever draws common unless forced
fn commons_only_pool(pity_threshold: u32, multi_count: u32) -> RewardPool {
    RewardPool {
        id: "seminar".to_string(),
        name: "Seminar".to_string(),
        cost: 1,
        rates: RateTable::new(1.0, 0.0, 0.0, 0.0),
        pity_threshold,
        pity_floor: RarityTier::Common,
        multi_count,
        multi_cost: None,
        featured_item_ids: Vec::new(),
    }
}

#[tokio::test]
async fn test_currency_conservation() {
    let orchestrator = orchestrator(1);
    orchestrator.progression().grant_currency("u1", 20).await.unwrap();

    for n in 1..=7u64 {
        let outcome = orchestrator
            .pull(&PullRequest::single("u1", STANDARD_POOL_ID))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.cost, 1);
        assert_eq!(outcome.balance_after, 20 - n);
    }
    assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 13);
}

#[tokio::test]
async fn test_second_pull_without_balance_fails() {
    let service = service(2);
    service.progression().grant_currency("u1", 1).await.unwrap();

    let report = service.pull(&PullRequest::single("u1", STANDARD_POOL_ID)).await.unwrap();
    assert_eq!(report.outcome.balance_after, 0);
    assert_eq!(service.ticket_balance("u1").await.unwrap(), 0);

    let err = service
        .pull(&PullRequest::single("u1", STANDARD_POOL_ID))
        .await
        .unwrap_err();
    match err {
        GachaError::InsufficientCurrency {
            required,
            available,
        } => {
            assert_eq!(required, 1);
            assert_eq!(available, 0);
        }
        other => panic!("expected insufficient currency, got {:?}", other),
    }
    assert_eq!(service.ticket_balance("u1").await.unwrap(), 0);
    let history = service
        .history("u1", 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_unknown_pool() {
    let service = service(3);
    service.progression().grant_currency("u1", 5).await.unwrap();
    let err = service
        .pull(&PullRequest::single("u1", "limited"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GachaError::NotFound {
            kind: EntityKind::Pool,
            ..
        }
    ));
    assert_eq!(service.ticket_balance("u1").await.unwrap(), 5);
}

#[tokio::test]
async fn test_repeat_item_becomes_duplicate() {
    let catalog = Catalog::new(
        vec![commons_only_pool(100, 10)],
        vec![item("thales", RarityTier::Common)],
    );
    let service = GachaService::new(Arc::new(MemoryStore::new()), Arc::new(catalog), &test_config())
        .unwrap();
    service.progression().grant_currency("u1", 3).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let report = service.pull(&PullRequest::single("u1", "seminar")).await.unwrap();
        let result = &report.outcome.results[0];
        assert_eq!(result.is_duplicate, !result.is_new);
        seen.push(result.is_new);
        let owned = service
            .collection_ledger()
            .get("u1", "thales")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owned.duplicate_count as usize, seen.len() - 1);
    }
    assert_eq!(seen, vec![true, false, false]);
    assert_eq!(service.collection("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pity_forces_tenth_draw() {
    // Seed nine commons into the log the service reads from
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(Catalog::standard());
    for seed in 0..20u64 {
        let user = format!("u{}", seed);
        let service = GachaService::new(store.clone(), catalog.clone(), &test_config())
            .unwrap()
            .with_seed(seed);
        let log = lyceumd::HistoryLog::new(store.clone(), RetryPolicy::immediate(3));
        for _ in 0..9 {
            log.append(
                &user,
                &DrawHistoryEntry::new("zeno", STANDARD_POOL_ID, RarityTier::Common),
            )
            .await
            .unwrap();
        }
        let status = service.pity_status(&user, STANDARD_POOL_ID).await.unwrap();
        assert_eq!(status.counter, 9);
        assert_eq!(status.draws_until_guarantee, 1);

        service.progression().grant_currency(&user, 1).await.unwrap();
        let report = service.pull(&PullRequest::single(&user, STANDARD_POOL_ID)).await.unwrap();
        let result = &report.outcome.results[0];
        assert!(result.pity_forced);
        assert!(result.tier >= RarityTier::Rare, "seed {} drew {}", seed, result.tier);

        let status = service.pity_status(&user, STANDARD_POOL_ID).await.unwrap();
        assert_eq!(status.counter, 0);
    }
}

#[tokio::test]
async fn test_no_run_of_ten_below_floor() {
    let service = service(42);
    service.progression().grant_currency("u1", 300).await.unwrap();
    for _ in 0..300 {
        service.pull(&PullRequest::single("u1", STANDARD_POOL_ID)).await.unwrap();
    }

    let history = service
        .history("u1", usize::MAX, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 300);
    let mut run = 0;
    for entry in history.iter().rev() {
        if entry.tier < RarityTier::Rare {
            run += 1;
            assert!(run < 10, "ten consecutive draws below the floor");
        } else {
            run = 0;
        }
    }
}

#[tokio::test]
async fn test_multi_pull_floor_and_cost() {
    for seed in 0..10 {
        let orchestrator = orchestrator(seed);
        orchestrator.progression().grant_currency("u1", 9).await.unwrap();

        let outcome = orchestrator
            .pull(&PullRequest::multi("u1", STANDARD_POOL_ID))
            .await
            .unwrap();
        assert_eq!(outcome.cost, 9);
        assert_eq!(outcome.balance_after, 0);
        assert!(outcome.incomplete.is_none());
        assert_eq!(outcome.results.len(), 10);
        assert!(outcome.results.iter().any(|r| r.tier >= RarityTier::Rare));
        let last = outcome.results.last().unwrap();
        assert!(last.pity_forced);
        assert!(last.tier >= RarityTier::Rare);

        let history = orchestrator
            .history()
            .recent("u1", STANDARD_POOL_ID, 20)
            .await
            .unwrap();
        assert_eq!(history.len(), 10);
        assert!(history.iter().all(|e| e.batch_id.is_some()));
        assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_multi_pull_needs_full_bundle_price() {
    let service = service(5);
    service.progression().grant_currency("u1", 8).await.unwrap();
    let err = service
        .pull(&PullRequest::multi("u1", STANDARD_POOL_ID))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GachaError::InsufficientCurrency { required: 9, available: 8 }
    ));
    assert_eq!(service.ticket_balance("u1").await.unwrap(), 8);
    assert!(service.collection("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_pull_with_empty_tier_changes_nothing() {
    // Threshold 1 forces every draw to rare, which has no items
    let mut pool = commons_only_pool(1, 10);
    pool.rates = RateTable::new(0.5, 0.5, 0.0, 0.0);
    pool.pity_floor = RarityTier::Rare;
    let catalog = Arc::new(Catalog::new(vec![pool], vec![item("thales", RarityTier::Common)]));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = PullOrchestrator::new(
        store.clone(),
        catalog.clone(),
        catalog,
        RetryPolicy::immediate(3),
    );
    orchestrator.progression().grant_currency("u1", 2).await.unwrap();

    let err = orchestrator
        .pull(&PullRequest::single("u1", "seminar"))
        .await
        .unwrap_err();
    assert!(matches!(err, GachaError::Configuration(_)));
    assert_eq!(err.code(), 5001);
    assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 2);
    assert!(orchestrator.history().recent("u1", "seminar", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_batch_then_resume() {
    // Commons-only rates: the forced last draw resolves to rare, which is empty
    let mut pool = commons_only_pool(100, 3);
    pool.pity_floor = RarityTier::Rare;
    let broken = Arc::new(Catalog::new(
        vec![pool.clone()],
        vec![item("thales", RarityTier::Common)],
    ));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = PullOrchestrator::new(
        store.clone(),
        broken.clone(),
        broken,
        RetryPolicy::immediate(3),
    );
    orchestrator.progression().grant_currency("u1", 2).await.unwrap();

    let outcome = orchestrator
        .pull(&PullRequest::multi("u1", "seminar"))
        .await
        .unwrap();
    assert_eq!(outcome.cost, 2);
    assert_eq!(outcome.balance_after, 0);
    assert_eq!(outcome.results.len(), 2);
    let incomplete = outcome.incomplete.expect("batch should be incomplete");
    assert_eq!(incomplete.completed, 2);
    assert_eq!(incomplete.remaining, 1);
    assert_eq!(incomplete.code, 5001);

    // Earlier draws stay recorded
    assert_eq!(orchestrator.history().recent("u1", "seminar", 10).await.unwrap().len(), 2);

    let fixed = Arc::new(Catalog::new(
        vec![pool],
        vec![item("thales", RarityTier::Common), item("plato", RarityTier::Rare)],
    ));
    let orchestrator = PullOrchestrator::new(store.clone(), fixed.clone(), fixed, RetryPolicy::immediate(3));
    let resumed = orchestrator.resume_pending("u1").await.unwrap();
    assert_eq!(resumed.len(), 1);
    let outcome = &resumed[0];
    assert!(outcome.replayed);
    assert!(outcome.incomplete.is_none());
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.results[2].item.id, "plato");
    assert!(outcome.results[2].pity_forced);
    assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 0);

    assert!(orchestrator.resume_pending("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_submission_replay() {
    let service = service(7);
    service.progression().grant_currency("u1", 5).await.unwrap();
    let request = PullRequest::single("u1", STANDARD_POOL_ID).with_submission(Uuid::new_v4());

    let first = service.pull(&request).await.unwrap().outcome;
    let second = service.pull(&request).await.unwrap().outcome;
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.results, second.results);
    assert_eq!(service.ticket_balance("u1").await.unwrap(), 4);
    let history = service
        .history("u1", 10, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_multi_submission_replay() {
    let orchestrator = orchestrator(8);
    orchestrator.progression().grant_currency("u1", 18).await.unwrap();
    let request = PullRequest::multi("u1", STANDARD_POOL_ID).with_submission(Uuid::new_v4());

    let first = orchestrator.pull(&request).await.unwrap();
    let second = orchestrator.pull(&request).await.unwrap();
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.results, second.results);
    assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 9);
}

#[tokio::test]
async fn test_multi_replay_finishes_in_charged_pool() {
    let mut seminar = commons_only_pool(100, 3);
    seminar.pity_floor = RarityTier::Rare;
    let mut lecture = commons_only_pool(100, 3);
    lecture.id = "lecture".to_string();

    let broken = Arc::new(Catalog::new(
        vec![seminar.clone(), lecture.clone()],
        vec![item("thales", RarityTier::Common)],
    ));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = PullOrchestrator::new(
        store.clone(),
        broken.clone(),
        broken,
        RetryPolicy::immediate(3),
    );
    orchestrator.progression().grant_currency("u1", 2).await.unwrap();
    let submission = Uuid::new_v4();
    let first = orchestrator
        .pull(&PullRequest::multi("u1", "seminar").with_submission(submission))
        .await
        .unwrap();
    assert_eq!(first.incomplete.unwrap().remaining, 1);

    let fixed = Arc::new(Catalog::new(
        vec![seminar, lecture],
        vec![item("thales", RarityTier::Common), item("plato", RarityTier::Rare)],
    ));
    let orchestrator = PullOrchestrator::new(store, fixed.clone(), fixed, RetryPolicy::immediate(3));

    // Same submission, different pool id
    let replay = orchestrator
        .pull(&PullRequest::multi("u1", "lecture").with_submission(submission))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.pool_id, "seminar");
    assert_eq!(replay.results.len(), 3);
    assert_eq!(replay.results[2].item.id, "plato");
    assert_eq!(replay.results[2].tier, RarityTier::Rare);
    assert_eq!(orchestrator.progression().balance("u1").await.unwrap(), 0);
    assert_eq!(orchestrator.history().recent("u1", "seminar", 10).await.unwrap().len(), 3);
    assert!(orchestrator.history().recent("u1", "lecture", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pool_draw_counter() {
    let store = Arc::new(MemoryStore::new());
    let service = GachaService::new(store.clone(), Arc::new(Catalog::standard()), &test_config())
        .unwrap()
        .with_seed(9);
    service.progression().grant_currency("u1", 10).await.unwrap();
    service.pull(&PullRequest::single("u1", STANDARD_POOL_ID)).await.unwrap();
    service.pull(&PullRequest::multi("u1", STANDARD_POOL_ID)).await.unwrap();

    let counter = store
        .get(&lyceumd::store::keys::pool_draw_counter(STANDARD_POOL_ID))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.value, serde_json::json!(11));
}

#[tokio::test]
async fn test_first_pull_unlocks_collection_achievement() {
    let service = service(10);
    service.progression().grant_currency("u1", 2).await.unwrap();
    let report = service.pull(&PullRequest::single("u1", STANDARD_POOL_ID)).await.unwrap();
    assert_eq!(report.unlocked_achievements, vec!["first_disciple".to_string()]);

    let state = service.progression().state("u1").await.unwrap();
    assert!(state.achievements.contains_key("first_disciple"));
    assert_eq!(state.experience, 25);
}

#[tokio::test]
async fn test_history_filters() {
    let service = service(11);
    service.progression().grant_currency("u1", 30).await.unwrap();
    for _ in 0..30 {
        service.pull(&PullRequest::single("u1", STANDARD_POOL_ID)).await.unwrap();
    }

    let rare_plus = service
        .history("u1", 100, &HistoryFilter::default().min_tier(RarityTier::Rare))
        .await
        .unwrap();
    assert!(!rare_plus.is_empty());
    assert!(rare_plus.iter().all(|e| e.tier >= RarityTier::Rare));

    let latest = service
        .history("u1", 5, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(latest.len(), 5);
    assert!(latest.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}
