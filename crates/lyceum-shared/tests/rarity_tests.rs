//! Statistical tests for the tier draw.

use lyceum_shared::rarity::{resolve, resolve_with_roll, RarityTier, RateTable};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

const SAMPLES: usize = 200_000;

fn standard() -> RateTable {
    RateTable::new(0.60, 0.30, 0.08, 0.02)
}

fn histogram(rates: &RateTable, floor: Option<RarityTier>, seed: u64) -> HashMap<RarityTier, usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts = HashMap::new();
    for _ in 0..SAMPLES {
        *counts.entry(resolve(rates, floor, &mut rng)).or_insert(0) += 1;
    }
    counts
}

#[test]
fn test_normal_draws_converge_to_rates() {
    let rates = standard();
    let counts = histogram(&rates, None, 7);
    for tier in RarityTier::ALL {
        let observed = *counts.get(&tier).unwrap_or(&0) as f64 / SAMPLES as f64;
        let expected = rates.rate(tier);
        assert!(
            (observed - expected).abs() < 0.005,
            "{}: observed {:.4}, expected {:.4}",
            tier,
            observed,
            expected
        );
    }
}

#[test]
fn test_pity_draws_follow_renormalized_rates() {
    let rates = standard();
    let counts = histogram(&rates, Some(RarityTier::Rare), 11);
    assert_eq!(counts.get(&RarityTier::Common), None);

    let rare = counts[&RarityTier::Rare] as f64 / SAMPLES as f64;
    let epic = counts[&RarityTier::Epic] as f64 / SAMPLES as f64;
    let legendary = counts[&RarityTier::Legendary] as f64 / SAMPLES as f64;
    assert!((rare - 0.75).abs() < 0.01, "rare {}", rare);
    assert!((epic - 0.20).abs() < 0.01, "epic {}", epic);
    assert!((legendary - 0.05).abs() < 0.005, "legendary {}", legendary);
}

#[test]
fn test_pity_ignores_raw_roll() {
    // A roll that would be common in a normal draw
    let rates = standard();
    assert_eq!(resolve_with_roll(&rates, None, 0.95), RarityTier::Common);
    assert!(resolve_with_roll(&rates, Some(RarityTier::Rare), 0.95) >= RarityTier::Rare);
    assert!(resolve_with_roll(&rates, Some(RarityTier::Rare), 0.999_999) >= RarityTier::Rare);
}

#[test]
fn test_higher_floor() {
    let rates = standard();
    let counts = histogram(&rates, Some(RarityTier::Epic), 3);
    assert_eq!(counts.get(&RarityTier::Common), None);
    assert_eq!(counts.get(&RarityTier::Rare), None);
    let legendary = counts[&RarityTier::Legendary] as f64 / SAMPLES as f64;
    assert!((legendary - 0.2).abs() < 0.01);
}
