//! User progression: experience, levels, currency and feature unlocks.
//!
//! ## Level curve
//!
//! `level = floor(sqrt(experience / 100)) + 1`
//!
//! - Level 1: 0 XP
//! - Level 2: 100 XP
//! - Level 3: 400 XP
//! - Level 10: 8,100 XP
//!
//! Level is persisted for queries but always recomputed from experience on
//! write; a stored level is never trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

/// Bonus currency per level gained
pub const CURRENCY_PER_LEVEL: u64 = 2;

/// Applied submission ids remembered per user
pub const APPLIED_SUBMISSION_WINDOW: usize = 64;

/// Features unlocked on reaching exactly a level
pub const FEATURE_UNLOCKS: &[(u32, &str)] = &[
    (2, "daily_quiz"),
    (3, "debate_arena"),
    (5, "premium_pool"),
    (8, "philosopher_enhancement"),
    (10, "symposium_council"),
];

/// Integer square root (floor)
fn isqrt(n: u64) -> u64 {
    let mut x = (n as f64).sqrt() as u64;
    while x.checked_mul(x).map_or(true, |sq| sq > n) {
        x -= 1;
    }
    while (x + 1).checked_mul(x + 1).map_or(false, |sq| sq <= n) {
        x += 1;
    }
    x
}

/// Level for a total experience value
pub fn level_for_experience(experience: u64) -> u32 {
    // floor(sqrt(xp / 100)) == floor(isqrt(xp) / 10)
    let level = isqrt(experience) / 10 + 1;
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Total experience at which a level starts
pub fn experience_for_level(level: u32) -> u64 {
    let steps = u64::from(level.saturating_sub(1));
    steps * steps * 100
}

/// Features gated at exactly `level`
pub fn features_at_level(level: u32) -> Vec<String> {
    FEATURE_UNLOCKS
        .iter()
        .filter(|(l, _)| *l == level)
        .map(|(_, f)| f.to_string())
        .collect()
}

/// Persisted per-user progression document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgressionState {
    pub level: u32,
    pub experience: u64,
    pub currency_balance: u64,
    #[serde(default)]
    pub completed_lesson_ids: BTreeSet<String>,
    #[serde(default)]
    pub streak_days: u32,
    #[serde(default)]
    pub best_streak: u32,
    #[serde(default)]
    pub last_streak_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unlocked_features: BTreeSet<String>,
    /// Achievement id to unlock time
    #[serde(default)]
    pub achievements: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub applied_submissions: VecDeque<Uuid>,
}

impl Default for UserProgressionState {
    fn default() -> Self {
        Self {
            level: 1,
            experience: 0,
            currency_balance: 0,
            completed_lesson_ids: BTreeSet::new(),
            streak_days: 0,
            best_streak: 0,
            last_streak_at: None,
            unlocked_features: BTreeSet::new(),
            achievements: BTreeMap::new(),
            applied_submissions: VecDeque::new(),
        }
    }
}

/// Outcome of an experience grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub old_level: u32,
    pub new_level: u32,
    pub bonus_currency: u64,
    pub unlocked_features: Vec<String>,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }

    pub fn levels_gained(&self) -> u32 {
        self.new_level.saturating_sub(self.old_level)
    }
}

impl UserProgressionState {
    /// Recompute the stored level from experience
    pub fn normalize(&mut self) {
        self.level = level_for_experience(self.experience);
    }

    /// Add experience and settle level, bonus currency and unlocks
    pub fn apply_experience(&mut self, amount: u64) -> LevelChange {
        // The stored level may be stale; compare against the derived one
        let old_level = level_for_experience(self.experience).min(self.level.max(1));
        self.experience = self.experience.saturating_add(amount);
        self.normalize();

        let mut change = LevelChange {
            old_level,
            new_level: self.level,
            bonus_currency: 0,
            unlocked_features: Vec::new(),
        };
        if change.leveled_up() {
            change.bonus_currency = CURRENCY_PER_LEVEL * u64::from(change.levels_gained());
            self.currency_balance = self.currency_balance.saturating_add(change.bonus_currency);
            for feature in features_at_level(self.level) {
                if self.unlocked_features.insert(feature.clone()) {
                    change.unlocked_features.push(feature);
                }
            }
        }
        change
    }

    pub fn has_applied(&self, submission_id: &Uuid) -> bool {
        self.applied_submissions.contains(submission_id)
    }

    /// Remember a submission id, dropping the oldest past the window
    pub fn mark_applied(&mut self, submission_id: Uuid) {
        if self.has_applied(&submission_id) {
            return;
        }
        self.applied_submissions.push_back(submission_id);
        while self.applied_submissions.len() > APPLIED_SUBMISSION_WINDOW {
            self.applied_submissions.pop_front();
        }
    }

    /// Progress through the current level (0.0 - 1.0)
    pub fn progress_to_next(&self) -> f64 {
        let start = experience_for_level(self.level);
        let end = experience_for_level(self.level + 1);
        if end <= start {
            return 1.0;
        }
        let progress = self.experience.saturating_sub(start) as f64 / (end - start) as f64;
        progress.clamp(0.0, 1.0)
    }
}
