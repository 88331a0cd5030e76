//! Transactional experience, currency, achievement and streak ledger.
//!
//! All per-user progression lives in one document. Every mutation goes through
//! `update_doc`, so two devices racing on the same user re-read and recompute
//! instead of overwriting each other. Every experience source funnels through
//! `settle`, which keeps `level` derived from experience and writes a reward
//! record in the same commit whenever a level is gained.

use chrono::{DateTime, Utc};
use lyceum_shared::achievements::{find_achievement, format_unlock, AchievementContext};
use lyceum_shared::{
    advance_streak, EntityKind, GachaError, GachaResult, StreakChange, UserProgressionState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::retry::RetryPolicy;
use crate::store::{keys, load_doc, update_doc, KvStore, ScanOrder, Update, WriteOp};

/// Record written for every level-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpReward {
    pub id: Uuid,
    pub old_level: u32,
    pub new_level: u32,
    pub levels_gained: u32,
    pub bonus_currency: u64,
    pub unlocked_features: Vec<String>,
    /// What granted the experience, e.g. `lesson:intro-ethics`
    pub source: String,
    pub granted_at: DateTime<Utc>,
}

/// Result of an experience grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceOutcome {
    pub new_level: u32,
    pub leveled_up: bool,
    pub experience: u64,
    pub reward: Option<LevelUpReward>,
}

impl ExperienceOutcome {
    fn unchanged(state: &UserProgressionState) -> Self {
        Self {
            new_level: state.level,
            leveled_up: false,
            experience: state.experience,
            reward: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementOutcome {
    pub achievement_id: String,
    pub was_already_unlocked: bool,
    /// Criterion met and unlock recorded by this call
    pub unlocked: bool,
    pub currency_granted: u64,
    pub experience: Option<ExperienceOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakOutcome {
    pub change: StreakChange,
    pub streak_days: u32,
    pub best_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonOutcome {
    pub already_completed: bool,
    pub experience: Option<ExperienceOutcome>,
}

/// Result of merging queued experience grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionMerge {
    pub applied: usize,
    pub skipped: usize,
    pub experience: ExperienceOutcome,
}

/// Apply experience to `state` and stage the reward record for a level-up
fn settle(
    user_id: &str,
    state: &mut UserProgressionState,
    amount: u64,
    source: &str,
) -> GachaResult<(ExperienceOutcome, Vec<WriteOp>)> {
    let change = state.apply_experience(amount);
    let mut extra = Vec::new();
    let reward = if change.leveled_up() {
        let reward = LevelUpReward {
            id: Uuid::new_v4(),
            old_level: change.old_level,
            new_level: change.new_level,
            levels_gained: change.levels_gained(),
            bonus_currency: change.bonus_currency,
            unlocked_features: change.unlocked_features.clone(),
            source: source.to_string(),
            granted_at: Utc::now(),
        };
        extra.push(WriteOp::create(keys::reward(user_id, &reward.id), &reward)?);
        Some(reward)
    } else {
        None
    };
    let outcome = ExperienceOutcome {
        new_level: state.level,
        leveled_up: change.leveled_up(),
        experience: state.experience,
        reward,
    };
    Ok((outcome, extra))
}

fn log_level_up(user_id: &str, outcome: &ExperienceOutcome) {
    if let Some(reward) = &outcome.reward {
        info!(
            user = user_id,
            level = reward.new_level,
            bonus = reward.bonus_currency,
            source = %reward.source,
            "level up"
        );
        for feature in &reward.unlocked_features {
            info!(user = user_id, feature = %feature, "feature unlocked");
        }
    }
}

pub struct ProgressionLedger {
    store: Arc<dyn KvStore>,
    retry: RetryPolicy,
}

impl ProgressionLedger {
    pub fn new(store: Arc<dyn KvStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Stored document and version, if the user has one
    pub async fn load(&self, user_id: &str) -> GachaResult<Option<(UserProgressionState, u64)>> {
        load_doc(self.store.as_ref(), &keys::progression(user_id)).await
    }

    /// Current state with the level recomputed from experience
    pub async fn state(&self, user_id: &str) -> GachaResult<UserProgressionState> {
        let mut state = self
            .load(user_id)
            .await?
            .map(|(state, _)| state)
            .unwrap_or_default();
        state.normalize();
        Ok(state)
    }

    pub async fn balance(&self, user_id: &str) -> GachaResult<u64> {
        Ok(self.state(user_id).await?.currency_balance)
    }

    /// Add experience and settle level, bonus currency and unlocks
    pub async fn add_experience(&self, user_id: &str, amount: u64) -> GachaResult<ExperienceOutcome> {
        let outcome = self
            .update(user_id, |mut state| {
                let (outcome, extra) = settle(user_id, &mut state, amount, "experience")?;
                Ok(Update::Write {
                    doc: state,
                    result: outcome,
                    extra,
                })
            })
            .await?;
        log_level_up(user_id, &outcome);
        Ok(outcome)
    }

    /// Credit currency; returns the new balance
    pub async fn grant_currency(&self, user_id: &str, amount: u64) -> GachaResult<u64> {
        let balance = self
            .update(user_id, |mut state| {
                state.normalize();
                state.currency_balance = state.currency_balance.saturating_add(amount);
                let balance = state.currency_balance;
                Ok(Update::write(state, balance))
            })
            .await?;
        debug!(user = user_id, amount, balance, "currency granted");
        Ok(balance)
    }

    /// Evaluate and record an achievement, granting its reward once
    pub async fn check_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
        ctx: &AchievementContext,
    ) -> GachaResult<AchievementOutcome> {
        let def = find_achievement(achievement_id)
            .ok_or_else(|| GachaError::not_found(EntityKind::Achievement, achievement_id))?;
        let source = format!("achievement:{}", def.id);

        let outcome = self
            .update(user_id, |mut state| {
                let mut outcome = AchievementOutcome {
                    achievement_id: def.id.to_string(),
                    was_already_unlocked: state.achievements.contains_key(def.id),
                    unlocked: false,
                    currency_granted: 0,
                    experience: None,
                };
                if outcome.was_already_unlocked || !def.criterion.is_met(ctx) {
                    return Ok(Update::Skip(outcome));
                }

                state.achievements.insert(def.id.to_string(), Utc::now());
                state.currency_balance = state.currency_balance.saturating_add(def.reward_currency);
                let (experience, extra) = settle(user_id, &mut state, def.reward_xp, &source)?;
                outcome.unlocked = true;
                outcome.currency_granted = def.reward_currency;
                outcome.experience = Some(experience);
                Ok(Update::Write {
                    doc: state,
                    result: outcome,
                    extra,
                })
            })
            .await?;

        if outcome.unlocked {
            info!(user = user_id, achievement = def.id, "{}", format_unlock(def));
            if let Some(experience) = &outcome.experience {
                log_level_up(user_id, experience);
            }
        }
        Ok(outcome)
    }

    /// Record activity for today's streak
    pub async fn update_streak(&self, user_id: &str) -> GachaResult<StreakOutcome> {
        self.update_streak_at(user_id, Utc::now()).await
    }

    pub async fn update_streak_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> GachaResult<StreakOutcome> {
        let outcome = self
            .update(user_id, |mut state| {
                let change = advance_streak(&mut state, now);
                let outcome = StreakOutcome {
                    change,
                    streak_days: state.streak_days,
                    best_streak: state.best_streak,
                };
                if change == StreakChange::Unchanged {
                    return Ok(Update::Skip(outcome));
                }
                state.normalize();
                Ok(Update::write(state, outcome))
            })
            .await?;
        debug!(user = user_id, change = ?outcome.change, days = outcome.streak_days, "streak updated");
        Ok(outcome)
    }

    /// Mark a lesson complete; experience is granted only the first time
    pub async fn complete_lesson(
        &self,
        user_id: &str,
        lesson_id: &str,
        experience: u64,
    ) -> GachaResult<LessonOutcome> {
        let source = format!("lesson:{}", lesson_id);
        let outcome = self
            .update(user_id, |mut state| {
                if !state.completed_lesson_ids.insert(lesson_id.to_string()) {
                    return Ok(Update::Skip(LessonOutcome {
                        already_completed: true,
                        experience: None,
                    }));
                }
                let (gained, extra) = settle(user_id, &mut state, experience, &source)?;
                Ok(Update::Write {
                    doc: state,
                    result: LessonOutcome {
                        already_completed: false,
                        experience: Some(gained),
                    },
                    extra,
                })
            })
            .await?;
        if let Some(gained) = &outcome.experience {
            log_level_up(user_id, gained);
        }
        Ok(outcome)
    }

    /// Merge queued experience grants, skipping submissions already applied
    pub async fn apply_submissions(
        &self,
        user_id: &str,
        grants: &[(Uuid, u64)],
    ) -> GachaResult<SubmissionMerge> {
        let merge = self
            .update(user_id, |mut state| {
                let mut total = 0u64;
                let mut applied = 0;
                for (submission_id, amount) in grants {
                    if state.has_applied(submission_id) {
                        continue;
                    }
                    state.mark_applied(*submission_id);
                    total = total.saturating_add(*amount);
                    applied += 1;
                }
                let skipped = grants.len() - applied;
                if applied == 0 {
                    return Ok(Update::Skip(SubmissionMerge {
                        applied,
                        skipped,
                        experience: ExperienceOutcome::unchanged(&state),
                    }));
                }
                let (experience, extra) = settle(user_id, &mut state, total, "outbox")?;
                Ok(Update::Write {
                    doc: state,
                    result: SubmissionMerge {
                        applied,
                        skipped,
                        experience,
                    },
                    extra,
                })
            })
            .await?;
        log_level_up(user_id, &merge.experience);
        Ok(merge)
    }

    /// Level-up reward records, oldest first
    pub async fn rewards(&self, user_id: &str) -> GachaResult<Vec<LevelUpReward>> {
        let mut rewards = self
            .store
            .scan_prefix(&keys::reward_prefix(user_id), usize::MAX, ScanOrder::Ascending)
            .await?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc.value).map_err(GachaError::from))
            .collect::<GachaResult<Vec<LevelUpReward>>>()?;
        rewards.sort_by(|a, b| {
            a.granted_at
                .cmp(&b.granted_at)
                .then(a.new_level.cmp(&b.new_level))
        });
        Ok(rewards)
    }

    async fn update<R, F>(&self, user_id: &str, mut f: F) -> GachaResult<R>
    where
        F: FnMut(UserProgressionState) -> GachaResult<Update<UserProgressionState, R>>,
    {
        let key = keys::progression(user_id);
        update_doc(self.store.as_ref(), &self.retry, &key, |current: Option<UserProgressionState>| {
            f(current.unwrap_or_default())
        })
        .await
    }
}
