//! Achievement table and unlock criteria.
//!
//! Each achievement names one criterion and the experience/currency it pays
//! out. Evaluation is pure; recording the unlock is the ledger's job.

use serde::{Deserialize, Serialize};

/// Condition an achievement is judged on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    /// Every quiz answer correct
    PerfectScore,
    /// Quiz finished within the limit
    TimeLimit { max_secs: u64 },
    /// Debates won so far
    DebateWins { count: u32 },
    /// Distinct philosophers owned
    CollectionSize { count: u32 },
    /// Consecutive daily streak
    DailyStreak { days: u32 },
}

/// Facts supplied by the caller when checking an achievement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AchievementContext {
    pub correct_answers: Option<u32>,
    pub total_questions: Option<u32>,
    pub elapsed_secs: Option<u64>,
    pub debate_wins: Option<u32>,
    pub collection_size: Option<u32>,
    pub streak_days: Option<u32>,
}

impl AchievementContext {
    pub fn quiz(correct: u32, total: u32, elapsed_secs: u64) -> Self {
        Self {
            correct_answers: Some(correct),
            total_questions: Some(total),
            elapsed_secs: Some(elapsed_secs),
            ..Default::default()
        }
    }

    pub fn collection(size: u32) -> Self {
        Self {
            collection_size: Some(size),
            ..Default::default()
        }
    }

    pub fn streak(days: u32) -> Self {
        Self {
            streak_days: Some(days),
            ..Default::default()
        }
    }

    pub fn debates(wins: u32) -> Self {
        Self {
            debate_wins: Some(wins),
            ..Default::default()
        }
    }
}

impl Criterion {
    /// Judge the criterion; missing context never satisfies it
    pub fn is_met(&self, ctx: &AchievementContext) -> bool {
        match *self {
            Criterion::PerfectScore => match (ctx.correct_answers, ctx.total_questions) {
                (Some(correct), Some(total)) => total > 0 && correct == total,
                _ => false,
            },
            Criterion::TimeLimit { max_secs } => {
                ctx.elapsed_secs.map_or(false, |secs| secs <= max_secs)
            }
            Criterion::DebateWins { count } => ctx.debate_wins.map_or(false, |w| w >= count),
            Criterion::CollectionSize { count } => {
                ctx.collection_size.map_or(false, |n| n >= count)
            }
            Criterion::DailyStreak { days } => ctx.streak_days.map_or(false, |d| d >= days),
        }
    }
}

/// Static achievement definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub criterion: Criterion,
    pub reward_xp: u64,
    pub reward_currency: u64,
}

impl AchievementDef {
    const fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        criterion: Criterion,
        reward_xp: u64,
        reward_currency: u64,
    ) -> Self {
        Self {
            id,
            name,
            description,
            criterion,
            reward_xp,
            reward_currency,
        }
    }
}

/// All available achievements
pub const ACHIEVEMENTS: &[AchievementDef] = &[
    // Quiz achievements
    AchievementDef::new("flawless_dialectic", "Flawless Dialectic", "Answer every question of a quiz correctly", Criterion::PerfectScore, 100, 1),
    AchievementDef::new("swift_thinker", "Swift Thinker", "Finish a quiz in under a minute", Criterion::TimeLimit { max_secs: 60 }, 50, 1),

    // Debate achievements
    AchievementDef::new("first_rebuttal", "First Rebuttal", "Win your first debate", Criterion::DebateWins { count: 1 }, 50, 1),
    AchievementDef::new("sophist", "Sophist", "Win 10 debates", Criterion::DebateWins { count: 10 }, 200, 3),

    // Collection achievements
    AchievementDef::new("first_disciple", "First Disciple", "Recruit your first philosopher", Criterion::CollectionSize { count: 1 }, 25, 0),
    AchievementDef::new("academy", "The Academy", "Own 5 different philosophers", Criterion::CollectionSize { count: 5 }, 150, 2),
    AchievementDef::new("pantheon", "Pantheon", "Own every philosopher", Criterion::CollectionSize { count: 12 }, 500, 10),

    // Streak achievements
    AchievementDef::new("habit_3", "Habit Forming", "Study 3 days in a row", Criterion::DailyStreak { days: 3 }, 75, 1),
    AchievementDef::new("stoic_7", "Stoic Discipline", "Study 7 days in a row", Criterion::DailyStreak { days: 7 }, 200, 3),
    AchievementDef::new("ascetic_30", "Ascetic", "Study 30 days in a row", Criterion::DailyStreak { days: 30 }, 1000, 10),
];

/// Look up an achievement by id
pub fn find_achievement(id: &str) -> Option<&'static AchievementDef> {
    ACHIEVEMENTS.iter().find(|a| a.id == id)
}

/// Achievements a context satisfies, excluding ids already held
pub fn newly_met(
    ctx: &AchievementContext,
    unlocked: impl Fn(&str) -> bool,
) -> Vec<&'static AchievementDef> {
    ACHIEVEMENTS
        .iter()
        .filter(|a| !unlocked(a.id) && a.criterion.is_met(ctx))
        .collect()
}

/// Format an unlock notification
pub fn format_unlock(def: &AchievementDef) -> String {
    format!("Achievement unlocked: {} - {}", def.name, def.description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_unique() {
        let mut ids: Vec<_> = ACHIEVEMENTS.iter().map(|a| a.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), ACHIEVEMENTS.len());
    }

    #[test]
    fn test_perfect_score() {
        let c = Criterion::PerfectScore;
        assert!(c.is_met(&AchievementContext::quiz(10, 10, 300)));
        assert!(!c.is_met(&AchievementContext::quiz(9, 10, 300)));
        assert!(!c.is_met(&AchievementContext::quiz(0, 0, 300)));
        assert!(!c.is_met(&AchievementContext::default()));
    }

    #[test]
    fn test_time_limit() {
        let c = Criterion::TimeLimit { max_secs: 60 };
        assert!(c.is_met(&AchievementContext::quiz(3, 10, 60)));
        assert!(!c.is_met(&AchievementContext::quiz(10, 10, 61)));
    }

    #[test]
    fn test_thresholds() {
        assert!(Criterion::DebateWins { count: 10 }.is_met(&AchievementContext::debates(12)));
        assert!(!Criterion::CollectionSize { count: 5 }.is_met(&AchievementContext::collection(4)));
        assert!(Criterion::DailyStreak { days: 7 }.is_met(&AchievementContext::streak(7)));
        assert!(!Criterion::DailyStreak { days: 7 }.is_met(&AchievementContext::collection(7)));
    }

    #[test]
    fn test_newly_met_skips_unlocked() {
        let ctx = AchievementContext::collection(5);
        let met = newly_met(&ctx, |id| id == "first_disciple");
        let ids: Vec<_> = met.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["academy"]);
    }

    #[test]
    fn test_find() {
        assert_eq!(find_achievement("stoic_7").unwrap().reward_xp, 200);
        assert!(find_achievement("unknown").is_none());
    }
}
