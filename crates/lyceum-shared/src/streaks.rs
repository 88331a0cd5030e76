//! Daily study streak arithmetic.
//!
//! Days are UTC calendar days. Calling more than once on the same day is a
//! no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progression::UserProgressionState;

/// What a streak update did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First ever activity
    Started,
    /// Activity on the day after the last one
    Extended,
    /// Gap of more than one day
    Reset,
    /// Already counted today
    Unchanged,
}

/// Advance the streak for activity at `now`
pub fn advance_streak(state: &mut UserProgressionState, now: DateTime<Utc>) -> StreakChange {
    let today = now.date_naive();
    let change = match state.last_streak_at.map(|t| t.date_naive()) {
        None => StreakChange::Started,
        Some(last) => match (today - last).num_days() {
            d if d <= 0 => StreakChange::Unchanged,
            1 => StreakChange::Extended,
            _ => StreakChange::Reset,
        },
    };

    match change {
        StreakChange::Unchanged => return change,
        StreakChange::Extended => state.streak_days += 1,
        StreakChange::Started | StreakChange::Reset => state.streak_days = 1,
    }
    state.best_streak = state.best_streak.max(state.streak_days);
    state.last_streak_at = Some(now);
    change
}
