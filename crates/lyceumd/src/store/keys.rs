//! Key paths for persisted documents.
//!
//! Everything a user owns lives under `users/{user_id}/`. History entries use
//! zero-padded sequence numbers so key order equals append order.

use uuid::Uuid;

pub fn progression(user_id: &str) -> String {
    format!("users/{}/progression", user_id)
}

pub fn owned_item(user_id: &str, item_id: &str) -> String {
    format!("users/{}/collection/{}", user_id, item_id)
}

pub fn collection_prefix(user_id: &str) -> String {
    format!("users/{}/collection/", user_id)
}

pub fn history_head(user_id: &str, pool_id: &str) -> String {
    format!("users/{}/history_head/{}", user_id, pool_id)
}

pub fn history_entry(user_id: &str, pool_id: &str, seq: u64) -> String {
    format!("users/{}/history/{}/{:020}", user_id, pool_id, seq)
}

pub fn history_prefix(user_id: &str, pool_id: &str) -> String {
    format!("users/{}/history/{}/", user_id, pool_id)
}

pub fn submission(user_id: &str, submission_id: &Uuid) -> String {
    format!("users/{}/submissions/{}", user_id, submission_id)
}

pub fn batch(user_id: &str, batch_id: &Uuid) -> String {
    format!("users/{}/batches/{}", user_id, batch_id)
}

pub fn batch_prefix(user_id: &str) -> String {
    format!("users/{}/batches/", user_id)
}

pub fn reward(user_id: &str, reward_id: &Uuid) -> String {
    format!("users/{}/rewards/{}", user_id, reward_id)
}

pub fn reward_prefix(user_id: &str) -> String {
    format!("users/{}/rewards/", user_id)
}

/// Global draw counter for a pool
pub fn pool_draw_counter(pool_id: &str) -> String {
    format!("stats/pools/{}/draws", pool_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keys_sort_by_sequence() {
        let a = history_entry("u1", "standard", 9);
        let b = history_entry("u1", "standard", 10);
        assert!(a < b);
        assert!(a.starts_with(&history_prefix("u1", "standard")));
    }

    #[test]
    fn test_user_scoping() {
        assert!(owned_item("u1", "kant").starts_with(&collection_prefix("u1")));
        assert!(!owned_item("u10", "kant").starts_with(&collection_prefix("u1")));
    }
}
