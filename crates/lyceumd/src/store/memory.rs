//! In-memory store.

use async_trait::async_trait;
use lyceum_shared::{GachaError, GachaResult};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CommitOutcome, KvStore, Precondition, ScanOrder, Versioned, WriteOp};

/// Key-value store backed by a `BTreeMap`
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

fn precondition_holds(current: Option<&Versioned>, precondition: Precondition) -> bool {
    match (precondition, current) {
        (Precondition::Any, _) => true,
        (Precondition::Absent, None) => true,
        (Precondition::Absent, Some(_)) => false,
        (Precondition::Version(v), Some(doc)) => doc.version == v,
        (Precondition::Version(_), None) => false,
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> GachaResult<Option<Versioned>> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> GachaResult<CommitOutcome> {
        let mut docs = self.docs.write().await;

        for op in &ops {
            if !precondition_holds(docs.get(&op.key), op.precondition) {
                return Ok(CommitOutcome::Conflict {
                    key: op.key.clone(),
                });
            }
        }

        for op in ops {
            let version = docs.get(&op.key).map_or(1, |doc| doc.version + 1);
            docs.insert(
                op.key,
                Versioned {
                    value: op.value,
                    version,
                },
            );
        }
        Ok(CommitOutcome::Committed)
    }

    async fn increment(&self, key: &str, delta: i64) -> GachaResult<i64> {
        let mut docs = self.docs.write().await;
        let (current, version) = match docs.get(key) {
            Some(doc) => {
                let n = doc.value.as_i64().ok_or_else(|| {
                    GachaError::Store(format!("{} does not hold a counter", key))
                })?;
                (n, doc.version)
            }
            None => (0, 0),
        };
        let next = current.saturating_add(delta);
        docs.insert(
            key.to_string(),
            Versioned {
                value: Value::from(next),
                version: version + 1,
            },
        );
        Ok(next)
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        limit: usize,
        order: ScanOrder,
    ) -> GachaResult<Vec<(String, Versioned)>> {
        let docs = self.docs.read().await;
        let mut upper = prefix.to_string();
        upper.push(char::MAX);
        let range = docs.range(prefix.to_string()..upper);

        let pick = |(k, v): (&String, &Versioned)| (k.clone(), v.clone());
        let found: Vec<(String, Versioned)> = match order {
            ScanOrder::Ascending => range.take(limit).map(pick).collect(),
            ScanOrder::Descending => range.rev().take(limit).map(pick).collect(),
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_versions_advance_on_write() {
        let store = MemoryStore::new();
        let op = WriteOp::create("a", &json!({"n": 1})).unwrap();
        assert_eq!(store.commit(vec![op]).await.unwrap(), CommitOutcome::Committed);
        assert_eq!(store.get("a").await.unwrap().unwrap().version, 1);

        let op = WriteOp::new("a", &json!({"n": 2}), Precondition::Version(1)).unwrap();
        store.commit(vec![op]).await.unwrap();
        let doc = store.get("a").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.value["n"], 2);
    }

    #[tokio::test]
    async fn test_failed_precondition_writes_nothing() {
        let store = MemoryStore::new();
        store
            .commit(vec![WriteOp::create("a", &json!(1)).unwrap()])
            .await
            .unwrap();

        let outcome = store
            .commit(vec![
                WriteOp::create("b", &json!(2)).unwrap(),
                WriteOp::new("a", &json!(3), Precondition::Version(7)).unwrap(),
            ])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Conflict {
                key: "a".to_string()
            }
        );
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.get("a").await.unwrap().unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn test_increment() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("c", 1).await.unwrap(), 1);
        assert_eq!(store.increment("c", 5).await.unwrap(), 6);
        store
            .commit(vec![WriteOp::create("s", &json!("text")).unwrap()])
            .await
            .unwrap();
        assert!(store.increment("s", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_prefix_order_and_limit() {
        let store = MemoryStore::new();
        let ops = ["p/1", "p/2", "p/3", "q/1", "p"]
            .iter()
            .map(|k| WriteOp::create(*k, &json!(k)).unwrap())
            .collect();
        store.commit(ops).await.unwrap();

        let asc = store.scan_prefix("p/", 10, ScanOrder::Ascending).await.unwrap();
        let keys: Vec<_> = asc.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p/1", "p/2", "p/3"]);

        let desc = store.scan_prefix("p/", 2, ScanOrder::Descending).await.unwrap();
        let keys: Vec<_> = desc.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p/3", "p/2"]);
    }
}
