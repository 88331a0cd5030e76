//! Persistence seam for per-user state.
//!
//! The store is a strongly consistent key-value store holding JSON documents.
//! Every document carries a version that changes on each write. There are no
//! cross-key transactions beyond `commit`, which applies a batch of writes
//! atomically when every precondition holds and applies nothing otherwise.
//!
//! ## Implementations
//!
//! - `MemoryStore`: in-process reference store used by the CLI and tests.
//!   A networked backend implements the same trait.

pub mod keys;
pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use lyceum_shared::GachaResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::retry::RetryPolicy;

/// A stored document and its version
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: u64,
}

/// Condition a write requires of the current document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional
    Any,
    /// Key must not exist
    Absent,
    /// Key must exist at exactly this version
    Version(u64),
}

impl Precondition {
    /// Guard matching what was read: absent, or the version seen
    pub fn observed(version: Option<u64>) -> Self {
        match version {
            Some(v) => Precondition::Version(v),
            None => Precondition::Absent,
        }
    }
}

/// One write inside a commit
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub key: String,
    pub value: Value,
    pub precondition: Precondition,
}

impl WriteOp {
    /// Serialize `doc` as a write guarded by `precondition`
    pub fn new<T: Serialize>(
        key: impl Into<String>,
        doc: &T,
        precondition: Precondition,
    ) -> GachaResult<Self> {
        Ok(Self {
            key: key.into(),
            value: serde_json::to_value(doc)?,
            precondition,
        })
    }

    /// Write that only succeeds for a new key
    pub fn create<T: Serialize>(key: impl Into<String>, doc: &T) -> GachaResult<Self> {
        Self::new(key, doc, Precondition::Absent)
    }
}

/// Result of an atomic commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A precondition failed; nothing was written
    Conflict { key: String },
}

/// Scan direction over keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a document
    async fn get(&self, key: &str) -> GachaResult<Option<Versioned>>;

    /// Apply every write atomically, or none if a precondition fails
    async fn commit(&self, ops: Vec<WriteOp>) -> GachaResult<CommitOutcome>;

    /// Server-side counter increment; returns the new value
    async fn increment(&self, key: &str, delta: i64) -> GachaResult<i64>;

    /// Up to `limit` documents whose key starts with `prefix`, in key order
    async fn scan_prefix(
        &self,
        prefix: &str,
        limit: usize,
        order: ScanOrder,
    ) -> GachaResult<Vec<(String, Versioned)>>;
}

/// Read and decode a document with its version
pub async fn load_doc<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> GachaResult<Option<(T, u64)>> {
    match store.get(key).await? {
        Some(doc) => {
            let decoded = serde_json::from_value(doc.value)?;
            Ok(Some((decoded, doc.version)))
        }
        None => Ok(None),
    }
}

/// Decision of a document update closure
pub enum Update<T, R> {
    /// Persist `doc` together with `extra` writes and return `result`
    Write {
        doc: T,
        result: R,
        extra: Vec<WriteOp>,
    },
    /// Leave the document untouched
    Skip(R),
}

impl<T, R> Update<T, R> {
    pub fn write(doc: T, result: R) -> Self {
        Update::Write {
            doc,
            result,
            extra: Vec::new(),
        }
    }
}

/// Read-compute-write a single document under compare-and-swap.
///
/// `f` sees the latest document on every attempt and must be free of side
/// effects; it runs again after a conflict.
pub async fn update_doc<T, R, F>(
    store: &dyn KvStore,
    policy: &RetryPolicy,
    key: &str,
    mut f: F,
) -> GachaResult<R>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> GachaResult<Update<T, R>>,
{
    let mut retry = policy.start();
    loop {
        let current = load_doc::<T>(store, key).await?;
        let version = current.as_ref().map(|(_, v)| *v);
        match f(current.map(|(doc, _)| doc))? {
            Update::Skip(result) => return Ok(result),
            Update::Write { doc, result, extra } => {
                let mut ops = vec![WriteOp::new(key, &doc, Precondition::observed(version))?];
                ops.extend(extra);
                match store.commit(ops).await? {
                    CommitOutcome::Committed => return Ok(result),
                    CommitOutcome::Conflict { key } => retry.backoff(&key).await?,
                }
            }
        }
    }
}
