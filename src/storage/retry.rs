//! Bounded retry of transient store failures.
//!
//! `RetryingStore` wraps any [`GraphStore`] and re-issues a call that failed
//! with a transient `Error::Store`, sleeping `backoff * attempt` between
//! tries. When the attempts run out the failure surfaces as
//! `Error::Connectivity`, which the loader treats as fatal. Every other
//! error passes through untouched on the first try.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::{Error, Result};
use super::{GraphStats, GraphStore, Pattern, PropertyWrite, Record, WriteOutcome};

/// Retry settings for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries per call, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Linear backoff step in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_ms: 200 }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, backoff_ms: 0 }
    }
}

/// A store that retries transient failures of the wrapped store.
pub struct RetryingStore<S: GraphStore> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: GraphStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() => {
                    if attempt >= attempts {
                        tracing::error!(op, attempts, error = %e, "store retries exhausted");
                        return Err(Error::Connectivity(format!(
                            "{op} failed after {attempts} attempts: {e}"
                        )));
                    }
                    tracing::warn!(op, attempt, error = %e, "transient store error, retrying");
                    let delay = self.policy.backoff_ms.saturating_mul(attempt as u64);
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: GraphStore> GraphStore for RetryingStore<S> {
    async fn verify_connectivity(&self) -> Result<()> {
        self.with_retry("verify_connectivity", || self.inner.verify_connectivity()).await
    }

    async fn ensure_unique_key(&self, label: &str) -> Result<()> {
        self.with_retry("ensure_unique_key", || self.inner.ensure_unique_key(label)).await
    }

    async fn upsert_node(
        &self,
        key: &NodeKey,
        labels_to_add: &[&str],
        label_universe_to_clear: &[&str],
        props: PropertyMap,
        write: PropertyWrite,
    ) -> Result<WriteOutcome> {
        self.with_retry("upsert_node", || {
            self.inner.upsert_node(key, labels_to_add, label_universe_to_clear, props.clone(), write)
        })
        .await
    }

    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        self.with_retry("get_node", || self.inner.get_node(key)).await
    }

    async fn upsert_edge(
        &self,
        from: &NodeKey,
        rel_type: &str,
        to: &NodeKey,
        props: PropertyMap,
    ) -> Result<WriteOutcome> {
        self.with_retry("upsert_edge", || {
            self.inner.upsert_edge(from, rel_type, to, props.clone())
        })
        .await
    }

    async fn delete_edge(&self, from: &NodeKey, rel_type: &str, to: &NodeKey) -> Result<bool> {
        self.with_retry("delete_edge", || self.inner.delete_edge(from, rel_type, to)).await
    }

    async fn query(&self, pattern: &Pattern) -> Result<Vec<Record>> {
        self.with_retry("query", || self.inner.query(pattern)).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.with_retry("stats", || self.inner.stats()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::storage::MemoryStore;

    /// Fails the first `failures` calls to `stats` with a transient error.
    struct Flaky {
        store: MemoryStore,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GraphStore for Flaky {
        async fn verify_connectivity(&self) -> Result<()> { self.store.verify_connectivity().await }
        async fn ensure_unique_key(&self, label: &str) -> Result<()> { self.store.ensure_unique_key(label).await }
        async fn upsert_node(
            &self,
            key: &NodeKey,
            add: &[&str],
            clear: &[&str],
            props: PropertyMap,
            write: PropertyWrite,
        ) -> Result<WriteOutcome> {
            self.store.upsert_node(key, add, clear, props, write).await
        }
        async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> { self.store.get_node(key).await }
        async fn upsert_edge(&self, f: &NodeKey, t: &str, to: &NodeKey, p: PropertyMap) -> Result<WriteOutcome> {
            self.store.upsert_edge(f, t, to, p).await
        }
        async fn delete_edge(&self, f: &NodeKey, t: &str, to: &NodeKey) -> Result<bool> {
            self.store.delete_edge(f, t, to).await
        }
        async fn query(&self, pattern: &Pattern) -> Result<Vec<Record>> { self.store.query(pattern).await }
        async fn stats(&self) -> Result<GraphStats> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::Store(format!("connection reset (call {call})")));
            }
            self.store.stats().await
        }
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky { store: MemoryStore::new(), failures, calls: AtomicU32::new(0) }
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let store = RetryingStore::new(flaky(2), RetryPolicy::immediate(3));
        assert!(store.stats().await.is_ok());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_connectivity_error() {
        let store = RetryingStore::new(flaky(5), RetryPolicy::immediate(3));
        let err = store.stats().await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert!(err.is_fatal());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let store = RetryingStore::new(MemoryStore::new(), RetryPolicy::immediate(3));
        let err = store
            .upsert_edge(&NodeKey::entity("a"), "GROWS", &NodeKey::product("b"), PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingReference { .. }));
    }
}
