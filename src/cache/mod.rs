//! Tiered Cache: stacks ordered storage tiers under one logical cache with
//! read-through, write-through and invalidate-all semantics.
//!
//! Grounded on `src/interfaces/snapshot_store.rs` for the async-trait
//! storage-interface shape, generalized to an arbitrary-length stack of
//! tiers instead of a single store.

mod local;

pub use local::LocalTier;

use crate::action::LazyAction;
use crate::error::Cancelled;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// An ordered storage backend inside a cache. Implementations own their own
/// TTL and eviction policy; tiers are typically shared across callers.
#[async_trait]
pub trait Tier<T>: Send + Sync {
    async fn get(&self, key: &str) -> Option<T>;
    async fn set(&self, key: &str, value: T);
    async fn invalidate(&self, key: &str) -> bool;
}

/// Where a [`CacheResult`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Tier(usize),
    Fetch,
}

impl Source {
    pub fn label(&self) -> String {
        match self {
            Source::Tier(i) => format!("tier-{i}"),
            Source::Fetch => "fetch".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult<T> {
    pub value: T,
    pub source: Source,
}

/// Errors surfaced by a [`CacheExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    #[error("fetch failed: {0}")]
    Fetch(E),
    #[error("cache operation cancelled")]
    Cancelled(#[from] Cancelled),
}

/// `{key_fn, fetch, tiers}`. Immutable after [`CacheExecutorBuilder::build`].
pub struct CacheExecutor<K, T, E> {
    key_fn: Arc<dyn Fn(&K) -> String + Send + Sync>,
    fetch: Arc<dyn Fn(&K) -> LazyAction<T, E> + Send + Sync>,
    tiers: Vec<Arc<dyn Tier<T>>>,
}

impl<K, T, E> CacheExecutor<K, T, E>
where
    K: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Satisfies a read by probing tiers shallowest-first, refilling
    /// shallower tiers on a deeper hit, and falling back to `fetch` on a
    /// total miss.
    pub async fn get(&self, key: &K) -> Result<CacheResult<T>, CacheError<E>> {
        let s = (self.key_fn)(key);

        for (i, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(&s).await {
                debug!(tier = i, key = %s, "cache hit");
                for refill in &self.tiers[..i] {
                    refill.set(&s, value.clone()).await;
                }
                return Ok(CacheResult {
                    value,
                    source: Source::Tier(i),
                });
            }
        }

        debug!(key = %s, "cache miss, fetching");
        let action = (self.fetch)(key);
        let value = action.run().await.map_err(CacheError::Fetch)?;

        let writes = self.tiers.iter().map(|tier| {
            let s = s.clone();
            let value = value.clone();
            async move {
                tier.set(&s, value).await;
            }
        });
        futures::future::join_all(writes).await;

        Ok(CacheResult {
            value,
            source: Source::Fetch,
        })
    }

    /// Invalidates `key` in every tier. Returns `true` if any tier held it.
    pub async fn invalidate(&self, key: &K) -> Result<bool, CacheError<E>> {
        let s = (self.key_fn)(key);
        let mut any = false;
        for tier in &self.tiers {
            if tier.invalidate(&s).await {
                any = true;
            }
        }
        Ok(any)
    }
}

/// Builder for [`CacheExecutor`]. `cache(key_fn, fetch).tier(t1).tier(t2)...build()`.
pub struct CacheExecutorBuilder<K, T, E> {
    key_fn: Arc<dyn Fn(&K) -> String + Send + Sync>,
    fetch: Arc<dyn Fn(&K) -> LazyAction<T, E> + Send + Sync>,
    tiers: Vec<Arc<dyn Tier<T>>>,
}

pub fn cache<K, T, E>(
    key_fn: impl Fn(&K) -> String + Send + Sync + 'static,
    fetch: impl Fn(&K) -> LazyAction<T, E> + Send + Sync + 'static,
) -> CacheExecutorBuilder<K, T, E> {
    CacheExecutorBuilder {
        key_fn: Arc::new(key_fn),
        fetch: Arc::new(fetch),
        tiers: Vec::new(),
    }
}

impl<K, T, E> CacheExecutorBuilder<K, T, E> {
    pub fn tier(mut self, tier: Arc<dyn Tier<T>>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn build(self) -> CacheExecutor<K, T, E> {
        if self.tiers.is_empty() {
            warn!("cache built with zero tiers; every get() will fetch");
        }
        CacheExecutor {
            key_fn: self.key_fn,
            fetch: self.fetch,
            tiers: self.tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn l1_l2_scenario() {
        let local0 = Arc::new(LocalTier::<String>::new(16));
        let local1 = Arc::new(LocalTier::<String>::new(16));
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let fc = fetch_calls.clone();

        let executor = cache::<String, String, String>(
            |k: &String| k.clone(),
            move |_k: &String| {
                let fc = fc.clone();
                LazyAction::from_async(move || {
                    let fc = fc.clone();
                    async move {
                        fc.fetch_add(1, Ordering::SeqCst);
                        Ok::<String, String>("alice".to_string())
                    }
                })
            },
        )
        .tier(local0.clone())
        .tier(local1.clone())
        .build();

        let key = "u42".to_string();

        let first = executor.get(&key).await.unwrap();
        assert_eq!(first.source, Source::Fetch);
        assert_eq!(first.value, "alice");
        assert_eq!(local0.get("u42").await, Some("alice".to_string()));
        assert_eq!(local1.get("u42").await, Some("alice".to_string()));

        let second = executor.get(&key).await.unwrap();
        assert_eq!(second.source, Source::Tier(0));

        let invalidated = executor.invalidate(&key).await.unwrap();
        assert!(invalidated);
        assert_eq!(local0.get("u42").await, None);
        assert_eq!(local1.get("u42").await, None);
    }

    #[tokio::test]
    async fn tier_promotion_refills_shallower_tiers() {
        let local0 = Arc::new(LocalTier::<i32>::new(16));
        let local1 = Arc::new(LocalTier::<i32>::new(16));
        local1.set("k", 99).await;

        let executor = cache::<&str, i32, String>(
            |k: &&str| k.to_string(),
            |_k: &&str| LazyAction::ready_err("should not fetch".to_string()),
        )
        .tier(local0.clone())
        .tier(local1.clone())
        .build();

        let result = executor.get(&"k").await.unwrap();
        assert_eq!(result.source, Source::Tier(1));
        assert_eq!(local0.get("k").await, Some(99));
    }
}
