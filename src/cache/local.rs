//! An in-memory reference [`Tier`] implementation.
//!
//! Grounded on `src/storage/mock/snapshot_store.rs`'s `RwLock<HashMap<..>>`
//! shape. Eviction is insertion-order FIFO past `max_size` — the spec does
//! not require LRU-quality eviction and the teacher's own mock stores are
//! unbounded, so bounding is this crate's own minimal addition.

use super::Tier;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

struct Inner<T> {
    map: HashMap<String, T>,
    order: VecDeque<String>,
}

/// A bounded in-process cache tier. `max_size` of `0` means unbounded.
pub struct LocalTier<T> {
    inner: RwLock<Inner<T>>,
    max_size: usize,
}

impl<T> LocalTier<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_size,
        }
    }
}

#[async_trait]
impl<T> Tier<T> for LocalTier<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Option<T> {
        self.inner.read().await.map.get(key).cloned()
    }

    async fn set(&self, key: &str, value: T) {
        let mut inner = self.inner.write().await;
        if !inner.map.contains_key(key) {
            inner.order.push_back(key.to_string());
        }
        inner.map.insert(key.to_string(), value);

        if self.max_size > 0 {
            while inner.map.len() > self.max_size {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.map.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }

    async fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|k| k != key);
        inner.map.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_roundtrip() {
        let tier = LocalTier::new(2);
        assert_eq!(tier.get("a").await, None);
        tier.set("a", 1).await;
        assert_eq!(tier.get("a").await, Some(1));
    }

    #[tokio::test]
    async fn evicts_oldest_past_capacity() {
        let tier = LocalTier::new(2);
        tier.set("a", 1).await;
        tier.set("b", 2).await;
        tier.set("c", 3).await;
        assert_eq!(tier.get("a").await, None);
        assert_eq!(tier.get("b").await, Some(2));
        assert_eq!(tier.get("c").await, Some(3));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let tier = LocalTier::new(0);
        tier.set("a", 1).await;
        assert!(tier.invalidate("a").await);
        assert_eq!(tier.get("a").await, None);
        assert!(!tier.invalidate("a").await);
    }
}
