use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use crate::error::AppError;

/// Memoizing factory: at most one successful construction per key, no
/// matter how many callers race on it. Failed constructions leave the slot
/// empty so a later caller can retry.
///
/// Construction is serialized per key through the entry's `OnceCell`;
/// distinct keys never wait on each other.
pub struct MemoCache<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, running `factory` exactly once
    /// on first access.
    pub async fn get_or_try_init<F, Fut>(&self, key: &K, factory: F) -> Result<V, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
    {
        let cell = self
            .cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_try_init(factory).await?;
        Ok(value.clone())
    }
}

/// `MemoCache` with a capacity bound and least-recently-used eviction.
///
/// Eviction only drops the cached handle; whatever the handle points at
/// (vector tables, files) is untouched, and in-flight users keep their
/// `Arc` alive until they finish.
pub struct BoundedMemoCache<K, V> {
    capacity: usize,
    cells: DashMap<K, Arc<OnceCell<V>>>,
    recency: Mutex<VecDeque<K>>,
}

impl<K, V> BoundedMemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cells: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn get_or_try_init<F, Fut>(&self, key: &K, factory: F) -> Result<V, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
    {
        let cell = self
            .cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        // Construction happens outside any lock; only the recency
        // bookkeeping below is briefly serialized.
        let value = cell.get_or_try_init(factory).await?.clone();

        self.touch(key);
        self.evict_over_capacity(key);

        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        self.cells.remove(key);
        let mut recency = self.lock_recency();
        recency.retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cells.contains_key(key)
    }

    fn lock_recency(&self) -> std::sync::MutexGuard<'_, VecDeque<K>> {
        self.recency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, key: &K) {
        let mut recency = self.lock_recency();
        recency.retain(|k| k != key);
        recency.push_back(key.clone());
    }

    fn evict_over_capacity(&self, just_used: &K) {
        let mut recency = self.lock_recency();
        while recency.len() > self.capacity {
            let Some(victim) = recency.pop_front() else {
                break;
            };
            if victim == *just_used {
                recency.push_back(victim);
                continue;
            }
            self.cells.remove(&victim);
            tracing::debug!("evicted least-recently-used cache handle");
        }
    }
}
