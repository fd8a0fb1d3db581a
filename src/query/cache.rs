use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use super::{QueryExecutor, QueryParams, Table, Template};
use crate::error::Result;

/// Memoized values keyed by their full input.
///
/// Each key owns a `OnceCell`, so concurrent callers asking for the same key
/// wait on a single computation instead of starting their own. Failed
/// computations leave the cell empty and are retried by the next caller.
/// Entries live as long as the cache; nothing is evicted.
pub struct MemoCache<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        let cell = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key).or_default().clone()
        };
        if let Some(value) = cell.get() {
            log::debug!("cache hit");
            return Ok(value.clone());
        }
        cell.get_or_try_init(init).await.cloned()
    }

    /// Number of keys with a computed value.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    template: Template,
    params: QueryParams,
}

/// Executor that answers repeated `(template, params)` requests from memory.
pub struct CachedExecutor<E> {
    inner: E,
    cache: MemoCache<QueryKey, Table>,
}

impl<E> CachedExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: MemoCache::new(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.len()
    }
}

impl<E: QueryExecutor> QueryExecutor for CachedExecutor<E> {
    async fn execute(&self, template: Template, params: &QueryParams) -> Result<Table> {
        let key = QueryKey {
            template,
            params: params.clone(),
        };
        self.cache
            .get_or_try_init(key, || self.inner.execute(template, params))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::query::test_util::{text, StubExecutor};
    use crate::query::Cell;

    fn table() -> Table {
        Table::new(&["date", "niche"], vec![vec![text("2025-01-01"), Cell::Null]])
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let cached = CachedExecutor::new(StubExecutor::new(|_, _| Ok(table())));
        let params = QueryParams::new().set("group_by", "niche");

        let first = cached.execute(Template::Acquisition, &params).await.unwrap();
        let second = cached.execute(Template::Acquisition, &params).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.inner().calls(), 1);
        assert_eq!(cached.cached_queries(), 1);
    }

    #[tokio::test]
    async fn test_different_params_are_separate_entries() {
        let cached = CachedExecutor::new(StubExecutor::new(|_, _| Ok(table())));
        let a = QueryParams::new().set("group_by", "niche");
        let b = QueryParams::new().set("group_by", "country");

        cached.execute(Template::Acquisition, &a).await.unwrap();
        cached.execute(Template::Acquisition, &b).await.unwrap();
        cached.execute(Template::UserMetrics, &a).await.unwrap();

        assert_eq!(cached.inner().calls(), 3);
        assert_eq!(cached.cached_queries(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cached = CachedExecutor::new(StubExecutor::new(|_, _| {
            Err(Error::QueryExecution("connection refused".into()))
        }));
        let params = QueryParams::new();

        assert!(cached.execute(Template::Retention, &params).await.is_err());
        assert!(cached.execute(Template::Retention, &params).await.is_err());

        assert_eq!(cached.inner().calls(), 2);
        assert!(cached.cached_queries() == 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let cache: Arc<MemoCache<&'static str, u32>> = Arc::new(MemoCache::new());
        let computations = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let computations = computations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init("key", || async {
                        computations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(computations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
