//! The downstream batch call and how its results map back to keys.

use async_trait::async_trait;
use std::sync::Arc;

/// Turns a set of distinct keys into batch results.
///
/// Implementations should be idempotent: the same key may reach the executor
/// again in a later window. A key may be absent from the output when there is
/// nothing to report for it; an `Err` fails the whole batch.
#[async_trait]
pub trait BatchExecutor<K, R>: Send + Sync {
    async fn execute(&self, keys: Vec<K>) -> anyhow::Result<Vec<R>>;
}

/// Adapts a synchronous closure into a [`BatchExecutor`].
pub struct FnExecutor<F> {
    func: F,
}

impl<F> FnExecutor<F> {
    pub fn new<K, R>(func: F) -> Self
    where
        F: Fn(Vec<K>) -> anyhow::Result<Vec<R>> + Send + Sync,
    {
        Self { func }
    }
}

#[async_trait]
impl<K, R, F> BatchExecutor<K, R> for FnExecutor<F>
where
    K: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<K>) -> anyhow::Result<Vec<R>> + Send + Sync,
{
    async fn execute(&self, keys: Vec<K>) -> anyhow::Result<Vec<R>> {
        (self.func)(keys)
    }
}

type KeyFn<R, K> = Arc<dyn Fn(&R) -> K + Send + Sync>;
type ResponseFn<R, V> = Arc<dyn Fn(&R) -> V + Send + Sync>;

/// Per-collapser wiring: which executor to call, which key a batch result
/// belongs to, and what a caller receives for it.
pub struct BatchMapping<K, R, V> {
    pub(crate) executor: Arc<dyn BatchExecutor<K, R>>,
    pub(crate) result_key: KeyFn<R, K>,
    pub(crate) to_response: ResponseFn<R, V>,
}

impl<K, R, V> BatchMapping<K, R, V> {
    pub fn new<E, KF, VF>(executor: E, result_key: KF, to_response: VF) -> Self
    where
        E: BatchExecutor<K, R> + 'static,
        KF: Fn(&R) -> K + Send + Sync + 'static,
        VF: Fn(&R) -> V + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(executor), result_key, to_response)
    }

    pub fn from_arc<KF, VF>(
        executor: Arc<dyn BatchExecutor<K, R>>,
        result_key: KF,
        to_response: VF,
    ) -> Self
    where
        KF: Fn(&R) -> K + Send + Sync + 'static,
        VF: Fn(&R) -> V + Send + Sync + 'static,
    {
        Self {
            executor,
            result_key: Arc::new(result_key),
            to_response: Arc::new(to_response),
        }
    }
}

impl<K, V> BatchMapping<K, (K, V), V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    /// Mapping for executors that already return `(key, value)` pairs.
    pub fn pairs<E>(executor: E) -> Self
    where
        E: BatchExecutor<K, (K, V)> + 'static,
    {
        Self::new(executor, |(k, _)| k.clone(), |(_, v)| v.clone())
    }
}

impl<K, R, V> Clone for BatchMapping<K, R, V> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            result_key: Arc::clone(&self.result_key),
            to_response: Arc::clone(&self.to_response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_executor() {
        let exec = FnExecutor::new(|keys: Vec<u32>| Ok(keys.into_iter().map(|k| k * 2).collect()));
        let out = tokio_test::block_on(exec.execute(vec![1, 2, 3])).unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn test_pairs_mapping() {
        let mapping = BatchMapping::pairs(FnExecutor::new(|keys: Vec<u32>| {
            Ok(keys.into_iter().map(|k| (k, k.to_string())).collect())
        }));
        let results = tokio_test::block_on(mapping.executor.execute(vec![4])).unwrap();
        assert_eq!((mapping.result_key)(&results[0]), 4);
        assert_eq!((mapping.to_response)(&results[0]), "4");
    }
}
