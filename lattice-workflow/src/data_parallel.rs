//! Data-parallel iteration over a [`ThreadPool`].
//!
//! Small inputs run sequentially; larger ones fan out through a pool scope
//! and re-join before returning. `map` preserves input order in its output.

use crate::thread_pool::ThreadPool;

/// Inputs at or below this size are not worth a fork-join round trip.
const SEQUENTIAL_THRESHOLD: usize = 1;

/// Applies `f` to every item, using the pool when there is enough work.
pub fn for_each<T, F>(pool: &ThreadPool, items: impl IntoIterator<Item = T>, f: F)
where
    F: Fn(T) + Send + Sync,
    T: Send,
{
    let items: Vec<T> = items.into_iter().collect();
    if items.len() <= SEQUENTIAL_THRESHOLD {
        for item in items {
            f(item);
        }
    } else {
        let f = &f;
        pool.scope(|scope| {
            for item in items {
                scope.spawn(move || f(item));
            }
        });
    }
}

/// Applies `f` to every item and collects the results in input order.
pub fn map<T, F, R>(pool: &ThreadPool, items: impl IntoIterator<Item = T>, f: F) -> Vec<R>
where
    F: Fn(T) -> R + Send + Sync,
    T: Send,
    R: Send,
{
    let items: Vec<T> = items.into_iter().collect();
    if items.len() <= SEQUENTIAL_THRESHOLD {
        items.into_iter().map(f).collect()
    } else {
        let f = &f;
        pool.scope(|scope| {
            let handles: Vec<_> = items
                .into_iter()
                .map(|item| scope.spawn(move || f(item)))
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        })
    }
}
