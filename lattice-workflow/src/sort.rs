//! Parallel stable merge sort.
//!
//! Stability matters to the callers: coordinate dedup relies on equal keys
//! keeping their input order so that fragment precedence is decided by the
//! dedup pass, not by sort nondeterminism.

use std::cmp::Ordering;

use crate::thread_pool::ThreadPool;

/// Below this length a slice is sorted sequentially.
const SEQUENTIAL_CUTOFF: usize = 4 * 1024;

/// Sorts `data` stably by `cmp`, splitting the work across the pool.
pub fn parallel_sort_by<T, F>(pool: &ThreadPool, data: &mut [T], cmp: F)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    if data.len() <= SEQUENTIAL_CUTOFF {
        data.sort_by(&cmp);
        return;
    }
    let mut scratch = data.to_vec();
    sort_rec(pool, data, &mut scratch, &cmp);
}

fn sort_rec<T, F>(pool: &ThreadPool, data: &mut [T], scratch: &mut [T], cmp: &F)
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    if data.len() <= SEQUENTIAL_CUTOFF {
        data.sort_by(cmp);
        return;
    }

    let mid = data.len() / 2;
    {
        let (lo, hi) = data.split_at_mut(mid);
        let (lo_scratch, hi_scratch) = scratch.split_at_mut(mid);
        pool.scope(|scope| {
            let left = scope.spawn(move || sort_rec(pool, lo, lo_scratch, cmp));
            sort_rec(pool, hi, hi_scratch, cmp);
            left.join();
        });
    }

    let (lo, hi) = data.split_at(mid);
    merge(lo, hi, scratch, cmp);
    data.copy_from_slice(scratch);
}

/// Merges two sorted runs into `out`; ties take the left element first.
fn merge<T, F>(lo: &[T], hi: &[T], out: &mut [T], cmp: &F)
where
    T: Copy,
    F: Fn(&T, &T) -> Ordering,
{
    debug_assert_eq!(lo.len() + hi.len(), out.len());
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        if i < lo.len() && (j >= hi.len() || cmp(&lo[i], &hi[j]) != Ordering::Greater) {
            *slot = lo[i];
            i += 1;
        } else {
            *slot = hi[j];
            j += 1;
        }
    }
}
