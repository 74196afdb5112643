//! Subarray partitioner: lazily yields partitions of the user subarray whose
//! estimated results fit the caller's buffers and the memory budget.

use std::sync::Arc;

use ahash::AHashMap;
use lattice_common::Result;
use log::debug;

use crate::coord::CoordType;
use crate::fragment::FragmentMetadata;
use crate::schema::ArraySchema;
use crate::storage::StorageManager;
use crate::subarray::Subarray;

/// Partition producer over a pending stack.
///
/// At any time at most one partition is current; the pending stack holds
/// partitions not yet attempted. [`next`](Self::next) pops the stack,
/// pre-emptively splitting candidates whose estimates exceed a budget and
/// skipping candidates that cannot produce results.
/// [`split_current`](Self::split_current) handles the copy-time overflow
/// path: the current partition is replaced by its first child, the second
/// child is pushed back.
pub struct SubarrayPartitioner<T: CoordType> {
    schema: Arc<ArraySchema<T>>,
    fragments: Vec<Arc<FragmentMetadata<T>>>,
    storage: Arc<StorageManager>,
    attrs: Vec<String>,
    sparse_read: bool,
    pending: Vec<Subarray<T>>,
    current: Option<Subarray<T>>,
    result_budgets: AHashMap<String, (u64, u64)>,
    memory_budget: u64,
    memory_budget_var: u64,
    unsplittable: bool,
}

impl<T: CoordType> SubarrayPartitioner<T> {
    pub fn new(
        subarray: Subarray<T>,
        schema: Arc<ArraySchema<T>>,
        fragments: Vec<Arc<FragmentMetadata<T>>>,
        storage: Arc<StorageManager>,
        attrs: Vec<String>,
        sparse_read: bool,
    ) -> SubarrayPartitioner<T> {
        SubarrayPartitioner {
            schema,
            fragments,
            storage,
            attrs,
            sparse_read,
            pending: vec![subarray],
            current: None,
            result_budgets: AHashMap::new(),
            memory_budget: u64::MAX,
            memory_budget_var: u64::MAX,
            unsplittable: false,
        }
    }

    /// Sets the result budget of a fixed-size attribute.
    pub fn set_result_budget(&mut self, attr: &str, budget: u64) {
        self.result_budgets
            .insert(attr.to_string(), (budget, u64::MAX));
    }

    /// Sets the result budgets of a var-sized attribute: offsets and values.
    pub fn set_result_budget_var(&mut self, attr: &str, offsets_budget: u64, values_budget: u64) {
        self.result_budgets
            .insert(attr.to_string(), (offsets_budget, values_budget));
    }

    /// Caps the bytes of tile payloads a partition may hold in flight.
    pub fn set_memory_budget(&mut self, total: u64, var: u64) {
        self.memory_budget = total;
        self.memory_budget_var = var;
    }

    pub fn current(&self) -> Option<&Subarray<T>> {
        self.current.as_ref()
    }

    /// True when no pending work remains beyond the current partition.
    pub fn done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn unsplittable(&self) -> bool {
        self.unsplittable
    }

    /// Pops the next viable partition into `current`, splitting oversized
    /// candidates and skipping resultless ones. `current` becomes `None`
    /// when the stack runs dry.
    pub fn next(&mut self) -> Result<()> {
        self.unsplittable = false;
        loop {
            let Some(candidate) = self.pending.pop() else {
                self.current = None;
                return Ok(());
            };

            let estimates = self.storage.estimate_result_sizes(
                &self.schema,
                &self.fragments,
                &candidate,
                &self.attrs,
                self.sparse_read,
            )?;
            if estimates.values().all(|&(fixed, var)| fixed == 0 && var == 0) {
                continue;
            }

            if self.over_budget(&candidate, &estimates)? {
                match self.split(&candidate) {
                    Some((first, second)) => {
                        self.pending.push(second);
                        self.pending.push(first);
                        continue;
                    }
                    None => {
                        debug!("partition estimate exceeds budget but is unsplittable");
                        self.unsplittable = true;
                        self.current = Some(candidate);
                        return Ok(());
                    }
                }
            }

            self.current = Some(candidate);
            return Ok(());
        }
    }

    /// Splits the current partition after a copy-time overflow; the first
    /// child becomes current, the second goes back on the stack. Marks
    /// `unsplittable` when no split is possible.
    pub fn split_current(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            self.unsplittable = true;
            return Ok(());
        };
        match self.split(&current) {
            Some((first, second)) => {
                debug!("splitting overflowed partition");
                self.pending.push(second);
                self.current = Some(first);
            }
            None => {
                self.unsplittable = true;
                self.current = Some(current);
            }
        }
        Ok(())
    }

    fn over_budget(
        &self,
        candidate: &Subarray<T>,
        estimates: &AHashMap<String, (u64, u64)>,
    ) -> Result<bool> {
        for (attr, &(fixed, var)) in estimates {
            let (fixed_budget, var_budget) = self
                .result_budgets
                .get(attr)
                .copied()
                .unwrap_or((u64::MAX, u64::MAX));
            if fixed > fixed_budget {
                return Ok(true);
            }
            if self.schema.var_size(attr)? && var > var_budget {
                return Ok(true);
            }
        }
        if self.memory_budget != u64::MAX || self.memory_budget_var != u64::MAX {
            let (tile_fixed, tile_var) = self.storage.estimate_tile_memory(
                &self.schema,
                &self.fragments,
                candidate,
                &self.attrs,
            )?;
            if tile_fixed > self.memory_budget || tile_var > self.memory_budget_var {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Two non-empty children covering the parent: multi-range partitions
    /// split their range list, single ranges bisect geometrically.
    fn split(&self, subarray: &Subarray<T>) -> Option<(Subarray<T>, Subarray<T>)> {
        let layout = subarray.layout();
        if subarray.range_num() > 1 {
            let mid = subarray.range_num() / 2;
            let first = subarray.ranges()[..mid].to_vec();
            let second = subarray.ranges()[mid..].to_vec();
            return Some((
                Subarray::with_ranges(layout, first),
                Subarray::with_ranges(layout, second),
            ));
        }
        self.schema
            .domain()
            .split_subarray(subarray.range(0), layout)
            .map(|(a, b)| (Subarray::new(layout, a), Subarray::new(layout, b)))
    }
}
