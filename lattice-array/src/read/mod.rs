//! The read orchestrator: drives partitioner → plan → fetch → filter →
//! merge/copy, with overflow-then-split semantics.

use std::sync::Arc;

use ahash::AHashMap;
use lattice_common::{error::Error, Result};
use lattice_workflow::data_parallel;
use log::debug;

use crate::coord::CoordType;
use crate::domain::NdRange;
use crate::dtype::Layout;
use crate::filter::EncryptionKey;
use crate::fragment::FragmentMetadata;
use crate::schema::{Array, ArraySchema, COORDS};
use crate::storage::StorageManager;
use crate::subarray::{Subarray, TileOverlap};

pub mod coords;
pub mod copy;
pub mod dense;
pub mod fetch;
pub mod partitioner;
pub mod planner;

use coords::{compute_cell_ranges, CoordSet};
use copy::{copy_fixed_cells, copy_var_cells};
use dense::{
    assemble_cell_ranges, compute_slabs, fragment_cursors, layout_matches_cell_order,
    merge_window, DenseRange, FragCursor,
};
use fetch::FetchContext;
use partitioner::SubarrayPartitioner;
use planner::{clear_tiles, plan_sparse_tiles, OverlappingTile, TileMap};

/// A contiguous run of cells within one arena tile; `tile == None` denotes
/// an empty run to be filled with the attribute's fill value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub tile: Option<usize>,
    pub start: u64,
    pub end: u64,
}

impl CellRange {
    pub fn tile(tile: usize, start: u64, end: u64) -> CellRange {
        CellRange {
            tile: Some(tile),
            start,
            end,
        }
    }

    pub fn fill(start: u64, end: u64) -> CellRange {
        CellRange {
            tile: None,
            start,
            end,
        }
    }

    pub fn width(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Caller-facing result buffer of one attribute.
///
/// The buffer's length is its capacity; `size` (and `var_size`) are reset to
/// the capacity at the start of each partition attempt and rewritten with
/// the bytes produced, or zero on overflow, error, or cancellation.
#[derive(Debug)]
pub struct AttributeBuffer {
    data: Vec<u8>,
    size: u64,
    original_size: u64,
    var_data: Vec<u8>,
    var_size: u64,
    original_var_size: u64,
    var_sized: bool,
}

impl AttributeBuffer {
    pub fn fixed(capacity: usize) -> AttributeBuffer {
        AttributeBuffer {
            data: vec![0; capacity],
            size: capacity as u64,
            original_size: capacity as u64,
            var_data: Vec::new(),
            var_size: 0,
            original_var_size: 0,
            var_sized: false,
        }
    }

    pub fn var(offsets_capacity: usize, values_capacity: usize) -> AttributeBuffer {
        AttributeBuffer {
            data: vec![0; offsets_capacity],
            size: offsets_capacity as u64,
            original_size: offsets_capacity as u64,
            var_data: vec![0; values_capacity],
            var_size: values_capacity as u64,
            original_var_size: values_capacity as u64,
            var_sized: true,
        }
    }

    pub fn is_var(&self) -> bool {
        self.var_sized
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn var_size(&self) -> u64 {
        self.var_size
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn original_var_size(&self) -> u64 {
        self.original_var_size
    }

    /// The written prefix of the fixed (or offsets) stream.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    /// The written prefix of the values stream.
    pub fn var_bytes(&self) -> &[u8] {
        &self.var_data[..self.var_size as usize]
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn data_var_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.data, &mut self.var_data)
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub(crate) fn set_var_size(&mut self, size: u64) {
        self.var_size = size;
    }

    fn reset_size(&mut self) {
        self.size = self.original_size;
        self.var_size = self.original_var_size;
    }

    fn zero_size(&mut self) {
        self.size = 0;
        self.var_size = 0;
    }
}

struct ReadState<T: CoordType> {
    partitioner: SubarrayPartitioner<T>,
    overflowed: bool,
    unsplittable: bool,
}

/// Reader for one array, monomorphized over the domain's coordinate type.
///
/// Usage: construct, `set_*` the collaborators, buffers, subarray and
/// layout, then `init()` and call `read()` until `incomplete()` is false.
pub struct Reader<T: CoordType> {
    schema: Option<Arc<ArraySchema<T>>>,
    fragments: Vec<Arc<FragmentMetadata<T>>>,
    storage: Option<Arc<StorageManager>>,
    encryption_key: EncryptionKey,
    layout: Layout,
    sparse_mode: bool,
    attr_order: Vec<String>,
    buffers: AHashMap<String, AttributeBuffer>,
    staged_ranges: Vec<NdRange<T>>,
    state: Option<ReadState<T>>,
    initialized: bool,
}

impl<T: CoordType> Default for Reader<T> {
    fn default() -> Reader<T> {
        Reader::new()
    }
}

impl<T: CoordType> Reader<T> {
    pub fn new() -> Reader<T> {
        Reader {
            schema: None,
            fragments: Vec::new(),
            storage: None,
            encryption_key: EncryptionKey::None,
            layout: Layout::RowMajor,
            sparse_mode: false,
            attr_order: Vec::new(),
            buffers: AHashMap::new(),
            staged_ranges: Vec::new(),
            state: None,
            initialized: false,
        }
    }

    /// Adopts an opened array: schema, fragment stack and encryption key.
    pub fn set_array(&mut self, array: &Array<T>) {
        self.schema = Some(array.schema.clone());
        self.fragments = array.fragments.clone();
        self.encryption_key = array.encryption_key.clone();
    }

    pub fn set_array_schema(&mut self, schema: Arc<ArraySchema<T>>) {
        self.schema = Some(schema);
    }

    pub fn set_fragment_metadata(&mut self, fragments: Vec<Arc<FragmentMetadata<T>>>) {
        self.fragments = fragments;
    }

    pub fn set_storage_manager(&mut self, storage: Arc<StorageManager>) {
        self.storage = Some(storage);
    }

    pub fn set_encryption_key(&mut self, key: EncryptionKey) {
        self.encryption_key = key;
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn attributes(&self) -> &[String] {
        &self.attr_order
    }

    /// Legacy flat subarray: `2 * dim_num` bounds, `[lo, hi]` per dimension.
    pub fn set_subarray(&mut self, bounds: &[T]) -> Result<()> {
        let schema = self.require_schema()?;
        if bounds.len() != 2 * schema.dim_num() {
            return Err(Error::reader_state(
                "subarray bounds do not match the dimension count",
            ));
        }
        self.staged_ranges = vec![NdRange::new(bounds.to_vec())];
        Ok(())
    }

    /// Multi-range subarray; adopts the subarray's layout.
    pub fn set_subarray_ranges(&mut self, subarray: Subarray<T>) -> Result<()> {
        let schema = self.require_schema()?;
        for range in subarray.ranges() {
            if range.dim_num() != schema.dim_num() {
                return Err(Error::reader_state(
                    "subarray range does not match the dimension count",
                ));
            }
        }
        self.layout = subarray.layout();
        self.staged_ranges = subarray.ranges().to_vec();
        Ok(())
    }

    /// Registers the result buffer of a fixed-size attribute (also valid for
    /// the coordinates pseudo-attribute).
    pub fn set_buffer(&mut self, attr: &str, capacity: usize) -> Result<()> {
        let schema = self.require_schema()?;
        if !schema.is_attribute(attr) {
            return Err(Error::invalid_attribute(attr));
        }
        if schema.var_size(attr)? {
            return Err(Error::type_mismatch(format!(
                "attribute '{attr}' is var-sized; a fixed buffer was supplied"
            )));
        }
        self.register_buffer(attr, AttributeBuffer::fixed(capacity))
    }

    /// Registers the result buffers of a var-sized attribute.
    pub fn set_buffer_var(
        &mut self,
        attr: &str,
        offsets_capacity: usize,
        values_capacity: usize,
    ) -> Result<()> {
        let schema = self.require_schema()?;
        if !schema.is_attribute(attr) {
            return Err(Error::invalid_attribute(attr));
        }
        if !schema.var_size(attr)? {
            return Err(Error::type_mismatch(format!(
                "attribute '{attr}' is fixed-size; var buffers were supplied"
            )));
        }
        self.register_buffer(attr, AttributeBuffer::var(offsets_capacity, values_capacity))
    }

    fn register_buffer(&mut self, attr: &str, buffer: AttributeBuffer) -> Result<()> {
        let exists = self.buffers.contains_key(attr);
        if self.initialized && !exists {
            return Err(Error::reader_state(format!(
                "cannot register new attribute '{attr}' after initialization"
            )));
        }
        if !exists {
            self.attr_order.push(attr.to_string());
        }
        if let Some(state) = self.state.as_mut() {
            if buffer.is_var() {
                state.partitioner.set_result_budget_var(
                    attr,
                    buffer.original_size(),
                    buffer.original_var_size(),
                );
            } else {
                state
                    .partitioner
                    .set_result_budget(attr, buffer.original_size());
            }
        }
        self.buffers.insert(attr.to_string(), buffer);
        Ok(())
    }

    /// On a dense array whose fragments are all sparse, read with sparse
    /// semantics.
    pub fn set_sparse_mode(&mut self, sparse_mode: bool) -> Result<()> {
        let schema = self.require_schema()?;
        if !schema.is_dense() {
            return Err(Error::reader_state(
                "sparse mode is only applicable to dense arrays",
            ));
        }
        if self.fragments.iter().any(|f| f.dense()) {
            return Err(Error::reader_state(
                "sparse mode requires an array with only sparse fragments",
            ));
        }
        self.sparse_mode = sparse_mode;
        Ok(())
    }

    /// The written prefix of an attribute's fixed (or offsets) stream.
    pub fn buffer_bytes(&self, attr: &str) -> Option<&[u8]> {
        self.buffers.get(attr).map(|b| b.bytes())
    }

    /// The written prefix of a var attribute's values stream.
    pub fn buffer_var_bytes(&self, attr: &str) -> Option<&[u8]> {
        self.buffers.get(attr).map(|b| b.var_bytes())
    }

    /// Current `(fixed, var)` byte sizes of an attribute's buffers.
    pub fn buffer_sizes(&self, attr: &str) -> Option<(u64, u64)> {
        self.buffers.get(attr).map(|b| (b.size(), b.var_size()))
    }

    /// Validates the configuration, reads the memory budgets, and seeds the
    /// partitioner with the subarray (the whole domain when none was set).
    pub fn init(&mut self) -> Result<()> {
        let storage = self
            .storage
            .clone()
            .ok_or_else(|| Error::reader_state("storage manager not set"))?;
        let schema = self.require_schema()?;
        if self.buffers.is_empty() {
            return Err(Error::reader_state("no attribute buffers set"));
        }

        let memory_budget = storage.config().get_u64(crate::config::keys::MEMORY_BUDGET)?;
        let memory_budget_var = storage
            .config()
            .get_u64(crate::config::keys::MEMORY_BUDGET_VAR)?;

        // A 1-D read is always a global-order read.
        if schema.dim_num() == 1 {
            self.layout = Layout::GlobalOrder;
        }
        if self.layout == Layout::Unordered && schema.is_dense() && !self.sparse_mode {
            return Err(Error::reader_state(
                "unordered layout is only valid for sparse reads",
            ));
        }

        if self.staged_ranges.is_empty() {
            self.staged_ranges = vec![schema.domain().bounds()];
        }
        let subarray = Subarray::with_ranges(self.layout, self.staged_ranges.clone());

        self.state = None;
        if !self.fragments.is_empty() {
            let sparse_read = !schema.is_dense() || self.sparse_mode;
            let mut partitioner = SubarrayPartitioner::new(
                subarray,
                schema.clone(),
                self.fragments.clone(),
                storage.clone(),
                self.attr_order.clone(),
                sparse_read,
            );
            for (attr, buffer) in &self.buffers {
                if buffer.is_var() {
                    partitioner.set_result_budget_var(
                        attr,
                        buffer.original_size(),
                        buffer.original_var_size(),
                    );
                } else {
                    partitioner.set_result_budget(attr, buffer.original_size());
                }
            }
            partitioner.set_memory_budget(memory_budget, memory_budget_var);
            self.state = Some(ReadState {
                partitioner,
                overflowed: false,
                unsplittable: false,
            });
        }
        self.initialized = true;
        Ok(())
    }

    /// True while overflow or remaining partitions mean another `read()`
    /// call can produce more results.
    pub fn incomplete(&self) -> bool {
        match &self.state {
            None => false,
            Some(state) => state.overflowed || !state.partitioner.done(),
        }
    }

    /// Produces the next batch of results into the registered buffers.
    pub fn read(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::reader_state("reader not initialized"));
        }
        if self.state.is_none() {
            // Empty array: nothing to produce.
            self.zero_out_buffer_sizes();
            return Ok(());
        }

        if !self.state.as_ref().expect("state").unsplittable {
            self.state.as_mut().expect("state").partitioner.next()?;
        }

        loop {
            if let Err(e) = self.check_cancelled() {
                self.zero_out_buffer_sizes();
                return Err(e);
            }

            self.state.as_mut().expect("state").overflowed = false;
            self.reset_buffer_sizes();

            let Some(current) = self
                .state
                .as_ref()
                .expect("state")
                .partitioner
                .current()
                .cloned()
            else {
                self.zero_out_buffer_sizes();
                return Ok(());
            };

            let schema = self.require_schema()?;
            let dense_read = schema.is_dense() && !self.sparse_mode;
            let overflowed = match if dense_read {
                self.dense_read(&current)
            } else {
                self.sparse_read(&current)
            } {
                Ok(overflowed) => overflowed,
                Err(e) => {
                    self.zero_out_buffer_sizes();
                    return Err(e);
                }
            };

            let state = self.state.as_mut().expect("state");
            state.overflowed = overflowed;
            if overflowed {
                debug!("partition overflowed; splitting and retrying");
                self.zero_out_buffer_sizes();
                let state = self.state.as_mut().expect("state");
                state.partitioner.split_current()?;
                if state.partitioner.unsplittable() {
                    state.unsplittable = true;
                    return Ok(());
                }
            } else {
                let done = self.state.as_ref().expect("state").partitioner.done();
                if !self.no_results() || done {
                    return Ok(());
                }
                self.state.as_mut().expect("state").partitioner.next()?;
            }
        }
    }

    fn require_schema(&self) -> Result<Arc<ArraySchema<T>>> {
        self.schema
            .clone()
            .ok_or_else(|| Error::reader_state("array schema not set"))
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.cancellation_token().check(),
            None => Ok(()),
        }
    }

    fn reset_buffer_sizes(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.reset_size();
        }
    }

    fn zero_out_buffer_sizes(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.zero_size();
        }
    }

    fn no_results(&self) -> bool {
        self.buffers
            .values()
            .all(|b| b.size() == 0 && b.var_size() == 0)
    }

    fn has_coords(&self) -> bool {
        self.buffers.contains_key(COORDS)
    }

    /// The dense pipeline: sparse-fragment coordinates merged against dense
    /// fragment ranges, then copied per attribute.
    fn dense_read(&mut self, current: &Subarray<T>) -> Result<bool> {
        let schema = self.require_schema()?;
        let storage = self.storage.clone().expect("storage set by init");
        let domain = schema.domain();
        let dim_num = schema.dim_num();
        let pool = storage.reader_thread_pool();
        let ctx = FetchContext {
            schema: &schema,
            fragments: &self.fragments,
            storage: &storage,
            encryption_key: &self.encryption_key,
        };

        // Sparse writes overlapping the partition, with all their streams.
        let overlap = current.compute_tile_overlap(&self.fragments);
        let plan = plan_sparse_tiles(current, &overlap, &self.fragments);
        let mut tiles = plan.tiles;
        let mut tile_map = plan.tile_map;
        if !tiles.is_empty() {
            let mut attrs: Vec<String> = self
                .attr_order
                .iter()
                .filter(|a| a.as_str() != COORDS)
                .cloned()
                .collect();
            attrs.push(COORDS.to_string());
            ctx.read_and_filter_all(&attrs, &mut tiles)?;
        }

        let mut coords = CoordSet::new(dim_num);
        for (r, range) in current.ranges().iter().enumerate() {
            gather_range_coords(
                &mut coords,
                &overlap,
                &tile_map,
                &tiles,
                &self.fragments,
                range,
                r,
            )?;
        }
        if !(self.fragments.len() == 1 && self.layout == Layout::GlobalOrder) {
            coords.sort(pool, self.layout, domain);
            coords.dedup();
        }
        self.check_cancelled()?;

        // Merge dense fragment ranges per tile window, fold the coords in.
        let same = layout_matches_cell_order(self.layout, domain.cell_order());
        let dense_start = tiles.len();
        let mut cell_ranges: Vec<CellRange> = Vec::new();
        let mut coord_idx = 0usize;
        for range in current.ranges() {
            let windows = compute_slabs(domain, range, self.layout)?;
            let mut dense_ranges: Vec<DenseRange> = Vec::new();
            if same {
                let mut cursor_map: AHashMap<Vec<u64>, Vec<FragCursor>> = AHashMap::new();
                for window in &windows {
                    if !cursor_map.contains_key(&window.tile_coords) {
                        let cursors = fragment_cursors(
                            domain,
                            &self.fragments,
                            range,
                            &window.tile_coords,
                            self.layout,
                        )?;
                        cursor_map.insert(window.tile_coords.clone(), cursors);
                    }
                    let cursors = cursor_map.get_mut(&window.tile_coords).expect("cursors");
                    merge_window(
                        &window.tile_coords,
                        cursors,
                        window.start,
                        window.end,
                        &mut dense_ranges,
                    );
                }
            } else {
                // Foreign layout: unit windows, newest covering fragment wins.
                for window in &windows {
                    let winner = self
                        .fragments
                        .iter()
                        .enumerate()
                        .rev()
                        .find(|(_, f)| {
                            f.dense()
                                && f.non_empty_domain().contains_coords(&window.coords_start)
                        })
                        .map(|(f, _)| f);
                    dense_ranges.push(DenseRange {
                        fragment: winner,
                        tile_coords: window.tile_coords.clone(),
                        start: window.start,
                        end: window.end,
                    });
                }
            }
            assemble_cell_ranges(
                domain,
                &self.fragments,
                &dense_ranges,
                &coords,
                &mut coord_idx,
                &mut tiles,
                &mut tile_map,
                &mut cell_ranges,
            )?;
        }
        self.check_cancelled()?;

        // Fetch the dense tiles the merge decided to touch.
        let attrs: Vec<String> = self
            .attr_order
            .iter()
            .filter(|a| a.as_str() != COORDS)
            .cloned()
            .collect();
        if dense_start < tiles.len() {
            ctx.read_and_filter_all(&attrs, &mut tiles[dense_start..])?;
        }

        for attr in &attrs {
            if Self::copy_cells_into(&schema, pool, &mut self.buffers, attr, &tiles, &cell_ranges)? {
                return Ok(true);
            }
        }

        if self.has_coords() && self.fill_coords(current)? {
            return Ok(true);
        }
        Ok(false)
    }

    /// The sparse pipeline: coordinates per range, sort/dedup, maximal cell
    /// ranges, then one attribute at a time to bound memory.
    fn sparse_read(&mut self, current: &Subarray<T>) -> Result<bool> {
        let schema = self.require_schema()?;
        let storage = self.storage.clone().expect("storage set by init");
        let domain = schema.domain();
        let dim_num = schema.dim_num();
        let pool = storage.reader_thread_pool();
        let ctx = FetchContext {
            schema: &schema,
            fragments: &self.fragments,
            storage: &storage,
            encryption_key: &self.encryption_key,
        };

        let overlap = current.compute_tile_overlap(&self.fragments);
        let plan = plan_sparse_tiles(current, &overlap, &self.fragments);
        let mut tiles = plan.tiles;
        ctx.read_coords(&mut tiles)?;

        // Coordinates per range, deduped where several fragments contribute.
        let range_sets = data_parallel::map(pool, 0..current.range_num(), |r| -> Result<CoordSet<T>> {
            let mut set = CoordSet::new(dim_num);
            gather_range_coords(
                &mut set,
                &overlap,
                &plan.tile_map,
                &tiles,
                &self.fragments,
                current.range(r),
                r,
            )?;
            if !plan.single_fragment[r] {
                set.sort(pool, self.layout, domain);
                set.dedup();
            }
            Ok(set)
        });
        let mut coords = CoordSet::new(dim_num);
        for set in range_sets {
            coords.append(set?);
        }
        if matches!(self.layout, Layout::RowMajor | Layout::ColMajor) {
            coords.sort(pool, self.layout, domain);
        }
        self.check_cancelled()?;

        let cell_ranges = compute_cell_ranges(&coords)?;
        drop(coords);

        // Coordinates first, then release their tiles.
        if self.has_coords()
            && Self::copy_cells_into(&schema, pool, &mut self.buffers, COORDS, &tiles, &cell_ranges)?
        {
            return Ok(true);
        }
        clear_tiles(COORDS, &mut tiles);

        let attrs: Vec<String> = self
            .attr_order
            .iter()
            .filter(|a| a.as_str() != COORDS)
            .cloned()
            .collect();
        for attr in &attrs {
            ctx.read_tiles(attr, &mut tiles)?;
            self.check_cancelled()?;
            ctx.filter_tiles(attr, &mut tiles)?;
            let overflowed =
                Self::copy_cells_into(&schema, pool, &mut self.buffers, attr, &tiles, &cell_ranges)?;
            clear_tiles(attr, &mut tiles);
            if overflowed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Dispatches one attribute's copy; a free-standing helper so callers
    /// holding shared borrows of the reader's other fields can still hand
    /// out the buffer mutably.
    fn copy_cells_into(
        schema: &ArraySchema<T>,
        pool: &lattice_workflow::ThreadPool,
        buffers: &mut AHashMap<String, AttributeBuffer>,
        attr: &str,
        tiles: &[OverlappingTile],
        cell_ranges: &[CellRange],
    ) -> Result<bool> {
        let buffer = buffers
            .get_mut(attr)
            .ok_or_else(|| Error::reader_state(format!("no buffer for attribute '{attr}'")))?;
        if schema.var_size(attr)? {
            copy_var_cells(pool, tiles, attr, cell_ranges, buffer)
        } else {
            let cell_size = schema.cell_size(attr)?;
            let fill_value = schema.datatype(attr)?.fill_value();
            copy_fixed_cells(pool, tiles, attr, cell_size, fill_value, cell_ranges, buffer)
        }
    }

    /// Synthesizes the coordinate tuples of a dense read's result cells from
    /// the partition's cell slabs.
    fn fill_coords(&mut self, current: &Subarray<T>) -> Result<bool> {
        let schema = self.require_schema()?;
        let domain = schema.domain();
        let elem = T::DATATYPE.size() as usize;
        let coords_size = schema.coords_size() as usize;
        let buffer = self.buffers.get_mut(COORDS).expect("coords buffer");
        let capacity = buffer.size();

        let mut written = 0usize;
        for range in current.ranges() {
            for slab in compute_slabs(domain, range, self.layout)? {
                let bytes = slab.len() as usize * coords_size;
                if written + bytes > capacity as usize {
                    return Ok(true);
                }
                let out = &mut buffer.data_mut()[written..written + bytes];
                let mut at = 0usize;
                for i in 0..slab.len() {
                    let mut tuple = slab.coords_start.clone();
                    tuple[slab.fast_dim] = tuple[slab.fast_dim].advance(i);
                    for value in &tuple {
                        out[at..at + elem].copy_from_slice(bytemuck::bytes_of(value));
                        at += elem;
                    }
                }
                written += bytes;
            }
        }
        buffer.set_size(written as u64);
        Ok(false)
    }
}

/// Appends the coordinates of every overlapping tile of one range, merging
/// the full-tile runs and single tiles of each fragment in tile order so a
/// single-fragment global-order read needs no sort afterwards.
fn gather_range_coords<T: CoordType>(
    set: &mut CoordSet<T>,
    overlap: &TileOverlap,
    tile_map: &TileMap,
    tiles: &[OverlappingTile],
    fragments: &[Arc<FragmentMetadata<T>>],
    range: &NdRange<T>,
    r: usize,
) -> Result<()> {
    for f in 0..fragments.len() {
        if fragments[f].dense() {
            continue;
        }
        let ov = overlap.range(f, r);
        let runs = &ov.tile_ranges;
        let singles = &ov.tiles;
        let (mut i, mut j) = (0usize, 0usize);
        while i < runs.len() || j < singles.len() {
            let take_run = j >= singles.len() || (i < runs.len() && runs[i].0 < singles[j].0);
            if take_run {
                for t in runs[i].0..=runs[i].1 {
                    let idx = tile_map[&(f, t)];
                    set.gather_from_tile(idx, &tiles[idx], None)?;
                }
                i += 1;
            } else {
                let (t, ratio) = singles[j];
                let idx = tile_map[&(f, t)];
                let filter = if ratio >= 1.0 { None } else { Some(range) };
                set.gather_from_tile(idx, &tiles[idx], filter)?;
                j += 1;
            }
        }
    }
    Ok(())
}
