//! Coordinate engine: per-tile coordinate extraction, layout-driven sort,
//! fragment-precedence dedup, and maximal cell-range construction.

use std::cmp::Ordering;

use lattice_common::{error::Error, Result};
use lattice_workflow::{sort::parallel_sort_by, ThreadPool};

use crate::coord::CoordType;
use crate::domain::{Domain, NdRange};
use crate::dtype::{CellOrder, Layout};
use crate::read::planner::OverlappingTile;
use crate::read::CellRange;
use crate::schema::COORDS;

/// One result coordinate: the arena tile it came from, its cell position in
/// that tile, and an offset into the set's shared coordinate storage.
#[derive(Debug, Clone, Copy)]
pub struct CoordEntry {
    pub tile: u32,
    pub fragment: u32,
    pub pos: u64,
    data_off: u32,
}

/// A flat set of result coordinates with shared tuple storage.
#[derive(Debug)]
pub struct CoordSet<T> {
    entries: Vec<CoordEntry>,
    data: Vec<T>,
    dim_num: usize,
}

impl<T: CoordType> CoordSet<T> {
    pub fn new(dim_num: usize) -> CoordSet<T> {
        CoordSet {
            entries: Vec::new(),
            data: Vec::new(),
            dim_num,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim_num(&self) -> usize {
        self.dim_num
    }

    pub fn entries(&self) -> &[CoordEntry] {
        &self.entries
    }

    pub fn coords_of(&self, entry: &CoordEntry) -> &[T] {
        let off = entry.data_off as usize;
        &self.data[off..off + self.dim_num]
    }

    pub fn push(&mut self, tile: usize, fragment: usize, pos: u64, coords: &[T]) {
        debug_assert_eq!(coords.len(), self.dim_num);
        let data_off = self.data.len() as u32;
        self.data.extend_from_slice(coords);
        self.entries.push(CoordEntry {
            tile: tile as u32,
            fragment: fragment as u32,
            pos,
            data_off,
        });
    }

    /// Appends every coordinate of the arena tile at `arena_idx`, optionally
    /// keeping only those contained in `filter`.
    pub fn gather_from_tile(
        &mut self,
        arena_idx: usize,
        tile: &OverlappingTile,
        filter: Option<&NdRange<T>>,
    ) -> Result<()> {
        let pair = tile
            .attr_tiles
            .get(COORDS)
            .ok_or_else(|| Error::internal("coordinate tile not fetched"))?;
        let coords_tile = &pair.fixed;
        let cell_num = coords_tile.size() / (self.dim_num as u64 * T::DATATYPE.size());
        let mut tuple = vec![bytemuck::Zeroable::zeroed(); self.dim_num];
        for i in 0..cell_num {
            coords_tile.read_coords(i, &mut tuple);
            if let Some(range) = filter {
                if !range.contains_coords(&tuple) {
                    continue;
                }
            }
            self.push(arena_idx, tile.fragment, i, &tuple);
        }
        Ok(())
    }

    /// Moves every entry of `other` into `self`.
    pub fn append(&mut self, other: CoordSet<T>) {
        debug_assert_eq!(self.dim_num, other.dim_num);
        let base = self.data.len() as u32;
        self.data.extend_from_slice(&other.data);
        self.entries.extend(other.entries.into_iter().map(|mut e| {
            e.data_off += base;
            e
        }));
    }

    /// Stable parallel sort by the layout's comparator. `Unordered` falls
    /// back to the cell order (used only for per-range dedup).
    pub fn sort(&mut self, pool: &ThreadPool, layout: Layout, domain: &Domain<T>) {
        let dim_num = self.dim_num;
        let data = std::mem::take(&mut self.data);
        let effective = match layout {
            Layout::Unordered => match domain.cell_order() {
                CellOrder::RowMajor => Layout::RowMajor,
                CellOrder::ColMajor => Layout::ColMajor,
            },
            other => other,
        };
        match effective {
            Layout::RowMajor => {
                parallel_sort_by(pool, &mut self.entries, |a, b| {
                    cmp_lex(&data, dim_num, a, b, false)
                });
            }
            Layout::ColMajor => {
                parallel_sort_by(pool, &mut self.entries, |a, b| {
                    cmp_lex(&data, dim_num, a, b, true)
                });
            }
            Layout::GlobalOrder => {
                let order = domain.cell_order_dims();
                let lows: Vec<T> = (0..dim_num).map(|d| domain.dims()[d].bounds[0]).collect();
                let extents = domain.tile_extents().map(|e| e.to_vec());
                parallel_sort_by(pool, &mut self.entries, |a, b| {
                    cmp_global(&data, dim_num, a, b, &order, &lows, extents.as_deref())
                });
            }
            Layout::Unordered => unreachable!(),
        }
        self.data = data;
    }

    /// Compacting dedup over a sorted set: among adjacent entries with equal
    /// coordinates, the one from the highest fragment survives (first
    /// occurrence wins within one fragment).
    pub fn dedup(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let mut kept: Vec<CoordEntry> = Vec::with_capacity(self.entries.len());
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            match kept.last_mut() {
                Some(last) if self.coords_eq(last, &entry) => {
                    if entry.fragment > last.fragment {
                        *last = entry;
                    }
                }
                _ => kept.push(entry),
            }
        }
        self.entries = kept;
    }

    fn coords_eq(&self, a: &CoordEntry, b: &CoordEntry) -> bool {
        let (ao, bo) = (a.data_off as usize, b.data_off as usize);
        self.data[ao..ao + self.dim_num] == self.data[bo..bo + self.dim_num]
    }
}

fn cmp_lex<T: CoordType>(
    data: &[T],
    dim_num: usize,
    a: &CoordEntry,
    b: &CoordEntry,
    reversed: bool,
) -> Ordering {
    let ac = &data[a.data_off as usize..a.data_off as usize + dim_num];
    let bc = &data[b.data_off as usize..b.data_off as usize + dim_num];
    for i in 0..dim_num {
        let d = if reversed { dim_num - 1 - i } else { i };
        match ac[d].partial_cmp(&bc[d]).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_global<T: CoordType>(
    data: &[T],
    dim_num: usize,
    a: &CoordEntry,
    b: &CoordEntry,
    order: &[usize],
    lows: &[T],
    extents: Option<&[T]>,
) -> Ordering {
    let ac = &data[a.data_off as usize..a.data_off as usize + dim_num];
    let bc = &data[b.data_off as usize..b.data_off as usize + dim_num];
    if let Some(extents) = extents {
        // Tile-major first.
        for &d in order {
            let at = ac[d].tile_index(lows[d], extents[d]);
            let bt = bc[d].tile_index(lows[d], extents[d]);
            match at.cmp(&bt) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
    }
    // Within a tile (or without extents), cell order decides.
    for &d in order {
        match ac[d].partial_cmp(&bc[d]).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Collapses sorted, deduped coordinates into maximal per-tile cell ranges.
pub fn compute_cell_ranges<T: CoordType>(coords: &CoordSet<T>) -> Result<Vec<CellRange>> {
    let mut ranges = Vec::new();
    if coords.is_empty() {
        return Ok(ranges);
    }
    let entries = coords.entries();
    let mut tile = entries[0].tile;
    let mut start = entries[0].pos;
    let mut end = start;
    for entry in &entries[1..] {
        if entry.tile == tile && entry.pos == end + 1 {
            end = entry.pos;
        } else {
            ranges.push(CellRange::tile(tile as usize, start, end));
            tile = entry.tile;
            start = entry.pos;
            end = start;
        }
    }
    ranges.push(CellRange::tile(tile as usize, start, end));
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Dimension;
    use crate::dtype::CellOrder;

    fn domain() -> Domain<i32> {
        Domain::new(
            vec![Dimension::new("r", 0, 9), Dimension::new("c", 0, 9)],
            Some(vec![5, 5]),
            CellOrder::RowMajor,
        )
        .unwrap()
    }

    fn pool() -> ThreadPool {
        ThreadPool::new(2)
    }

    #[test]
    fn row_major_sort_orders_lexicographically() {
        let mut set = CoordSet::<i32>::new(2);
        set.push(0, 0, 0, &[2, 3]);
        set.push(0, 0, 1, &[0, 9]);
        set.push(0, 0, 2, &[2, 1]);
        set.sort(&pool(), Layout::RowMajor, &domain());
        let coords: Vec<Vec<i32>> = set
            .entries()
            .iter()
            .map(|e| set.coords_of(e).to_vec())
            .collect();
        assert_eq!(coords, vec![vec![0, 9], vec![2, 1], vec![2, 3]]);
    }

    #[test]
    fn col_major_sort_orders_by_last_dimension_first() {
        let mut set = CoordSet::<i32>::new(2);
        set.push(0, 0, 0, &[0, 9]);
        set.push(0, 0, 1, &[5, 1]);
        set.push(0, 0, 2, &[1, 9]);
        set.sort(&pool(), Layout::ColMajor, &domain());
        let coords: Vec<Vec<i32>> = set
            .entries()
            .iter()
            .map(|e| set.coords_of(e).to_vec())
            .collect();
        assert_eq!(coords, vec![vec![5, 1], vec![0, 9], vec![1, 9]]);
    }

    #[test]
    fn global_sort_groups_by_tile_first() {
        let mut set = CoordSet::<i32>::new(2);
        // (6,6) is in tile (1,1); (1,8) in tile (0,1); (2,2) in tile (0,0).
        set.push(0, 0, 0, &[6, 6]);
        set.push(0, 0, 1, &[1, 8]);
        set.push(0, 0, 2, &[2, 2]);
        set.sort(&pool(), Layout::GlobalOrder, &domain());
        let coords: Vec<Vec<i32>> = set
            .entries()
            .iter()
            .map(|e| set.coords_of(e).to_vec())
            .collect();
        assert_eq!(coords, vec![vec![2, 2], vec![1, 8], vec![6, 6]]);
    }

    #[test]
    fn dedup_keeps_highest_fragment() {
        let mut set = CoordSet::<i32>::new(2);
        set.push(0, 0, 5, &[1, 1]);
        set.push(1, 2, 7, &[1, 1]);
        set.push(2, 1, 9, &[1, 1]);
        set.push(0, 0, 6, &[1, 2]);
        set.dedup();
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].fragment, 2);
        assert_eq!(set.entries()[0].pos, 7);
        assert_eq!(set.coords_of(&set.entries()[1]), &[1, 2]);
    }

    #[test]
    fn cell_ranges_are_maximal_runs() {
        let mut set = CoordSet::<i32>::new(1);
        set.push(0, 0, 3, &[0]);
        set.push(0, 0, 4, &[1]);
        set.push(0, 0, 5, &[2]);
        set.push(1, 0, 0, &[3]);
        set.push(0, 0, 9, &[4]);
        let ranges = compute_cell_ranges(&set).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].tile, ranges[0].start, ranges[0].end), (Some(0), 3, 5));
        assert_eq!((ranges[1].tile, ranges[1].start, ranges[1].end), (Some(1), 0, 0));
        assert_eq!((ranges[2].tile, ranges[2].start, ranges[2].end), (Some(0), 9, 9));
    }
}
