//! Dense read machinery: cell-slab iteration over a partition, the
//! priority-queue merge of per-fragment dense ranges, and the intersection
//! of merged ranges with sparse-fragment coordinates.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use lattice_common::{error::Error, Result};

use crate::coord::CoordType;
use crate::domain::{Domain, NdRange};
use crate::dtype::{CellOrder, Layout};
use crate::fragment::FragmentMetadata;
use crate::read::coords::CoordSet;
use crate::read::planner::{OverlappingTile, TileMap};
use crate::read::CellRange;

/// A contiguous run of cells within one tile: positions `start..=end` in the
/// tile's cell order, starting at coordinates `coords_start` and running
/// along `fast_dim`.
#[derive(Debug, Clone)]
pub struct Slab<T> {
    pub tile_coords: Vec<u64>,
    pub start: u64,
    pub end: u64,
    pub coords_start: Vec<T>,
    pub fast_dim: usize,
}

impl<T> Slab<T> {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// True when cell positions along the layout's fastest dimension are
/// contiguous in the schema's cell order.
pub fn layout_matches_cell_order(layout: Layout, cell_order: CellOrder) -> bool {
    match layout {
        Layout::GlobalOrder => true,
        Layout::RowMajor => cell_order == CellOrder::RowMajor,
        Layout::ColMajor => cell_order == CellOrder::ColMajor,
        Layout::Unordered => false,
    }
}

/// Enumerates the cell slabs of `range` in `layout` order.
///
/// When the layout's fastest dimension is not the cell order's, slabs
/// degrade to single cells so that their tile positions stay meaningful.
pub fn compute_slabs<T: CoordType>(
    domain: &Domain<T>,
    range: &NdRange<T>,
    layout: Layout,
) -> Result<Vec<Slab<T>>> {
    let dim_num = domain.dim_num();
    let extents = domain
        .tile_extents()
        .ok_or_else(|| Error::reader_state("dense iteration requires tile extents"))?
        .to_vec();
    let same = layout_matches_cell_order(layout, domain.cell_order());

    let dims_order: Vec<usize> = match layout {
        Layout::RowMajor => (0..dim_num).collect(),
        Layout::ColMajor => (0..dim_num).rev().collect(),
        Layout::GlobalOrder => domain.cell_order_dims(),
        Layout::Unordered => {
            return Err(Error::reader_state("unordered layout on a dense read"));
        }
    };
    let fast_dim = *dims_order.last().expect("at least one dimension");
    let slow_dims = &dims_order[..dim_num - 1];

    let mut slabs = Vec::new();
    if layout == Layout::GlobalOrder {
        // Tile-major: visit each overlapped tile, then its slabs in cell order.
        let tile_domain = domain.tile_domain(range)?;
        let mut tc: Vec<u64> = tile_domain.iter().map(|&(lo, _)| lo).collect();
        loop {
            let tile_rect = domain.tile_subarray(&tc)?;
            if let Some(sub) = range.intersection(&tile_rect) {
                emit_rows(domain, &sub, slow_dims, fast_dim, same, &extents, &mut slabs)?;
            }
            if !domain.next_tile_coords(&tile_domain, &mut tc) {
                break;
            }
        }
    } else {
        emit_rows(domain, range, slow_dims, fast_dim, same, &extents, &mut slabs)?;
    }
    Ok(slabs)
}

/// Walks `range` row by row (odometer over `slow_dims`), splitting each row
/// at tile boundaries.
fn emit_rows<T: CoordType>(
    domain: &Domain<T>,
    range: &NdRange<T>,
    slow_dims: &[usize],
    fast_dim: usize,
    same: bool,
    extents: &[T],
    slabs: &mut Vec<Slab<T>>,
) -> Result<()> {
    let dim_num = domain.dim_num();
    let mut coords: Vec<T> = (0..dim_num).map(|d| range.lo(d)).collect();
    loop {
        // One row: fast_dim spans [range.lo, range.hi], split per tile.
        let mut c = range.lo(fast_dim);
        let hi = range.hi(fast_dim);
        loop {
            coords[fast_dim] = c;
            let dom_lo = domain.dims()[fast_dim].bounds[0];
            let tile = c.tile_index(dom_lo, extents[fast_dim]);
            // End coordinate of this tile along fast_dim.
            let extent_cells = extents[fast_dim].steps_from(bytemuck::Zeroable::zeroed());
            let tile_end = dom_lo.advance((tile + 1) * extent_cells - 1);
            let seg_hi = if hi <= tile_end { hi } else { tile_end };
            let seg_len = seg_hi.steps_from(c) + 1;

            let mut tc = vec![0u64; dim_num];
            domain.tile_coords(&coords, &mut tc)?;
            let start = domain.cell_pos_in_tile(&coords)?;

            if same {
                slabs.push(Slab {
                    tile_coords: tc,
                    start,
                    end: start + seg_len - 1,
                    coords_start: coords.clone(),
                    fast_dim,
                });
            } else {
                // Unit slabs keep positions exact under a foreign layout.
                for i in 0..seg_len {
                    let mut cell = coords.clone();
                    cell[fast_dim] = c.advance(i);
                    let pos = domain.cell_pos_in_tile(&cell)?;
                    slabs.push(Slab {
                        tile_coords: tc.clone(),
                        start: pos,
                        end: pos,
                        coords_start: cell,
                        fast_dim,
                    });
                }
            }
            if seg_hi >= hi {
                break;
            }
            c = seg_hi.next_up();
        }

        // Odometer over the slow dimensions, innermost last.
        let mut advanced = false;
        for &d in slow_dims.iter().rev() {
            if coords[d] < range.hi(d) {
                coords[d] = coords[d].next_up();
                advanced = true;
                break;
            }
            coords[d] = range.lo(d);
        }
        if !advanced {
            break;
        }
    }
    Ok(())
}

/// Lazy per-fragment sequence of `(start, end)` tile positions, sorted
/// ascending; `None` slots are sparse fragments (always exhausted).
pub struct FragCursor {
    slabs: Vec<(u64, u64)>,
    idx: usize,
}

impl FragCursor {
    pub fn exhausted() -> FragCursor {
        FragCursor {
            slabs: Vec::new(),
            idx: 0,
        }
    }

    pub fn new(slabs: Vec<(u64, u64)>) -> FragCursor {
        FragCursor { slabs, idx: 0 }
    }

    fn peek(&self) -> Option<(u64, u64)> {
        self.slabs.get(self.idx).copied()
    }

    fn advance(&mut self) {
        self.idx += 1;
    }
}

/// Builds one cursor per fragment for the given tile: the slabs of
/// `range ∩ tile ∩ fragment domain`.
pub fn fragment_cursors<T: CoordType>(
    domain: &Domain<T>,
    fragments: &[Arc<FragmentMetadata<T>>],
    range: &NdRange<T>,
    tile_coords: &[u64],
    layout: Layout,
) -> Result<Vec<FragCursor>> {
    let tile_rect = domain.tile_subarray(tile_coords)?;
    let mut cursors = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if !fragment.dense() {
            cursors.push(FragCursor::exhausted());
            continue;
        }
        let within = range
            .intersection(&tile_rect)
            .and_then(|r| r.intersection(fragment.non_empty_domain()));
        match within {
            Some(sub) => {
                let slabs = compute_slabs(domain, &sub, layout)?;
                cursors.push(FragCursor::new(
                    slabs.iter().map(|s| (s.start, s.end)).collect(),
                ));
            }
            None => cursors.push(FragCursor::exhausted()),
        }
    }
    Ok(cursors)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    start: u64,
    end: u64,
    fragment: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &HeapEntry) -> Ordering {
        // Pop order: smallest start first; ties pop the newest fragment,
        // which is what makes newer-wins hold for aligned ranges.
        other
            .start
            .cmp(&self.start)
            .then(self.fragment.cmp(&other.fragment))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &HeapEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One merged dense range: the winning fragment (`None` = fill) over tile
/// positions `start..=end` of the tile at `tile_coords`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseRange {
    pub fragment: Option<usize>,
    pub tile_coords: Vec<u64>,
    pub start: u64,
    pub end: u64,
}

/// Merges the per-fragment cursors over the window `[start, end]` of one
/// tile, emitting a totally ordered cover with fill gaps.
pub fn merge_window(
    tile_coords: &[u64],
    cursors: &mut [FragCursor],
    win_start: u64,
    win_end: u64,
    out: &mut Vec<DenseRange>,
) {
    let mut heap = BinaryHeap::new();
    for (f, cursor) in cursors.iter().enumerate() {
        if let Some((s, e)) = cursor.peek() {
            heap.push(HeapEntry {
                start: s,
                end: e,
                fragment: f,
            });
        }
    }

    let emit = |out: &mut Vec<DenseRange>, fragment: Option<usize>, s: u64, e: u64| {
        out.push(DenseRange {
            fragment,
            tile_coords: tile_coords.to_vec(),
            start: s,
            end: e,
        });
    };

    let mut start = win_start;
    while let Some(mut popped) = heap.pop() {
        if start > win_end {
            return;
        }

        // Stale range, fully behind the window cursor: advance its fragment.
        if popped.end < start {
            let cursor = &mut cursors[popped.fragment];
            cursor.advance();
            if let Some((s, e)) = cursor.peek() {
                heap.push(HeapEntry {
                    start: s,
                    end: e,
                    fragment: popped.fragment,
                });
            }
            continue;
        }

        // Everything else starts past the window: fill and stop.
        if popped.start > win_end {
            emit(out, None, start, win_end);
            return;
        }

        // Gap before the popped range.
        if popped.start > start {
            let new_end = win_end.min(popped.start - 1);
            emit(out, None, start, new_end);
            start = new_end + 1;
            if start > win_end {
                return;
            }
        }

        // Drop older ranges fully shadowed by the popped one.
        while let Some(top) = heap.peek() {
            if popped.fragment > top.fragment
                && popped.start <= top.start
                && popped.end >= top.end
            {
                heap.pop();
            } else {
                break;
            }
        }

        // A surviving range starting inside the popped one splits it.
        if let Some(top) = heap.peek().copied() {
            if top.start <= win_end && top.start > popped.start && top.start <= popped.end {
                let new_end = top.start - 1;
                emit(out, Some(popped.fragment), start, new_end);
                start = new_end + 1;
                if start > win_end {
                    return;
                }
                popped.start = top.start;
                heap.push(popped);
                continue;
            }
        }

        let new_end = win_end.min(popped.end);
        emit(out, Some(popped.fragment), start, new_end);
        start = new_end + 1;
        if new_end == popped.end {
            let cursor = &mut cursors[popped.fragment];
            cursor.advance();
            if let Some((s, e)) = cursor.peek() {
                heap.push(HeapEntry {
                    start: s,
                    end: e,
                    fragment: popped.fragment,
                });
            }
        }
        if start > win_end {
            return;
        }
    }

    if start <= win_end {
        emit(out, None, start, win_end);
    }
}

/// Walks the merged dense ranges in layout order, materializes arena tiles
/// for the winning fragments, folds in the sorted sparse coordinates, and
/// emits the final copyable cell ranges.
///
/// A sparse coordinate inside a range of a strictly newer dense fragment is
/// dropped; otherwise it splits the range, contributing a unary range
/// sourced from its own tile.
pub fn assemble_cell_ranges<T: CoordType>(
    domain: &Domain<T>,
    fragments: &[Arc<FragmentMetadata<T>>],
    dense_ranges: &[DenseRange],
    coords: &CoordSet<T>,
    coord_idx: &mut usize,
    tiles: &mut Vec<OverlappingTile>,
    tile_map: &mut TileMap,
    out: &mut Vec<CellRange>,
) -> Result<()> {
    if dense_ranges.is_empty() {
        return Ok(());
    }
    let dim_num = domain.dim_num();

    let mut resolve_tile = |dr: &DenseRange,
                            tiles: &mut Vec<OverlappingTile>,
                            tile_map: &mut TileMap|
     -> Result<Option<usize>> {
        match dr.fragment {
            None => Ok(None),
            Some(f) => {
                let tile_idx = fragments[f].tile_pos(domain, &dr.tile_coords)?;
                let arena_idx = *tile_map.entry((f, tile_idx)).or_insert_with(|| {
                    tiles.push(OverlappingTile::new(f, tile_idx, false));
                    tiles.len() - 1
                });
                Ok(Some(arena_idx))
            }
        }
    };

    let mut coord_tc = vec![0u64; dim_num];

    let mut cur_tile = resolve_tile(&dense_ranges[0], tiles, tile_map)?;
    let mut cur_tile_coords = dense_ranges[0].tile_coords.clone();
    let mut start = dense_ranges[0].start;
    let mut end = dense_ranges[0].end;

    for dr in &dense_ranges[1..] {
        let tile = resolve_tile(dr, tiles, tile_map)?;
        // Contiguous continuation within the same tile extends the run; two
        // fill runs merge only within the same dense tile.
        if tile == cur_tile
            && (tile.is_some() || dr.tile_coords == cur_tile_coords)
            && dr.start == end + 1
        {
            end = dr.end;
            continue;
        }

        handle_coords_in_range(
            domain,
            tiles,
            coords,
            coord_idx,
            &mut coord_tc,
            cur_tile,
            &cur_tile_coords,
            &mut start,
            end,
            out,
        )?;
        if start <= end {
            out.push(CellRange {
                tile: cur_tile,
                start,
                end,
            });
        }

        cur_tile = tile;
        cur_tile_coords = dr.tile_coords.clone();
        start = dr.start;
        end = dr.end;
    }

    handle_coords_in_range(
        domain,
        tiles,
        coords,
        coord_idx,
        &mut coord_tc,
        cur_tile,
        &cur_tile_coords,
        &mut start,
        end,
        out,
    )?;
    if start <= end {
        out.push(CellRange {
            tile: cur_tile,
            start,
            end,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_coords_in_range<T: CoordType>(
    domain: &Domain<T>,
    tiles: &[OverlappingTile],
    coords: &CoordSet<T>,
    coord_idx: &mut usize,
    coord_tc: &mut [u64],
    cur_tile: Option<usize>,
    cur_tile_coords: &[u64],
    start: &mut u64,
    end: u64,
    out: &mut Vec<CellRange>,
) -> Result<()> {
    while *coord_idx < coords.len() {
        let entry = coords.entries()[*coord_idx];
        let tuple = coords.coords_of(&entry);
        domain.tile_coords(tuple, coord_tc)?;
        if coord_tc != cur_tile_coords {
            break;
        }
        let pos = domain.cell_pos_in_tile(tuple)?;
        if pos < *start || pos > end {
            break;
        }
        // A strictly newer dense fragment shadows the sparse write.
        if let Some(arena_idx) = cur_tile {
            if (entry.fragment as usize) < tiles[arena_idx].fragment {
                *coord_idx += 1;
                continue;
            }
        }
        if pos > *start {
            out.push(CellRange {
                tile: cur_tile,
                start: *start,
                end: pos - 1,
            });
        }
        out.push(CellRange::tile(entry.tile as usize, entry.pos, entry.pos));
        *start = pos + 1;
        *coord_idx += 1;
    }
    Ok(())
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

    #[test]
    fn slabs_split_rows_at_tile_boundaries() {
        let dom = domain();
        let range = NdRange::new(vec![2, 3, 4, 6]);
        let slabs = compute_slabs(&dom, &range, Layout::RowMajor).unwrap();
        // Two rows, each split 4 | 5..6.
        assert_eq!(slabs.len(), 4);
        assert_eq!(slabs[0].tile_coords, vec![0, 0]);
        assert_eq!((slabs[0].start, slabs[0].end), (2 * 5 + 4, 2 * 5 + 4));
        assert_eq!(slabs[1].tile_coords, vec![0, 1]);
        assert_eq!((slabs[1].start, slabs[1].end), (2 * 5 + 0, 2 * 5 + 1));
        assert_eq!(slabs[2].tile_coords, vec![0, 0]);
        assert_eq!((slabs[2].start, slabs[2].end), (3 * 5 + 4, 3 * 5 + 4));
    }

    #[test]
    fn global_order_slabs_visit_tiles_in_cell_order() {
        let dom = domain();
        let range = NdRange::new(vec![4, 5, 4, 5]);
        let slabs = compute_slabs(&dom, &range, Layout::GlobalOrder).unwrap();
        let tiles: Vec<Vec<u64>> = slabs.iter().map(|s| s.tile_coords.clone()).collect();
        assert_eq!(
            tiles,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn merge_prefers_newer_fragment_on_equal_start() {
        let mut cursors = vec![
            FragCursor::new(vec![(0, 9)]),
            FragCursor::new(vec![(0, 9)]),
        ];
        let mut out = Vec::new();
        merge_window(&[0, 0], &mut cursors, 0, 9, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fragment, Some(1));
        assert_eq!((out[0].start, out[0].end), (0, 9));
    }

    #[test]
    fn merge_emits_fill_for_gaps() {
        let mut cursors = vec![FragCursor::new(vec![(3, 4)])];
        let mut out = Vec::new();
        merge_window(&[0, 0], &mut cursors, 0, 9, &mut out);
        assert_eq!(
            out.iter()
                .map(|r| (r.fragment, r.start, r.end))
                .collect::<Vec<_>>(),
            vec![(None, 0, 2), (Some(0), 3, 4), (None, 5, 9)]
        );
    }

    #[test]
    fn merge_splits_older_range_around_newer_one() {
        // Older fragment 0 covers 0..9; newer fragment 1 covers 4..6.
        let mut cursors = vec![
            FragCursor::new(vec![(0, 9)]),
            FragCursor::new(vec![(4, 6)]),
        ];
        let mut out = Vec::new();
        merge_window(&[0, 0], &mut cursors, 0, 9, &mut out);
        assert_eq!(
            out.iter()
                .map(|r| (r.fragment, r.start, r.end))
                .collect::<Vec<_>>(),
            vec![(Some(0), 0, 3), (Some(1), 4, 6), (Some(0), 7, 9)]
        );
    }

    #[test]
    fn merge_drops_older_contained_range() {
        // Newer fragment 1 covers 0..9; older fragment 0 covers 4..6.
        let mut cursors = vec![
            FragCursor::new(vec![(4, 6)]),
            FragCursor::new(vec![(0, 9)]),
        ];
        let mut out = Vec::new();
        merge_window(&[0, 0], &mut cursors, 0, 9, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fragment, Some(1));
    }

    #[test]
    fn merge_windows_share_cursor_state() {
        let mut cursors = vec![FragCursor::new(vec![(0, 4), (5, 9)])];
        let mut out = Vec::new();
        merge_window(&[0, 0], &mut cursors, 0, 4, &mut out);
        merge_window(&[0, 0], &mut cursors, 5, 9, &mut out);
        assert_eq!(
            out.iter()
                .map(|r| (r.fragment, r.start, r.end))
                .collect::<Vec<_>>(),
            vec![(Some(0), 0, 4), (Some(0), 5, 9)]
        );
    }
}
