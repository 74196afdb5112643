//! Multi-range subarrays and their tile overlap with the fragment stack.

use std::sync::Arc;

use crate::coord::CoordType;
use crate::domain::NdRange;
use crate::dtype::Layout;
use crate::fragment::FragmentMetadata;

/// A set of hyper-rectangles queried under one layout.
///
/// A subarray partition produced by the partitioner is itself a `Subarray`;
/// the pipeline never distinguishes the user subarray from a partition.
#[derive(Debug, Clone)]
pub struct Subarray<T> {
    layout: Layout,
    ranges: Vec<NdRange<T>>,
}

impl<T: CoordType> Subarray<T> {
    pub fn new(layout: Layout, range: NdRange<T>) -> Subarray<T> {
        Subarray {
            layout,
            ranges: vec![range],
        }
    }

    pub fn with_ranges(layout: Layout, ranges: Vec<NdRange<T>>) -> Subarray<T> {
        debug_assert!(!ranges.is_empty());
        Subarray { layout, ranges }
    }

    pub fn add_range(&mut self, range: NdRange<T>) {
        self.ranges.push(range);
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn range_num(&self) -> usize {
        self.ranges.len()
    }

    pub fn range(&self, r: usize) -> &NdRange<T> {
        &self.ranges[r]
    }

    pub fn ranges(&self) -> &[NdRange<T>] {
        &self.ranges
    }

    /// Total integer cells covered; `None` for real coordinate types.
    pub fn cell_num(&self) -> Option<u64> {
        let mut total = 0u64;
        for range in &self.ranges {
            total = total.checked_add(range.cell_num()?)?;
        }
        Some(total)
    }

    /// Computes, per (fragment, range), which sparse tiles overlap: runs of
    /// fully-contained MBRs coalesce into `tile_ranges`, everything else
    /// lands in `tiles` with its coverage ratio. Dense fragments contribute
    /// nothing here; the dense pipeline walks them with range iterators.
    pub fn compute_tile_overlap(&self, fragments: &[Arc<FragmentMetadata<T>>]) -> TileOverlap {
        let mut per_fragment = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let mut per_range = Vec::with_capacity(self.ranges.len());
            for range in &self.ranges {
                let mut overlap = RangeTileOverlap::default();
                if !fragment.dense() {
                    let mut run: Option<(u64, u64)> = None;
                    for (t, mbr) in fragment.mbrs().iter().enumerate() {
                        let t = t as u64;
                        if range.contains(mbr) {
                            run = match run {
                                Some((start, end)) if end + 1 == t => Some((start, t)),
                                Some(done) => {
                                    overlap.tile_ranges.push(done);
                                    Some((t, t))
                                }
                                None => Some((t, t)),
                            };
                        } else {
                            if let Some(done) = run.take() {
                                overlap.tile_ranges.push(done);
                            }
                            if mbr.intersects(range) {
                                overlap.tiles.push((t, mbr.coverage_by(range)));
                            }
                        }
                    }
                    if let Some(done) = run.take() {
                        overlap.tile_ranges.push(done);
                    }
                }
                per_range.push(overlap);
            }
            per_fragment.push(per_range);
        }
        TileOverlap { per_fragment }
    }
}

/// Which tiles of which fragments overlap each range of a subarray.
#[derive(Debug, Clone, Default)]
pub struct TileOverlap {
    per_fragment: Vec<Vec<RangeTileOverlap>>,
}

impl TileOverlap {
    pub fn range(&self, fragment: usize, range: usize) -> &RangeTileOverlap {
        &self.per_fragment[fragment][range]
    }

    pub fn fragment_num(&self) -> usize {
        self.per_fragment.len()
    }
}

/// Tile overlap of one (fragment, range) pair.
#[derive(Debug, Clone, Default)]
pub struct RangeTileOverlap {
    /// Contiguous runs of fully-contained tiles.
    pub tile_ranges: Vec<(u64, u64)>,
    /// Single tiles with their coverage ratio in [0, 1].
    pub tiles: Vec<(u64, f64)>,
}

impl RangeTileOverlap {
    pub fn is_empty(&self) -> bool {
        self.tile_ranges.is_empty() && self.tiles.is_empty()
    }

    /// Estimated result cells of this overlap given per-tile cell counts.
    pub fn estimated_cells(&self, fragment: &FragmentMetadata<impl CoordType>) -> u64 {
        let mut cells = 0u64;
        for &(start, end) in &self.tile_ranges {
            for t in start..=end {
                cells += fragment.cell_num(t);
            }
        }
        for &(t, ratio) in &self.tiles {
            cells += (fragment.cell_num(t) as f64 * ratio).ceil() as u64;
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::NdRange;
    use crate::dtype::Layout;
    use crate::fragment::FragmentMetadata;

    fn sparse_fragment() -> Arc<FragmentMetadata<i32>> {
        // Three tiles: contained, partially overlapping, disjoint.
        Arc::new(
            FragmentMetadata::new_sparse(
                "s1",
                1,
                vec![
                    NdRange::new(vec![1, 2, 1, 2]),
                    NdRange::new(vec![3, 6, 0, 3]),
                    NdRange::new(vec![8, 9, 8, 9]),
                ],
                vec![4, 4, 4],
            )
            .unwrap(),
        )
    }

    #[test]
    fn overlap_classifies_tiles() {
        let subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 4, 0, 4]));
        let overlap = subarray.compute_tile_overlap(&[sparse_fragment()]);
        let r = overlap.range(0, 0);
        assert_eq!(r.tile_ranges, vec![(0, 0)]);
        assert_eq!(r.tiles.len(), 1);
        assert_eq!(r.tiles[0].0, 1);
        assert!(r.tiles[0].1 > 0.0 && r.tiles[0].1 < 1.0);
    }

    #[test]
    fn adjacent_full_tiles_coalesce() {
        let subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 9, 0, 9]));
        let overlap = subarray.compute_tile_overlap(&[sparse_fragment()]);
        let r = overlap.range(0, 0);
        assert_eq!(r.tile_ranges, vec![(0, 2)]);
        assert!(r.tiles.is_empty());
    }

    #[test]
    fn estimated_cells_weight_partial_tiles() {
        let fragment = sparse_fragment();
        let subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 4, 0, 4]));
        let overlap = subarray.compute_tile_overlap(&[fragment.clone()]);
        let est = overlap.range(0, 0).estimated_cells(&fragment);
        // Full tile 0 (4 cells) plus a fraction of tile 1, rounded up.
        assert!(est > 4 && est <= 8);
    }

    #[test]
    fn multi_range_cell_num() {
        let mut subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 1, 0, 1]));
        subarray.add_range(NdRange::new(vec![5, 5, 5, 9]));
        assert_eq!(subarray.cell_num(), Some(4 + 5));
    }
}
