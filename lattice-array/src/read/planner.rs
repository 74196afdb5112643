//! Tile planning: which tiles of which fragments overlap a partition.

use ahash::AHashMap;

use crate::coord::CoordType;
use crate::fragment::FragmentMetadata;
use crate::subarray::{Subarray, TileOverlap};
use crate::tile::TilePair;

/// One (fragment, tile) pair overlapping the current partition, owning the
/// tile buffers of every attribute fetched for it.
#[derive(Debug)]
pub struct OverlappingTile {
    pub fragment: usize,
    pub tile_idx: u64,
    pub full_overlap: bool,
    pub attr_tiles: AHashMap<String, TilePair>,
}

impl OverlappingTile {
    pub fn new(fragment: usize, tile_idx: u64, full_overlap: bool) -> OverlappingTile {
        OverlappingTile {
            fragment,
            tile_idx,
            full_overlap,
            attr_tiles: AHashMap::new(),
        }
    }
}

/// Auxiliary index `(fragment, tile) → arena position`, alive only while the
/// tile set is being built and consumed by coordinate gathering.
pub type TileMap = AHashMap<(usize, u64), usize>;

/// Output of the sparse tile planner.
pub struct TilePlan {
    pub tiles: Vec<OverlappingTile>,
    pub tile_map: TileMap,
    /// Per range: true when every overlapping tile comes from one fragment,
    /// in which case sort/dedup can be skipped for that range.
    pub single_fragment: Vec<bool>,
}

/// Builds the overlapping-tile arena for the sparse tiles of `subarray`,
/// deduplicating `(fragment, tile)` pairs across ranges.
pub fn plan_sparse_tiles<T: CoordType>(
    subarray: &Subarray<T>,
    overlap: &TileOverlap,
    fragments: &[std::sync::Arc<FragmentMetadata<T>>],
) -> TilePlan {
    let range_num = subarray.range_num();
    let mut tiles: Vec<OverlappingTile> = Vec::new();
    let mut tile_map = TileMap::new();
    let mut single_fragment = vec![true; range_num];
    let mut first_fragment = vec![usize::MAX; range_num];

    let mut note_fragment = |f: usize, r: usize, first: &mut Vec<usize>, single: &mut Vec<bool>| {
        if first[r] == usize::MAX {
            first[r] = f;
        } else if first[r] != f {
            single[r] = false;
        }
    };

    for (f, fragment) in fragments.iter().enumerate() {
        if fragment.dense() {
            continue;
        }
        for r in 0..range_num {
            let ov = overlap.range(f, r);
            for &(start, end) in &ov.tile_ranges {
                for t in start..=end {
                    note_fragment(f, r, &mut first_fragment, &mut single_fragment);
                    tile_map.entry((f, t)).or_insert_with(|| {
                        tiles.push(OverlappingTile::new(f, t, true));
                        tiles.len() - 1
                    });
                }
            }
            for &(t, ratio) in &ov.tiles {
                note_fragment(f, r, &mut first_fragment, &mut single_fragment);
                tile_map.entry((f, t)).or_insert_with(|| {
                    tiles.push(OverlappingTile::new(f, t, ratio >= 1.0));
                    tiles.len() - 1
                });
            }
        }
    }

    TilePlan {
        tiles,
        tile_map,
        single_fragment,
    }
}

/// Drops the tile buffers of `attr` from every tile in the arena; used by
/// the sparse path to release one attribute's memory before fetching the
/// next.
pub fn clear_tiles(attr: &str, tiles: &mut [OverlappingTile]) {
    for tile in tiles {
        tile.attr_tiles.remove(attr);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::NdRange;
    use crate::dtype::Layout;
    use crate::fragment::FragmentMetadata;
    use crate::subarray::Subarray;

    fn fragment(name: &str, mbrs: Vec<NdRange<i32>>) -> Arc<FragmentMetadata<i32>> {
        let counts = vec![2; mbrs.len()];
        Arc::new(FragmentMetadata::new_sparse(name, 1, mbrs, counts).unwrap())
    }

    #[test]
    fn plan_dedups_across_ranges_and_tracks_single_fragment() {
        let f1 = fragment("f1", vec![NdRange::new(vec![0, 3, 0, 3])]);
        let f2 = fragment("f2", vec![NdRange::new(vec![2, 5, 2, 5])]);
        let fragments = vec![f1, f2];

        let mut subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 4, 0, 4]));
        subarray.add_range(NdRange::new(vec![0, 5, 0, 5]));
        let overlap = subarray.compute_tile_overlap(&fragments);
        let plan = plan_sparse_tiles(&subarray, &overlap, &fragments);

        // One tile per fragment despite appearing in both ranges.
        assert_eq!(plan.tiles.len(), 2);
        assert_eq!(plan.tile_map.len(), 2);
        assert_eq!(plan.single_fragment, vec![false, false]);

        // The second range contains both MBRs fully.
        let t0 = &plan.tiles[plan.tile_map[&(0, 0)]];
        assert_eq!(t0.fragment, 0);
    }

    #[test]
    fn single_fragment_range_is_flagged() {
        let f1 = fragment("f1", vec![NdRange::new(vec![0, 1, 0, 1])]);
        let fragments = vec![f1];
        let subarray = Subarray::new(Layout::RowMajor, NdRange::new(vec![0, 4, 0, 4]));
        let overlap = subarray.compute_tile_overlap(&fragments);
        let plan = plan_sparse_tiles(&subarray, &overlap, &fragments);
        assert_eq!(plan.single_fragment, vec![true]);
        assert!(plan.tiles[0].full_overlap);
    }

    #[test]
    fn clear_tiles_drops_only_that_attribute() {
        let mut tiles = vec![OverlappingTile::new(0, 0, true)];
        tiles[0].attr_tiles.insert(
            "a".into(),
            crate::tile::TilePair::fixed(crate::tile::Tile::new(1, crate::dtype::Datatype::Int32, 4)),
        );
        tiles[0].attr_tiles.insert(
            "b".into(),
            crate::tile::TilePair::fixed(crate::tile::Tile::new(1, crate::dtype::Datatype::Int32, 4)),
        );
        clear_tiles("a", &mut tiles);
        assert!(!tiles[0].attr_tiles.contains_key("a"));
        assert!(tiles[0].attr_tiles.contains_key("b"));
    }
}
