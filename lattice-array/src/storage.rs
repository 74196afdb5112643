//! Storage manager: the shared services a reader runs against.

use std::sync::Arc;

use ahash::AHashMap;
use lattice_common::cancel::CancellationToken;
use lattice_common::Result;
use lattice_io::{ObjectStore, TileCache, Vfs};
use lattice_workflow::ThreadPool;

use crate::config::{keys, Config};
use crate::coord::CoordType;
use crate::dtype::CELL_VAR_OFFSET_SIZE;
use crate::fragment::FragmentMetadata;
use crate::schema::{ArraySchema, COORDS};
use crate::subarray::Subarray;

/// Per-attribute estimated result sizes in bytes: (fixed stream, var stream).
pub type EstimatedSizes = AHashMap<String, (u64, u64)>;

/// Bundles the object store, tile cache, thread pool, configuration and the
/// process-wide cancellation token.
pub struct StorageManager {
    vfs: Vfs,
    tile_cache: TileCache,
    pool: ThreadPool,
    config: Config,
    cancellation: CancellationToken,
}

impl StorageManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: Config) -> Result<StorageManager> {
        let cache_bytes = config.get_u64(keys::TILE_CACHE_SIZE)? as usize;
        Ok(StorageManager {
            vfs: Vfs::new(store),
            tile_cache: TileCache::new(cache_bytes),
            pool: ThreadPool::global().clone(),
            config,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn reader_thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn read_from_cache(&self, uri: &str, offset: u64) -> Option<Arc<Vec<u8>>> {
        self.tile_cache.lookup(uri, offset)
    }

    pub fn write_to_cache(&self, uri: &str, offset: u64, bytes: Arc<Vec<u8>>) {
        self.tile_cache.insert(uri, offset, bytes);
    }

    /// Estimates, per requested attribute, the result bytes a read of
    /// `subarray` would produce. Sparse estimates take the union of
    /// overlapping-tile cell counts; dense estimates are exact cell counts.
    pub fn estimate_result_sizes<T: CoordType>(
        &self,
        schema: &ArraySchema<T>,
        fragments: &[Arc<FragmentMetadata<T>>],
        subarray: &Subarray<T>,
        attrs: &[String],
        sparse_read: bool,
    ) -> Result<EstimatedSizes> {
        let mut sizes = EstimatedSizes::new();
        if !sparse_read {
            let cells = subarray
                .cell_num()
                .ok_or_else(|| lattice_common::error::Error::type_mismatch(
                    "dense estimate on a real-typed domain",
                ))?;
            for attr in attrs {
                let fixed = cells * schema.cell_size(attr)?;
                let var = if schema.var_size(attr)? {
                    cells * self.average_var_cell_size(schema, fragments, attr)?
                } else {
                    0
                };
                sizes.insert(attr.clone(), (fixed, var));
            }
            return Ok(sizes);
        }

        let overlap = subarray.compute_tile_overlap(fragments);
        let mut cells = 0u64;
        for (f, fragment) in fragments.iter().enumerate() {
            for r in 0..subarray.range_num() {
                cells += overlap.range(f, r).estimated_cells(fragment);
            }
        }
        for attr in attrs {
            let fixed = cells * schema.cell_size(attr)?;
            let var = if schema.var_size(attr)? {
                let mut var_bytes = 0u64;
                for (f, fragment) in fragments.iter().enumerate() {
                    if fragment.dense() {
                        continue;
                    }
                    for r in 0..subarray.range_num() {
                        let ov = overlap.range(f, r);
                        for &(start, end) in &ov.tile_ranges {
                            for t in start..=end {
                                var_bytes += fragment.tile_var_size(attr, t)?;
                            }
                        }
                        for &(t, ratio) in &ov.tiles {
                            var_bytes +=
                                (fragment.tile_var_size(attr, t)? as f64 * ratio).ceil() as u64;
                        }
                    }
                }
                var_bytes
            } else {
                0
            };
            sizes.insert(attr.clone(), (fixed, var));
        }
        Ok(sizes)
    }

    /// Estimates the bytes of tile payloads a partition holds in flight:
    /// `(fixed tiles, var-value tiles)`, summed over requested attributes and
    /// overlapping tiles.
    pub fn estimate_tile_memory<T: CoordType>(
        &self,
        schema: &ArraySchema<T>,
        fragments: &[Arc<FragmentMetadata<T>>],
        subarray: &Subarray<T>,
        attrs: &[String],
    ) -> Result<(u64, u64)> {
        let overlap = subarray.compute_tile_overlap(fragments);
        let mut fixed = 0u64;
        let mut var = 0u64;
        for (f, fragment) in fragments.iter().enumerate() {
            if fragment.dense() {
                // Every overlapped dense tile is fetched whole.
                let domain = schema.domain();
                for range in subarray.ranges() {
                    if let Some(inter) = fragment.non_empty_domain().intersection(range) {
                        let tiles = domain.tile_num(&inter)?;
                        for attr in attrs {
                            if attr == COORDS {
                                continue;
                            }
                            if schema.var_size(attr)? {
                                fixed +=
                                    tiles * domain.cell_num_per_tile()? * CELL_VAR_OFFSET_SIZE;
                                var += tiles
                                    * domain.cell_num_per_tile()?
                                    * self.average_var_cell_size(schema, fragments, attr)?;
                            } else {
                                fixed += tiles * domain.cell_num_per_tile()? * schema.cell_size(attr)?;
                            }
                        }
                    }
                }
                continue;
            }
            for r in 0..subarray.range_num() {
                let ov = overlap.range(f, r);
                let mut tiles: Vec<u64> = Vec::new();
                for &(start, end) in &ov.tile_ranges {
                    tiles.extend(start..=end);
                }
                tiles.extend(ov.tiles.iter().map(|&(t, _)| t));
                for t in tiles {
                    for attr in attrs {
                        fixed += fragment.tile_size(attr, t).unwrap_or(0);
                        if schema.var_size(attr)? {
                            var += fragment.tile_var_size(attr, t).unwrap_or(0);
                        }
                    }
                }
            }
        }
        Ok((fixed, var))
    }

    fn average_var_cell_size<T: CoordType>(
        &self,
        schema: &ArraySchema<T>,
        fragments: &[Arc<FragmentMetadata<T>>],
        attr: &str,
    ) -> Result<u64> {
        let mut bytes = 0u64;
        let mut cells = 0u64;
        for fragment in fragments {
            for t in 0..fragment.tile_num() {
                if let Ok(size) = fragment.tile_var_size(attr, t) {
                    bytes += size;
                    cells += fragment.cell_num(t);
                }
            }
        }
        if cells == 0 {
            Ok(schema.datatype(attr)?.size())
        } else {
            Ok(bytes.div_ceil(cells).max(1))
        }
    }
}
