//! Tile fetcher: cache probe, per-URI scatter reads, collective wait, then
//! parallel reverse filtering with cache writeback.

use std::sync::Arc;

use ahash::AHashMap;
use lattice_common::{verify_data, Result};
use lattice_io::ReadRegion;
use lattice_workflow::data_parallel;
use log::warn;

use crate::coord::CoordType;
use crate::filter::{EncryptionKey, FilterPipeline};
use crate::fragment::FragmentMetadata;
use crate::read::planner::OverlappingTile;
use crate::schema::{ArraySchema, COORDS};
use crate::storage::StorageManager;
use crate::tile::{Tile, TilePair};

/// Where one scatter-read payload lands: arena tile + fixed-or-var stream.
struct Assignment {
    tile: usize,
    is_var: bool,
}

/// One submitted scatter read awaiting the collective barrier.
struct PendingRead {
    attr: String,
    handle: lattice_workflow::JoinHandle<Result<Vec<Vec<u8>>>>,
    assignments: Vec<Assignment>,
}

/// Shared context of one partition's fetch work.
pub struct FetchContext<'a, T: CoordType> {
    pub schema: &'a ArraySchema<T>,
    pub fragments: &'a [Arc<FragmentMetadata<T>>],
    pub storage: &'a StorageManager,
    pub encryption_key: &'a EncryptionKey,
}

impl<'a, T: CoordType> FetchContext<'a, T> {
    /// Reads and unfilters one attribute's tiles.
    pub fn read_tiles(&self, attr: &str, tiles: &mut [OverlappingTile]) -> Result<()> {
        let pending = self.stage_reads(attr, tiles)?;
        self.await_reads(pending, tiles)
    }

    /// Reads every attribute's tiles, waiting once for all scatter reads,
    /// then filters everything. All reads are issued before any wait so the
    /// whole partition's I/O is in flight together.
    pub fn read_and_filter_all(&self, attrs: &[String], tiles: &mut [OverlappingTile]) -> Result<()> {
        if tiles.is_empty() || attrs.is_empty() {
            return Ok(());
        }
        let mut pending = Vec::new();
        for attr in attrs {
            pending.extend(self.stage_reads(attr, tiles)?);
        }
        self.await_reads(pending, tiles)?;
        self.storage.cancellation_token().check()?;
        for attr in attrs {
            self.filter_tiles(attr, tiles)?;
        }
        Ok(())
    }

    /// Prepares tile buffers for `attr`, probing the cache and batching the
    /// misses into one region list per file URI; submits one scatter read
    /// per URI.
    fn stage_reads(&self, attr: &str, tiles: &mut [OverlappingTile]) -> Result<Vec<PendingRead>> {
        let var_size = self.schema.var_size(attr)?;
        let datatype = self.schema.datatype(attr)?;
        let cell_size = self.schema.cell_size(attr)?;

        let mut regions: AHashMap<String, (Vec<ReadRegion>, Vec<Assignment>)> = AHashMap::new();
        for (i, tile) in tiles.iter_mut().enumerate() {
            let fragment = &self.fragments[tile.fragment];
            let version = fragment.format_version();
            if !tile.attr_tiles.contains_key(attr) {
                let pair = if var_size {
                    TilePair::var_sized(
                        Tile::new_offsets(version),
                        Tile::new(version, datatype, datatype.size()),
                    )
                } else {
                    TilePair::fixed(Tile::new(version, datatype, cell_size))
                };
                tile.attr_tiles.insert(attr.to_string(), pair);
            }

            let uri = fragment.attr_uri(attr)?.to_string();
            let offset = fragment.file_offset(attr, tile.tile_idx)?;
            let persisted = fragment.persisted_tile_size(attr, tile.tile_idx)?;
            let pair = tile.attr_tiles.get_mut(attr).expect("just inserted");
            if pair.fixed.size() == 0 {
                match self.storage.read_from_cache(&uri, offset) {
                    Some(cached) => pair.fixed.set_unfiltered(cached.as_ref().clone()),
                    None => {
                        let entry = regions.entry(uri).or_default();
                        entry.0.push(ReadRegion::new(offset, persisted as usize));
                        entry.1.push(Assignment {
                            tile: i,
                            is_var: false,
                        });
                    }
                }
            }

            if var_size {
                let var_uri = fragment.attr_var_uri(attr)?.to_string();
                let var_offset = fragment.file_var_offset(attr, tile.tile_idx)?;
                let var_persisted = fragment.persisted_tile_var_size(attr, tile.tile_idx)?;
                let var_tile = pair.var.as_mut().expect("var pair");
                if var_tile.size() == 0 {
                    match self.storage.read_from_cache(&var_uri, var_offset) {
                        Some(cached) => var_tile.set_unfiltered(cached.as_ref().clone()),
                        None => {
                            let entry = regions.entry(var_uri).or_default();
                            entry.0.push(ReadRegion::new(var_offset, var_persisted as usize));
                            entry.1.push(Assignment {
                                tile: i,
                                is_var: true,
                            });
                        }
                    }
                }
            }
        }

        let pool = self.storage.reader_thread_pool();
        let mut pending = Vec::with_capacity(regions.len());
        for (uri, (region_list, assignments)) in regions {
            let handle = self.storage.vfs().read_all(&uri, region_list, pool);
            pending.push(PendingRead {
                attr: attr.to_string(),
                handle,
                assignments,
            });
        }
        Ok(pending)
    }

    /// The collective wait-all barrier: joins every scatter read, then
    /// installs the persisted payloads into their tiles.
    fn await_reads(&self, pending: Vec<PendingRead>, tiles: &mut [OverlappingTile]) -> Result<()> {
        let joined: Vec<(String, Result<Vec<Vec<u8>>>, Vec<Assignment>)> = pending
            .into_iter()
            .map(|p| (p.attr, p.handle.join(), p.assignments))
            .collect();
        self.storage.cancellation_token().check()?;
        for (attr, result, assignments) in joined {
            let payloads = result?;
            verify_data!(payloads, payloads.len() == assignments.len());
            for (assignment, payload) in assignments.into_iter().zip(payloads) {
                let pair = tiles[assignment.tile]
                    .attr_tiles
                    .get_mut(&attr)
                    .expect("staged tile");
                if assignment.is_var {
                    pair.var.as_mut().expect("var pair").set_persisted(payload);
                } else {
                    pair.fixed.set_persisted(payload);
                }
            }
        }
        Ok(())
    }

    /// Runs the reverse filter pipeline over every fetched tile of `attr` in
    /// parallel, writing the unfiltered bytes back to the tile cache.
    pub fn filter_tiles(&self, attr: &str, tiles: &mut [OverlappingTile]) -> Result<()> {
        let var_size = self.schema.var_size(attr)?;
        // The fixed stream of a var attribute carries offsets and unwinds
        // through the offsets pipeline; values use the attribute's own.
        let fixed_pipeline = if var_size {
            self.schema.offsets_filters().clone()
        } else {
            self.schema.filters(attr)?.clone()
        };
        let fixed_pipeline =
            FilterPipeline::append_encryption_filter(&fixed_pipeline, self.encryption_key);
        let value_pipeline = if var_size {
            Some(FilterPipeline::append_encryption_filter(
                self.schema.filters(attr)?,
                self.encryption_key,
            ))
        } else {
            None
        };

        let pool = self.storage.reader_thread_pool();
        let statuses = data_parallel::map(pool, tiles.iter_mut(), |tile| -> Result<()> {
            let fragment = &self.fragments[tile.fragment];
            let tile_idx = tile.tile_idx;
            let Some(pair) = tile.attr_tiles.get_mut(attr) else {
                return Ok(());
            };
            if !pair.fixed.filtered() {
                pair.fixed.filter_reverse(&fixed_pipeline)?;
                self.writeback(
                    fragment.attr_uri(attr)?,
                    fragment.file_offset(attr, tile_idx)?,
                    pair.fixed.data(),
                );
            }
            if let (Some(var_tile), Some(pipeline)) = (pair.var.as_mut(), value_pipeline.as_ref())
            {
                if !var_tile.filtered() {
                    var_tile.filter_reverse(pipeline)?;
                    self.writeback(
                        fragment.attr_var_uri(attr)?,
                        fragment.file_var_offset(attr, tile_idx)?,
                        var_tile.data(),
                    );
                }
            }
            Ok(())
        });
        self.storage.cancellation_token().check()?;
        for status in statuses {
            status?;
        }
        Ok(())
    }

    fn writeback(&self, uri: &str, offset: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            warn!("skipping cache writeback of empty tile at {uri}@{offset}");
            return;
        }
        self.storage
            .write_to_cache(uri, offset, Arc::new(bytes.to_vec()));
    }
}

impl<'a, T: CoordType> FetchContext<'a, T> {
    /// Convenience for the coordinate stream.
    pub fn read_coords(&self, tiles: &mut [OverlappingTile]) -> Result<()> {
        if tiles.is_empty() {
            return Ok(());
        }
        self.read_tiles(COORDS, tiles)?;
        self.storage.cancellation_token().check()?;
        self.filter_tiles(COORDS, tiles)
    }
}
