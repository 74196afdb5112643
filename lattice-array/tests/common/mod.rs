//! Shared fixtures: a 2-D int32 array with fragments persisted through the
//! real filter pipelines into the in-memory object store.
#![allow(dead_code)]

use std::sync::Arc;

use lattice_array::config::Config;
use lattice_array::domain::{Dimension, Domain, NdRange};
use lattice_array::dtype::{CellOrder, Datatype};
use lattice_array::filter::{EncryptionKey, FilterPipeline, Lz4CompressionFilter};
use lattice_array::fragment::{AttributeStore, FragmentMetadata, VarStore};
use lattice_array::schema::{ArraySchema, Attribute, COORDS};
use lattice_array::storage::StorageManager;
use lattice_array::Reader;
use lattice_io::memory::MemoryStore;

pub struct TestArray {
    pub schema: Arc<ArraySchema<i32>>,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<StorageManager>,
    pub fragments: Vec<Arc<FragmentMetadata<i32>>>,
    pub key: EncryptionKey,
}

fn domain_10x10() -> Domain<i32> {
    Domain::new(
        vec![Dimension::new("r", 0, 9), Dimension::new("c", 0, 9)],
        Some(vec![5, 5]),
        CellOrder::RowMajor,
    )
    .unwrap()
}

fn attributes(with_var: bool) -> Vec<Attribute> {
    let mut attrs = vec![Attribute::new("v", Datatype::Int32)
        .with_filters(FilterPipeline::new().add(Lz4CompressionFilter))];
    if with_var {
        attrs.push(
            Attribute::new("s", Datatype::Uint8)
                .var_sized()
                .with_filters(FilterPipeline::new().add(Lz4CompressionFilter)),
        );
    }
    attrs
}

impl TestArray {
    pub fn dense(with_var: bool) -> TestArray {
        let schema = ArraySchema::dense(domain_10x10(), attributes(with_var))
            .unwrap()
            .with_coords_filters(FilterPipeline::new().add(Lz4CompressionFilter))
            .with_offsets_filters(FilterPipeline::new().add(Lz4CompressionFilter));
        TestArray::with_schema(schema)
    }

    pub fn sparse(with_var: bool) -> TestArray {
        let schema = ArraySchema::sparse(domain_10x10(), 4, attributes(with_var))
            .unwrap()
            .with_coords_filters(FilterPipeline::new().add(Lz4CompressionFilter))
            .with_offsets_filters(FilterPipeline::new().add(Lz4CompressionFilter));
        TestArray::with_schema(schema)
    }

    /// Wraps an arbitrary schema (used by the 1-D tests).
    pub fn with_schema_1d(schema: ArraySchema<i32>) -> TestArray {
        TestArray::with_schema(schema)
    }

    fn with_schema(schema: ArraySchema<i32>) -> TestArray {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StorageManager::new(store.clone(), Config::new()).unwrap());
        TestArray {
            schema: Arc::new(schema),
            store,
            storage,
            fragments: Vec::new(),
            key: EncryptionKey::None,
        }
    }

    pub fn with_encryption(mut self, key: [u8; 32]) -> TestArray {
        self.key = EncryptionKey::Aes256Gcm(key);
        self
    }

    /// Replaces the storage manager (e.g. to install a misbehaving store).
    pub fn with_storage(mut self, storage: Arc<StorageManager>) -> TestArray {
        self.storage = storage;
        self
    }

    pub fn reader(&self) -> Reader<i32> {
        let mut reader = Reader::new();
        reader.set_array_schema(self.schema.clone());
        reader.set_fragment_metadata(self.fragments.clone());
        reader.set_storage_manager(self.storage.clone());
        reader.set_encryption_key(self.key.clone());
        reader
    }

    fn sealed(&self, pipeline: &FilterPipeline) -> FilterPipeline {
        FilterPipeline::append_encryption_filter(pipeline, &self.key)
    }

    /// Writes a dense fragment covering `region` (tile-aligned), with the
    /// fixed attribute `v` valued by `value_fn` over absolute coordinates.
    pub fn add_dense_fragment(&mut self, name: &str, region: [i32; 4], value_fn: impl Fn(i32, i32) -> i32) {
        self.add_dense_fragment_impl(name, region, value_fn, None::<fn(i32, i32) -> Vec<u8>>);
    }

    /// Same, additionally writing the var attribute `s` from `var_fn`.
    pub fn add_dense_fragment_with_var(
        &mut self,
        name: &str,
        region: [i32; 4],
        value_fn: impl Fn(i32, i32) -> i32,
        var_fn: impl Fn(i32, i32) -> Vec<u8>,
    ) {
        self.add_dense_fragment_impl(name, region, value_fn, Some(var_fn));
    }

    fn add_dense_fragment_impl(
        &mut self,
        name: &str,
        region: [i32; 4],
        value_fn: impl Fn(i32, i32) -> i32,
        var_fn: Option<impl Fn(i32, i32) -> Vec<u8>>,
    ) {
        let domain = self.schema.domain();
        let region = NdRange::new(region.to_vec());
        let mut fragment = FragmentMetadata::new_dense(name, 1, domain, region.clone()).unwrap();

        let grid = domain.tile_domain(&region).unwrap();
        let mut tiles = Vec::new();
        let mut tc: Vec<u64> = grid.iter().map(|&(lo, _)| lo).collect();
        loop {
            tiles.push(tc.clone());
            if !domain.next_tile_coords(&grid, &mut tc) {
                break;
            }
        }

        // Fixed attribute stream.
        let pipeline = self.sealed(self.schema.filters("v").unwrap());
        let uri = format!("{name}/v");
        let mut store = FileBuilder::new(&uri);
        for tc in &tiles {
            let rect = domain.tile_subarray(tc).unwrap();
            let mut bytes = Vec::new();
            for r in rect.lo(0)..=rect.hi(0) {
                for c in rect.lo(1)..=rect.hi(1) {
                    bytes.extend_from_slice(&value_fn(r, c).to_ne_bytes());
                }
            }
            store.push_tile(&bytes, &pipeline);
        }
        let attr_store = store.finish(&self.store);
        fragment.set_attribute("v", attr_store);

        // Optional var attribute streams.
        if let Some(var_fn) = var_fn {
            let offsets_pipeline = self.sealed(self.schema.offsets_filters());
            let values_pipeline = self.sealed(self.schema.filters("s").unwrap());
            let mut off_store = FileBuilder::new(&format!("{name}/s"));
            let mut val_store = FileBuilder::new(&format!("{name}/s_var"));
            for tc in &tiles {
                let rect = domain.tile_subarray(tc).unwrap();
                let mut offsets: Vec<u8> = Vec::new();
                let mut values: Vec<u8> = Vec::new();
                for r in rect.lo(0)..=rect.hi(0) {
                    for c in rect.lo(1)..=rect.hi(1) {
                        offsets.extend_from_slice(&(values.len() as u64).to_ne_bytes());
                        values.extend_from_slice(&var_fn(r, c));
                    }
                }
                off_store.push_tile(&offsets, &offsets_pipeline);
                val_store.push_tile(&values, &values_pipeline);
            }
            let mut attr_store = off_store.finish(&self.store);
            attr_store.var = Some(val_store.finish_var(&self.store));
            fragment.set_attribute("s", attr_store);
        }

        self.fragments.push(Arc::new(fragment));
    }

    /// 1-D counterpart of [`add_dense_fragment`](Self::add_dense_fragment).
    pub fn add_dense_fragment_1d(
        &mut self,
        name: &str,
        region: [i32; 2],
        value_fn: impl Fn(i32) -> i32,
    ) {
        let domain = self.schema.domain();
        let region = NdRange::new(region.to_vec());
        let mut fragment = FragmentMetadata::new_dense(name, 1, domain, region.clone()).unwrap();

        let grid = domain.tile_domain(&region).unwrap();
        let pipeline = self.sealed(self.schema.filters("v").unwrap());
        let uri = format!("{name}/v");
        let mut store = FileBuilder::new(&uri);
        for t in grid[0].0..=grid[0].1 {
            let rect = domain.tile_subarray(&[t]).unwrap();
            let mut bytes = Vec::new();
            for x in rect.lo(0)..=rect.hi(0) {
                bytes.extend_from_slice(&value_fn(x).to_ne_bytes());
            }
            store.push_tile(&bytes, &pipeline);
        }
        fragment.set_attribute("v", store.finish(&self.store));
        self.fragments.push(Arc::new(fragment));
    }

    /// Writes a sparse fragment from `(coords, v)` cells given in the order
    /// they should be tiled (tests supply them in global order).
    pub fn add_sparse_fragment(&mut self, name: &str, cells: &[((i32, i32), i32)]) {
        let with_var: Vec<((i32, i32), i32, Vec<u8>)> = cells
            .iter()
            .map(|&(coords, v)| (coords, v, Vec::new()))
            .collect();
        self.add_sparse_fragment_impl(name, &with_var, false);
    }

    /// Same, with a var value per cell.
    pub fn add_sparse_fragment_with_var(
        &mut self,
        name: &str,
        cells: &[((i32, i32), i32, Vec<u8>)],
    ) {
        self.add_sparse_fragment_impl(name, cells, true);
    }

    fn add_sparse_fragment_impl(
        &mut self,
        name: &str,
        cells: &[((i32, i32), i32, Vec<u8>)],
        with_var: bool,
    ) {
        let capacity = self.schema.capacity().max(1) as usize;
        let mut mbrs = Vec::new();
        let mut counts = Vec::new();
        for chunk in cells.chunks(capacity) {
            let mut mbr = NdRange::new(vec![
                chunk[0].0 .0,
                chunk[0].0 .0,
                chunk[0].0 .1,
                chunk[0].0 .1,
            ]);
            for &((r, c), _, _) in chunk {
                if r < mbr.lo(0) {
                    mbr.set_lo(0, r);
                }
                if r > mbr.hi(0) {
                    mbr.set_hi(0, r);
                }
                if c < mbr.lo(1) {
                    mbr.set_lo(1, c);
                }
                if c > mbr.hi(1) {
                    mbr.set_hi(1, c);
                }
            }
            mbrs.push(mbr);
            counts.push(chunk.len() as u64);
        }
        let mut fragment = FragmentMetadata::new_sparse(name, 1, mbrs, counts).unwrap();

        let coords_pipeline = self.sealed(self.schema.filters(COORDS).unwrap());
        let v_pipeline = self.sealed(self.schema.filters("v").unwrap());
        let mut coords_store = FileBuilder::new(&format!("{name}/{COORDS}"));
        let mut v_store = FileBuilder::new(&format!("{name}/v"));
        let mut s_off_store = FileBuilder::new(&format!("{name}/s"));
        let mut s_val_store = FileBuilder::new(&format!("{name}/s_var"));
        for chunk in cells.chunks(capacity) {
            let mut coords_bytes = Vec::new();
            let mut v_bytes = Vec::new();
            let mut s_offsets: Vec<u8> = Vec::new();
            let mut s_values: Vec<u8> = Vec::new();
            for ((r, c), v, s) in chunk {
                coords_bytes.extend_from_slice(&r.to_ne_bytes());
                coords_bytes.extend_from_slice(&c.to_ne_bytes());
                v_bytes.extend_from_slice(&v.to_ne_bytes());
                s_offsets.extend_from_slice(&(s_values.len() as u64).to_ne_bytes());
                s_values.extend_from_slice(s);
            }
            coords_store.push_tile(&coords_bytes, &coords_pipeline);
            v_store.push_tile(&v_bytes, &v_pipeline);
            if with_var {
                let offsets_pipeline = self.sealed(self.schema.offsets_filters());
                let values_pipeline = self.sealed(self.schema.filters("s").unwrap());
                s_off_store.push_tile(&s_offsets, &offsets_pipeline);
                s_val_store.push_tile(&s_values, &values_pipeline);
            }
        }
        fragment.set_attribute(COORDS, coords_store.finish(&self.store));
        fragment.set_attribute("v", v_store.finish(&self.store));
        if with_var {
            let mut attr_store = s_off_store.finish(&self.store);
            attr_store.var = Some(s_val_store.finish_var(&self.store));
            fragment.set_attribute("s", attr_store);
        }

        self.fragments.push(Arc::new(fragment));
    }
}

/// Accumulates persisted tiles of one stream into one file.
struct FileBuilder {
    uri: String,
    file: Vec<u8>,
    tile_offsets: Vec<u64>,
    tile_sizes: Vec<u64>,
    tile_persisted_sizes: Vec<u64>,
}

impl FileBuilder {
    fn new(uri: &str) -> FileBuilder {
        FileBuilder {
            uri: uri.to_string(),
            file: Vec::new(),
            tile_offsets: Vec::new(),
            tile_sizes: Vec::new(),
            tile_persisted_sizes: Vec::new(),
        }
    }

    fn push_tile(&mut self, logical: &[u8], pipeline: &FilterPipeline) {
        let persisted = pipeline.run_forward(logical).unwrap();
        self.tile_offsets.push(self.file.len() as u64);
        self.tile_sizes.push(logical.len() as u64);
        self.tile_persisted_sizes.push(persisted.len() as u64);
        self.file.extend_from_slice(&persisted);
    }

    fn finish(self, store: &MemoryStore) -> AttributeStore {
        store.put(self.uri.clone(), self.file);
        AttributeStore {
            uri: self.uri,
            tile_offsets: self.tile_offsets,
            tile_sizes: self.tile_sizes,
            tile_persisted_sizes: self.tile_persisted_sizes,
            var: None,
        }
    }

    fn finish_var(self, store: &MemoryStore) -> VarStore {
        store.put(self.uri.clone(), self.file);
        VarStore {
            uri: self.uri,
            tile_offsets: self.tile_offsets,
            tile_sizes: self.tile_sizes,
            tile_persisted_sizes: self.tile_persisted_sizes,
        }
    }
}

/// Decodes a buffer of native-endian i32 values.
pub fn as_i32(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

/// Decodes a buffer of native-endian u64 offsets.
pub fn as_u64(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

/// Decodes a coordinates buffer into (r, c) tuples.
pub fn as_coords(bytes: &[u8]) -> Vec<(i32, i32)> {
    let flat = as_i32(bytes);
    flat.chunks_exact(2).map(|p| (p[0], p[1])).collect()
}
