//! Fragment metadata: the per-fragment index the read path plans against.
//!
//! A fragment is an immutable snapshot of writes. Its metadata records, per
//! attribute and per tile, where the persisted bytes live and how large they
//! are both logically (unfiltered) and persisted (filtered), plus the
//! geometry needed for pruning: the non-empty domain and, for sparse
//! fragments, one MBR per tile.

use ahash::AHashMap;
use lattice_common::{error::Error, Result};

use crate::coord::CoordType;
use crate::domain::{Domain, NdRange};

/// Locations and sizes of one attribute's tiles within a fragment.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    pub uri: String,
    pub tile_offsets: Vec<u64>,
    /// Logical (unfiltered) tile sizes.
    pub tile_sizes: Vec<u64>,
    /// Persisted (filtered) tile sizes.
    pub tile_persisted_sizes: Vec<u64>,
    pub var: Option<VarStore>,
}

/// The variable-length values stream of a var-sized attribute.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    pub uri: String,
    pub tile_offsets: Vec<u64>,
    pub tile_sizes: Vec<u64>,
    pub tile_persisted_sizes: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct FragmentMetadata<T> {
    name: String,
    dense: bool,
    format_version: u32,
    non_empty_domain: NdRange<T>,
    /// Per-dimension tile-index bounds covered by a dense fragment.
    tile_grid: Option<Vec<(u64, u64)>>,
    /// Per-tile MBRs of a sparse fragment, ordered by tile index.
    mbrs: Vec<NdRange<T>>,
    /// Cells per tile.
    tile_cell_counts: Vec<u64>,
    attrs: AHashMap<String, AttributeStore>,
}

impl<T: CoordType> FragmentMetadata<T> {
    /// Metadata for a dense fragment covering `non_empty_domain`, which must
    /// be aligned to the domain's tile grid.
    pub fn new_dense(
        name: impl Into<String>,
        format_version: u32,
        domain: &Domain<T>,
        non_empty_domain: NdRange<T>,
    ) -> Result<FragmentMetadata<T>> {
        let name = name.into();
        let tile_grid = domain.tile_domain(&non_empty_domain)?;
        if !domain.is_tile_aligned(&non_empty_domain)? {
            return Err(Error::fragment_metadata(format!(
                "dense fragment '{name}' is not tile-aligned"
            )));
        }
        let tile_num: u64 = tile_grid.iter().map(|&(lo, hi)| hi - lo + 1).product();
        let cells = domain.cell_num_per_tile()?;
        Ok(FragmentMetadata {
            name,
            dense: true,
            format_version,
            non_empty_domain,
            tile_grid: Some(tile_grid),
            mbrs: Vec::new(),
            tile_cell_counts: vec![cells; tile_num as usize],
            attrs: AHashMap::new(),
        })
    }

    /// Metadata for a sparse fragment with one MBR per tile.
    pub fn new_sparse(
        name: impl Into<String>,
        format_version: u32,
        mbrs: Vec<NdRange<T>>,
        tile_cell_counts: Vec<u64>,
    ) -> Result<FragmentMetadata<T>> {
        if mbrs.len() != tile_cell_counts.len() {
            return Err(Error::fragment_metadata(
                "MBR count does not match tile count",
            ));
        }
        if mbrs.is_empty() {
            return Err(Error::fragment_metadata("sparse fragment has no tiles"));
        }
        let mut non_empty_domain = mbrs[0].clone();
        for mbr in &mbrs[1..] {
            for d in 0..mbr.dim_num() {
                if mbr.lo(d) < non_empty_domain.lo(d) {
                    non_empty_domain.set_lo(d, mbr.lo(d));
                }
                if mbr.hi(d) > non_empty_domain.hi(d) {
                    non_empty_domain.set_hi(d, mbr.hi(d));
                }
            }
        }
        Ok(FragmentMetadata {
            name: name.into(),
            dense: false,
            format_version,
            non_empty_domain,
            tile_grid: None,
            mbrs,
            tile_cell_counts,
            attrs: AHashMap::new(),
        })
    }

    pub fn set_attribute(&mut self, attr: impl Into<String>, store: AttributeStore) {
        self.attrs.insert(attr.into(), store);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dense(&self) -> bool {
        self.dense
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn non_empty_domain(&self) -> &NdRange<T> {
        &self.non_empty_domain
    }

    pub fn mbrs(&self) -> &[NdRange<T>] {
        &self.mbrs
    }

    pub fn tile_num(&self) -> u64 {
        self.tile_cell_counts.len() as u64
    }

    pub fn cell_num(&self, tile_idx: u64) -> u64 {
        self.tile_cell_counts[tile_idx as usize]
    }

    /// Tile index of the dense tile at global `tile_coords`.
    pub fn tile_pos(&self, domain: &Domain<T>, tile_coords: &[u64]) -> Result<u64> {
        let grid = self
            .tile_grid
            .as_ref()
            .ok_or_else(|| Error::fragment_metadata("tile_pos on a sparse fragment"))?;
        for d in 0..tile_coords.len() {
            if tile_coords[d] < grid[d].0 || tile_coords[d] > grid[d].1 {
                return Err(Error::fragment_metadata(format!(
                    "tile coords outside fragment '{}'",
                    self.name
                )));
            }
        }
        Ok(domain.tile_pos(grid, tile_coords))
    }

    fn store(&self, attr: &str) -> Result<&AttributeStore> {
        self.attrs.get(attr).ok_or_else(|| {
            Error::fragment_metadata(format!("fragment '{}' has no attribute '{attr}'", self.name))
        })
    }

    fn var_store(&self, attr: &str) -> Result<&VarStore> {
        self.store(attr)?.var.as_ref().ok_or_else(|| {
            Error::fragment_metadata(format!(
                "attribute '{attr}' of fragment '{}' has no var stream",
                self.name
            ))
        })
    }

    pub fn attr_uri(&self, attr: &str) -> Result<&str> {
        Ok(&self.store(attr)?.uri)
    }

    pub fn file_offset(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.store(attr)?.tile_offsets[tile_idx as usize])
    }

    pub fn tile_size(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.store(attr)?.tile_sizes[tile_idx as usize])
    }

    pub fn persisted_tile_size(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.store(attr)?.tile_persisted_sizes[tile_idx as usize])
    }

    pub fn attr_var_uri(&self, attr: &str) -> Result<&str> {
        Ok(&self.var_store(attr)?.uri)
    }

    pub fn file_var_offset(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.var_store(attr)?.tile_offsets[tile_idx as usize])
    }

    pub fn tile_var_size(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.var_store(attr)?.tile_sizes[tile_idx as usize])
    }

    pub fn persisted_tile_var_size(&self, attr: &str, tile_idx: u64) -> Result<u64> {
        Ok(self.var_store(attr)?.tile_persisted_sizes[tile_idx as usize])
    }
}
