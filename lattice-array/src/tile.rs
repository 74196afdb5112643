//! Tile buffers: the bytes of one attribute tile.

use lattice_common::{error::Error, Result};

use crate::coord::CoordType;
use crate::dtype::{Datatype, CELL_VAR_OFFSET_SIZE};
use crate::filter::FilterPipeline;

/// Owned bytes of one attribute tile.
///
/// A tile starts out holding either persisted (filtered) bytes fetched from
/// storage, or already-unfiltered bytes taken from the tile cache. Running
/// the filter pipeline in reverse replaces the payload with its logical form
/// and flips `filtered`.
#[derive(Debug, Clone)]
pub struct Tile {
    datatype: Datatype,
    cell_size: u64,
    format_version: u32,
    data: Vec<u8>,
    filtered: bool,
    pre_filter_size: u64,
}

impl Tile {
    pub fn new(format_version: u32, datatype: Datatype, cell_size: u64) -> Tile {
        Tile {
            datatype,
            cell_size,
            format_version,
            data: Vec::new(),
            filtered: false,
            pre_filter_size: 0,
        }
    }

    /// A tile holding variable-length cell offsets.
    pub fn new_offsets(format_version: u32) -> Tile {
        Tile::new(format_version, Datatype::Uint64, CELL_VAR_OFFSET_SIZE)
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn cell_size(&self) -> u64 {
        self.cell_size
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn cell_num(&self) -> u64 {
        self.size() / self.cell_size
    }

    pub fn filtered(&self) -> bool {
        self.filtered
    }

    /// Size of the payload before the reverse filter pass replaced it.
    pub fn pre_filter_size(&self) -> u64 {
        self.pre_filter_size
    }

    /// Installs persisted (still filtered) bytes fetched from storage.
    pub fn set_persisted(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
        self.filtered = false;
    }

    /// Installs unfiltered bytes, e.g. taken from the tile cache.
    pub fn set_unfiltered(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
        self.filtered = true;
    }

    /// Runs `pipeline` in reverse over the payload, leaving the tile in its
    /// logical form. A tile already unfiltered is left untouched.
    pub fn filter_reverse(&mut self, pipeline: &FilterPipeline) -> Result<()> {
        if self.filtered {
            return Ok(());
        }
        let orig_size = self.size();
        self.data = pipeline.run_reverse(&self.data)?;
        self.pre_filter_size = orig_size;
        self.filtered = true;
        Ok(())
    }

    /// Reads the coordinate tuple of cell `i`; `out.len()` is the dimension
    /// count.
    pub fn read_coords<T: CoordType>(&self, i: u64, out: &mut [T]) {
        let elem = std::mem::size_of::<T>();
        let base = i as usize * out.len() * elem;
        for (d, value) in out.iter_mut().enumerate() {
            let at = base + d * elem;
            *value = bytemuck::pod_read_unaligned(&self.data[at..at + elem]);
        }
    }

    /// Reads entry `i` of a variable-length offsets tile.
    pub fn offset_at(&self, i: u64) -> u64 {
        let at = (i * CELL_VAR_OFFSET_SIZE) as usize;
        bytemuck::pod_read_unaligned(&self.data[at..at + CELL_VAR_OFFSET_SIZE as usize])
    }

    /// Bytes of cell `i` of a fixed-size tile.
    pub fn cell_bytes(&self, i: u64) -> &[u8] {
        let start = (i * self.cell_size) as usize;
        &self.data[start..start + self.cell_size as usize]
    }
}

/// Fixed tile, or (offsets, values) pair for a variable-sized attribute.
#[derive(Debug, Clone)]
pub struct TilePair {
    pub fixed: Tile,
    pub var: Option<Tile>,
}

impl TilePair {
    pub fn fixed(tile: Tile) -> TilePair {
        TilePair {
            fixed: tile,
            var: None,
        }
    }

    pub fn var_sized(offsets: Tile, values: Tile) -> TilePair {
        TilePair {
            fixed: offsets,
            var: Some(values),
        }
    }

    pub fn var(&self) -> Result<&Tile> {
        self.var
            .as_ref()
            .ok_or_else(|| Error::internal("fixed-size tile where a var tile was expected"))
    }

    /// Byte length of variable-length cell `i`, per the absolute-offsets law:
    /// the last cell ends at the values tile's size.
    pub fn var_cell_size(&self, i: u64) -> Result<u64> {
        let offsets = &self.fixed;
        let values = self.var()?;
        let cell_num = offsets.cell_num();
        let size = if i + 1 < cell_num {
            offsets.offset_at(i + 1) - offsets.offset_at(i)
        } else {
            values.size() - (offsets.offset_at(i) - offsets.offset_at(0))
        };
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterPipeline, Lz4CompressionFilter};

    #[test]
    fn filter_reverse_restores_logical_bytes() {
        let pipeline = FilterPipeline::new().add(Lz4CompressionFilter);
        let logical: Vec<u8> = (0..64u8).collect();
        let persisted = pipeline.run_forward(&logical).unwrap();
        let persisted_len = persisted.len() as u64;

        let mut tile = Tile::new(1, Datatype::Uint8, 1);
        tile.set_persisted(persisted);
        assert!(!tile.filtered());
        tile.filter_reverse(&pipeline).unwrap();
        assert!(tile.filtered());
        assert_eq!(tile.data(), logical.as_slice());
        assert_eq!(tile.pre_filter_size(), persisted_len);
        assert_eq!(tile.cell_num(), 64);

        // A second pass is a no-op.
        tile.filter_reverse(&pipeline).unwrap();
        assert_eq!(tile.data(), logical.as_slice());
    }

    #[test]
    fn coords_view() {
        let coords: Vec<i32> = vec![1, 2, 3, 4, 5, 6];
        let mut tile = Tile::new(1, Datatype::Int32, 8);
        tile.set_unfiltered(bytemuck::cast_slice(&coords).to_vec());
        let mut out = [0i32; 2];
        tile.read_coords(2, &mut out);
        assert_eq!(out, [5, 6]);
        assert_eq!(tile.cell_num(), 3);
    }

    #[test]
    fn var_cell_sizes_follow_the_offsets_law() {
        // Cells: "ab", "", "xyz".
        let offsets: Vec<u64> = vec![0, 2, 2];
        let mut off_tile = Tile::new_offsets(1);
        off_tile.set_unfiltered(bytemuck::cast_slice(&offsets).to_vec());
        let mut val_tile = Tile::new(1, Datatype::Uint8, 1);
        val_tile.set_unfiltered(b"abxyz".to_vec());
        let pair = TilePair::var_sized(off_tile, val_tile);

        assert_eq!(pair.var_cell_size(0).unwrap(), 2);
        assert_eq!(pair.var_cell_size(1).unwrap(), 0);
        assert_eq!(pair.var_cell_size(2).unwrap(), 3);
    }
}
