//! Cell-range copier: materializes cell ranges into the caller's attribute
//! buffers, fixed and variable-sized, with whole-partition overflow checks
//! before any byte is written.

use lattice_common::{error::Error, Result};
use lattice_workflow::{data_parallel, ThreadPool};

use crate::dtype::CELL_VAR_OFFSET_SIZE;
use crate::read::planner::OverlappingTile;
use crate::read::{AttributeBuffer, CellRange};

/// Copies fixed-size cells; returns true on overflow (nothing written).
pub fn copy_fixed_cells(
    pool: &ThreadPool,
    tiles: &[OverlappingTile],
    attr: &str,
    cell_size: u64,
    fill_value: &'static [u8],
    cell_ranges: &[CellRange],
    buffer: &mut AttributeBuffer,
) -> Result<bool> {
    // Destination offset of each range, then the whole-partition size check.
    let mut total = 0u64;
    let mut range_bytes = Vec::with_capacity(cell_ranges.len());
    for cr in cell_ranges {
        let bytes = cr.width() * cell_size;
        range_bytes.push(bytes);
        total += bytes;
    }
    if total > buffer.size() {
        return Ok(true);
    }

    let mut jobs: Vec<(&mut [u8], &CellRange)> = Vec::with_capacity(cell_ranges.len());
    let mut rest = &mut buffer.data_mut()[..total as usize];
    for (cr, &bytes) in cell_ranges.iter().zip(&range_bytes) {
        let (chunk, tail) = rest.split_at_mut(bytes as usize);
        rest = tail;
        jobs.push((chunk, cr));
    }

    let statuses = data_parallel::map(pool, jobs, |(chunk, cr)| -> Result<()> {
        match cr.tile {
            None => {
                for slot in chunk.chunks_exact_mut(fill_value.len()) {
                    slot.copy_from_slice(fill_value);
                }
            }
            Some(arena_idx) => {
                let pair = tiles[arena_idx]
                    .attr_tiles
                    .get(attr)
                    .ok_or_else(|| Error::internal(format!("tile missing attribute '{attr}'")))?;
                let src_start = (cr.start * cell_size) as usize;
                let src_end = ((cr.end + 1) * cell_size) as usize;
                chunk.copy_from_slice(&pair.fixed.data()[src_start..src_end]);
            }
        }
        Ok(())
    });
    for status in statuses {
        status?;
    }

    buffer.set_size(total);
    Ok(false)
}

/// Copies variable-sized cells; returns true on overflow (nothing written).
///
/// Pass one walks every cell sequentially, computing both destination
/// totals; pass two copies ranges in parallel, writing each cell's absolute
/// offset in the output values buffer followed by its bytes. Empty cells
/// contribute one offset entry and zero value bytes.
pub fn copy_var_cells(
    pool: &ThreadPool,
    tiles: &[OverlappingTile],
    attr: &str,
    cell_ranges: &[CellRange],
    buffer: &mut AttributeBuffer,
) -> Result<bool> {
    struct RangeDest {
        var_base: u64,
        cell_sizes: Vec<u64>,
    }

    let mut total_offset = 0u64;
    let mut total_var = 0u64;
    let mut dests = Vec::with_capacity(cell_ranges.len());
    for cr in cell_ranges {
        let mut cell_sizes = Vec::with_capacity(cr.width() as usize);
        match cr.tile {
            None => cell_sizes.resize(cr.width() as usize, 0),
            Some(arena_idx) => {
                let pair = tiles[arena_idx]
                    .attr_tiles
                    .get(attr)
                    .ok_or_else(|| Error::internal(format!("tile missing attribute '{attr}'")))?;
                for cell in cr.start..=cr.end {
                    cell_sizes.push(pair.var_cell_size(cell)?);
                }
            }
        }
        let range_var: u64 = cell_sizes.iter().sum();
        dests.push(RangeDest {
            var_base: total_var,
            cell_sizes,
        });
        total_offset += cr.width() * CELL_VAR_OFFSET_SIZE;
        total_var += range_var;
    }
    if total_offset > buffer.size() || total_var > buffer.var_size() {
        return Ok(true);
    }

    let (offsets_buf, var_buf) = buffer.data_var_mut();
    let mut jobs: Vec<(&mut [u8], &mut [u8], &CellRange, &RangeDest)> =
        Vec::with_capacity(cell_ranges.len());
    let mut off_rest = &mut offsets_buf[..total_offset as usize];
    let mut var_rest = &mut var_buf[..total_var as usize];
    for (cr, dest) in cell_ranges.iter().zip(&dests) {
        let off_bytes = (cr.width() * CELL_VAR_OFFSET_SIZE) as usize;
        let var_bytes: usize = dest.cell_sizes.iter().sum::<u64>() as usize;
        let (off_chunk, off_tail) = off_rest.split_at_mut(off_bytes);
        off_rest = off_tail;
        let (var_chunk, var_tail) = var_rest.split_at_mut(var_bytes);
        var_rest = var_tail;
        jobs.push((off_chunk, var_chunk, cr, dest));
    }

    let statuses = data_parallel::map(pool, jobs, |(off_chunk, var_chunk, cr, dest)| -> Result<()> {
        let mut var_at = 0usize;
        for (i, &cell_size) in dest.cell_sizes.iter().enumerate() {
            let absolute = dest.var_base + var_at as u64;
            off_chunk[i * 8..i * 8 + 8].copy_from_slice(&absolute.to_ne_bytes());
            if cell_size > 0 {
                let arena_idx = cr.tile.expect("non-empty cell in a fill range");
                let pair = tiles[arena_idx]
                    .attr_tiles
                    .get(attr)
                    .ok_or_else(|| Error::internal(format!("tile missing attribute '{attr}'")))?;
                let offsets = &pair.fixed;
                let cell = cr.start + i as u64;
                let src_start = (offsets.offset_at(cell) - offsets.offset_at(0)) as usize;
                var_chunk[var_at..var_at + cell_size as usize].copy_from_slice(
                    &pair.var()?.data()[src_start..src_start + cell_size as usize],
                );
            }
            var_at += cell_size as usize;
        }
        Ok(())
    });
    for status in statuses {
        status?;
    }

    buffer.set_size(total_offset);
    buffer.set_var_size(total_var);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use lattice_workflow::ThreadPool;

    use super::*;
    use crate::dtype::Datatype;
    use crate::read::planner::OverlappingTile;
    use crate::tile::{Tile, TilePair};

    fn fixed_tile(values: &[i32]) -> OverlappingTile {
        let mut tile = OverlappingTile::new(0, 0, true);
        let mut t = Tile::new(1, Datatype::Int32, 4);
        t.set_unfiltered(bytemuck::cast_slice(values).to_vec());
        tile.attr_tiles.insert("v".into(), TilePair::fixed(t));
        tile
    }

    fn decode_i32(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn decode_u64(bytes: &[u8]) -> Vec<u64> {
        bytes
            .chunks_exact(8)
            .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn var_tile(offsets: &[u64], values: &[u8]) -> OverlappingTile {
        let mut tile = OverlappingTile::new(0, 0, true);
        let mut off = Tile::new_offsets(1);
        off.set_unfiltered(bytemuck::cast_slice(offsets).to_vec());
        let mut val = Tile::new(1, Datatype::Uint8, 1);
        val.set_unfiltered(values.to_vec());
        tile.attr_tiles
            .insert("s".into(), TilePair::var_sized(off, val));
        tile
    }

    #[test]
    fn fixed_copy_with_fill_ranges() {
        let pool = ThreadPool::new(2);
        let tiles = vec![fixed_tile(&[10, 11, 12, 13])];
        let ranges = vec![
            CellRange::tile(0, 1, 2),
            CellRange::fill(0, 1),
            CellRange::tile(0, 3, 3),
        ];
        let mut buffer = AttributeBuffer::fixed(6 * 4);
        let overflow = copy_fixed_cells(
            &pool,
            &tiles,
            "v",
            4,
            Datatype::Int32.fill_value(),
            &ranges,
            &mut buffer,
        )
        .unwrap();
        assert!(!overflow);
        assert_eq!(buffer.size(), 24);
        assert_eq!(
            decode_i32(buffer.bytes()),
            vec![11, 12, i32::MIN, i32::MIN, 13]
        );
    }

    #[test]
    fn fixed_copy_overflow_writes_nothing() {
        let pool = ThreadPool::new(2);
        let tiles = vec![fixed_tile(&[10, 11, 12, 13])];
        let ranges = vec![CellRange::tile(0, 0, 3)];
        let mut buffer = AttributeBuffer::fixed(8);
        let overflow = copy_fixed_cells(
            &pool,
            &tiles,
            "v",
            4,
            Datatype::Int32.fill_value(),
            &ranges,
            &mut buffer,
        )
        .unwrap();
        assert!(overflow);
        // Size untouched by the copier; the orchestrator zeroes on overflow.
        assert_eq!(buffer.size(), 8);
    }

    #[test]
    fn var_copy_writes_absolute_offsets() {
        let pool = ThreadPool::new(2);
        // Cells: "ab", "", "xyz".
        let tiles = vec![var_tile(&[0, 2, 2], b"abxyz")];
        let ranges = vec![CellRange::tile(0, 0, 2)];
        let mut buffer = AttributeBuffer::var(3 * 8, 16);
        let overflow = copy_var_cells(&pool, &tiles, "s", &ranges, &mut buffer).unwrap();
        assert!(!overflow);
        assert_eq!(buffer.size(), 24);
        assert_eq!(buffer.var_size(), 5);
        assert_eq!(decode_u64(buffer.bytes()), vec![0, 2, 2]);
        assert_eq!(buffer.var_bytes(), b"abxyz");
    }

    #[test]
    fn var_copy_overflow_on_either_total() {
        let pool = ThreadPool::new(2);
        let tiles = vec![var_tile(&[0, 2, 2], b"abxyz")];
        let ranges = vec![CellRange::tile(0, 0, 2)];

        let mut small_values = AttributeBuffer::var(3 * 8, 4);
        assert!(copy_var_cells(&pool, &tiles, "s", &ranges, &mut small_values).unwrap());

        let mut small_offsets = AttributeBuffer::var(2 * 8, 16);
        assert!(copy_var_cells(&pool, &tiles, "s", &ranges, &mut small_offsets).unwrap());
    }

    #[test]
    fn var_fill_cells_are_zero_length() {
        let pool = ThreadPool::new(2);
        let tiles = vec![var_tile(&[0, 2, 2], b"abxyz")];
        let ranges = vec![CellRange::fill(0, 1), CellRange::tile(0, 2, 2)];
        let mut buffer = AttributeBuffer::var(3 * 8, 16);
        let overflow = copy_var_cells(&pool, &tiles, "s", &ranges, &mut buffer).unwrap();
        assert!(!overflow);
        assert_eq!(decode_u64(buffer.bytes()), vec![0, 0, 0]);
        assert_eq!(buffer.var_bytes(), b"xyz");
    }
}
