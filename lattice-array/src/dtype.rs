//! Cell datatypes, cell orders and result layouts.

/// Physical datatype of attribute values and coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl Datatype {
    /// Size of one value in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Datatype::Int8 | Datatype::Uint8 => 1,
            Datatype::Int16 | Datatype::Uint16 => 2,
            Datatype::Int32 | Datatype::Uint32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::Uint64 | Datatype::Float64 => 8,
        }
    }

    /// True for floating-point types, which are legal coordinates only in
    /// sparse arrays.
    pub fn is_real(&self) -> bool {
        matches!(self, Datatype::Float32 | Datatype::Float64)
    }

    /// The value written into result cells no fragment covers: the minimum
    /// for signed integers, the maximum for unsigned, NaN for floats.
    pub fn fill_value(&self) -> &'static [u8] {
        const FILL_I8: [u8; 1] = i8::MIN.to_ne_bytes();
        const FILL_U8: [u8; 1] = u8::MAX.to_ne_bytes();
        const FILL_I16: [u8; 2] = i16::MIN.to_ne_bytes();
        const FILL_U16: [u8; 2] = u16::MAX.to_ne_bytes();
        const FILL_I32: [u8; 4] = i32::MIN.to_ne_bytes();
        const FILL_U32: [u8; 4] = u32::MAX.to_ne_bytes();
        const FILL_I64: [u8; 8] = i64::MIN.to_ne_bytes();
        const FILL_U64: [u8; 8] = u64::MAX.to_ne_bytes();
        // Quiet-NaN bit patterns; f32/f64 byte conversion is not const.
        const FILL_F32: [u8; 4] = 0x7fc0_0000u32.to_ne_bytes();
        const FILL_F64: [u8; 8] = 0x7ff8_0000_0000_0000u64.to_ne_bytes();
        match self {
            Datatype::Int8 => &FILL_I8,
            Datatype::Uint8 => &FILL_U8,
            Datatype::Int16 => &FILL_I16,
            Datatype::Uint16 => &FILL_U16,
            Datatype::Int32 => &FILL_I32,
            Datatype::Uint32 => &FILL_U32,
            Datatype::Int64 => &FILL_I64,
            Datatype::Uint64 => &FILL_U64,
            Datatype::Float32 => &FILL_F32,
            Datatype::Float64 => &FILL_F64,
        }
    }
}

/// Order of cells within a tile (and of tiles within the domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    RowMajor,
    ColMajor,
}

/// Result layout requested by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColMajor,
    /// Tile-major traversal with the schema's cell order within each tile.
    GlobalOrder,
    /// No ordering guarantee; valid only for sparse reads.
    Unordered,
}

/// Size in bytes of one entry in a variable-length offsets stream.
pub const CELL_VAR_OFFSET_SIZE: u64 = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_types() {
        assert_eq!(Datatype::Int8.size(), 1);
        assert_eq!(Datatype::Uint16.size(), 2);
        assert_eq!(Datatype::Float32.size(), 4);
        assert_eq!(Datatype::Uint64.size(), 8);
    }

    #[test]
    fn fill_values_decode_to_sentinels() {
        let v = i32::from_ne_bytes(Datatype::Int32.fill_value().try_into().unwrap());
        assert_eq!(v, i32::MIN);
        let v = u16::from_ne_bytes(Datatype::Uint16.fill_value().try_into().unwrap());
        assert_eq!(v, u16::MAX);
        let v = f64::from_ne_bytes(Datatype::Float64.fill_value().try_into().unwrap());
        assert!(v.is_nan());
    }
}
