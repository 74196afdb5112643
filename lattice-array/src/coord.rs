//! Coordinate arithmetic, monomorphized over the domain's physical type.
//!
//! The read pipeline is generic over [`CoordType`]; a reader is instantiated
//! for the schema's coordinate datatype and every geometric operation
//! monomorphizes. Floating-point coordinates participate in sparse geometry
//! (overlap, containment, ordering) but have no cell positions; integer-only
//! operations are guarded at the call site with [`CoordType::is_real`].

use crate::dtype::Datatype;

/// A physical coordinate type.
pub trait CoordType:
    bytemuck::Pod
    + num_traits::ToPrimitive
    + PartialOrd
    + PartialEq
    + Copy
    + Send
    + Sync
    + std::fmt::Debug
    + 'static
{
    const DATATYPE: Datatype;

    /// True for floating-point coordinate types.
    fn is_real() -> bool {
        Self::DATATYPE.is_real()
    }

    /// Number of integer cells in `[lo, hi]`; `None` for real types.
    /// Returns `Some(0)` when `lo > hi`.
    fn span(lo: Self, hi: Self) -> Option<u64>;

    /// Integer successor; for real types the next representable value.
    fn next_up(self) -> Self;

    /// The value `steps` cells after `self`. Integer types only.
    fn advance(self, steps: u64) -> Self;

    /// Cells between `lo` and `self` (`self - lo`). Integer types only.
    fn steps_from(self, lo: Self) -> u64;

    /// Greatest value of the lower half when bisecting `[lo, hi]`.
    fn split_point(lo: Self, hi: Self) -> Self;

    /// Zero-based tile index of `self` on an axis starting at `lo` with the
    /// given tile extent.
    fn tile_index(self, lo: Self, extent: Self) -> u64;
}

macro_rules! integer_coord {
    ($ty:ty, $dt:expr) => {
        impl CoordType for $ty {
            const DATATYPE: Datatype = $dt;

            fn span(lo: Self, hi: Self) -> Option<u64> {
                if lo > hi {
                    return Some(0);
                }
                Some(((hi as i128) - (lo as i128) + 1) as u64)
            }

            fn next_up(self) -> Self {
                self.wrapping_add(1)
            }

            fn advance(self, steps: u64) -> Self {
                ((self as i128) + (steps as i128)) as $ty
            }

            fn steps_from(self, lo: Self) -> u64 {
                ((self as i128) - (lo as i128)) as u64
            }

            fn split_point(lo: Self, hi: Self) -> Self {
                // Floor midpoint: [lo, lo + (hi - lo) / 2] is never empty.
                let half = (((hi as i128) - (lo as i128)) / 2) as u64;
                lo.advance(half)
            }

            fn tile_index(self, lo: Self, extent: Self) -> u64 {
                self.steps_from(lo) / (extent as u64)
            }
        }
    };
}

macro_rules! real_coord {
    ($ty:ty, $dt:expr) => {
        impl CoordType for $ty {
            const DATATYPE: Datatype = $dt;

            fn span(_lo: Self, _hi: Self) -> Option<u64> {
                None
            }

            fn next_up(self) -> Self {
                // Next representable value toward +inf.
                if self.is_nan() || self == <$ty>::INFINITY {
                    return self;
                }
                if self == 0.0 {
                    return <$ty>::from_bits(1);
                }
                let bits = self.to_bits();
                if self < 0.0 {
                    <$ty>::from_bits(bits - 1)
                } else {
                    <$ty>::from_bits(bits + 1)
                }
            }

            fn advance(self, _steps: u64) -> Self {
                unreachable!("integer-only operation on a real coordinate type")
            }

            fn steps_from(self, _lo: Self) -> u64 {
                unreachable!("integer-only operation on a real coordinate type")
            }

            fn split_point(lo: Self, hi: Self) -> Self {
                lo + (hi - lo) / 2.0
            }

            fn tile_index(self, lo: Self, extent: Self) -> u64 {
                ((self - lo) / extent) as u64
            }
        }
    };
}

integer_coord!(i8, Datatype::Int8);
integer_coord!(u8, Datatype::Uint8);
integer_coord!(i16, Datatype::Int16);
integer_coord!(u16, Datatype::Uint16);
integer_coord!(i32, Datatype::Int32);
integer_coord!(u32, Datatype::Uint32);
integer_coord!(i64, Datatype::Int64);
integer_coord!(u64, Datatype::Uint64);
real_coord!(f32, Datatype::Float32);
real_coord!(f64, Datatype::Float64);

#[cfg(test)]
mod tests {
    use super::CoordType;

    #[test]
    fn integer_span_and_advance() {
        assert_eq!(<i32 as CoordType>::span(2, 5), Some(4));
        assert_eq!(<i32 as CoordType>::span(5, 2), Some(0));
        assert_eq!(<i64 as CoordType>::span(-3, 3), Some(7));
        assert_eq!((-3i32).advance(4), 1);
        assert_eq!(7u8.steps_from(2), 5);
    }

    #[test]
    fn split_point_keeps_both_halves_nonempty() {
        assert_eq!(<i32 as CoordType>::split_point(0, 9), 4);
        assert_eq!(<i32 as CoordType>::split_point(2, 3), 2);
        assert_eq!(<u64 as CoordType>::split_point(10, 10), 10);
    }

    #[test]
    fn real_split_and_next_up() {
        let mid = <f64 as CoordType>::split_point(0.0, 1.0);
        assert_eq!(mid, 0.5);
        assert!(mid.next_up() > mid);
        assert!(<f64 as CoordType>::span(0.0, 1.0).is_none());
    }

    #[test]
    fn tile_index_is_floor_division() {
        assert_eq!(7i32.tile_index(0, 4), 1);
        assert_eq!(3i32.tile_index(0, 4), 0);
        assert_eq!(5.5f64.tile_index(0.0, 2.0), 2);
    }
}
