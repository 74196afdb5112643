//! I/O abstractions for the read path:
//! - [`ReadAt`]: positional reader able to fetch a byte range of a file/blob.
//! - [`ObjectStore`]: URI → reader resolution.
//! - [`Vfs`]: scatter reads of many byte regions per file over a thread pool.
//! - [`TileCache`]: shared cache of unfiltered tile bytes keyed by (uri, offset).

use std::sync::Arc;

pub mod memory;
pub mod tile_cache;
pub mod vfs;

pub use tile_cache::TileCache;
pub use vfs::{ReadRegion, Vfs};

/// Random-access reader.
pub trait ReadAt: Send + Sync + 'static {
    /// Returns the size of the underlying object.
    fn size(&self) -> std::io::Result<u64>;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Unlike `std::io::Read`, short reads are errors: the requested range
    /// must lie entirely within the object.
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
}

impl<T> ReadAt for Arc<T>
where
    T: ReadAt + ?Sized,
{
    fn size(&self) -> std::io::Result<u64> {
        self.as_ref().size()
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.as_ref().read_into(offset, buf)
    }
}

/// Resolves a URI to a readable object.
pub trait ObjectStore: Send + Sync + 'static {
    fn open(&self, uri: &str) -> std::io::Result<Arc<dyn ReadAt>>;
}
