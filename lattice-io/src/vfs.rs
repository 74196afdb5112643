//! Scatter reads: many byte regions of one file fetched by a single pool task.

use std::sync::Arc;

use lattice_common::{error::Error, Result};
use lattice_workflow::{JoinHandle, ThreadPool};

use crate::ObjectStore;

/// One byte region of a file to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegion {
    pub offset: u64,
    pub length: usize,
}

impl ReadRegion {
    pub fn new(offset: u64, length: usize) -> ReadRegion {
        ReadRegion { offset, length }
    }
}

/// Virtual filesystem facade over an [`ObjectStore`].
#[derive(Clone)]
pub struct Vfs {
    store: Arc<dyn ObjectStore>,
}

impl Vfs {
    pub fn new(store: Arc<dyn ObjectStore>) -> Vfs {
        Vfs { store }
    }

    /// Submits one pool task that reads every region of `uri`, returning a
    /// handle with the region payloads in request order.
    ///
    /// Callers batch one `read_all` per file and await the returned handles
    /// collectively; no payload is observed before the wait-all barrier.
    pub fn read_all(
        &self,
        uri: &str,
        regions: Vec<ReadRegion>,
        pool: &ThreadPool,
    ) -> JoinHandle<Result<Vec<Vec<u8>>>> {
        let store = self.store.clone();
        let uri = uri.to_string();
        pool.spawn(move || {
            let file = store
                .open(&uri)
                .map_err(|e| Error::vfs_io(uri.clone(), e))?;
            let mut payloads = Vec::with_capacity(regions.len());
            for region in regions {
                let mut buf = vec![0u8; region.length];
                file.read_into(region.offset, &mut buf)
                    .map_err(|e| Error::vfs_io(uri.clone(), e))?;
                payloads.push(buf);
            }
            Ok(payloads)
        })
    }
}
