//! Filter pipelines: transformations between a tile's persisted bytes and
//! its in-memory form.
//!
//! A pipeline runs front-to-back when persisting (`run_forward`) and
//! back-to-front when reading (`run_reverse`). The read path only ever runs
//! pipelines in reverse; the forward direction exists so fixtures and tests
//! can produce persisted tiles.

use std::sync::Arc;

use lattice_common::Result;

mod checksum;
mod compression;
mod encryption;

pub use checksum::Xxh3ChecksumFilter;
pub use compression::{Lz4CompressionFilter, ZstdCompressionFilter};
pub use encryption::{Aes256GcmFilter, EncryptionKey};

/// One reversible byte transformation.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persisting direction: plain bytes in, transformed bytes out.
    fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Reading direction: undoes [`run_forward`](Self::run_forward).
    fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Ordered list of filters applied to a tile's bytes.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterPipeline {
    pub fn new() -> FilterPipeline {
        Default::default()
    }

    pub fn add(mut self, filter: impl Filter + 'static) -> FilterPipeline {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = data.to_vec();
        for filter in &self.filters {
            bytes = filter.run_forward(&bytes)?;
        }
        Ok(bytes)
    }

    pub fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = data.to_vec();
        for filter in self.filters.iter().rev() {
            bytes = filter.run_reverse(&bytes)?;
        }
        Ok(bytes)
    }

    /// Returns a copy of `pipeline` with the encryption filter appended when
    /// `key` is present; the pipeline itself is unchanged otherwise.
    pub fn append_encryption_filter(pipeline: &FilterPipeline, key: &EncryptionKey) -> FilterPipeline {
        match key {
            EncryptionKey::None => pipeline.clone(),
            EncryptionKey::Aes256Gcm(key) => pipeline.clone().add(Aes256GcmFilter::new(*key)),
        }
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|flt| flt.name()))
            .finish()
    }
}
