//! Compression filters: LZ4 block and Zstd.

use lattice_common::{error::Error, Result};

use super::Filter;

/// LZ4 block compression with the uncompressed size prepended.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4CompressionFilter;

impl Filter for Lz4CompressionFilter {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, None, true)
            .map_err(|e| Error::filter("lz4", e.to_string()))
    }

    fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::filter("lz4", e.to_string()))
    }
}

/// Zstd compression at a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressionFilter {
    level: i32,
}

impl ZstdCompressionFilter {
    pub fn new(level: i32) -> ZstdCompressionFilter {
        ZstdCompressionFilter { level }
    }
}

impl Default for ZstdCompressionFilter {
    fn default() -> ZstdCompressionFilter {
        ZstdCompressionFilter { level: 3 }
    }
}

impl Filter for ZstdCompressionFilter {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| Error::filter("zstd", e.to_string()))
    }

    fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| Error::filter("zstd", e.to_string()))
    }
}
