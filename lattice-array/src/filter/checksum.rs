//! Checksum filter: XXH3-64 appended to the payload, verified on reverse.

use lattice_common::{error::Error, Result};
use xxhash_rust::xxh3::xxh3_64;

use super::Filter;

const DIGEST_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3ChecksumFilter;

impl Filter for Xxh3ChecksumFilter {
    fn name(&self) -> &'static str {
        "xxh3-checksum"
    }

    fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + DIGEST_LEN);
        out.extend_from_slice(data);
        out.extend_from_slice(&xxh3_64(data).to_le_bytes());
        Ok(out)
    }

    fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < DIGEST_LEN {
            return Err(Error::filter("xxh3-checksum", "payload shorter than digest"));
        }
        let (payload, digest) = data.split_at(data.len() - DIGEST_LEN);
        let expected = u64::from_le_bytes(digest.try_into().expect("digest width"));
        if xxh3_64(payload) != expected {
            return Err(Error::filter("xxh3-checksum", "checksum mismatch"));
        }
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_intact_payload() {
        let data = b"0123456789".to_vec();
        let stamped = Xxh3ChecksumFilter.run_forward(&data).unwrap();
        assert_eq!(Xxh3ChecksumFilter.run_reverse(&stamped).unwrap(), data);
    }

    #[test]
    fn detects_corruption() {
        let mut stamped = Xxh3ChecksumFilter.run_forward(b"0123456789").unwrap();
        stamped[3] ^= 0xff;
        assert!(Xxh3ChecksumFilter.run_reverse(&stamped).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(Xxh3ChecksumFilter.run_reverse(&[0u8; 4]).is_err());
    }
}
