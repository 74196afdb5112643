//! Tile encryption filter: AES-256-GCM, `nonce ∥ ciphertext ∥ tag` envelope.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use lattice_common::{error::Error, Result};
use rand::RngCore;

use super::Filter;

const NONCE_LEN: usize = 12;

/// Encryption key held by the array that owns the fragments.
#[derive(Clone, Default)]
pub enum EncryptionKey {
    #[default]
    None,
    Aes256Gcm([u8; 32]),
}

impl EncryptionKey {
    pub fn is_set(&self) -> bool {
        !matches!(self, EncryptionKey::None)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material.
        match self {
            EncryptionKey::None => f.write_str("EncryptionKey::None"),
            EncryptionKey::Aes256Gcm(_) => f.write_str("EncryptionKey::Aes256Gcm(..)"),
        }
    }
}

pub struct Aes256GcmFilter {
    key: [u8; 32],
}

impl Aes256GcmFilter {
    pub fn new(key: [u8; 32]) -> Aes256GcmFilter {
        Aes256GcmFilter { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.key).expect("key is always 32 bytes")
    }
}

impl Filter for Aes256GcmFilter {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn run_forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher()
            .encrypt(nonce, data)
            .map_err(|_| Error::filter("aes-256-gcm", "encryption failed"))?;
        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    fn run_reverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::filter("aes-256-gcm", "envelope shorter than nonce"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                Error::filter("aes-256-gcm", "decryption failed: wrong key or tampered data")
            })
    }
}
