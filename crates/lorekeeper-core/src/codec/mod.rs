//! Checksum, compression, and encryption primitives.
//!
//! All call sites go through these seams so a different target can swap the
//! implementations without touching the managers.

use std::io::{Read, Write};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 hex digest of the given bytes.
pub fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Byte-level compression seam.
pub trait Codec: Send + Sync {
    /// Compress a byte buffer.
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
    /// Decompress a previously compressed buffer.
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Gzip codec used by default for oversized payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Size of the nonce prepended to every sealed buffer.
const NONCE_LEN: usize = 12;

/// AEAD cipher for the ephemeral store.
///
/// The key is generated per instance and never persisted, so encrypted
/// entries cannot outlive the process. That tier is explicitly non-durable.
pub struct EphemeralCipher {
    cipher: ChaCha20Poly1305,
}

impl EphemeralCipher {
    /// Create a cipher with a fresh random key.
    pub fn new() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            cipher: ChaCha20Poly1305::new(&key),
        }
    }

    /// Create a cipher from an explicit key (tests only need determinism).
    pub fn from_key(key_bytes: &[u8; 32]) -> Self {
        let key = Key::from_slice(key_bytes);
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    /// Encrypt, prepending the random nonce to the ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|error| Error::Crypto(format!("encrypt failed: {error}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a buffer produced by `seal`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::Crypto("sealed buffer too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|error| Error::Crypto(format!("decrypt failed: {error}")))
    }
}

impl Default for EphemeralCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn checksum_is_stable_sha256() {
        // sha256("hello")
        assert_eq!(
            checksum_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn gzip_round_trips() {
        let codec = GzipCodec;
        let input = b"repeated repeated repeated repeated repeated".to_vec();
        let compressed = codec.compress(&input).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(codec.decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn decompress_rejects_garbage() {
        let codec = GzipCodec;
        assert!(codec.decompress(b"not gzip at all").is_err());
    }

    #[test]
    fn cipher_round_trips() {
        let cipher = EphemeralCipher::new();
        let sealed = cipher.seal(b"session secret").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"session secret");
        assert_eq!(cipher.open(&sealed).unwrap(), b"session secret");
    }

    #[test]
    fn cipher_rejects_foreign_key() {
        let sealed = EphemeralCipher::new().seal(b"session secret").unwrap();
        let other = EphemeralCipher::new();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn cipher_rejects_truncated_input() {
        let cipher = EphemeralCipher::new();
        assert!(cipher.open(b"short").is_err());
    }
}
