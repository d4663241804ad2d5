//! Streaming encryption envelope for file content
//!
//! Files written under managed encryption are sealed chunk by chunk with
//! AES-256-GCM. Each file stores {key version, random salt, random nonce
//! prefix}; the content key is derived as HMAC-SHA256(master key, salt) and
//! chunk `i` uses the nonce `prefix ‖ i` (big-endian u64), so nonces never
//! repeat within a file and keys never repeat across files. The envelope is
//! independent of how the bytes arrive: multipart parts encrypt with a
//! starting chunk index so the nonce sequence stays globally consistent.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use bytes::{Bytes, BytesMut};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::PlatformError;

type HmacSha256 = Hmac<Sha256>;

/// Plaintext bytes sealed per AEAD invocation.
pub const ENCRYPTION_CHUNK_SIZE: u64 = 1024 * 1024;
/// GCM authentication tag appended to every sealed chunk.
pub const GCM_TAG_LEN: u64 = 16;
pub const SALT_LEN: usize = 16;
pub const NONCE_PREFIX_LEN: usize = 4;
const NONCE_LEN: usize = 12;
const MASTER_KEY_LEN: usize = 32;

/// Whether a workspace's content is sealed by the envelope or passed through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "encryption_mode", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    #[default]
    None,
    Managed,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "none",
            EncryptionMode::Managed => "managed",
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, EncryptionMode::Managed)
    }
}

impl Display for EncryptionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(EncryptionMode::None),
            "managed" => Ok(EncryptionMode::Managed),
            _ => Err(anyhow::anyhow!("Invalid encryption mode: {}", s)),
        }
    }
}

/// Per-file envelope metadata, stored on the file row (JSONB). Salt and
/// nonce prefix are base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMeta {
    pub key_version: i32,
    pub salt: String,
    pub nonce_prefix: String,
}

impl EncryptionMeta {
    pub fn salt_bytes(&self) -> Result<Vec<u8>, PlatformError> {
        let bytes = general_purpose::STANDARD
            .decode(&self.salt)
            .map_err(|e| PlatformError::Crypto(format!("Invalid salt encoding: {}", e)))?;
        if bytes.len() != SALT_LEN {
            return Err(PlatformError::Crypto(format!(
                "Salt must be {} bytes, got {}",
                SALT_LEN,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub fn nonce_prefix_bytes(&self) -> Result<Vec<u8>, PlatformError> {
        let bytes = general_purpose::STANDARD
            .decode(&self.nonce_prefix)
            .map_err(|e| PlatformError::Crypto(format!("Invalid nonce prefix encoding: {}", e)))?;
        if bytes.len() != NONCE_PREFIX_LEN {
            return Err(PlatformError::Crypto(format!(
                "Nonce prefix must be {} bytes, got {}",
                NONCE_PREFIX_LEN,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

/// Master key material, versioned for rotation. Built from configuration at
/// startup and passed explicitly; the current version seals new files while
/// older versions stay readable.
#[derive(Clone)]
pub struct MasterKeyRing {
    keys: HashMap<i32, [u8; MASTER_KEY_LEN]>,
    current_version: i32,
}

impl MasterKeyRing {
    /// Create a ring holding a single current key from raw 32-byte material.
    pub fn from_key_bytes(version: i32, key_bytes: &[u8]) -> Result<Self, PlatformError> {
        let key = master_key_from_slice(key_bytes)?;
        let mut keys = HashMap::new();
        keys.insert(version, key);
        Ok(Self {
            keys,
            current_version: version,
        })
    }

    /// Create a ring from a base64-encoded 32-byte key (configuration form).
    pub fn from_base64(version: i32, encoded: &str) -> Result<Self, PlatformError> {
        let key_bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| PlatformError::Crypto(format!("Failed to decode master key: {}", e)))?;
        Self::from_key_bytes(version, &key_bytes)
    }

    /// Add a retired key so files sealed under `version` stay readable.
    pub fn with_key(mut self, version: i32, key_bytes: &[u8]) -> Result<Self, PlatformError> {
        self.keys.insert(version, master_key_from_slice(key_bytes)?);
        Ok(self)
    }

    pub fn current_version(&self) -> i32 {
        self.current_version
    }

    fn key_for(&self, version: i32) -> Result<&[u8; MASTER_KEY_LEN], PlatformError> {
        self.keys.get(&version).ok_or_else(|| {
            PlatformError::Crypto(format!("No master key for version {}", version))
        })
    }
}

fn master_key_from_slice(key_bytes: &[u8]) -> Result<[u8; MASTER_KEY_LEN], PlatformError> {
    if key_bytes.len() != MASTER_KEY_LEN {
        return Err(PlatformError::Crypto(format!(
            "Master key must be {} bytes (256 bits), got {}",
            MASTER_KEY_LEN,
            key_bytes.len()
        )));
    }
    let mut key = [0u8; MASTER_KEY_LEN];
    key.copy_from_slice(key_bytes);
    Ok(key)
}

/// The streaming envelope itself. Stateless apart from the key ring; safe to
/// share behind an Arc.
#[derive(Clone)]
pub struct EncryptionEnvelope {
    ring: MasterKeyRing,
}

impl EncryptionEnvelope {
    pub fn new(ring: MasterKeyRing) -> Self {
        Self { ring }
    }

    /// Fresh metadata for a new file: current key version, random salt,
    /// random nonce prefix.
    pub fn generate_meta(&self) -> EncryptionMeta {
        use rand::RngCore;
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        rand::rngs::OsRng.fill_bytes(&mut prefix);
        EncryptionMeta {
            key_version: self.ring.current_version(),
            salt: general_purpose::STANDARD.encode(salt),
            nonce_prefix: general_purpose::STANDARD.encode(prefix),
        }
    }

    /// Derive the per-file content cipher: HMAC-SHA256(master, salt).
    fn content_cipher(&self, meta: &EncryptionMeta) -> Result<Aes256Gcm, PlatformError> {
        let master = self.ring.key_for(meta.key_version)?;
        let salt = meta.salt_bytes()?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(master)
            .map_err(|e| PlatformError::Crypto(format!("Key derivation failed: {}", e)))?;
        mac.update(&salt);
        let derived = mac.finalize().into_bytes();
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived)))
    }

    /// Seal one chunk. `chunk_index` is the global index within the file.
    pub fn encrypt_chunk(
        &self,
        meta: &EncryptionMeta,
        chunk_index: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PlatformError> {
        if plaintext.is_empty() || plaintext.len() as u64 > ENCRYPTION_CHUNK_SIZE {
            return Err(PlatformError::Crypto(format!(
                "Chunk must be 1..={} bytes, got {}",
                ENCRYPTION_CHUNK_SIZE,
                plaintext.len()
            )));
        }
        let cipher = self.content_cipher(meta)?;
        let prefix = meta.nonce_prefix_bytes()?;
        let nonce = chunk_nonce(&prefix, chunk_index);
        cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| PlatformError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Open one sealed chunk, authenticating its tag.
    pub fn decrypt_chunk(
        &self,
        meta: &EncryptionMeta,
        chunk_index: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PlatformError> {
        if (ciphertext.len() as u64) <= GCM_TAG_LEN {
            return Err(PlatformError::Crypto("Sealed chunk too short".to_string()));
        }
        let cipher = self.content_cipher(meta)?;
        let prefix = meta.nonce_prefix_bytes()?;
        let nonce = chunk_nonce(&prefix, chunk_index);
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| PlatformError::Crypto(format!("Decryption failed: {}", e)))
    }

    /// Seal a contiguous run of plaintext that begins at chunk
    /// `first_chunk_index`. Multipart parts pass the index their offset in
    /// the file maps to; a whole file passes 0.
    pub fn encrypt_part(
        &self,
        meta: &EncryptionMeta,
        first_chunk_index: u64,
        plaintext: &Bytes,
    ) -> Result<Bytes, PlatformError> {
        let mut sealed = BytesMut::with_capacity(
            plaintext.len() + (chunk_count(plaintext.len() as u64) * GCM_TAG_LEN) as usize,
        );
        for (offset, chunk) in plaintext
            .chunks(ENCRYPTION_CHUNK_SIZE as usize)
            .enumerate()
        {
            let sealed_chunk = self.encrypt_chunk(meta, first_chunk_index + offset as u64, chunk)?;
            sealed.extend_from_slice(&sealed_chunk);
        }
        Ok(sealed.freeze())
    }

    /// Open a contiguous run of sealed chunks beginning at
    /// `first_chunk_index`. The input must be chunk-aligned (every chunk but
    /// the last exactly `ENCRYPTION_CHUNK_SIZE + GCM_TAG_LEN` bytes).
    pub fn decrypt_part(
        &self,
        meta: &EncryptionMeta,
        first_chunk_index: u64,
        ciphertext: &Bytes,
    ) -> Result<Bytes, PlatformError> {
        let sealed_chunk_len = (ENCRYPTION_CHUNK_SIZE + GCM_TAG_LEN) as usize;
        let mut opened = BytesMut::with_capacity(ciphertext.len());
        for (offset, chunk) in ciphertext.chunks(sealed_chunk_len).enumerate() {
            let plain = self.decrypt_chunk(meta, first_chunk_index + offset as u64, chunk)?;
            opened.extend_from_slice(&plain);
        }
        Ok(opened.freeze())
    }
}

/// Nonce for chunk `index`: 4-byte prefix followed by the index as u64 BE.
pub fn chunk_nonce(prefix: &[u8], index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Number of chunks a plaintext of `len` bytes occupies.
pub fn chunk_count(len: u64) -> u64 {
    len.div_ceil(ENCRYPTION_CHUNK_SIZE)
}

/// Stored size of a plaintext of `len` bytes once sealed.
pub fn ciphertext_len(len: u64) -> u64 {
    len + chunk_count(len) * GCM_TAG_LEN
}

/// The chunk index a plaintext byte offset falls into.
pub fn chunk_index_for_offset(offset: u64) -> u64 {
    offset / ENCRYPTION_CHUNK_SIZE
}

/// Ciphertext span covering the plaintext byte range [start, end]
/// (inclusive), used to translate ranged reads of encrypted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Global index of the first chunk to fetch.
    pub first_chunk_index: u64,
    /// Byte offset of that chunk within the stored ciphertext.
    pub cipher_start: u64,
    /// Bytes of ciphertext to fetch (chunk-aligned, may run past `end`).
    pub cipher_len: u64,
    /// Plaintext bytes to skip from the decrypted span before `start`.
    pub plain_skip: u64,
}

/// Translate an inclusive plaintext byte range into the sealed-chunk span
/// that must be fetched and opened to serve it.
pub fn chunk_span_for_range(start: u64, end: u64, plaintext_len: u64) -> ChunkSpan {
    let sealed_chunk = ENCRYPTION_CHUNK_SIZE + GCM_TAG_LEN;
    let first = chunk_index_for_offset(start);
    let last = chunk_index_for_offset(end.min(plaintext_len.saturating_sub(1)));
    let total = ciphertext_len(plaintext_len);
    let cipher_start = first * sealed_chunk;
    let cipher_end = ((last + 1) * sealed_chunk).min(total);
    ChunkSpan {
        first_chunk_index: first,
        cipher_start,
        cipher_len: cipher_end - cipher_start,
        plain_skip: start - first * ENCRYPTION_CHUNK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_envelope() -> EncryptionEnvelope {
        let test_key = b"01234567890123456789012345678901";
        EncryptionEnvelope::new(MasterKeyRing::from_key_bytes(1, test_key).unwrap())
    }

    #[test]
    fn test_chunk_round_trip() {
        let envelope = test_envelope();
        let meta = envelope.generate_meta();
        let plaintext = b"the quick brown fox";

        let sealed = envelope.encrypt_chunk(&meta, 0, plaintext).unwrap();
        assert_ne!(&sealed[..plaintext.len()], plaintext);
        assert_eq!(sealed.len(), plaintext.len() + GCM_TAG_LEN as usize);

        let opened = envelope.decrypt_chunk(&meta, 0, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_wrong_chunk_index_fails_authentication() {
        let envelope = test_envelope();
        let meta = envelope.generate_meta();
        let sealed = envelope.encrypt_chunk(&meta, 3, b"payload").unwrap();
        assert!(envelope.decrypt_chunk(&meta, 4, &sealed).is_err());
    }

    #[test]
    fn test_tampered_chunk_fails_authentication() {
        let envelope = test_envelope();
        let meta = envelope.generate_meta();
        let mut sealed = envelope.encrypt_chunk(&meta, 0, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(envelope.decrypt_chunk(&meta, 0, &sealed).is_err());
    }

    #[test]
    fn test_part_round_trip_across_chunk_boundary() {
        let envelope = test_envelope();
        let meta = envelope.generate_meta();
        // Two full chunks plus a ragged tail.
        let len = (2 * ENCRYPTION_CHUNK_SIZE + 12_345) as usize;
        let plaintext = Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>());

        let sealed = envelope.encrypt_part(&meta, 0, &plaintext).unwrap();
        assert_eq!(sealed.len() as u64, ciphertext_len(len as u64));

        let opened = envelope.decrypt_part(&meta, 0, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_parts_encrypted_separately_decrypt_as_one_file() {
        let envelope = test_envelope();
        let meta = envelope.generate_meta();
        let part_chunks = 2u64;
        let part_len = (part_chunks * ENCRYPTION_CHUNK_SIZE) as usize;
        let part_a = Bytes::from(vec![0xAA; part_len]);
        let part_b = Bytes::from(vec![0xBB; 4096]);

        // Second part starts at the chunk index its file offset maps to.
        let sealed_a = envelope.encrypt_part(&meta, 0, &part_a).unwrap();
        let sealed_b = envelope.encrypt_part(&meta, part_chunks, &part_b).unwrap();

        let mut whole = BytesMut::from(&sealed_a[..]);
        whole.extend_from_slice(&sealed_b);
        let opened = envelope.decrypt_part(&meta, 0, &whole.freeze()).unwrap();

        assert_eq!(opened.len(), part_len + 4096);
        assert!(opened[..part_len].iter().all(|&b| b == 0xAA));
        assert!(opened[part_len..].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_two_files_never_share_key_or_nonce_material() {
        let envelope = test_envelope();
        let meta_a = envelope.generate_meta();
        let meta_b = envelope.generate_meta();
        assert_ne!(meta_a.salt, meta_b.salt);

        // Same plaintext and chunk index must still seal differently.
        let sealed_a = envelope.encrypt_chunk(&meta_a, 0, b"same bytes").unwrap();
        let sealed_b = envelope.encrypt_chunk(&meta_b, 0, b"same bytes").unwrap();
        assert_ne!(sealed_a, sealed_b);
    }

    #[test]
    fn test_meta_from_rotated_key_version_still_opens() {
        let old_key = b"old-key-old-key-old-key-old-key!";
        let new_key = b"new-key-new-key-new-key-new-key!";

        let old_ring = MasterKeyRing::from_key_bytes(1, old_key).unwrap();
        let old_envelope = EncryptionEnvelope::new(old_ring);
        let meta = old_envelope.generate_meta();
        let sealed = old_envelope.encrypt_chunk(&meta, 0, b"rotate me").unwrap();

        let rotated = MasterKeyRing::from_key_bytes(2, new_key)
            .unwrap()
            .with_key(1, old_key)
            .unwrap();
        let envelope = EncryptionEnvelope::new(rotated);
        assert_eq!(envelope.generate_meta().key_version, 2);
        assert_eq!(
            envelope.decrypt_chunk(&meta, 0, &sealed).unwrap(),
            b"rotate me"
        );
    }

    #[test]
    fn test_missing_key_version_is_an_error() {
        let envelope = test_envelope();
        let mut meta = envelope.generate_meta();
        meta.key_version = 99;
        assert!(envelope.encrypt_chunk(&meta, 0, b"x").is_err());
    }

    #[test]
    fn test_chunk_nonce_layout() {
        let nonce = chunk_nonce(&[1, 2, 3, 4], 0x0102030405060708);
        assert_eq!(&nonce[..4], &[1, 2, 3, 4]);
        assert_eq!(&nonce[4..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_ciphertext_len_math() {
        assert_eq!(ciphertext_len(0), 0);
        assert_eq!(ciphertext_len(1), 1 + GCM_TAG_LEN);
        assert_eq!(
            ciphertext_len(ENCRYPTION_CHUNK_SIZE),
            ENCRYPTION_CHUNK_SIZE + GCM_TAG_LEN
        );
        assert_eq!(
            ciphertext_len(ENCRYPTION_CHUNK_SIZE + 1),
            ENCRYPTION_CHUNK_SIZE + 1 + 2 * GCM_TAG_LEN
        );
    }

    #[test]
    fn test_chunk_span_for_range() {
        let plaintext_len = 3 * ENCRYPTION_CHUNK_SIZE;
        let sealed_chunk = ENCRYPTION_CHUNK_SIZE + GCM_TAG_LEN;

        // Range inside the second chunk.
        let span = chunk_span_for_range(
            ENCRYPTION_CHUNK_SIZE + 100,
            ENCRYPTION_CHUNK_SIZE + 200,
            plaintext_len,
        );
        assert_eq!(span.first_chunk_index, 1);
        assert_eq!(span.cipher_start, sealed_chunk);
        assert_eq!(span.cipher_len, sealed_chunk);
        assert_eq!(span.plain_skip, 100);

        // Range spanning chunks 0..=2.
        let span = chunk_span_for_range(0, plaintext_len - 1, plaintext_len);
        assert_eq!(span.first_chunk_index, 0);
        assert_eq!(span.cipher_start, 0);
        assert_eq!(span.cipher_len, 3 * sealed_chunk);
        assert_eq!(span.plain_skip, 0);
    }
}
