//! Upload algorithm selection
//!
//! Given a file size and the workspace's encryption mode, pick how the bytes
//! travel: one request, one oversized chunk, or backend-native multipart.
//! The part layout is fixed at upload creation and conversion later checks
//! acknowledged parts against it, so the math here must be deterministic.

use stowage_core::encryption::{EncryptionMode, ENCRYPTION_CHUNK_SIZE};
use stowage_core::models::UploadAlgorithm;

/// Largest file uploaded in a single request when stored as plaintext.
pub const DIRECT_UPLOAD_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Largest plaintext file still transferred as one oversized chunk. Above
/// this the backend's native multipart protocol takes over.
pub const SINGLE_CHUNK_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Largest encrypted file uploaded in a single request. Encrypted uploads
/// skip the single-chunk tier: parts must stay chunk-aligned for the
/// envelope, so anything bigger goes straight to multipart.
pub const ENCRYPTED_DIRECT_MAX_BYTES: u64 = 8 * 1024 * 1024;

/// S3 multipart constraints: every part except the last must be at least
/// 5 MiB, and an upload carries at most 10,000 parts.
pub const MIN_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_MULTIPART_PARTS: u64 = 10_000;

/// The transfer layout an upload is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub algorithm: UploadAlgorithm,
    /// Parts conversion will demand; 1 for the single-part algorithms.
    pub part_count: i32,
    /// Plaintext bytes per part (the last part may be shorter).
    pub part_size: i64,
}

impl UploadPlan {
    fn single(algorithm: UploadAlgorithm, size: u64) -> Self {
        Self {
            algorithm,
            part_count: 1,
            part_size: size as i64,
        }
    }
}

/// Pick the transfer layout for a file of `size` bytes.
///
/// Plaintext tiers: direct up to 5 MiB, one oversized chunk up to 64 MiB,
/// multipart beyond. Managed encryption collapses to two tiers (direct up to
/// 8 MiB, multipart beyond) and rounds the part size up to a whole number of
/// encryption chunks, so every part starts on a chunk boundary and parts
/// encrypt independently with globally consistent nonces.
pub fn resolve_upload_algorithm(size: u64, encryption_mode: EncryptionMode) -> UploadPlan {
    if encryption_mode.is_managed() {
        if size <= ENCRYPTED_DIRECT_MAX_BYTES {
            return UploadPlan::single(UploadAlgorithm::DirectUpload, size);
        }
        let part_size = round_up_to_chunk(base_part_size(size));
        return UploadPlan {
            algorithm: UploadAlgorithm::MultiStepChunkUpload,
            part_count: part_count_for(size, part_size),
            part_size: part_size as i64,
        };
    }

    if size <= DIRECT_UPLOAD_MAX_BYTES {
        return UploadPlan::single(UploadAlgorithm::DirectUpload, size);
    }
    if size <= SINGLE_CHUNK_MAX_BYTES {
        return UploadPlan::single(UploadAlgorithm::SingleChunkUpload, size);
    }

    let part_size = base_part_size(size);
    UploadPlan {
        algorithm: UploadAlgorithm::MultiStepChunkUpload,
        part_count: part_count_for(size, part_size),
        part_size: part_size as i64,
    }
}

/// Smallest part size that respects both the backend minimum and the part
/// count ceiling.
fn base_part_size(size: u64) -> u64 {
    MIN_MULTIPART_PART_SIZE.max(size.div_ceil(MAX_MULTIPART_PARTS))
}

fn round_up_to_chunk(part_size: u64) -> u64 {
    part_size.div_ceil(ENCRYPTION_CHUNK_SIZE) * ENCRYPTION_CHUNK_SIZE
}

fn part_count_for(size: u64, part_size: u64) -> i32 {
    size.div_ceil(part_size) as i32
}
