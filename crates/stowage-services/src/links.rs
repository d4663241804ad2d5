//! Pre-signed link issuance
//!
//! Thin service over the token primitives: it pins the signing secret and the
//! TTL from configuration so callers never handle key material. Whether a
//! download is served as a token (proxied bytes) or a direct backend URL is
//! decided by the platform, which knows the workspace's encryption mode and
//! the active storage client.

use std::time::Duration;

use uuid::Uuid;

use stowage_core::signed_link::{self, ContentDisposition, LinkAction, LinkValidation};

/// What a download-link request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuedDownload {
    /// Opaque token; the service proxies the bytes when it is presented.
    Token(String),
    /// Backend URL the client fetches directly, bypassing the service.
    DirectUrl(String),
}

#[derive(Clone)]
pub struct LinkService {
    secret: Vec<u8>,
    ttl: Duration,
}

impl LinkService {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::from_secs(ttl_seconds.max(0) as u64),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Token authorizing one part write against an upload. The content type
    /// is pinned at issuance.
    pub fn issue_upload_part_token(
        &self,
        issuer: Uuid,
        workspace_id: Uuid,
        upload_id: Uuid,
        part_number: i32,
        content_type: &str,
    ) -> String {
        signed_link::create(
            issuer,
            workspace_id,
            upload_id,
            &LinkAction::UploadPart {
                part_number,
                content_type: content_type.to_string(),
            },
            self.ttl,
            &self.secret,
        )
    }

    /// Token authorizing a whole-file read.
    pub fn issue_download_token(
        &self,
        issuer: Uuid,
        workspace_id: Uuid,
        file_id: Uuid,
        disposition: ContentDisposition,
        filename: &str,
    ) -> String {
        signed_link::create(
            issuer,
            workspace_id,
            file_id,
            &LinkAction::Download {
                disposition,
                filename: filename.to_string(),
            },
            self.ttl,
            &self.secret,
        )
    }

    /// Token authorizing the read of one member inside an archive file.
    pub fn issue_archive_entry_token(
        &self,
        issuer: Uuid,
        workspace_id: Uuid,
        file_id: Uuid,
        entry_name: &str,
    ) -> String {
        signed_link::create(
            issuer,
            workspace_id,
            file_id,
            &LinkAction::ArchiveEntry {
                entry_name: entry_name.to_string(),
            },
            self.ttl,
            &self.secret,
        )
    }

    /// Check a presented token. Every storage-facing request validates before
    /// any backend call is made.
    pub fn validate(&self, token: &str, current_identity: Uuid) -> LinkValidation {
        signed_link::validate(token, current_identity, &self.secret)
    }
}
