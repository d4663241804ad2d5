//! Shared key and bucket naming for storage backends.
//!
//! Key format: `files/{file_id}`, within the owning workspace's bucket.
//! Uploads write to the key their file will keep, so conversion never moves
//! bytes.

use uuid::Uuid;

/// Generate the storage key for a file or in-flight upload.
pub fn file_storage_key(file_id: Uuid) -> String {
    format!("files/{}", file_id)
}

/// Generate the bucket name owned by a workspace.
pub fn workspace_bucket_name(workspace_id: Uuid) -> String {
    format!("stowage-{}", workspace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            file_storage_key(id),
            "files/00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            workspace_bucket_name(id),
            "stowage-00000000-0000-0000-0000-000000000000"
        );
    }
}
