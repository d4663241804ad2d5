//! Move cascades.
//!
//! Files and uploads relink to the destination folder directly; each moved
//! folder re-parents and has its whole subtree's ancestor paths rewritten in
//! one UPDATE. Everything runs in a single writer transaction, and a
//! post-rewrite scan for a folder listing itself among its own ancestors
//! rolls the whole move back.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use stowage_core::PlatformError;

use crate::platform::Platform;

/// One move request: any mix of files, uploads and folder subtrees headed to
/// the same destination (None is the workspace root).
#[derive(Debug, Clone, Default)]
pub struct MoveRequest {
    pub file_ids: Vec<Uuid>,
    pub upload_ids: Vec<Uuid>,
    pub folder_ids: Vec<Uuid>,
    pub destination_folder_id: Option<Uuid>,
}

/// How a move ended. Rejections are outcomes, not errors: the catalog is
/// untouched for every variant except `Moved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved {
        files: u64,
        uploads: u64,
        folders: u64,
    },
    /// The destination folder does not exist (or is deleted) in this
    /// workspace.
    DestinationNotFound,
    /// Some listed file, upload or folder does not exist in this workspace.
    ItemNotFound,
    /// The destination sits inside one of the moved subtrees.
    MovedIntoOwnSubtree,
}

/// Orchestrates moves of files, uploads and folder subtrees.
#[derive(Clone)]
pub struct MoveService {
    platform: Arc<Platform>,
}

impl MoveService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    /// Move the requested items to the destination folder atomically: either
    /// every item moves or none does.
    #[tracing::instrument(skip(self, request), fields(workspace_id = %workspace_id))]
    pub async fn move_items(
        &self,
        workspace_id: Uuid,
        request: MoveRequest,
    ) -> Result<MoveOutcome, PlatformError> {
        let file_ids = dedupe(&request.file_ids);
        let upload_ids = dedupe(&request.upload_ids);
        let folder_ids = dedupe(&request.folder_ids);
        let destination = request.destination_folder_id;

        if file_ids.is_empty() && upload_ids.is_empty() && folder_ids.is_empty() {
            return Ok(MoveOutcome::Moved {
                files: 0,
                uploads: 0,
                folders: 0,
            });
        }

        let folders = self.platform.folders.clone();
        let files = self.platform.files.clone();
        let uploads = self.platform.uploads.clone();

        let result = self
            .platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    // Destination checks run before any mutation, so these
                    // rejections commit an empty transaction.
                    let destination_path = match destination {
                        None => Vec::new(),
                        Some(dest_id) => {
                            let Some(dest) =
                                folders.get_folder_in_tx(tx, workspace_id, dest_id).await?
                            else {
                                return Ok(MoveOutcome::DestinationNotFound);
                            };
                            if folder_ids.contains(&dest.id)
                                || folder_ids.iter().any(|id| dest.is_descendant_of(*id))
                            {
                                return Ok(MoveOutcome::MovedIntoOwnSubtree);
                            }
                            dest.child_ancestor_path()
                        }
                    };

                    let moved_files = files
                        .relink_files(tx, workspace_id, &file_ids, destination)
                        .await?;
                    if moved_files != file_ids.len() as u64 {
                        return Err(PlatformError::NotFound("File not found".to_string()));
                    }

                    let moved_uploads = uploads
                        .relink_uploads(tx, workspace_id, &upload_ids, destination)
                        .await?;
                    if moved_uploads != upload_ids.len() as u64 {
                        return Err(PlatformError::NotFound("Upload not found".to_string()));
                    }

                    for folder_id in &folder_ids {
                        // Re-read inside the loop: an earlier iteration may
                        // have rewritten this folder's path already.
                        let folder = folders
                            .get_folder_in_tx(tx, workspace_id, *folder_id)
                            .await?
                            .ok_or_else(|| {
                                PlatformError::NotFound("Folder not found".to_string())
                            })?;
                        if !folders
                            .relink_folder(tx, workspace_id, *folder_id, destination)
                            .await?
                        {
                            return Err(PlatformError::NotFound("Folder not found".to_string()));
                        }
                        folders
                            .rewrite_subtree_paths(
                                tx,
                                workspace_id,
                                *folder_id,
                                folder.depth() as i32,
                                &destination_path,
                            )
                            .await?;
                    }

                    if !folder_ids.is_empty()
                        && folders.any_folder_inside_itself(tx, workspace_id).await?
                    {
                        return Err(PlatformError::InvalidTransition(
                            "Move would place a folder inside its own subtree".to_string(),
                        ));
                    }

                    Ok::<_, PlatformError>(MoveOutcome::Moved {
                        files: moved_files,
                        uploads: moved_uploads,
                        folders: folder_ids.len() as u64,
                    })
                })
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            // Rollback-carrying rejections come back through the error
            // channel; everything else propagates.
            Err(e) => match PlatformError::from_any(e) {
                PlatformError::NotFound(_) => MoveOutcome::ItemNotFound,
                PlatformError::InvalidTransition(_) => MoveOutcome::MovedIntoOwnSubtree,
                other => return Err(other),
            },
        };

        if let MoveOutcome::Moved {
            files,
            uploads,
            folders,
        } = outcome
        {
            tracing::info!(
                workspace_id = %workspace_id,
                files = files,
                uploads = uploads,
                folders = folders,
                destination = ?destination,
                "Items moved"
            );
        }
        Ok(outcome)
    }
}

/// Order-preserving id dedupe so relink row counts compare exactly.
fn dedupe(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .copied()
        .collect()
}
