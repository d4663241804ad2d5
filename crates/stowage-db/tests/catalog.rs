//! Postgres-backed repository tests.
//!
//! These run only when DATABASE_URL points at a disposable database; without
//! it every test returns early. Migrations are applied on first connect.
//!
//! Tests that enqueue jobs they do not intend to claim schedule them in the
//! far future so the one claim-order test is the only claimer of eligible
//! work.

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use stowage_core::models::{
    CleanupStoredObjectsPayload, JobStatus, JobType, Priority, RecomputeWorkspaceSizePayload,
    Workspace,
};
use stowage_core::{EncryptionMode, PlatformError, StorageBackend};
use stowage_db::{
    CatalogWriter, FileRepository, FolderRepository, JobRepository, NewFile, NewJob, NewUpload,
    SagaRepository, UploadRepository, WorkspaceRepository,
};

async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("apply migrations");

    Some(pool)
}

async fn create_test_workspace(pool: &PgPool) -> Workspace {
    let writer = CatalogWriter::new(pool.clone());
    let repo = WorkspaceRepository::new(pool.clone());
    let id = Uuid::new_v4();
    let name = format!("ws-{}", id);
    let bucket = format!("stowage-test-{}", id);

    writer
        .write(move |tx| {
            Box::pin(async move {
                repo.create_workspace(
                    tx,
                    id,
                    &name,
                    Uuid::new_v4(),
                    StorageBackend::Local,
                    &bucket,
                    EncryptionMode::None,
                )
                .await
            })
        })
        .await
        .expect("create workspace")
}

fn upload_fixture(workspace_id: Uuid, expected_parts: i32) -> NewUpload {
    NewUpload {
        workspace_id,
        folder_id: None,
        name: "report.bin".to_string(),
        storage_key: format!("files/{}", Uuid::new_v4()),
        size: 3 * 1024 * 1024,
        content_type: "application/octet-stream".to_string(),
        encryption_meta: None,
        algorithm: stowage_core::models::UploadAlgorithm::MultiStepChunkUpload,
        expected_parts,
        part_size: 1024 * 1024,
        multipart_upload_id: Some(format!("mp-{}", Uuid::new_v4())),
        owner_user_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn workspace_size_recompute_counts_completed_files_only() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let files = FileRepository::new(pool.clone());
    let workspaces = WorkspaceRepository::new(pool.clone());

    let workspace_id = workspace.id;
    let size = writer
        .write(move |tx| {
            Box::pin(async move {
                for (size, completed) in [(100_i64, true), (200, true), (400, false)] {
                    files
                        .insert_file(
                            tx,
                            &NewFile {
                                workspace_id,
                                folder_id: None,
                                name: format!("f-{size}"),
                                storage_key: format!("files/{}", Uuid::new_v4()),
                                size,
                                content_type: "text/plain".to_string(),
                                encryption_meta: None,
                                upload_completed: completed,
                                parent_file_id: None,
                            },
                        )
                        .await?;
                }
                workspaces.recompute_size(tx, workspace_id).await
            })
        })
        .await
        .expect("recompute");

    assert_eq!(size, 300);

    let reloaded = WorkspaceRepository::new(pool.clone())
        .get_workspace(workspace.id)
        .await
        .expect("get workspace")
        .expect("workspace exists");
    assert_eq!(reloaded.size_bytes, 300);
}

#[tokio::test]
async fn folder_creation_maintains_ancestor_paths() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let folders = FolderRepository::new(pool.clone());

    let workspace_id = workspace.id;
    let repo = folders.clone();
    let (root, child, grandchild) = writer
        .write(move |tx| {
            Box::pin(async move {
                let root = repo.create_folder(tx, workspace_id, "root", None).await?;
                let child = repo
                    .create_folder(tx, workspace_id, "child", Some(root.id))
                    .await?;
                let grandchild = repo
                    .create_folder(tx, workspace_id, "grandchild", Some(child.id))
                    .await?;
                Ok::<_, PlatformError>((root, child, grandchild))
            })
        })
        .await
        .expect("create chain");

    assert_eq!(root.depth(), 0);
    assert_eq!(child.ancestor_folder_ids, vec![root.id]);
    assert_eq!(grandchild.ancestor_folder_ids, vec![root.id, child.id]);
    assert!(grandchild.is_descendant_of(root.id));

    // Second folder with the same name under the same parent is rejected and
    // leaves nothing behind.
    let repo = folders.clone();
    let duplicate = writer
        .write(move |tx| {
            Box::pin(async move { repo.create_folder(tx, workspace_id, "child", Some(root.id)).await })
        })
        .await;
    assert!(duplicate.is_err());

    let repo = folders.clone();
    let subtree = writer
        .write(move |tx| {
            Box::pin(async move {
                repo.descendant_folder_ids(tx, workspace_id, &[root.id]).await
            })
        })
        .await
        .expect("descendants");
    assert_eq!(subtree.len(), 3);
    assert!(subtree.contains(&grandchild.id));
}

#[tokio::test]
async fn subtree_move_rewrites_descendant_paths() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let folders = FolderRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let repo = folders.clone();
    let (a, b, c, d) = writer
        .write(move |tx| {
            Box::pin(async move {
                let a = repo.create_folder(tx, workspace_id, "a", None).await?;
                let b = repo.create_folder(tx, workspace_id, "b", Some(a.id)).await?;
                let c = repo.create_folder(tx, workspace_id, "c", Some(b.id)).await?;
                let d = repo.create_folder(tx, workspace_id, "d", None).await?;
                Ok::<_, PlatformError>((a, b, c, d))
            })
        })
        .await
        .expect("create tree");

    // Move the subtree rooted at b (depth 1) under d.
    let repo = folders.clone();
    let dest_path = d.child_ancestor_path();
    let b_id = b.id;
    let b_depth = b.depth() as i32;
    let d_id = d.id;
    writer
        .write(move |tx| {
            let dest_path = dest_path.clone();
            Box::pin(async move {
                repo.relink_folder(tx, workspace_id, b_id, Some(d_id)).await?;
                repo.rewrite_subtree_paths(tx, workspace_id, b_id, b_depth, &dest_path)
                    .await?;
                if repo.any_folder_inside_itself(tx, workspace_id).await? {
                    return Err(PlatformError::InvalidTransition(
                        "Cannot move a folder into its own subtree".to_string(),
                    ));
                }
                Ok::<_, PlatformError>(())
            })
        })
        .await
        .expect("move subtree");

    let moved_b = folders
        .get_folder(workspace_id, b.id)
        .await
        .expect("get b")
        .expect("b exists");
    let moved_c = folders
        .get_folder(workspace_id, c.id)
        .await
        .expect("get c")
        .expect("c exists");
    assert_eq!(moved_b.parent_id, Some(d.id));
    assert_eq!(moved_b.ancestor_folder_ids, vec![d.id]);
    assert_eq!(moved_c.ancestor_folder_ids, vec![d.id, b.id]);

    // a was untouched.
    let untouched = folders
        .get_folder(workspace_id, a.id)
        .await
        .expect("get a")
        .expect("a exists");
    assert!(untouched.ancestor_folder_ids.is_empty());
}

#[tokio::test]
async fn moving_folder_into_own_subtree_rolls_back() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let folders = FolderRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let repo = folders.clone();
    let (x, y) = writer
        .write(move |tx| {
            Box::pin(async move {
                let x = repo.create_folder(tx, workspace_id, "x", None).await?;
                let y = repo.create_folder(tx, workspace_id, "y", Some(x.id)).await?;
                Ok::<_, PlatformError>((x, y))
            })
        })
        .await
        .expect("create pair");

    // Attempt to move x under its own child y; the post-write check must
    // catch the cycle and roll the whole transaction back.
    let repo = folders.clone();
    let dest_path = y.child_ancestor_path();
    let attempt = writer
        .write(move |tx| {
            let dest_path = dest_path.clone();
            Box::pin(async move {
                repo.relink_folder(tx, workspace_id, x.id, Some(y.id)).await?;
                repo.rewrite_subtree_paths(tx, workspace_id, x.id, 0, &dest_path).await?;
                if repo.any_folder_inside_itself(tx, workspace_id).await? {
                    return Err(PlatformError::InvalidTransition(
                        "Cannot move a folder into its own subtree".to_string(),
                    ));
                }
                Ok::<_, PlatformError>(())
            })
        })
        .await;
    assert!(attempt.is_err());

    // Nothing moved.
    let unchanged = folders
        .get_folder(workspace_id, x.id)
        .await
        .expect("get x")
        .expect("x exists");
    assert_eq!(unchanged.parent_id, None);
    assert!(unchanged.ancestor_folder_ids.is_empty());
    let unchanged_child = folders
        .get_folder(workspace_id, y.id)
        .await
        .expect("get y")
        .expect("y exists");
    assert_eq!(unchanged_child.ancestor_folder_ids, vec![x.id]);
}

#[tokio::test]
async fn part_acknowledgement_is_idempotent_and_tracks_completion() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let uploads = UploadRepository::new(pool.clone());

    let repo = uploads.clone();
    let fixture = upload_fixture(workspace.id, 3);
    let upload = writer
        .write(move |tx| {
            let fixture = fixture.clone();
            Box::pin(async move { repo.create_upload(tx, &fixture).await })
        })
        .await
        .expect("create upload");
    assert!(!upload.completed);

    let repo = uploads.clone();
    let upload_id = upload.id;
    let (first, replay, count) = writer
        .write(move |tx| {
            Box::pin(async move {
                let first = repo.record_part(tx, upload_id, 1, "etag-1").await?;
                repo.record_part(tx, upload_id, 2, "etag-2").await?;
                let replay = repo.record_part(tx, upload_id, 1, "etag-1").await?;
                let count = repo.count_parts(tx, upload_id).await?;
                Ok::<_, PlatformError>((first, replay, count))
            })
        })
        .await
        .expect("record parts");
    assert!(first);
    assert!(!replay);
    assert_eq!(count, 2);

    let midway = uploads
        .get_upload(workspace.id, upload.id)
        .await
        .expect("get upload")
        .expect("upload exists");
    assert!(!midway.completed);

    let repo = uploads.clone();
    writer
        .write(move |tx| {
            Box::pin(async move { repo.record_part(tx, upload_id, 3, "etag-3").await })
        })
        .await
        .expect("final part");

    let done = uploads
        .get_upload(workspace.id, upload.id)
        .await
        .expect("get upload")
        .expect("upload exists");
    assert!(done.completed);
}

#[tokio::test]
async fn conversion_swaps_upload_for_file_atomically() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let uploads = UploadRepository::new(pool.clone());
    let files = FileRepository::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());

    let repo = uploads.clone();
    let fixture = upload_fixture(workspace.id, 1);
    let upload = writer
        .write(move |tx| {
            let fixture = fixture.clone();
            Box::pin(async move {
                let upload = repo.create_upload(tx, &fixture).await?;
                repo.record_part(tx, upload.id, 1, "etag-1").await?;
                Ok::<_, PlatformError>(upload)
            })
        })
        .await
        .expect("create upload");

    // One transaction: file row in, upload row out, recompute enqueued.
    let uploads_repo = uploads.clone();
    let files_repo = files.clone();
    let jobs_repo = jobs.clone();
    let workspace_id = workspace.id;
    let upload_id = upload.id;
    let file = writer
        .write(move |tx| {
            Box::pin(async move {
                let upload = uploads_repo
                    .get_upload_in_tx(tx, workspace_id, upload_id)
                    .await?
                    .ok_or_else(|| PlatformError::NotFound("Upload not found".to_string()))?;
                let file = files_repo
                    .insert_file(
                        tx,
                        &NewFile {
                            workspace_id: upload.workspace_id,
                            folder_id: upload.folder_id,
                            name: upload.name.clone(),
                            storage_key: upload.storage_key.clone(),
                            size: upload.size,
                            content_type: upload.content_type.clone(),
                            encryption_meta: upload.encryption_meta.clone(),
                            upload_completed: true,
                            parent_file_id: None,
                        },
                    )
                    .await?;
                uploads_repo.delete_upload(tx, workspace_id, upload_id).await?;
                jobs_repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(
                            Some(workspace_id),
                            &RecomputeWorkspaceSizePayload { workspace_id },
                        )
                        .with_scheduled_at(Utc::now() + Duration::hours(1)),
                    )
                    .await?;
                Ok::<_, PlatformError>(file)
            })
        })
        .await
        .expect("convert upload");

    assert_eq!(file.size, upload.size);
    assert!(file.upload_completed);

    assert!(uploads
        .get_upload(workspace.id, upload.id)
        .await
        .expect("get upload")
        .is_none());
    assert!(files
        .get_file(workspace.id, file.id)
        .await
        .expect("get file")
        .is_some());

    // Part rows followed the upload out via the foreign key cascade.
    let orphaned_parts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM file_upload_parts WHERE upload_id = $1")
            .bind(upload.id)
            .fetch_one(&pool)
            .await
            .expect("count parts");
    assert_eq!(orphaned_parts, 0);
}

#[tokio::test]
async fn debounced_enqueue_collapses_until_dispatch() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let future = Utc::now() + Duration::hours(1);

    let repo = jobs.clone();
    let (first, second) = writer
        .write(move |tx| {
            Box::pin(async move {
                let payload = RecomputeWorkspaceSizePayload { workspace_id };
                let first = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_scheduled_at(future),
                    )
                    .await?;
                let second = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_scheduled_at(future),
                    )
                    .await?;
                Ok::<_, PlatformError>((first, second))
            })
        })
        .await
        .expect("enqueue twice");

    let first = first.expect("first enqueue inserts");
    assert!(second.is_none(), "duplicate collapses while first is queued");

    // Once the queued job reaches a terminal state the key is free again.
    jobs.update_status(first.id, JobStatus::Completed)
        .await
        .expect("complete first");

    let repo = jobs.clone();
    let third = writer
        .write(move |tx| {
            Box::pin(async move {
                let payload = RecomputeWorkspaceSizePayload { workspace_id };
                repo.enqueue_job(
                    tx,
                    NewJob::from_payload(Some(workspace_id), &payload)
                        .with_scheduled_at(future),
                )
                .await
            })
        })
        .await
        .expect("enqueue after completion");
    assert!(third.is_some());
}

#[tokio::test]
async fn claim_order_follows_priority_then_schedule() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let payload = CleanupStoredObjectsPayload {
        workspace_id,
        bucket: "stowage-test".to_string(),
        storage_keys: vec!["files/one".to_string()],
    };

    let repo = jobs.clone();
    let (low, high) = writer
        .write(move |tx| {
            let payload = payload.clone();
            Box::pin(async move {
                let low = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_priority(Priority::Low),
                    )
                    .await?
                    .expect("low inserts");
                let high = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_priority(Priority::High),
                    )
                    .await?
                    .expect("high inserts");
                Ok::<_, PlatformError>((low, high))
            })
        })
        .await
        .expect("enqueue pair");

    // Drain eligible jobs; ours must come out high before low, whatever else
    // is in the queue. Completed as claimed to leave the table quiet.
    let mut claimed_order = Vec::new();
    for _ in 0..50 {
        match jobs.claim_next_job().await.expect("claim") {
            Some(job) => {
                assert_eq!(job.status, JobStatus::Running);
                assert!(job.started_at.is_some());
                if job.id == low.id || job.id == high.id {
                    claimed_order.push(job.id);
                }
                jobs.mark_completed(job.id, serde_json::json!({}))
                    .await
                    .expect("complete claimed");
                if claimed_order.len() == 2 {
                    break;
                }
            }
            None => break,
        }
    }

    assert_eq!(claimed_order, vec![high.id, low.id]);
}

#[tokio::test]
async fn blocked_jobs_are_rescheduled_without_burning_retries() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let payload = CleanupStoredObjectsPayload {
        workspace_id,
        bucket: "stowage-test".to_string(),
        storage_keys: vec![],
    };

    let repo = jobs.clone();
    let job = writer
        .write(move |tx| {
            Box::pin(async move {
                repo.enqueue_job(
                    tx,
                    NewJob::from_payload(Some(workspace_id), &payload)
                        .with_scheduled_at(Utc::now() + Duration::hours(1)),
                )
                .await
            })
        })
        .await
        .expect("enqueue")
        .expect("inserts");

    let before = Utc::now();
    let blocked = jobs
        .mark_blocked(job.id, "no storage client configured", 3600)
        .await
        .expect("block");
    assert_eq!(blocked.status, JobStatus::Blocked);
    assert_eq!(blocked.retry_count, 0);
    assert!(blocked.scheduled_at > before + Duration::minutes(59));
    assert_eq!(
        blocked.last_error.as_deref(),
        Some("no storage client configured")
    );
    assert!(!blocked.is_ready_to_run());
}

#[tokio::test]
async fn retry_backoff_reschedules_into_the_future() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let payload = CleanupStoredObjectsPayload {
        workspace_id,
        bucket: "stowage-test".to_string(),
        storage_keys: vec![],
    };

    let repo = jobs.clone();
    let job = writer
        .write(move |tx| {
            Box::pin(async move {
                repo.enqueue_job(
                    tx,
                    NewJob::from_payload(Some(workspace_id), &payload)
                        .with_scheduled_at(Utc::now() + Duration::hours(1)),
                )
                .await
            })
        })
        .await
        .expect("enqueue")
        .expect("inserts");

    let before = Utc::now();
    let retried = jobs
        .increment_retry(job.id, 120, "transient backend error")
        .await
        .expect("retry");
    assert_eq!(retried.status, JobStatus::Scheduled);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.scheduled_at > before + Duration::seconds(110));
    assert_eq!(retried.last_error.as_deref(), Some("transient backend error"));
}

#[tokio::test]
async fn stale_running_jobs_are_reaped() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let payload = CleanupStoredObjectsPayload {
        workspace_id,
        bucket: "stowage-test".to_string(),
        storage_keys: vec![],
    };

    let repo = jobs.clone();
    let job = writer
        .write(move |tx| {
            Box::pin(async move {
                repo.enqueue_job(
                    tx,
                    NewJob::from_payload(Some(workspace_id), &payload)
                        .with_scheduled_at(Utc::now() + Duration::hours(1))
                        .with_timeout_seconds(60),
                )
                .await
            })
        })
        .await
        .expect("enqueue")
        .expect("inserts");

    // Simulate a worker that claimed the job and died two hours ago.
    jobs.update_status(job.id, JobStatus::Running)
        .await
        .expect("mark running");
    sqlx::query("UPDATE queue_jobs SET started_at = NOW() - interval '2 hours' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .expect("rewind started_at");

    let reaped = jobs.reap_stale_running_jobs(0).await.expect("reap");
    assert!(reaped >= 1);

    let requeued = jobs
        .get_job(job.id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.started_at.is_none());
}

#[tokio::test]
async fn failed_jobs_can_be_cancelled_and_retried_by_operators() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let jobs = JobRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let payload = CleanupStoredObjectsPayload {
        workspace_id,
        bucket: "stowage-test".to_string(),
        storage_keys: vec![],
    };

    let repo = jobs.clone();
    let (first, second) = writer
        .write(move |tx| {
            let payload = payload.clone();
            Box::pin(async move {
                let first = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_scheduled_at(Utc::now() + Duration::hours(1)),
                    )
                    .await?
                    .expect("first inserts");
                let second = repo
                    .enqueue_job(
                        tx,
                        NewJob::from_payload(Some(workspace_id), &payload)
                            .with_scheduled_at(Utc::now() + Duration::hours(1)),
                    )
                    .await?
                    .expect("second inserts");
                Ok::<_, PlatformError>((first, second))
            })
        })
        .await
        .expect("enqueue pair");

    // Cancel works once on an undispatched job.
    let cancelled = jobs
        .cancel_job(workspace_id, first.id)
        .await
        .expect("cancel");
    assert!(cancelled.is_some());
    assert!(jobs
        .cancel_job(workspace_id, first.id)
        .await
        .expect("cancel again")
        .is_none());

    // Retry only applies to failed jobs.
    assert!(jobs
        .retry_job(workspace_id, second.id)
        .await
        .expect("retry unfailed")
        .is_none());

    jobs.mark_failed(second.id, serde_json::json!({"error": "backend exploded"}))
        .await
        .expect("fail");
    let failed = jobs
        .get_job(second.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(failed.last_error.as_deref(), Some("backend exploded"));

    let retried = jobs
        .retry_job(workspace_id, second.id)
        .await
        .expect("retry")
        .expect("retries");
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 0);
    assert!(retried.last_error.is_none());

    // Park it again so no other test claims it.
    jobs.update_status(retried.id, JobStatus::Cancelled)
        .await
        .expect("park");

    let stats = jobs
        .get_stats(Some(workspace_id))
        .await
        .expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.cancelled, 2);
}

#[tokio::test]
async fn saga_terminal_fires_exactly_once() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let sagas = SagaRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let repo = sagas.clone();
    let saga = writer
        .write(move |tx| {
            Box::pin(async move {
                let saga = repo
                    .create_saga(
                        tx,
                        workspace_id,
                        JobType::DeleteBucket,
                        serde_json::json!({"workspace_id": workspace_id, "bucket": "b"}),
                    )
                    .await?;
                repo.add_steps(tx, saga.id, 2).await
            })
        })
        .await
        .expect("create saga");
    assert_eq!(saga.pending_steps, 2);
    assert!(!saga.terminal_enqueued);

    let repo = sagas.clone();
    let saga_id = saga.id;
    let first = writer
        .write(move |tx| Box::pin(async move { repo.complete_step(tx, saga_id).await }))
        .await
        .expect("first step");
    assert!(first.is_none(), "one step still outstanding");

    let repo = sagas.clone();
    let second = writer
        .write(move |tx| Box::pin(async move { repo.complete_step(tx, saga_id).await }))
        .await
        .expect("second step");
    let terminal = second.expect("last step claims the terminal");
    assert_eq!(terminal.pending_steps, 0);
    assert!(terminal.terminal_enqueued);

    // The claim cannot be won twice.
    let repo = sagas.clone();
    let replay = writer
        .write(move |tx| Box::pin(async move { repo.try_claim_terminal(tx, saga_id).await }))
        .await
        .expect("replay claim");
    assert!(replay.is_none());
}

#[tokio::test]
async fn zero_step_saga_finalizes_immediately() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let sagas = SagaRepository::new(pool.clone());
    let workspace_id = workspace.id;

    let repo = sagas.clone();
    let claimed = writer
        .write(move |tx| {
            Box::pin(async move {
                let saga = repo
                    .create_saga(
                        tx,
                        workspace_id,
                        JobType::RecomputeWorkspaceSize,
                        serde_json::json!({"workspace_id": workspace_id}),
                    )
                    .await?;
                repo.try_claim_terminal(tx, saga.id).await
            })
        })
        .await
        .expect("create and claim");

    assert!(claimed.expect("terminal claimed with zero steps").terminal_enqueued);
}

#[tokio::test]
async fn stale_uploads_surface_for_sweeping() {
    let Some(pool) = test_pool().await else { return };
    let workspace = create_test_workspace(&pool).await;

    let writer = CatalogWriter::new(pool.clone());
    let uploads = UploadRepository::new(pool.clone());

    let repo = uploads.clone();
    let fixture = upload_fixture(workspace.id, 2);
    let upload = writer
        .write(move |tx| {
            let fixture = fixture.clone();
            Box::pin(async move { repo.create_upload(tx, &fixture).await })
        })
        .await
        .expect("create upload");

    sqlx::query("UPDATE file_uploads SET updated_at = NOW() - interval '3 days' WHERE id = $1")
        .bind(upload.id)
        .execute(&pool)
        .await
        .expect("age upload");

    let stale = uploads
        .list_stale_uploads(Utc::now() - Duration::days(1), 100)
        .await
        .expect("list stale");
    assert!(stale.iter().any(|u| u.id == upload.id));

    let fresh = uploads
        .list_stale_uploads(Utc::now() - Duration::days(7), 100)
        .await
        .expect("list fresh cutoff");
    assert!(!fresh.iter().any(|u| u.id == upload.id));
}
