//! Bounded permit pool for backend calls.
//!
//! Storage providers throttle aggressively under request bursts. Every
//! network call acquires a permit first and holds it for the duration of the
//! call, capping concurrent requests per process.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::traits::{StorageError, StorageResult};

/// Caps concurrent backend requests. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
}

impl PermitPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Wait for a request slot. The permit releases on drop, so holding it
    /// across the backend call is enough.
    pub async fn acquire(&self) -> StorageResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::BackendError("Storage permit pool closed".to_string()))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for PermitPool {
    fn default() -> Self {
        Self::new(stowage_core::config::STORAGE_MAX_CONCURRENT_REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let pool = PermitPool::new(2);
        let p1 = pool.acquire().await.unwrap();
        let _p2 = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        // A third caller waits until a permit is released.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        drop(p1);
        let _p3 = tokio::time::timeout(Duration::from_millis(50), pool.acquire())
            .await
            .expect("permit should free up")
            .unwrap();
    }
}
