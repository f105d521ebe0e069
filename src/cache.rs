//! Content-addressed local image store.
//!
//! One file per image id inside the node's cache directory. Writes go
//! through a temp path and an atomic rename, so a reader observes either
//! the prior state or the complete new file, never a partial one.

use crate::config::image_file_name;
use crate::net::NetError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Shared result slot for one in-flight fill. The error is carried as the
/// wire message so every coalesced waiter reports the same failure.
type FillCell = Arc<OnceCell<Result<Vec<u8>, String>>>;

/// Result of a miss that went through [`CacheStore::fill`].
pub struct FillOutcome {
    pub bytes: Vec<u8>,
    /// True for the one caller whose fetch actually ran; coalesced waiters
    /// see false and must not re-trigger replication.
    pub performed: bool,
}

pub struct CacheStore {
    dir: PathBuf,
    fills: Mutex<HashMap<u64, FillCell>>,
}

impl CacheStore {
    /// Open (and create if needed) the store directory.
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, fills: Mutex::new(HashMap::new()) })
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(image_file_name(id))
    }

    pub async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, NetError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn size(&self, id: u64) -> Result<Option<u64>, NetError> {
        match tokio::fs::metadata(self.path_for(id)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, id: u64) -> bool {
        tokio::fs::metadata(self.path_for(id)).await.is_ok()
    }

    /// Store `bytes` under `id` via temp file + rename.
    pub async fn put(&self, id: u64, bytes: &[u8]) -> Result<(), NetError> {
        let tmp = self
            .dir
            .join(format!(".{}.tmp-{:08x}", image_file_name(id), rand::random::<u32>()));
        tokio::fs::write(&tmp, bytes).await?;
        match tokio::fs::rename(&tmp, self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e.into())
            }
        }
    }

    /// Run a miss fill with per-key single-flight.
    ///
    /// At most one `fetch` runs per id at a time on this node; concurrent
    /// callers for the same id wait on the in-flight fill and share its
    /// bytes or its error. The slot is dropped once resolved, so a later
    /// miss (after an error, say) fetches again.
    pub async fn fill<F, Fut>(&self, id: u64, fetch: F) -> Result<FillOutcome, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, NetError>>,
    {
        let cell = {
            let mut fills = self.fills.lock().await;
            fills.entry(id).or_default().clone()
        };

        let performed = AtomicBool::new(false);
        let result = cell
            .get_or_init(|| {
                performed.store(true, Ordering::Relaxed);
                let fut = fetch();
                async move {
                    let bytes = fut.await.map_err(|e| e.wire_message())?;
                    self.put(id, &bytes).await.map_err(|e| e.wire_message())?;
                    Ok(bytes)
                }
            })
            .await
            .clone();

        let mut fills = self.fills.lock().await;
        if fills.get(&id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            fills.remove(&id);
        }
        drop(fills);

        result.map(|bytes| FillOutcome { bytes, performed: performed.load(Ordering::Relaxed) })
    }
}
