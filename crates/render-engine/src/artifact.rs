//! Storage for finished exports and their revocable access handles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use clipcraft_capture::pipeline::EncodedArtifact;
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use clipcraft_model::artifact::ArtifactInfo;

/// Where finished exports are made available.
pub trait ArtifactStore: Send + Sync {
    /// Make the artifact available and return its access handle.
    fn publish(&self, artifact: &EncodedArtifact, filename: &str) -> ClipcraftResult<String>;

    /// Release the resource behind a handle returned by `publish`.
    fn revoke(&self, url: &str) -> ClipcraftResult<()>;
}

/// Writes exports as files in a directory and deletes them on revoke.
#[derive(Debug)]
pub struct FsArtifactStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn publish(&self, artifact: &EncodedArtifact, filename: &str) -> ClipcraftResult<String> {
        std::fs::create_dir_all(&self.dir)?;

        // Unique per publish so a revoked earlier export never deletes a
        // newer one with the same suggested name.
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = self.dir.join(format!("{stamp}-{n}-{filename}"));
        std::fs::write(&path, &artifact.data)?;

        tracing::info!(
            path = %path.display(),
            bytes = artifact.byte_size(),
            "Export written"
        );
        Ok(path.to_string_lossy().into_owned())
    }

    fn revoke(&self, url: &str) -> ClipcraftResult<()> {
        match std::fs::remove_file(url) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps exports in memory. Counts publishes and revokes.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    next_id: AtomicU64,
    published: AtomicUsize,
    revoked: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Handles currently published and not yet revoked.
    pub fn live(&self) -> usize {
        self.blobs().len()
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.blobs().get(url).cloned()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn publish(&self, artifact: &EncodedArtifact, filename: &str) -> ClipcraftResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let url = format!("mem://{id}/{filename}");
        self.blobs().insert(url.clone(), artifact.data.clone());
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(url)
    }

    fn revoke(&self, url: &str) -> ClipcraftResult<()> {
        if self.blobs().remove(url).is_none() {
            return Err(ClipcraftError::render(format!("Unknown artifact handle: {url}")));
        }
        self.revoked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A published export. Revoked exactly once: by [`ArtifactHandle::revoke`]
/// or when dropped.
pub struct ArtifactHandle {
    info: ArtifactInfo,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl ArtifactHandle {
    /// Publish `artifact` to `store`.
    pub fn publish(
        store: Arc<dyn ArtifactStore>,
        artifact: &EncodedArtifact,
        filename: String,
    ) -> ClipcraftResult<Self> {
        let url = store.publish(artifact, &filename)?;
        let info = ArtifactInfo {
            url,
            byte_size: artifact.byte_size(),
            suggested_filename: filename,
            mime_type: artifact.mime_type.clone(),
            duration_secs: artifact.duration_secs,
            has_audio: artifact.has_audio,
        };
        Ok(Self {
            info,
            store: Some(store),
        })
    }

    pub fn info(&self) -> &ArtifactInfo {
        &self.info
    }

    pub fn revoke(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        match store.revoke(&self.info.url) {
            Ok(()) => tracing::debug!(url = %self.info.url, "Artifact revoked"),
            Err(e) => tracing::warn!(url = %self.info.url, error = %e, "Failed to revoke artifact"),
        }
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactHandle")
            .field("info", &self.info)
            .field("live", &self.store.is_some())
            .finish()
    }
}
