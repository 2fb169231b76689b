//! Content-addressed, session-scoped storage for extracted images.
//!
//! Layout on disk: `{root}/{session}/{sha256}.{ext}`, published as
//! `{base_url}/{session}/{sha256}.{ext}`.
//!
//! Each session owns an arena mapping hash → [`OnceCell`]. The map lock is
//! only held to look up or insert the cell; the write itself runs inside
//! `OnceCell::get_or_try_init`, so concurrent puts of identical bytes in one
//! session perform exactly one write and all observe the same
//! [`ExtractedImage`].

use crate::error::ConvertError;
use crate::request::SessionId;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Where an image came from inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePlacement {
    /// Zero-based page / section index.
    pub page: usize,
    /// Position of the image within that page.
    pub sequence: usize,
}

/// A stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    pub hash: String,
    pub page: usize,
    pub sequence: usize,
    pub size: u64,
    #[serde(skip)]
    pub path: PathBuf,
    pub url: String,
    pub extension: String,
}

impl ExtractedImage {
    /// `{hash}.{ext}`, the name under the session directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.hash, self.extension)
    }
}

#[derive(Debug)]
struct SessionArena {
    dir: PathBuf,
    created_at: Instant,
    images: Mutex<HashMap<String, Arc<OnceCell<ExtractedImage>>>>,
}

/// The image store shared by all pipelines of one service.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    base_url: String,
    sessions: Mutex<HashMap<SessionId, Arc<SessionArena>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SHA-256 hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn detect_extension(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("bin")
        .to_string()
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn arena(&self, session: SessionId) -> Arc<SessionArena> {
        let mut sessions = lock(&self.sessions);
        Arc::clone(sessions.entry(session).or_insert_with(|| {
            Arc::new(SessionArena {
                dir: self.root.join(session.to_string()),
                created_at: Instant::now(),
                images: Mutex::new(HashMap::new()),
            })
        }))
    }

    /// Store `bytes` for `session`, deduplicating by content hash.
    ///
    /// A repeated put in the same session returns the first image unchanged,
    /// placement included.
    pub async fn put(
        &self,
        session: SessionId,
        bytes: Bytes,
        placement: ImagePlacement,
    ) -> Result<ExtractedImage, ConvertError> {
        let hash = content_hash(&bytes);
        let arena = self.arena(session);
        let cell = {
            let mut images = lock(&arena.images);
            Arc::clone(images.entry(hash.clone()).or_default())
        };

        let image = cell
            .get_or_try_init(|| async {
                let extension = detect_extension(&bytes);
                let file_name = format!("{hash}.{extension}");
                let path = arena.dir.join(&file_name);
                write_atomic(&arena.dir, &path, bytes.clone()).await?;
                debug!("Stored {} ({} bytes) for session {}", file_name, bytes.len(), session);
                Ok::<_, ConvertError>(ExtractedImage {
                    url: format!("{}/{}/{}", self.base_url, session, file_name),
                    hash: hash.clone(),
                    page: placement.page,
                    sequence: placement.sequence,
                    size: bytes.len() as u64,
                    path,
                    extension,
                })
            })
            .await?;
        Ok(image.clone())
    }

    /// Read back a stored image by hash (with or without extension).
    pub async fn get(&self, session: SessionId, hash: &str) -> Result<Bytes, ConvertError> {
        let hash = hash.split_once('.').map_or(hash, |(h, _)| h);
        let not_found = || ConvertError::NotFound {
            session: session.to_string(),
            item: hash.to_string(),
        };
        let arena = lock(&self.sessions).get(&session).cloned().ok_or_else(not_found)?;
        let image = lock(&arena.images)
            .get(hash)
            .and_then(|cell| cell.get().cloned())
            .ok_or_else(not_found)?;
        match tokio::fs::read(&image.path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(source) => Err(ConvertError::Storage {
                path: image.path,
                source,
            }),
        }
    }

    /// Images currently indexed for `session`, in no particular order.
    pub fn images(&self, session: SessionId) -> Vec<ExtractedImage> {
        let Some(arena) = lock(&self.sessions).get(&session).cloned() else {
            return Vec::new();
        };
        let images = lock(&arena.images);
        images.values().filter_map(|c| c.get().cloned()).collect()
    }

    /// Remove every file and index entry of `session`.
    ///
    /// Returns the number of indexed images removed. A session with neither
    /// an index entry nor a directory is `NotFound`.
    pub async fn purge(&self, session: SessionId) -> Result<usize, ConvertError> {
        let arena = lock(&self.sessions).remove(&session);
        let dir = self.root.join(session.to_string());
        let removed = arena.as_ref().map_or(0, |a| lock(&a.images).len());

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if arena.is_none() {
                    return Err(ConvertError::NotFound {
                        session: session.to_string(),
                        item: "session".into(),
                    });
                }
            }
            Err(source) => return Err(ConvertError::Storage { path: dir, source }),
        }
        debug!("Purged session {} ({} images)", session, removed);
        Ok(removed)
    }

    /// Purge sessions older than `max_age`, including directories left by a
    /// previous process. Returns the number of sessions removed.
    pub async fn sweep_expired(&self, max_age: Duration) -> usize {
        let expired: Vec<SessionId> = lock(&self.sessions)
            .iter()
            .filter(|(_, a)| a.created_at.elapsed() > max_age)
            .map(|(id, _)| *id)
            .collect();

        let mut swept = 0;
        for session in expired {
            match self.purge(session).await {
                Ok(_) => swept += 1,
                Err(e) => warn!("Sweep of session {} failed: {}", session, e),
            }
        }

        swept += self.sweep_orphans(max_age).await;
        if swept > 0 {
            info!("Retention sweep removed {} session(s)", swept);
        }
        swept
    }

    async fn sweep_orphans(&self, max_age: Duration) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return 0;
        };
        let mut swept = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(session) = entry.file_name().to_string_lossy().parse::<SessionId>() else {
                continue;
            };
            if lock(&self.sessions).contains_key(&session) {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| SystemTime::now().duration_since(t).ok());
            if age.is_some_and(|age| age > max_age)
                && tokio::fs::remove_dir_all(entry.path()).await.is_ok()
            {
                swept += 1;
            }
        }
        swept
    }
}

async fn write_atomic(dir: &Path, path: &Path, bytes: Bytes) -> Result<(), ConvertError> {
    let dir = dir.to_path_buf();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir).map_err(|source| ConvertError::Storage {
            path: dir.clone(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| {
            ConvertError::Storage {
                path: dir.clone(),
                source,
            }
        })?;
        tmp.write_all(&bytes).map_err(|source| ConvertError::Storage {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&path).map_err(|e| ConvertError::Storage {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("image write task failed: {e}")))?
}
