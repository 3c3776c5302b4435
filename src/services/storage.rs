//! Bid document storage.
//!
//! Documents are written before the bid record and referenced from it by key. Keys
//! carry the bid id, so a document is never shared between two bids.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::DocumentUpload;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `doc` under `key`.
    async fn store(&self, key: &str, doc: &DocumentUpload) -> Result<(), StorageError>;

    /// Delete the document under `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Keep only characters that are safe in a single path component.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Key for the `index`-th document of a bid.
pub fn document_key(tender_id: Uuid, bid_id: Uuid, index: usize, filename: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        tender_id,
        bid_id,
        index,
        sanitize_filename(filename)
    )
}

/// Files under a local upload directory
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, key: &str, doc: &DocumentUpload) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                op: "create",
                path: self.root.clone(),
                source,
            })?;

        let path = self.root.join(key);
        tokio::fs::write(&path, &doc.bytes)
            .await
            .map_err(|source| StorageError::Io {
                op: "write",
                path,
                source,
            })?;

        tracing::debug!(key = %key, size = doc.bytes.len(), "Stored bid document");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.root.join(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                op: "remove",
                path,
                source,
            }),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MemoryStorage {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryStorage {
        pub fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.files.lock().keys().cloned().collect();
            keys.sort();
            keys
        }

        pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
            self.files.lock().get(key).cloned()
        }
    }

    #[async_trait]
    impl FileStorage for MemoryStorage {
        async fn store(&self, key: &str, doc: &DocumentUpload) -> Result<(), StorageError> {
            self.files.lock().insert(key.to_string(), doc.bytes.clone());
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.files.lock().remove(key);
            Ok(())
        }
    }
}
