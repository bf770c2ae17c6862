//! Delivered-item bookkeeping.
//!
//! The durable form is a newline-delimited, append-only log of links. It is
//! read once on startup into an in-memory set; lookups never touch disk.

use std::{
    collections::HashSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::Mutex};

use crate::Result;

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn was_sent(&self, key: &str) -> bool;

    /// Idempotent. On a persistence failure the key is still remembered for
    /// the lifetime of the process and the error is returned for logging.
    async fn mark_sent(&self, key: &str) -> Result<()>;
}

pub struct FileDedupStore {
    path: PathBuf,
    sent: Mutex<HashSet<String>>,
    /// Serializes appends. Never held together with `sent`.
    writer: Mutex<()>,
}

impl FileDedupStore {
    /// Hydrate from `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sent = match fs::read_to_string(&path) {
            Ok(text) => parse_log(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), entries = sent.len(), "loaded sent-items log");

        Ok(Self {
            path,
            sent: Mutex::new(sent),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn entry_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    async fn append(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{key}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for FileDedupStore {
    async fn was_sent(&self, key: &str) -> bool {
        self.sent.lock().await.contains(key)
    }

    async fn mark_sent(&self, key: &str) -> Result<()> {
        // The first inserter owns the append; lookups never wait on disk.
        if !self.sent.lock().await.insert(key.to_string()) {
            return Ok(());
        }

        let _writer = self.writer.lock().await;
        self.append(key).await
    }
}

/// Process-local store with no persistence.
#[derive(Default)]
pub struct MemoryDedupStore {
    sent: Mutex<HashSet<String>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn was_sent(&self, key: &str) -> bool {
        self.sent.lock().await.contains(key)
    }

    async fn mark_sent(&self, key: &str) -> Result<()> {
        self.sent.lock().await.insert(key.to_string());
        Ok(())
    }
}

fn parse_log(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}
