//! Commit path: accepted-snapshot store → JSON blob → persistence.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use log::info;
use tokio::io::AsyncWriteExt;

use crate::collector::state::CommitTicket;
use crate::error::{SnapshotError, SnapshotResult};
use crate::store::SharedStore;
use crate::util;

/// Durable storage for committed blobs.
///
/// `name` is unique per cycle; implementations must not overwrite an
/// existing object with the same name.
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, name: &str, blob: &[u8]) -> SnapshotResult<String>;
}

/// Writes each blob as its own file under `dir`.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl PersistenceSink for FileSink {
    /// Writes `.<name>.part` and renames it into place, so the final name
    /// only ever holds a complete blob.
    async fn persist(&self, name: &str, blob: &[u8]) -> SnapshotResult<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            return Err(SnapshotError::Persistence(format!(
                "{} already exists",
                path.display()
            )));
        }

        let part = self.dir.join(format!(".{}.part", name));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part)
            .await?;
        file.write_all(blob).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&part, &path).await?;
        Ok(path.display().to_string())
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub location: String,
    pub entries: usize,
    pub bytes: usize,
}

/// Serializes the store and hands it to the sink. Requires a
/// [`CommitTicket`], which the cycle state issues once.
#[derive(Clone)]
pub struct CommitSink {
    sink: Arc<dyn PersistenceSink>,
    gzip: bool,
}

impl CommitSink {
    pub fn new(sink: Arc<dyn PersistenceSink>, gzip: bool) -> Self {
        Self { sink, gzip }
    }

    pub async fn commit(
        &self,
        ticket: CommitTicket,
        store: &SharedStore,
    ) -> SnapshotResult<CommitReceipt> {
        let now = util::now_ms();
        let name = commit_name(now, self.gzip);

        // Serialize under the lock, write without it.
        let (json, entries) = {
            let store = store.lock();
            let json = serde_json::to_vec(&*store)
                .map_err(|e| SnapshotError::Persistence(e.to_string()))?;
            (json, store.len())
        };

        let blob = if self.gzip { gzip(&json)? } else { json };

        info!(
            "storing {} snapshot(s) from {} request(s) as {}",
            entries,
            ticket.requests(),
            name
        );
        let location = self.sink.persist(&name, &blob).await?;

        Ok(CommitReceipt {
            location,
            entries,
            bytes: blob.len(),
        })
    }
}

/// `data_<epoch ms>_<ISO-8601 with ':' and '.' as '-'>.json[.gz]`
pub fn commit_name(now_ms: i64, gzip: bool) -> String {
    format!(
        "data_{}_{}.json{}",
        now_ms,
        util::file_stamp(now_ms),
        if gzip { ".gz" } else { "" }
    )
}

fn gzip(data: &[u8]) -> SnapshotResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
