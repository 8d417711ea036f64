//! Local backup store: an append-only JSON-lines file, one observation document per line.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::sinks::ObservationSink;
use crate::types::PacketObservation;

pub const DEFAULT_STORE_PATH: &str = "network_data/packets.jsonl";

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    // Serializes appends so concurrent inserts never interleave within a line.
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one document. Creates the file and its parent directories on first use.
    pub async fn insert(&self, observation: &PacketObservation) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(observation)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Up to `limit` documents, newest first. A missing file reads as empty; malformed lines
    /// are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<PacketObservation>, SinkError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut out = Vec::with_capacity(limit.min(lines.len()));
        for (idx, line) in lines.iter().enumerate().rev() {
            if out.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PacketObservation>(line) {
                Ok(obs) => out.push(obs),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed store line"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ObservationSink for JsonlStore {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn deliver(&self, observation: &PacketObservation) -> Result<(), SinkError> {
        self.insert(observation).await?;
        debug!(path = %self.path.display(), "observation stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Classification;
    use std::net::{IpAddr, Ipv4Addr};
    use time::OffsetDateTime;

    fn obs(last: u8) -> PacketObservation {
        PacketObservation {
            source_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            destination_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            captured_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            classification: Classification::Spoofed,
        }
    }

    #[tokio::test]
    async fn insert_creates_parents_and_recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("network_data").join("packets.jsonl"));

        for i in 1..=3 {
            store.insert(&obs(i)).await.unwrap();
        }

        assert_eq!(store.recent(10).await.unwrap(), vec![obs(3), obs(2), obs(1)]);
        assert_eq!(store.recent(2).await.unwrap(), vec![obs(3), obs(2)]);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("none.jsonl"));
        assert!(store.recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.jsonl");
        let store = JsonlStore::new(&path);
        store.insert(&obs(1)).await.unwrap();
        tokio::fs::write(
            &path,
            format!("{}not json\n", tokio::fs::read_to_string(&path).await.unwrap()),
        )
        .await
        .unwrap();

        assert_eq!(store.recent(5).await.unwrap(), vec![obs(1)]);
    }

    #[tokio::test]
    async fn document_has_wire_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.jsonl");
        JsonlStore::new(&path).deliver(&obs(4)).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(v["sourceIp"], "10.0.0.4");
        assert_eq!(v["status"], "Spoofed");
        assert!(v["timestamp"].is_string());
    }
}
