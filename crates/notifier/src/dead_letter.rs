//! Append-only dead-letter log for messages that exhausted delivery retries.
//!
//! Each record is one JSON line holding the original body, so bodies that
//! contain newlines or arbitrary bytes survive a read-back intact. Records are
//! never rewritten or removed here; reprocessing is an out-of-band job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use relay_common::error::AppError;
use relay_common::types::Message;

/// One persisted dead-letter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub raw: Vec<u8>,
}

impl DeadLetterRecord {
    /// Decode the stored body back into a message, if it was a valid envelope.
    pub fn message(&self) -> Option<Message> {
        Message::from_bytes(&self.raw).ok()
    }
}

/// On-disk line format. UTF-8 bodies are kept readable; anything else is
/// stored as a byte array.
#[derive(Debug, Serialize, Deserialize)]
struct StoredLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bytes: Option<Vec<u8>>,
}

impl StoredLine {
    fn encode(raw: &[u8]) -> Result<Vec<u8>, AppError> {
        let line = match std::str::from_utf8(raw) {
            Ok(text) => StoredLine {
                body: Some(text.to_string()),
                bytes: None,
            },
            Err(_) => StoredLine {
                body: None,
                bytes: Some(raw.to_vec()),
            },
        };
        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        Ok(encoded)
    }

    /// Lines that are not in this format are returned verbatim.
    fn decode(line: &[u8]) -> Vec<u8> {
        match serde_json::from_slice::<StoredLine>(line) {
            Ok(StoredLine {
                body: Some(body), ..
            }) => body.into_bytes(),
            Ok(StoredLine {
                bytes: Some(bytes),
                ..
            }) => bytes,
            _ => line.to_vec(),
        }
    }
}

/// File-backed dead-letter store.
#[derive(Debug)]
pub struct DeadLetterStore {
    path: PathBuf,
    /// Serializes appends from this process.
    write_lock: Mutex<()>,
}

impl DeadLetterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one raw body. The file is opened in append/create mode for every
    /// write and synced before returning.
    pub async fn append(&self, raw: &[u8]) -> Result<(), AppError> {
        let line = StoredLine::encode(raw)?;
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(&line).await?;
        file.sync_data().await?;

        tracing::debug!(path = %self.path.display(), bytes = raw.len(), "Dead-letter record appended");
        Ok(())
    }

    /// Read every stored record in append order. A missing file means no records.
    pub async fn read_all(&self) -> Result<Vec<DeadLetterRecord>, AppError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(contents
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| DeadLetterRecord {
                raw: StoredLine::decode(line),
            })
            .collect())
    }
}
