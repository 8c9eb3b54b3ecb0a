//! On-disk spill of pending operations.
//!
//! The file is a plain sequence of frames, each a little-endian `u32` length
//! followed by one encoded operation. A frame that fails to decode is
//! skipped; a frame cut short by the end of the file ends loading.

use crate::codec::{encode_operation, try_deserialize_binary};
use crate::error::{QueueError, QueueResult};
use crate::operation::Operation;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Result of [`QueueStore::save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Frames written to the file.
    pub written: usize,
    /// Indices into the saved slice of operations that could not be encoded.
    pub unencodable: Vec<usize>,
}

impl SaveReport {
    /// Whether the operation at `index` made it into the file.
    pub fn is_persisted(&self, index: usize) -> bool {
        !self.unencodable.contains(&index)
    }
}

/// File-backed store for the retry backlog.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `operations` to the queue file, replacing any previous content.
    ///
    /// Discarded operations are skipped silently. Operations that cannot be
    /// encoded are left out and listed in the returned report.
    pub fn save(&self, operations: &[Operation]) -> QueueResult<SaveReport> {
        let mut buf = Vec::new();
        let mut report = SaveReport::default();
        for (index, operation) in operations.iter().enumerate() {
            if operation.is_discarded() {
                continue;
            }
            let encoded = match encode_operation(operation) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(
                        bundle = %operation.bundle(),
                        item_key = %operation.item_key(),
                        error = %e,
                        "Skipping operation that could not be encoded"
                    );
                    report.unencodable.push(index);
                    continue;
                }
            };
            let len = u32::try_from(encoded.len())
                .map_err(|_| QueueError::Codec("Operation too large for a frame".to_string()))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&encoded);
            report.written += 1;
        }

        self.write_atomic(&buf)?;
        info!(
            path = %self.path.display(),
            operations = report.written,
            unencodable = report.unencodable.len(),
            "Saved operation queue"
        );
        Ok(report)
    }

    /// Read every decodable operation from the queue file.
    ///
    /// A missing file is an empty queue.
    pub fn load(&self) -> QueueResult<Vec<Operation>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved operation queue");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut operations = Vec::new();
        let mut skipped = 0usize;
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            if rest.len() < 4 {
                warn!(trailing = rest.len(), "Truncated frame header in queue file");
                break;
            }
            let (header, tail) = rest.split_at(4);
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            if len > tail.len() {
                warn!(
                    frame_len = len,
                    available = tail.len(),
                    "Truncated frame in queue file"
                );
                break;
            }
            let (frame, next) = tail.split_at(len);
            let mut cursor = frame;
            match try_deserialize_binary(&mut cursor) {
                Some(operation) if cursor.is_empty() => operations.push(operation),
                Some(_) => {
                    warn!(trailing = cursor.len(), "Frame has trailing bytes, skipping");
                    skipped += 1;
                }
                None => skipped += 1,
            }
            rest = next;
        }

        info!(
            path = %self.path.display(),
            loaded = operations.len(),
            skipped,
            "Loaded operation queue"
        );
        Ok(operations)
    }

    /// Delete the queue file if it exists.
    pub fn remove(&self) -> QueueResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, content: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "queue".to_string());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, nanos));

        let result = (|| -> io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            file.write_all(content)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAX_FIELD_LEN;
    use crate::operation::OperationType;
    use crate::request::{HttpMethod, HttpRequest};
    use tempfile::tempdir;

    fn op(bundle: &str, item: &str, timestamp: i64) -> Operation {
        let request = HttpRequest::new(HttpMethod::Put, format!("https://example.com/{}", bundle))
            .with_json_body(r#"{"score":10}"#);
        Operation::with_timestamp(OperationType::Write, bundle, item, request, 200, 4, timestamp)
    }

    fn frame(bytes: &[u8]) -> Vec<u8> {
        let mut out = (bytes.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(bytes);
        out
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.bin"));
        assert!(store.load().unwrap().is_empty());
        store.remove().unwrap();
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("nested").join("queue.bin"));

        let written = store
            .save(&[op("scores", "player1", 1), op("inventory", "", 2)])
            .unwrap();
        assert_eq!(written.written, 2);
        assert!(written.unencodable.is_empty());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].bundle(), "scores");
        assert_eq!(loaded[0].item_key(), "player1");
        assert_eq!(loaded[0].request().body, br#"{"score":10}"#.to_vec());
        assert_eq!(loaded[1].timestamp_ms(), 2);
        assert_eq!(loaded[1].attempts(), 0);
    }

    #[test]
    fn test_discarded_operations_are_not_saved() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.bin"));

        let mut superseded = op("scores", "player1", 1);
        superseded.discard = true;
        let report = store.save(&[superseded, op("scores", "player1", 2)]).unwrap();
        assert_eq!(report.written, 1);
        assert!(report.is_persisted(1));

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].timestamp_ms(), 2);
    }

    #[test]
    fn test_oversized_operation_is_reported() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.bin"));

        let mut request = HttpRequest::new(HttpMethod::Put, "https://example.com/blobs");
        request.body = vec![0u8; MAX_FIELD_LEN + 1];
        let oversized =
            Operation::with_timestamp(OperationType::Write, "blobs", "", request, 200, 4, 2);
        let report = store
            .save(&[op("scores", "player1", 1), oversized, op("inventory", "", 3)])
            .unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.unencodable, vec![1]);
        assert!(report.is_persisted(0));
        assert!(!report.is_persisted(1));

        let bundles: Vec<String> = store
            .load()
            .unwrap()
            .iter()
            .map(|op| op.bundle().to_string())
            .collect();
        assert_eq!(bundles, vec!["scores".to_string(), "inventory".to_string()]);
    }

    #[test]
    fn test_save_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.bin"));

        store.save(&[op("a", "", 1), op("b", "", 2)]).unwrap();
        store.save(&[op("c", "", 3)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].bundle(), "c");
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_middle_frame_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");

        let mut data = frame(&encode_operation(&op("first", "", 1)).unwrap());
        // Unknown operation type 99 followed by junk.
        data.extend(frame(&[99, 0, 0, 0, 1, 2, 3]));
        data.extend(frame(&encode_operation(&op("third", "", 3)).unwrap()));
        fs::write(&path, data).unwrap();

        let loaded = QueueStore::new(&path).load().unwrap();
        let bundles: Vec<&str> = loaded.iter().map(Operation::bundle).collect();
        assert_eq!(bundles, vec!["first", "third"]);
    }

    #[test]
    fn test_truncated_tail_ends_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");

        let mut data = frame(&encode_operation(&op("first", "", 1)).unwrap());
        let second = frame(&encode_operation(&op("second", "", 2)).unwrap());
        data.extend_from_slice(&second[..second.len() - 3]);
        fs::write(&path, data).unwrap();

        let loaded = QueueStore::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].bundle(), "first");
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.bin"));
        store.save(&[op("a", "", 1)]).unwrap();
        assert!(store.path().exists());

        store.remove().unwrap();
        assert!(!store.path().exists());
        assert!(store.load().unwrap().is_empty());
    }
}
