//! Append-mostly binary log format for `userdata.warp`.
//!
//! Each record is framed the same way as the IPC wire protocol: a 4-byte
//! little-endian length prefix followed by a UTF-8 JSON payload. Replay
//! stops (rather than erroring) at the first record that fails to decode,
//! so a process killed mid-write leaves a store that still loads.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::Item;

const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRecord {
    Upsert(Item),
    Tombstone(String),
}

/// Append one record to an already-open log file.
pub fn append(file: &mut File, record: &LogRecord) -> Result<()> {
    let json = serde_json::to_vec(record).context("serialize log record")?;
    if json.len() as u64 > MAX_RECORD_LEN as u64 {
        anyhow::bail!("log record too large: {} bytes", json.len());
    }
    file.write_all(&(json.len() as u32).to_le_bytes())
        .context("write record length")?;
    file.write_all(&json).context("write record body")?;
    file.flush().context("flush log file")?;
    Ok(())
}

/// Replay every well-formed record from `path`. Tolerates a missing file
/// (empty store) and a truncated/corrupt trailing record (stops replay and
/// logs a warning rather than refusing to start).
pub fn replay(path: &Path) -> Result<Vec<LogRecord>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };

    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading item store log length prefix, stopping replay");
                break;
            }
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_RECORD_LEN {
            tracing::warn!(len, "item store log record length implausible, stopping replay");
            break;
        }
        let mut body = vec![0u8; len as usize];
        if let Err(e) = file.read_exact(&mut body) {
            tracing::warn!(error = %e, "truncated trailing record in item store log, stopping replay");
            break;
        }
        match serde_json::from_slice::<LogRecord>(&body) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt trailing record in item store log, stopping replay");
                break;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_item(hash: &str) -> Item {
        Item {
            hash: hash.to_string(),
            url: "https://example.com/file".to_string(),
            name: "file".to_string(),
            download_location: "/tmp".into(),
            absolute_location: "/tmp".into(),
            total_size: 100,
            downloaded: 0,
            resumable: true,
            force_parts: false,
            max_connections: 4,
            max_segments: 4,
            parts: HashMap::new(),
            child_hash: None,
            hidden: false,
            children: Vec::new(),
            date_added: chrono::Utc::now(),
            priority: crate::model::Priority::Normal,
            schedule_state: crate::model::ScheduleState::None,
            scheduled_at: None,
            cron_expr: None,
            headers: HashMap::new(),
            cookie_source_path: None,
            etag: None,
            last_modified: None,
            completed: false,
            stopped: false,
        }
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata.warp");
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        append(&mut file, &LogRecord::Upsert(sample_item("abc"))).unwrap();
        append(&mut file, &LogRecord::Tombstone("abc".to_string())).unwrap();
        drop(file);

        let records = replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], LogRecord::Upsert(i) if i.hash == "abc"));
        assert!(matches!(&records[1], LogRecord::Tombstone(h) if h == "abc"));
    }

    #[test]
    fn missing_file_replays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.warp");
        let records = replay(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn truncated_trailing_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata.warp");
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        append(&mut file, &LogRecord::Upsert(sample_item("good"))).unwrap();
        // Simulate a crash mid-write: a length prefix with no body.
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(b"short").unwrap();
        drop(file);

        let records = replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], LogRecord::Upsert(i) if i.hash == "good"));
    }
}
