//! JSON Lines audit store.
//!
//! Uses JSON Lines format (.jsonl) for robustness:
//! - Each line is a complete JSON object
//! - Partial file corruption only affects individual lines
//! - Files are opened in append mode and rotated daily (`audit_YYYY-MM-DD.jsonl`)

use crate::error::PersistenceResult;
use crate::record::{replay, AuditKind, AuditRecord, AuditStore};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Active writer state for daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only JSON Lines audit store.
pub struct JsonLinesStore {
    /// Base directory for output files.
    base_dir: PathBuf,
    /// Buffer of pending records.
    buffer: Vec<AuditRecord>,
    /// Maximum buffer size before flush.
    max_buffer_size: usize,
    /// Active writer (open until date rotation).
    active_writer: Option<ActiveWriter>,
}

impl JsonLinesStore {
    /// Create a store rooted at `base_dir`, creating the directory.
    pub fn new(base_dir: impl AsRef<Path>, max_buffer_size: usize) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        })
    }

    fn push(&mut self, record: AuditRecord) -> PersistenceResult<()> {
        self.buffer.push(record);

        if self.buffer.len() >= self.max_buffer_size {
            self.flush_buffer()?;
        }

        Ok(())
    }

    /// Close the active writer.
    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush audit writer on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed audit writer"
            );
        }
    }

    /// Open the file for `date`, append mode.
    fn open_writer(&self, date: &str) -> PersistenceResult<ActiveWriter> {
        let path = self.base_dir.join(format!("audit_{date}.jsonl"));
        info!(path = %path.display(), "Opening audit writer (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        })
    }

    fn flush_buffer(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();

        let needs_rotation = self
            .active_writer
            .as_ref()
            .map(|w| w.date != today)
            .unwrap_or(false);
        if needs_rotation {
            self.close_active_writer();
        }

        let mut active = match self.active_writer.take() {
            Some(active) => active,
            None => self.open_writer(&today)?,
        };

        let record_count = self.buffer.len();
        let written = (|| -> PersistenceResult<()> {
            for record in &self.buffer {
                let json = serde_json::to_string(record)?;
                writeln!(active.writer, "{json}")?;
            }
            active.writer.flush()?;
            Ok(())
        })();
        self.active_writer = Some(active);
        written?;

        if let Some(active) = self.active_writer.as_mut() {
            active.records_written += record_count;
        }
        debug!(date = %today, records = record_count, "Flushed audit records");
        self.buffer.clear();
        Ok(())
    }

    /// Audit files in date order.
    fn files(&self) -> PersistenceResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("audit_") && n.ends_with(".jsonl"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Every record on disk, in write order. Corrupt lines are skipped.
    fn read_all(&self) -> PersistenceResult<Vec<AuditRecord>> {
        let mut records = Vec::new();
        for path in self.files()? {
            let reader = BufReader::new(File::open(&path)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), line = n + 1, ?e, "Skipping corrupt audit line"),
                }
            }
        }
        Ok(records)
    }

    /// Close the store, flushing any pending data.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush_buffer()?;
        self.close_active_writer();
        Ok(())
    }
}

impl AuditStore for JsonLinesStore {
    fn save(&mut self, record: AuditRecord) -> PersistenceResult<()> {
        self.push(record)
    }

    fn delete_by_order_id(&mut self, order_id: i64) -> PersistenceResult<()> {
        self.push(AuditRecord::tombstone(order_id))
    }

    fn find_by_id(&mut self, kind: AuditKind, id: i64) -> PersistenceResult<Option<AuditRecord>> {
        self.flush_buffer()?;
        Ok(replay(self.read_all()?).remove(&(kind, id)))
    }

    fn flush(&mut self) -> PersistenceResult<()> {
        self.flush_buffer()
    }
}

impl Drop for JsonLinesStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            warn!(?e, "Failed to flush audit buffer on drop");
        }
        self.close_active_writer();
    }
}
