//! Append-only record log
//!
//! The system of record for replicated data: one JSON object per line,
//! in append order, which is also ascending remote key order. Lines are
//! never rewritten or removed.
//!
//! ## Writes
//!
//! [`AppendLog::append`] validates the record, checks the dedup index,
//! writes the line and registers the id, all under one writer lock. Every
//! producer (backfill and tail) funnels through it, so there is exactly one
//! writer at a time and no window where a duplicate can slip through.
//!
//! ## Reads
//!
//! Reads open their own handle and never take the writer lock. A reader
//! may see any prefix of the log; a line that does not parse (for example
//! a torn write left by a crash) is skipped, never an error.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace, warn};

use rtmirror_core::{Record, RecordSchema, compare_keys};

use crate::dedup::DedupIndex;
use crate::error::StorageError;

/// Configuration for the append log
#[derive(Debug, Clone)]
pub struct AppendLogConfig {
    /// Path of the JSON-lines file
    pub path: PathBuf,
    /// Whether to sync each append to disk before returning
    pub sync_on_write: bool,
}

impl Default for AppendLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sensores-cache.jsonl"),
            sync_on_write: true,
        }
    }
}

impl AppendLogConfig {
    /// Create a configuration for the given file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Result of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was written
    Appended,
    /// The id is already in the log; nothing was written
    Duplicate,
    /// The record failed the validity rule; nothing was written
    Invalid,
}

/// Result of a full log scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Lines that parse as a record
    pub records: usize,
    /// Non-empty lines that do not
    pub corrupt: usize,
    /// Records whose id appeared earlier in the log
    pub duplicates: usize,
    /// Records whose key does not sort after the previous one
    pub out_of_order: usize,
    /// Id of the last record
    pub last_id: Option<String>,
}

/// Append-only JSON-lines log
pub struct AppendLog {
    config: AppendLogConfig,
    schema: RecordSchema,
    dedup: Arc<DedupIndex>,
    /// Lazily opened append handle; also the single-writer lock
    writer: Mutex<Option<File>>,
}

impl AppendLog {
    /// Open (without creating) the log described by `config`.
    ///
    /// The file itself is created on the first append.
    #[instrument(skip_all, fields(path = %config.path.display()))]
    pub async fn open(
        config: AppendLogConfig,
        schema: RecordSchema,
        dedup: Arc<DedupIndex>,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Append log ready");
        Ok(Self {
            config,
            schema,
            dedup,
            writer: Mutex::new(None),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Validity rule applied on append
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Dedup index consulted and updated on append
    pub fn dedup(&self) -> &Arc<DedupIndex> {
        &self.dedup
    }

    /// Open the file for appending, terminating a torn last line first so
    /// the next record does not get glued onto it.
    async fn open_writer(&self) -> Result<File, StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await?;

        let len = file.metadata().await?.len();
        if len > 0 {
            let mut reader = File::open(&self.config.path).await?;
            reader.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            reader.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!(path = %self.config.path.display(), "Log ends with a partial line, terminating it");
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
        }

        Ok(file)
    }

    /// Append a record unless it is invalid or already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written. The id is then not
    /// registered, so a later attempt will retry it.
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub async fn append(&self, record: &Record) -> Result<AppendOutcome, StorageError> {
        if !self.schema.is_valid(record) {
            trace!("Dropping invalid record");
            return Ok(AppendOutcome::Invalid);
        }

        let mut guard = self.writer.lock().await;

        if self.dedup.contains(&record.id) {
            trace!("Skipping duplicate record");
            return Ok(AppendOutcome::Duplicate);
        }

        let mut line = record
            .to_line()
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        if guard.is_none() {
            *guard = Some(self.open_writer().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(StorageError::io("Log file not open"));
        };

        if let Err(e) = write_line(file, line.as_bytes(), self.config.sync_on_write).await {
            error!(error = %e, "Failed to append record");
            // Reopen on the next attempt rather than reuse a handle in an
            // unknown state
            *guard = None;
            return Err(e);
        }

        self.dedup.add(&record.id);
        debug!("Appended record");
        Ok(AppendOutcome::Appended)
    }

    /// Open a buffered reader, `None` if the log does not exist yet
    async fn open_reader(&self) -> Result<Option<BufReader<File>>, StorageError> {
        match File::open(&self.config.path).await {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current size of the log in bytes (0 if it does not exist)
    pub async fn size(&self) -> Result<u64, StorageError> {
        match tokio::fs::metadata(&self.config.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the non-empty lines within the last `max_bytes` of the log.
    ///
    /// A line cut by the start of the window is dropped.
    pub async fn read_tail(&self, max_bytes: u64) -> Result<Vec<String>, StorageError> {
        let Some(mut reader) = self.open_reader().await? else {
            return Ok(Vec::new());
        };

        let size = reader.get_ref().metadata().await?.len();
        let start = size.saturating_sub(max_bytes);
        // Read one byte before the window to know whether its first line is whole
        let read_from = start.saturating_sub(1);
        reader.seek(SeekFrom::Start(read_from)).await?;

        let mut buf = Vec::with_capacity((size - read_from) as usize);
        reader.read_to_end(&mut buf).await?;

        let body = if start > 0 {
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => &buf[pos + 1..],
                None => &buf[buf.len()..],
            }
        } else {
            &buf[..]
        };

        Ok(String::from_utf8_lossy(body)
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Most recent well-formed record within the last `max_bytes`
    pub async fn last_record(&self, max_bytes: u64) -> Result<Option<Record>, StorageError> {
        let lines = self.read_tail(max_bytes).await?;
        Ok(lines
            .iter()
            .rev()
            .find_map(|line| Record::from_line(line).ok()))
    }

    /// Read every well-formed record, in log order.
    ///
    /// Corrupt lines are logged and skipped.
    #[instrument(skip(self))]
    pub async fn read_all(&self) -> Result<Vec<Record>, StorageError> {
        let Some(mut reader) = self.open_reader().await? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        let mut corrupt = 0usize;
        let mut line_no = 0usize;
        let mut buf = Vec::new();

        while let Some(line) = next_line(&mut reader, &mut buf).await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match Record::from_line(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    corrupt += 1;
                    warn!(line = line_no, error = %e, "Skipping corrupt log line");
                }
            }
        }

        debug!(records = records.len(), corrupt, "Read full log");
        Ok(records)
    }

    /// Number of well-formed lines in the log
    pub async fn count(&self) -> Result<usize, StorageError> {
        let Some(mut reader) = self.open_reader().await? else {
            return Ok(0);
        };

        let mut count = 0usize;
        let mut buf = Vec::new();
        while let Some(line) = next_line(&mut reader, &mut buf).await? {
            if !line.trim().is_empty() && Record::from_line(&line).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Full integrity scan of the log
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<LogStats, StorageError> {
        let mut stats = LogStats::default();
        let Some(mut reader) = self.open_reader().await? else {
            return Ok(stats);
        };

        let mut seen = HashSet::new();
        let mut buf = Vec::new();
        while let Some(line) = next_line(&mut reader, &mut buf).await? {
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = Record::from_line(&line) else {
                stats.corrupt += 1;
                continue;
            };

            stats.records += 1;
            if !seen.insert(record.id.clone()) {
                stats.duplicates += 1;
            }
            if let Some(last) = &stats.last_id
                && compare_keys(last, &record.id) != Ordering::Less
            {
                stats.out_of_order += 1;
            }
            stats.last_id = Some(record.id);
        }

        debug!(?stats, "Scanned log");
        Ok(stats)
    }

    /// Records on lines `offset..offset + limit` (0-indexed, blank lines
    /// not counted). Lines in that range that do not parse are dropped.
    pub async fn read_page(&self, offset: usize, limit: usize) -> Result<Vec<Record>, StorageError> {
        let Some(mut reader) = self.open_reader().await? else {
            return Ok(Vec::new());
        };

        let end = offset.saturating_add(limit);
        let mut records = Vec::with_capacity(limit.min(1024));
        let mut index = 0usize;
        let mut buf = Vec::new();

        while index < end {
            let Some(line) = next_line(&mut reader, &mut buf).await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if index >= offset {
                match Record::from_line(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => trace!(line = index, error = %e, "Dropping corrupt line from page"),
                }
            }
            index += 1;
        }

        Ok(records)
    }
}

impl std::fmt::Debug for AppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.config.path)
            .field("sync_on_write", &self.config.sync_on_write)
            .finish()
    }
}

async fn write_line(file: &mut File, line: &[u8], sync: bool) -> Result<(), StorageError> {
    file.write_all(line).await?;
    file.flush().await?;
    if sync {
        file.sync_data().await?;
    }
    Ok(())
}

/// Read one line as lossy UTF-8, without its terminator
async fn next_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<String>, StorageError> {
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}
