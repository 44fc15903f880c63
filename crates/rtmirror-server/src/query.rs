//! Read-only queries over the append log
//!
//! Every call reads the log file directly; there is no cache of its own.
//! Failures degrade to well-formed answers instead of errors wherever the
//! HTTP contract allows it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, instrument};

use rtmirror_core::{Record, RecordSchema};
use rtmirror_storage::{AppendLog, StorageError};

/// Bytes scanned from the end of the log to find the latest record
pub const INFO_TAIL_WINDOW: u64 = 10 * 1024;

/// Page size when none (or garbage) is requested
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Largest page ever returned
pub const MAX_PAGE_LIMIT: usize = 2000;

/// Answer of [`QueryService::info`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoResponse {
    /// The log holds data
    #[serde(rename_all = "camelCase")]
    Summary {
        total: usize,
        last_date: Option<String>,
        last_record: Record,
        message: String,
    },
    /// Nothing to report
    Empty { total: usize, message: String },
    /// The log could not be read
    Failed { total: usize, error: String },
}

impl InfoResponse {
    fn empty(message: &str) -> Self {
        Self::Empty {
            total: 0,
            message: message.to_string(),
        }
    }

    /// Record count reported to the client
    pub fn total(&self) -> usize {
        match self {
            Self::Summary { total, .. } | Self::Empty { total, .. } | Self::Failed { total, .. } => {
                *total
            }
        }
    }
}

/// Raw `limit` / `offset` query parameters, kept as text so bad values
/// can fall back to defaults instead of rejecting the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl PageQuery {
    /// Collect `limit` / `offset` from decoded query pairs. A repeated
    /// parameter keeps its first value; unknown ones are ignored.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "limit" => &mut query.limit,
                "offset" => &mut query.offset,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

/// Integer at the start of `value`, ignoring whatever follows it
/// (`"10abc"` is 10, `"1e3"` is 1). Out-of-range values saturate.
fn leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let (negative, rest) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }

    let digits = &rest[..len];
    let parsed = if negative {
        format!("-{digits}").parse::<i64>().unwrap_or(i64::MIN)
    } else {
        digits.parse::<i64>().unwrap_or(i64::MAX)
    };
    Some(parsed)
}

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Build a request with `limit` clamped into `[1, MAX_PAGE_LIMIT]`
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl From<&PageQuery> for PageRequest {
    fn from(query: &PageQuery) -> Self {
        let parse = |value: &Option<String>| value.as_deref().and_then(leading_int);

        let limit = match parse(&query.limit) {
            Some(n) => usize::try_from(n.max(1)).unwrap_or(MAX_PAGE_LIMIT),
            None => DEFAULT_PAGE_LIMIT,
        };
        let offset = parse(&query.offset)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);

        Self::new(offset, limit)
    }
}

/// Query side of the mirror
#[derive(Debug, Clone)]
pub struct QueryService {
    log: Arc<AppendLog>,
    schema: RecordSchema,
}

impl QueryService {
    pub fn new(log: Arc<AppendLog>) -> Self {
        let schema = log.schema().clone();
        Self { log, schema }
    }

    /// Record count and most recent record. Never fails.
    #[instrument(skip(self))]
    pub async fn info(&self) -> InfoResponse {
        match self.try_info().await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "Failed to read log for info");
                InfoResponse::Failed {
                    total: 0,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_info(&self) -> Result<InfoResponse, StorageError> {
        let Some(last_record) = self.log.last_record(INFO_TAIL_WINDOW).await? else {
            let message = if self.log.size().await? == 0 {
                "No data available"
            } else {
                "Could not read the last record"
            };
            return Ok(InfoResponse::empty(message));
        };
        let total = self.log.count().await?;

        let last_date = self.schema.timestamp(&last_record).map(str::to_string);
        let message = format!(
            "Last record: {}",
            last_date.as_deref().unwrap_or("no date")
        );

        Ok(InfoResponse::Summary {
            total,
            last_date,
            last_record,
            message,
        })
    }

    /// Records `offset..offset + limit` in log order
    #[instrument(skip(self))]
    pub async fn page(&self, request: PageRequest) -> Result<Vec<Record>, StorageError> {
        self.log.read_page(request.offset, request.limit).await
    }
}
