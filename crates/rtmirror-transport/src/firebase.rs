//! Realtime Database remote source
//!
//! Implements [`RemoteSource`] over the Realtime Database REST API:
//!
//! - range queries use `orderBy="$key"` with `startAt` / `limitToFirst`;
//!   the REST API has no exclusive bound, so one extra child is requested
//!   and the bound itself dropped
//! - subscriptions use the same URL with `Accept: text/event-stream` and
//!   are fed through [`ChildStream`] to get child-added semantics

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use rtmirror_core::{
    OrderedKey, RemoteEntry, RemoteSource, SUBSCRIPTION_BUFFER, SourceError, Subscription,
    is_after,
};

use crate::child_stream::ChildStream;
use crate::sse::SseDecoder;

/// Connection settings for a Realtime Database node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    /// Database root, e.g. `https://my-db-default-rtdb.firebaseio.com`
    pub database_url: String,
    /// Node whose children are replicated
    pub path: String,
    /// Optional credential sent as the `auth` query parameter
    pub auth: Option<String>,
    /// Timeout for range queries (streams are not time-limited)
    pub request_timeout_secs: u64,
    /// Timeout for establishing any connection
    pub connect_timeout_secs: u64,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            path: "Sensores".to_string(),
            auth: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl FirebaseConfig {
    /// Create a configuration for a node of a database
    pub fn new(database_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the auth credential
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// REST URL of the replicated node
    pub fn node_url(&self) -> String {
        format!(
            "{}/{}.json",
            self.database_url.trim_end_matches('/'),
            self.path.trim_matches('/')
        )
    }

    /// Query parameters for an ordered read, optionally bounded and limited
    pub fn query_params(&self, start_at: Option<&str>, limit: Option<usize>) -> Vec<(&'static str, String)> {
        let mut params = vec![("orderBy", "\"$key\"".to_string())];
        if let Some(start) = start_at {
            params.push(("startAt", quote(start)));
        }
        if let Some(limit) = limit {
            params.push(("limitToFirst", limit.to_string()));
        }
        if let Some(auth) = &self.auth {
            params.push(("auth", auth.clone()));
        }
        params
    }
}

/// JSON-encode a key for use as a query bound
fn quote(key: &str) -> String {
    Value::String(key.to_string()).to_string()
}

/// Turn a range-query body into entries strictly after `start_after`,
/// ascending, at most `limit` of them.
pub fn parse_range_body(
    body: Value,
    start_after: Option<&str>,
    limit: usize,
) -> Result<Vec<RemoteEntry>, SourceError> {
    let children = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Object(children) => children,
        other => {
            return Err(SourceError::decode(format!(
                "expected an object of children, got {}",
                type_name(&other)
            )));
        }
    };

    let mut entries: Vec<(OrderedKey, Value)> = children
        .into_iter()
        .filter(|(k, _)| is_after(k, start_after))
        .map(|(k, v)| (OrderedKey(k), v))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.truncate(limit);

    Ok(entries
        .into_iter()
        .map(|(k, v)| RemoteEntry::new(k.0, v))
        .collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// [`RemoteSource`] backed by the Realtime Database REST API
#[derive(Debug, Clone)]
pub struct FirebaseSource {
    config: FirebaseConfig,
    /// Client for bounded range queries
    client: reqwest::Client,
    /// Client for long-lived streams (no overall timeout)
    stream_client: reqwest::Client,
}

impl FirebaseSource {
    /// Build a source from its configuration
    ///
    /// # Errors
    ///
    /// Returns an error if no database URL is configured or the HTTP client
    /// cannot be built.
    pub fn new(config: FirebaseConfig) -> Result<Self, SourceError> {
        if config.database_url.trim().is_empty() {
            return Err(SourceError::Http("database_url is not configured".into()));
        }

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SourceError::Http(format!("HTTP client: {e}")))?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SourceError::Http(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            stream_client,
        })
    }

    /// Connection settings
    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteSource for FirebaseSource {
    #[instrument(skip(self), fields(path = %self.config.path))]
    async fn fetch_after(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        // startAt is inclusive: ask for one more to cover the bound itself
        let requested = if start_after.is_some() { limit + 1 } else { limit };
        let params = self.config.query_params(start_after, Some(requested));

        let resp = self
            .client
            .get(self.config.node_url())
            .query(&params)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        let resp = check_status(resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::decode(e.to_string()))?;

        let entries = parse_range_body(body, start_after, limit)?;
        debug!(count = entries.len(), "Fetched range");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %self.config.path))]
    async fn subscribe(&self, start_after: Option<&str>) -> Result<Subscription, SourceError> {
        let params = self.config.query_params(start_after, None);

        let resp = self
            .stream_client
            .get(self.config.node_url())
            .header(ACCEPT, "text/event-stream")
            .query(&params)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        let resp = check_status(resp).await?;

        info!(start_after = ?start_after, "Stream opened");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut children = ChildStream::new(start_after);
        let task = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut body = resp.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(SourceError::stream(e.to_string()))).await;
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    match children.apply(&event) {
                        Ok(entries) => {
                            for entry in entries {
                                if tx.send(Ok(entry)).await.is_err() {
                                    // Subscriber went away
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Stream ended by server");
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            debug!(last_key = ?children.last_key(), "Stream closed by server");
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}
