//! Child-added semantics over the streaming protocol
//!
//! The streaming endpoint reports raw `put` / `patch` mutations. This
//! module turns them into "a new child appeared" notifications: each key
//! is delivered at most once, in ascending order, strictly after the
//! subscription bound. Mutations of children already delivered are
//! ignored.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::trace;

use rtmirror_core::{OrderedKey, RemoteEntry, SourceError, is_after};

use crate::sse::SseEvent;

#[derive(Debug, Deserialize)]
struct Mutation {
    path: String,
    data: Value,
}

/// Tracks what a subscription has already delivered
#[derive(Debug, Clone, Default)]
pub struct ChildStream {
    /// Last key delivered, initially the subscription bound
    last_key: Option<String>,
}

impl ChildStream {
    /// Start a stream that only admits keys after `start_after`
    pub fn new(start_after: Option<&str>) -> Self {
        Self {
            last_key: start_after.map(str::to_string),
        }
    }

    /// Last key delivered (or the bound if nothing was delivered yet)
    pub fn last_key(&self) -> Option<&str> {
        self.last_key.as_deref()
    }

    /// Translate one event into newly created children.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cancelled`] when the server ends the
    /// subscription and [`SourceError::Decode`] for malformed mutations.
    pub fn apply(&mut self, event: &SseEvent) -> Result<Vec<RemoteEntry>, SourceError> {
        match event.event.as_str() {
            "put" | "patch" => {
                let mutation: Mutation = serde_json::from_str(&event.data)?;
                Ok(self.apply_mutation(mutation))
            }
            "keep-alive" => Ok(Vec::new()),
            "cancel" => Err(SourceError::Cancelled(event.data.clone())),
            "auth_revoked" => Err(SourceError::Cancelled("auth revoked".into())),
            other => {
                trace!(event = other, "Ignoring unknown stream event");
                Ok(Vec::new())
            }
        }
    }

    fn apply_mutation(&mut self, mutation: Mutation) -> Vec<RemoteEntry> {
        let path = mutation.path.trim_matches('/');

        if path.is_empty() {
            // Root mutation: every key in the object is a child
            return match mutation.data {
                Value::Object(children) => self.admit_children(children),
                _ => Vec::new(),
            };
        }

        if path.contains('/') || mutation.data.is_null() {
            // Field update inside a child, or a deletion
            return Vec::new();
        }

        self.admit(path.to_string(), mutation.data)
            .into_iter()
            .collect()
    }

    fn admit_children(&mut self, children: Map<String, Value>) -> Vec<RemoteEntry> {
        let mut sorted: Vec<(OrderedKey, Value)> = children
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (OrderedKey(k), v))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        sorted
            .into_iter()
            .filter_map(|(k, v)| self.admit(k.0, v))
            .collect()
    }

    fn admit(&mut self, key: String, value: Value) -> Option<RemoteEntry> {
        if !is_after(&key, self.last_key.as_deref()) {
            trace!(key = %key, "Ignoring mutation of an existing child");
            return None;
        }
        self.last_key = Some(key.clone());
        Some(RemoteEntry::new(key, value))
    }
}
