//! # rtmirror Transport
//!
//! Real [`RemoteSource`](rtmirror_core::RemoteSource) implementation over
//! the Realtime Database REST API.
//!
//! - [`FirebaseSource`]: range queries and streaming subscriptions
//! - [`SseDecoder`]: incremental `text/event-stream` decoder
//! - [`ChildStream`]: child-added semantics on top of raw stream mutations

pub mod child_stream;
pub mod firebase;
pub mod sse;

pub use child_stream::ChildStream;
pub use firebase::{FirebaseConfig, FirebaseSource, parse_range_body};
pub use sse::{SseDecoder, SseEvent};
