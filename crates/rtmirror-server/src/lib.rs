//! # rtmirror Server
//!
//! Read-only HTTP API over the replicated log, configuration, and the
//! `rtmirror` binary's bootstrap.
//!
//! - [`config`]: TOML + environment configuration
//! - [`query`]: info and pagination queries over the log
//! - [`api`]: axum router
//! - [`app`]: wiring for `serve`, `backfill` and `verify`

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod query;

pub use api::{AppState, build_router};
pub use app::{MirrorApp, VerifyReport};
pub use config::{ConfigError, MirrorConfig};
pub use query::{InfoResponse, PageQuery, PageRequest, QueryService};
