//! Command line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "rtmirror", about = "Local mirror and read API for a realtime sensor stream")]
pub struct Cli {
    /// Config file (default: ./rtmirror.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Replicate continuously and serve the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
    },
    /// Run one backfill pass and exit
    Backfill,
    /// Scan the local log and compare it with the cursor
    Verify,
}

impl Cli {
    /// The subcommand, `serve` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            port: None,
            host: None,
        })
    }
}
