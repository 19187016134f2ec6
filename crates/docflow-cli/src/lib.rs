//! docflow client - talks to the daemon and renders the project tree
//!
//! - `client` - Unix socket client (request helpers, reconnecting watch)
//! - `tree` - text tree view of the project state
//! - `cli` - the `docflow` command line
//!
//! Local subcommands (`validate`, `wait-init`, `tree --local`) use the
//! daemon's state manager directly and need no running daemon.

pub mod cli;
pub mod client;
pub mod error;
pub mod tree;

pub use client::{ClientConfig, DaemonClient};
pub use error::{CliError, Result};
