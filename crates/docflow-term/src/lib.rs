//! docflow term - reusable terminal sessions for the command bridge
//!
//! A [`TerminalLauncher`] creates a [`TerminalSession`]: a long-lived
//! terminal that accepts input lines, can be interrupted, and publishes its
//! output on a broadcast channel. Two backends are provided:
//!
//! - [`TmuxLauncher`] - a detached tmux session the user can attach to
//! - [`ShellLauncher`] - a plain `sh` child process with piped stdio

pub mod error;
pub mod session;
pub mod shell;
pub mod tmux;

pub use error::{TerminalError, TerminalResult};
pub use session::{
    shell_quote, LauncherKind, OutputChunk, TerminalLauncher, TerminalSession,
    OUTPUT_CHANNEL_CAPACITY,
};
pub use shell::{ShellLauncher, ShellSession};
pub use tmux::{TmuxLauncher, TmuxSession};
