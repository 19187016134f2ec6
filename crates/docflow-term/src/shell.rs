//! Long-lived `sh` process with piped stdio.
//!
//! The shell runs in its own process group so an interrupt reaches the
//! command it is running. A non-interactive `sh` usually exits on SIGINT as
//! well; callers detect that through [`TerminalSession::is_alive`] and launch
//! a fresh session.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{TerminalError, TerminalResult};
use crate::session::{OutputChunk, TerminalLauncher, TerminalSession, OUTPUT_CHANNEL_CAPACITY};

/// Launches [`ShellSession`]s using the given shell program.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    program: String,
}

impl ShellLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl TerminalLauncher for ShellLauncher {
    async fn launch(&self, name: &str, cwd: &Path) -> TerminalResult<Arc<dyn TerminalSession>> {
        let session = ShellSession::spawn(&self.program, name, cwd)?;
        Ok(Arc::new(session))
    }
}

pub struct ShellSession {
    name: String,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    pgid: Option<i32>,
    output: broadcast::Sender<OutputChunk>,
    readers: Vec<JoinHandle<()>>,
}

impl ShellSession {
    /// Spawns `program` in `cwd` and starts forwarding its output.
    pub fn spawn(program: &str, name: &str, cwd: &Path) -> TerminalResult<Self> {
        let mut child = Command::new(program)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(TerminalError::Launch)?;

        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        let (output, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, output.clone(), OutputChunk::stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, output.clone(), OutputChunk::stderr));
        }
        let stdin = child.stdin.take();

        debug!(session = name, pgid, program, "Shell session started");

        Ok(Self {
            name: name.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pgid,
            output,
            readers,
        })
    }
}

fn spawn_reader<R>(
    reader: R,
    output: broadcast::Sender<OutputChunk>,
    wrap: fn(String) -> OutputChunk,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Invalid UTF-8 is replaced, never fatal to the reader.
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    // No receivers is fine; output before anyone subscribed is dropped.
                    let _ = output.send(wrap(format!("{line}\n")));
                }
                Err(e) => {
                    warn!(error = %e, "Error reading shell output");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl TerminalSession for ShellSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn send_line(&self, line: &str) -> TerminalResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| TerminalError::Closed(self.name.clone()))?;
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            *guard = None;
            return Err(if e.kind() == std::io::ErrorKind::BrokenPipe {
                TerminalError::Closed(self.name.clone())
            } else {
                TerminalError::Io(e)
            });
        }
        Ok(())
    }

    async fn interrupt(&self) -> TerminalResult<()> {
        let Some(pgid) = self.pgid else {
            return Err(TerminalError::Closed(self.name.clone()));
        };
        // SAFETY: killpg only sends a signal; pgid is the group we created.
        let rc = unsafe { libc::killpg(pgid, libc::SIGINT) };
        if rc != 0 {
            return Err(TerminalError::Signal(std::io::Error::last_os_error()));
        }
        debug!(session = %self.name, pgid, "Sent SIGINT to shell process group");
        Ok(())
    }

    fn subscribe_output(&self) -> broadcast::Receiver<OutputChunk> {
        self.output.subscribe()
    }

    async fn close(&self) -> TerminalResult<()> {
        self.stdin.lock().await.take();
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
