//! Persistent command session
//!
//! One long-lived shell process per session. Commands are written to its
//! stdin followed by an `echo` of a unique sentinel; everything the shell
//! prints up to the sentinel is the command's output. Working directory,
//! exported variables and shell functions therefore persist across calls.
//!
//! The session is single-flight: a second `execute` while one is outstanding
//! fails with [`ShellError::SessionBusy`] instead of queueing.

use crate::error::{Result, ShellError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Shell program settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellProgram {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Line written once right after spawn
    #[serde(default)]
    pub init: Option<String>,
}

impl Default for ShellProgram {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            program: "cmd".to_string(),
            args: vec!["/Q".to_string()],
            init: Some("prompt $S".to_string()),
        }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            // Merge stderr into stdout so both arrive in order
            init: Some("exec 2>&1".to_string()),
        }
    }
}

impl ShellProgram {
    fn is_cmd(&self) -> bool {
        std::path::Path::new(&self.program)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("cmd"))
            .unwrap_or(false)
    }

    fn separator(&self) -> &'static str {
        if self.is_cmd() {
            " & "
        } else {
            "; "
        }
    }

    /// Build the single line written to the shell for `command`
    pub fn wrap_command(&self, command: &str, sentinel: &str) -> String {
        let joined = join_lines(command, self.separator());
        let cmd = joined.trim();

        if self.is_cmd() {
            return if cmd.is_empty() {
                format!("echo {}\n", sentinel)
            } else {
                format!("{} & echo {}\n", cmd, sentinel)
            };
        }

        if cmd.is_empty() {
            return format!("echo \"{}$?\"\n", sentinel);
        }
        let sep = if ends_with_background(cmd) || cmd.ends_with(';') {
            " "
        } else {
            "; "
        };
        format!("{}{}echo \"{}$?\"\n", cmd, sep, sentinel)
    }
}

fn ends_with_background(cmd: &str) -> bool {
    cmd.ends_with('&') && !cmd.ends_with("&&")
}

/// Collapse a multi-line command into one line.
///
/// Lines that end mid-construct (`then`, `do`, `else`, `{`, pipes, `&&`,
/// `||`, a trailing backslash) are joined with a space; all others with the
/// statement separator.
pub fn join_lines(command: &str, separator: &str) -> String {
    let mut out = String::new();
    for line in command.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(line);
            continue;
        }
        if out.ends_with('\\') {
            out.pop();
            out.push(' ');
            out.push_str(line.trim_start());
        } else if continues_on_next_line(&out) {
            out.push(' ');
            out.push_str(line.trim_start());
        } else {
            out.push_str(separator);
            out.push_str(line.trim_start());
        }
    }
    out
}

fn continues_on_next_line(text: &str) -> bool {
    if text.ends_with('|') || text.ends_with("&&") || text.ends_with(';') {
        return true;
    }
    matches!(
        text.split_whitespace().last(),
        Some("then" | "do" | "else" | "{" | "(" | "in")
    )
}

/// Output of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything printed before the sentinel, trimmed
    pub output: String,
    /// Exit status, when the shell reports it
    pub exit_code: Option<i32>,
}

enum Event {
    Data(Vec<u8>),
    Closed,
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    events: mpsc::UnboundedReceiver<Event>,
    readers: Vec<JoinHandle<()>>,
}

impl Process {
    /// Discard output left over from an earlier command.
    ///
    /// Returns false if the process has exited.
    fn drain_stale(&mut self) -> bool {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return false;
        }
        loop {
            match self.events.try_recv() {
                Ok(Event::Data(bytes)) => {
                    tracing::trace!(bytes = bytes.len(), "Discarding stale shell output");
                }
                Ok(Event::Closed) => return false,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn read_until_sentinel(
        &mut self,
        sentinel: &str,
        with_status: bool,
    ) -> Result<CommandOutput> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            // Background jobs may keep the pipes open after the shell exits,
            // so exit is detected on the process itself as well as on EOF
            let event = tokio::select! {
                biased;
                event = self.events.recv() => event,
                status = self.child.wait() => {
                    tracing::debug!(status = ?status.ok(), "Shell process exited");
                    while let Ok(Event::Data(bytes)) = self.events.try_recv() {
                        buf.extend_from_slice(&bytes);
                    }
                    return parse_completed(&buf, sentinel, with_status)
                        .ok_or(ShellError::SessionTerminated);
                }
            };
            match event {
                Some(Event::Data(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    if let Some(out) = parse_completed(&buf, sentinel, with_status) {
                        return Ok(out);
                    }
                }
                Some(Event::Closed) | None => return Err(ShellError::SessionTerminated),
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split accumulated output at the sentinel, if it has arrived
fn parse_completed(buf: &[u8], sentinel: &str, with_status: bool) -> Option<CommandOutput> {
    let idx = find_bytes(buf, sentinel.as_bytes())?;
    let rest = &buf[idx + sentinel.len()..];

    let exit_code = if with_status {
        let nl = rest.iter().position(|b| *b == b'\n')?;
        String::from_utf8_lossy(&rest[..nl]).trim().parse().ok()
    } else {
        None
    };

    Some(CommandOutput {
        output: String::from_utf8_lossy(&buf[..idx]).trim().to_string(),
        exit_code,
    })
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<Event>, signal_close: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Event::Data(chunk[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read shell output: {}", e);
                    break;
                }
            }
        }
        if signal_close {
            let _ = tx.send(Event::Closed);
        }
    })
}

fn new_sentinel() -> String {
    format!("__A3S_DONE_{}__", uuid::Uuid::new_v4().simple())
}

/// Resets the busy flag on every exit path
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A persistent shell process driven by the sentinel protocol
pub struct CommandSession {
    program: ShellProgram,
    cwd: PathBuf,
    busy: AtomicBool,
    process: Mutex<Option<Process>>,
}

impl CommandSession {
    /// Create a session. The process is spawned lazily on first use.
    pub fn new(program: ShellProgram, cwd: PathBuf) -> Self {
        Self {
            program,
            cwd,
            busy: AtomicBool::new(false),
            process: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &ShellProgram {
        &self.program
    }

    /// Whether a command is outstanding
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Whether a live shell process is attached
    pub async fn is_running(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(process) => !matches!(process.child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    /// Run a command and return its trimmed output
    pub async fn execute(&self, command: &str) -> Result<String> {
        Ok(self.run(command, None).await?.output)
    }

    /// Run a command with its exit status and an optional deadline.
    ///
    /// On timeout the shell is killed; the next call starts a fresh one.
    pub async fn execute_with_status(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.run(command, timeout).await
    }

    async fn run(&self, command: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShellError::SessionBusy);
        }
        let _busy = BusyGuard(&self.busy);

        let mut slot = self.process.lock().await;
        if let Some(process) = slot.as_mut() {
            if !process.drain_stale() {
                tracing::info!("Shell process exited, respawning");
                *slot = None;
            }
        }
        if slot.is_none() {
            *slot = Some(self.spawn().await?);
        }
        let process = slot.as_mut().ok_or(ShellError::SessionTerminated)?;

        let sentinel = new_sentinel();
        let line = self.program.wrap_command(command, &sentinel);
        tracing::debug!(command = %command, "Executing shell command");

        if let Err(e) = process.write_line(&line).await {
            tracing::warn!("Failed to write to shell: {}", e);
            *slot = None;
            return Err(ShellError::SessionTerminated);
        }

        let with_status = !self.program.is_cmd();
        let read = process.read_until_sentinel(&sentinel, with_status);
        let completed = match timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.ok(),
            None => Some(read.await),
        };
        let Some(result) = completed else {
            let limit = timeout.unwrap_or_default();
            tracing::warn!(
                timeout_ms = limit.as_millis() as u64,
                "Shell command timed out, killing shell"
            );
            if let Some(mut process) = slot.take() {
                let _ = process.child.kill().await;
            }
            return Err(ShellError::Timeout(format!(
                "command exceeded {}s",
                limit.as_secs_f64()
            )));
        };

        if let Err(ShellError::SessionTerminated) = result {
            tracing::warn!("Shell process exited while a command was outstanding");
            *slot = None;
        }
        result
    }

    async fn spawn(&self) -> Result<Process> {
        let mut cmd = Command::new(&self.program.program);
        cmd.args(&self.program.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!("Failed to spawn shell '{}': {}", self.program.program, e);
            ShellError::Io(e)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::Protocol("shell has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::Protocol("shell has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShellError::Protocol("shell has no stderr".into()))?;

        let (tx, events) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, tx.clone(), true),
            spawn_reader(stderr, tx, false),
        ];

        tracing::info!(
            program = %self.program.program,
            pid = child.id().unwrap_or_default(),
            cwd = %self.cwd.display(),
            "Command session started"
        );

        let mut process = Process {
            child,
            stdin,
            events,
            readers,
        };
        if let Some(init) = &self.program.init {
            process.write_line(&format!("{}\n", init)).await?;
        }
        Ok(process)
    }

    /// Kill the shell process. Returns true if a live process was killed.
    pub async fn shutdown(&self) -> bool {
        let mut slot = self.process.lock().await;
        match slot.take() {
            Some(mut process) => {
                let alive = !matches!(process.child.try_wait(), Ok(Some(_)));
                let _ = process.child.kill().await;
                tracing::info!("Command session shut down");
                alive
            }
            None => false,
        }
    }
}
