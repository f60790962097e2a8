//! A single interactive shell session: one spawned process, one append-only
//! transcript, and the per-command marker protocol on top of both.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use encoding_rs::Encoding;
use termlink_utils_pty::ShellProcess;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dialect::ShellDialect;
use crate::error::Result;
use crate::error::SessionError;
use crate::marker;

/// Cap applied to the text returned for one command (the transcript itself
/// is kept whole for `history`).
const MAX_RESULT_BYTES: usize = 16 * 1024;

/// How long to keep scanning for a completion after the process is first
/// observed dead, so output that raced ahead of the exit signal is drained.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Bounded wait for the process to die during `close`.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    NonZeroExit(i32),
    TimedOut,
    ProcessExited,
    AuditRejected,
}

/// Outcome of one `execute` call. Every failure mode is encoded as text;
/// `status` lets programmatic callers distinguish outcomes without parsing.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub text: String,
}

impl CommandResult {
    pub(crate) fn new(status: CommandStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    pub fn to_text_output(&self) -> String {
        self.text.clone()
    }
}

/// Append-only byte log of everything the shell process has written. The
/// reader pump is the only writer; scans and `history` are the readers.
#[derive(Debug, Default)]
struct Transcript {
    buf: Mutex<Vec<u8>>,
    appended: Notify,
}

#[derive(Debug)]
pub struct ShellSession {
    id: String,
    dialect: ShellDialect,
    cwd: PathBuf,
    encoding: &'static Encoding,
    process: ShellProcess,
    transcript: Arc<Transcript>,
    pump_handle: JoinHandle<()>,
    /// Set when a command timed out: the next send is prefixed with a
    /// cancel byte to interrupt whatever is still running.
    dirty: AtomicBool,
    /// Serializes `execute` calls; the marker protocol assumes a single
    /// outstanding command per session.
    exec_lock: Mutex<()>,
}

impl ShellSession {
    /// Spawn the shell, start the transcript pump, and send the dialect's
    /// integration preamble. Spawn failure is fatal: no session object is
    /// returned.
    pub(crate) async fn spawn(id: String, dialect: ShellDialect, cwd: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cwd)
            .map_err(|err| SessionError::create_session(format!("cannot create cwd: {err}")))?;

        let spawned = dialect.spawn(&cwd).await?;
        let mut output_rx = spawned.output_rx;
        let process = spawned.process;

        let header = format!(
            "--- Terminal Session {id} Started ({dialect_name}) ---\n--- Working Directory: {cwd_display} ---\n",
            dialect_name = dialect.name(),
            cwd_display = cwd.display(),
        );
        let transcript = Arc::new(Transcript {
            buf: Mutex::new(header.into_bytes()),
            appended: Notify::new(),
        });

        let pump_transcript = Arc::clone(&transcript);
        let pump_handle = tokio::spawn(async move {
            while let Some(chunk) = output_rx.recv().await {
                {
                    let mut buf = pump_transcript.buf.lock().await;
                    buf.extend_from_slice(&chunk);
                }
                pump_transcript.appended.notify_waiters();
            }
            // Output channel closed: wake any waiter so it can observe the
            // process exit instead of sleeping out its deadline.
            pump_transcript.appended.notify_waiters();
        });

        if process
            .writer_sender()
            .send(dialect.integration_preamble())
            .await
            .is_err()
        {
            pump_handle.abort();
            return Err(SessionError::create_session(
                "shell exited before the integration preamble could be sent",
            ));
        }

        tracing::info!(
            session_id = %id,
            dialect = dialect.name(),
            cwd = %cwd.display(),
            "shell session started"
        );

        let encoding = dialect.encoding();
        Ok(Self {
            id,
            dialect,
            cwd,
            encoding,
            process,
            transcript,
            pump_handle,
            dirty: AtomicBool::new(false),
            exec_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn dialect(&self) -> &ShellDialect {
        &self.dialect
    }

    pub fn has_exited(&self) -> bool {
        self.process.has_exited()
    }

    /// Run one command to completion (or timeout) under the marker
    /// protocol. Calls are serialized per session; two concurrent callers
    /// never interleave their markers.
    pub async fn execute(&self, command: &str, timeout: Duration) -> CommandResult {
        let _guard = self.exec_lock.lock().await;

        if self.process.has_exited() {
            return CommandResult::new(
                CommandStatus::ProcessExited,
                "Error: Terminal process has exited.",
            );
        }

        let correlation_id = fresh_correlation_id();
        let start_marker = marker::start_marker(&correlation_id);
        let offset = self.transcript.buf.lock().await.len();

        let wrapped = self
            .dialect
            .wrap(command, &correlation_id, self.dirty.load(Ordering::SeqCst));
        if self.process.writer_sender().send(wrapped).await.is_err() {
            return CommandResult::new(
                CommandStatus::ProcessExited,
                "Error: Terminal process has exited.",
            );
        }

        let deadline = Instant::now() + timeout;
        let exit_status = self.process.exit_status();
        let mut exit_grace_used = false;

        loop {
            // Snapshot the new bytes and register for the append signal
            // while still holding the lock, so an append between scan and
            // wait cannot be missed.
            let (tail, notified) = {
                let buf = self.transcript.buf.lock().await;
                (buf[offset..].to_vec(), self.transcript.appended.notified())
            };

            let (decoded, _, _) = self.encoding.decode(&tail);
            if let Some(completion) = marker::find_completion(&decoded, &start_marker) {
                self.dirty.store(false, Ordering::SeqCst);
                let cleaned = marker::clean_output(&completion.raw_output, completion.exit_code);
                let text = termlink_utils_string::truncate_middle(&cleaned, MAX_RESULT_BYTES);
                let status = if completion.exit_code == 0 {
                    CommandStatus::Success
                } else {
                    CommandStatus::NonZeroExit(completion.exit_code)
                };
                tracing::debug!(
                    session_id = %self.id,
                    exit_code = completion.exit_code,
                    "command completed"
                );
                return CommandResult::new(status, text);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            if exit_status.has_exited() {
                if exit_grace_used {
                    let partial = self.partial_output(&tail);
                    return CommandResult::new(
                        CommandStatus::ProcessExited,
                        format!(
                            "Error: Terminal process exited before the command completed.\nPartial output:\n{partial}"
                        ),
                    );
                }
                exit_grace_used = true;
                let grace = EXIT_DRAIN_GRACE.min(deadline - now);
                tokio::time::sleep(grace).await;
                continue;
            }

            tokio::pin!(notified);
            tokio::select! {
                _ = &mut notified => {}
                _ = exit_status.wait_for_exit_until(deadline) => {}
            }
        }

        // Timeout: arm the cancel prefix for the next command and return
        // whatever the shell produced so far. The process stays alive.
        self.dirty.store(true, Ordering::SeqCst);
        let tail = self.transcript.buf.lock().await[offset..].to_vec();
        let partial = self.partial_output(&tail);
        tracing::warn!(
            session_id = %self.id,
            timeout = ?timeout,
            "command timed out"
        );
        CommandResult::new(
            CommandStatus::TimedOut,
            format!("Error: Command timed out after {timeout:?}.\nPartial output:\n{partial}"),
        )
    }

    fn partial_output(&self, tail: &[u8]) -> String {
        let (decoded, _, _) = self.encoding.decode(tail);
        let stripped = marker::strip_escapes(&decoded);
        termlink_utils_string::truncate_middle(stripped.trim(), MAX_RESULT_BYTES)
    }

    /// Decoded transcript, escape sequences stripped, optionally limited to
    /// the last `max_lines` lines. Does not touch the marker protocol.
    pub async fn history_text(&self, max_lines: Option<usize>) -> String {
        let buf = self.transcript.buf.lock().await;
        let (decoded, _, _) = self.encoding.decode(&buf);
        let stripped = marker::strip_escapes(&decoded);
        match max_lines {
            Some(n) => termlink_utils_string::tail_lines(&stripped, n).to_string(),
            None => stripped,
        }
    }

    /// Kill the process and wait (bounded) for it to die. The transcript
    /// pump drains whatever the PTY still delivers and then finishes on
    /// its own.
    pub(crate) async fn close(&self) {
        if let Err(err) = self.process.kill() {
            tracing::warn!(session_id = %self.id, "failed to kill shell process: {err}");
        }
        let exited = self
            .process
            .exit_status()
            .wait_for_exit_until(Instant::now() + CLOSE_WAIT)
            .await;
        tracing::info!(session_id = %self.id, exited, "shell session closed");
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.pump_handle.abort();
    }
}

fn fresh_correlation_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
