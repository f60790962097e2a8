//! Keyed store of shell sessions plus the text-only boundary consumed by
//! the surrounding tool layer. Everything below `execute_shell` /
//! `get_history` / `close_session` returns structured results; the
//! boundary itself never errs and never panics — every failure mode is
//! rendered as descriptive text.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::command_safety;
use crate::dialect::ShellDialect;
use crate::error::Result;
use crate::error::SessionError;
use crate::session::CommandResult;
use crate::session::CommandStatus;
use crate::session::ShellSession;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ShellSession>>>,
    /// Sandbox root; the working directory for sessions created without an
    /// explicit override.
    default_cwd: PathBuf,
}

impl SessionRegistry {
    pub fn new(default_cwd: PathBuf) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_cwd,
        }
    }

    /// Look up the session for `id`, spawning it on first reference. The
    /// dialect hint and cwd override only take effect at creation; later
    /// calls with a different hint return the existing session unchanged.
    pub async fn get_or_create(
        &self,
        id: &str,
        dialect_hint: Option<&str>,
        cwd: Option<PathBuf>,
    ) -> Result<Arc<ShellSession>> {
        if let Some(session) = self.sessions.lock().await.get(id) {
            return Ok(Arc::clone(session));
        }

        // Spawn without holding the registry lock: a slow spawn for one id
        // must not stall operations on every other session.
        let dialect = ShellDialect::from_hint(dialect_hint);
        let cwd = cwd.unwrap_or_else(|| self.default_cwd.clone());
        let session = Arc::new(ShellSession::spawn(id.to_string(), dialect, cwd).await?);

        let mut sessions = self.sessions.lock().await;
        match sessions.entry(id.to_string()) {
            // Lost a create race for the same id: the first writer wins so
            // the id stays bound to one shell, and the extra process is
            // torn down.
            Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                drop(sessions);
                session.close().await;
                Ok(existing)
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Audit and run one command in the named session. The audit gate runs
    /// before any session is created or touched.
    pub async fn execute(
        &self,
        id: &str,
        command: &str,
        timeout: Duration,
        dialect_hint: Option<&str>,
        cwd: Option<PathBuf>,
    ) -> Result<CommandResult> {
        if let Err(reason) = command_safety::audit_command(command) {
            return Ok(CommandResult::new(CommandStatus::AuditRejected, reason));
        }

        let session = self.get_or_create(id, dialect_hint, cwd).await?;
        Ok(session.execute(command, timeout).await)
    }

    /// Decoded transcript of the named session, tail-truncated when
    /// `max_lines` is given.
    pub async fn history(&self, id: &str, max_lines: Option<usize>) -> Result<String> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions.get(id).cloned()
        };
        match session {
            Some(session) => Ok(session.history_text(max_lines).await),
            None => Err(SessionError::unknown_session(id)),
        }
    }

    /// Terminate the named session's process (bounded wait) and drop the
    /// entry; the next reference to the same id starts a fresh session.
    pub async fn close(&self, id: &str) -> Result<()> {
        let session = self.sessions.lock().await.remove(id);
        match session {
            Some(session) => {
                session.close().await;
                Ok(())
            }
            None => Err(SessionError::unknown_session(id)),
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Host environment report: OS family, architecture, sandbox root, and
    /// the dialect the host defaults to.
    pub fn system_info(&self) -> String {
        format!(
            "System Info: os={os}, arch={arch}, sandbox_path={sandbox}, recommended_shell={shell}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            sandbox = self.default_cwd.display(),
            shell = ShellDialect::for_host().name(),
        )
    }

    // --- Text boundary -----------------------------------------------------
    //
    // These are the operations the tool layer calls. They return
    // human-readable text for every outcome.

    pub async fn execute_shell(
        &self,
        command: &str,
        session_id: &str,
        timeout: Duration,
        cwd: Option<PathBuf>,
        dialect_hint: Option<&str>,
    ) -> String {
        match self
            .execute(session_id, command, timeout, dialect_hint, cwd)
            .await
        {
            Ok(result) => result.to_text_output(),
            Err(err) => {
                format!("Error executing terminal command in session {session_id}: {err}")
            }
        }
    }

    pub async fn get_history(&self, session_id: &str, max_lines: Option<usize>) -> String {
        match self.history(session_id, max_lines).await {
            Ok(text) => text,
            Err(err) => format!("Error: {err}"),
        }
    }

    pub async fn close_session(&self, session_id: &str) -> String {
        match self.close(session_id).await {
            Ok(()) => format!("Session '{session_id}' closed."),
            Err(_) => format!("Session '{session_id}' not found."),
        }
    }
}
