//! Interactive shell session engine.
//!
//! Turns a long-lived, stateful command shell (one process, persistent
//! working directory and environment) into a request/response primitive: a
//! caller issues discrete commands against a named session and reliably
//! learns when each command finished and with what exit status. Shells have
//! no built-in completion signal, so the engine injects marker-emitting
//! hooks into the shell's own prompt machinery and scans the session's
//! append-only transcript for them.
//!
//! Entry point: [`SessionRegistry`], which owns all sessions and exposes
//! the text-only boundary (`execute_shell`, `get_history`,
//! `close_session`) consumed by the surrounding tool layer.

mod command_safety;
mod dialect;
mod error;
mod marker;
mod session;
mod session_manager;

pub use command_safety::audit_command;
pub use command_safety::audit_path;
pub use dialect::ShellDialect;
pub use error::Result;
pub use error::SessionError;
pub use session::CommandResult;
pub use session::CommandStatus;
pub use session::ShellSession;
pub use session_manager::DEFAULT_TIMEOUT;
pub use session_manager::SessionRegistry;
