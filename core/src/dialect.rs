//! The two shell dialects the engine can drive: a POSIX-style shell and the
//! Windows console shell. Each knows its spawn command line, the one-time
//! integration preamble that installs the marker hooks, and how to wrap a
//! user command with a `Start` marker (and an optional cancel byte).

use std::collections::HashMap;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use encoding_rs::Encoding;
use termlink_utils_pty::SpawnedShell;
use termlink_utils_pty::spawn_pty_process;

use crate::error::Result;
use crate::error::SessionError;

/// ASCII ETX; the PTY line discipline turns it into SIGINT for the
/// foreground process.
pub(crate) const CANCEL_BYTE: u8 = 0x03;

const DEFAULT_POSIX_SHELL: &str = "bash";
const DEFAULT_CONSOLE_SHELL: &str = "powershell.exe -ExecutionPolicy Bypass -NoProfile";

/// A shell family with its spawn command line. The command line defaults
/// per variant but can carry a caller-provided override (e.g. `zsh`, or
/// `pwsh -NoProfile`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellDialect {
    Posix { shell_command: String },
    Console { shell_command: String },
}

impl ShellDialect {
    pub fn posix() -> Self {
        Self::Posix {
            shell_command: DEFAULT_POSIX_SHELL.to_string(),
        }
    }

    pub fn console() -> Self {
        Self::Console {
            shell_command: DEFAULT_CONSOLE_SHELL.to_string(),
        }
    }

    /// Pick the dialect for the current host: console on Windows, POSIX
    /// everywhere else.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::console()
        } else {
            Self::posix()
        }
    }

    /// Resolve a caller-supplied hint. The hint doubles as the spawn
    /// command line; a hint naming a PowerShell binary selects the console
    /// dialect, everything else is treated as a POSIX shell.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            None => Self::for_host(),
            Some(hint) => {
                let lowered = hint.to_lowercase();
                if lowered.contains("powershell") || lowered.contains("pwsh") {
                    Self::Console {
                        shell_command: hint.to_string(),
                    }
                } else {
                    Self::Posix {
                        shell_command: hint.to_string(),
                    }
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Posix { .. } => "posix",
            Self::Console { .. } => "console",
        }
    }

    /// Encoding the session decodes transcript bytes with. Console shells
    /// start out in the legacy GBK codepage until the preamble's
    /// `chcp 65001` takes effect; POSIX shells are UTF-8 throughout.
    pub(crate) fn encoding(&self) -> &'static Encoding {
        match self {
            Self::Posix { .. } => encoding_rs::UTF_8,
            Self::Console { .. } => encoding_rs::GBK,
        }
    }

    fn shell_command(&self) -> &str {
        match self {
            Self::Posix { shell_command } | Self::Console { shell_command } => shell_command,
        }
    }

    /// Spawn the shell process under a PTY rooted at `cwd`.
    pub(crate) async fn spawn(&self, cwd: &Path) -> Result<SpawnedShell> {
        let argv = shlex::split(self.shell_command()).unwrap_or_default();
        let Some((program, args)) = argv.split_first() else {
            return Err(SessionError::create_session(format!(
                "invalid shell command line '{}'",
                self.shell_command()
            )));
        };

        spawn_pty_process(program, args, cwd, &HashMap::new())
            .await
            .map_err(|err| SessionError::create_session(err.to_string()))
    }

    /// One-time script sent right after spawn: forces UTF-8 output, defines
    /// the marker-emission routine, and rebinds the per-prompt hook so the
    /// shell emits an `End` marker (with the last exit code) every time it
    /// is ready for input.
    pub(crate) fn integration_preamble(&self) -> Vec<u8> {
        match self {
            Self::Posix { .. } => b"export LANG=en_US.UTF-8; \
write_mcp_marker() { printf \"\\033]633;P;Mcp$1=$2\\007\"; }; \
export PROMPT_COMMAND='code=$?; write_mcp_marker End $code'; \
export PS1='> '\n"
                .to_vec(),
            Self::Console { .. } => b"$OutputEncoding = [System.Text.Encoding]::UTF8; \
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; \
[Console]::InputEncoding = [System.Text.Encoding]::UTF8; \
chcp 65001; \
function global:Write-McpMarker($type, $pay) { \
  [Console]::Out.Write(\"$([char]27)]633;P;Mcp${type}=$pay$([char]7)\"); \
}; \
$function:Prompt = { \
  $code = $LASTEXITCODE; \
  Write-McpMarker 'End' $code; \
  return \"PS $($ExecutionContext.SessionState.Path.CurrentLocation) > \" \
}\r\n"
                .to_vec(),
        }
    }

    /// Literal bytes written to the shell's stdin for one command: an
    /// optional cancel byte (when the previous command timed out), the
    /// `Start` marker emission carrying the correlation id, then the
    /// command itself. The console dialect base64-encodes the whole
    /// payload and evaluates it through `iex` to sidestep quoting hazards;
    /// the POSIX dialect sends the command literally.
    pub(crate) fn wrap(
        &self,
        command: &str,
        correlation_id: &str,
        needs_cancel_prefix: bool,
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        if needs_cancel_prefix {
            bytes.push(CANCEL_BYTE);
        }

        match self {
            Self::Posix { .. } => {
                bytes.extend_from_slice(
                    format!("write_mcp_marker Start {correlation_id}; {command}\n").as_bytes(),
                );
            }
            Self::Console { .. } => {
                let payload = format!("Write-McpMarker 'Start' '{correlation_id}'; {command}");
                let b64 = BASE64.encode(payload.as_bytes());
                bytes.extend_from_slice(
                    format!(
                        "iex ([System.Text.Encoding]::UTF8.GetString(\
[System.Convert]::FromBase64String('{b64}')))\r\n"
                    )
                    .as_bytes(),
                );
            }
        }
        bytes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hint_selects_console_for_powershell() {
        let dialect = ShellDialect::from_hint(Some("pwsh -NoProfile"));
        assert_eq!(dialect.name(), "console");
        let dialect = ShellDialect::from_hint(Some("powershell.exe"));
        assert_eq!(dialect.name(), "console");
    }

    #[test]
    fn hint_selects_posix_otherwise() {
        let dialect = ShellDialect::from_hint(Some("zsh"));
        assert_eq!(
            dialect,
            ShellDialect::Posix {
                shell_command: "zsh".to_string()
            }
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn host_default_is_posix() {
        assert_eq!(ShellDialect::for_host().name(), "posix");
    }

    #[test]
    fn posix_wrap_is_literal_with_start_marker() {
        let bytes = ShellDialect::posix().wrap("echo hi", "abc12345", false);
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            "write_mcp_marker Start abc12345; echo hi\n"
        );
    }

    #[test]
    fn dirty_session_wrap_is_prefixed_with_cancel_byte() {
        let bytes = ShellDialect::posix().wrap("echo hi", "abc12345", true);
        assert_eq!(bytes[0], CANCEL_BYTE);
        assert!(!bytes[1..].contains(&CANCEL_BYTE));
    }

    #[test]
    fn console_wrap_is_base64_iex() {
        let bytes = ShellDialect::console().wrap("echo 'tricky \"quotes\"'", "abc12345", false);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("iex ([System.Text.Encoding]::UTF8.GetString("));
        assert!(text.ends_with("\r\n"));
        // The user command never appears literally in the wire bytes.
        assert!(!text.contains("tricky"));

        let b64 = text
            .split("FromBase64String('")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .unwrap();
        let decoded = BASE64.decode(b64).unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert_eq!(
            decoded,
            "Write-McpMarker 'Start' 'abc12345'; echo 'tricky \"quotes\"'"
        );
    }

    #[test]
    fn preambles_install_end_marker_hook() {
        let posix = String::from_utf8(ShellDialect::posix().integration_preamble()).unwrap();
        assert!(posix.contains("PROMPT_COMMAND"));
        assert!(posix.contains("McpEnd") || posix.contains("Mcp$1"));

        let console = String::from_utf8(ShellDialect::console().integration_preamble()).unwrap();
        assert!(console.contains("$function:Prompt"));
        assert!(console.contains("Write-McpMarker 'End'"));
    }

    #[test]
    fn console_encoding_is_gbk_until_preamble_lands() {
        assert_eq!(ShellDialect::console().encoding(), encoding_rs::GBK);
        assert_eq!(ShellDialect::posix().encoding(), encoding_rs::UTF_8);
    }
}
