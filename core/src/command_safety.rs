//! Pattern-matching gate applied to command text and filesystem paths
//! before either reaches a shell or the filesystem. Rules are static and
//! ordered; the first match wins and the rejection names the pattern.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Commands that must never reach a shell, regardless of session state.
const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    r"(?i)\brm\b\s+-[rf]{1,2}",    // rm -rf
    r"(?i)\bdel\b\s+/s",           // del /s (Windows)
    r"(?i)\bformat\b\s+[a-zA-Z]:", // format C:
    r"(?i)\bmkfs\b",               // disk formatting
    r"(?i)\bdd\b\s+if=",           // disk imaging
    r"(?i)\bshutdown\b",           // system shutdown
    r"(?i)\breboot\b",             // system reboot
    r"(?i)\bchmod\b\s+777",        // unsafe permissions
    r"(?i)\bchown\b",              // ownership changes
    r"(?i)\bsudo\b",               // elevation
];

/// Dynamic-code constructs scanned inside inline interpreter payloads
/// (`python -c '...'` and friends).
const DANGEROUS_INTERPRETER_PATTERNS: &[&str] = &[
    r"import\s+os",
    r"import\s+subprocess",
    r"import\s+shutil",
    r"eval\(",
    r"exec\(",
    r"os\.remove",
    r"os\.rmdir",
    r"shutil\.rmtree",
    r"__import__",
    r#"open\(\s*['"]/etc/"#,
    r#"open\(\s*['"]C:\\Windows"#,
];

/// Normalized path prefixes the engine refuses to touch.
const PROTECTED_ROOTS: &[&str] = &[
    "c:\\windows",
    "c:\\users",
    "/etc",
    "/var",
    "/root",
    "/bin",
    "/sbin",
];

#[allow(clippy::unwrap_used)]
fn compile(patterns: &'static [&'static str]) -> Vec<(Regex, &'static str)> {
    // Patterns are compile-time constants; a failure here is a programming
    // error caught by the unit tests below.
    patterns.iter().map(|p| (Regex::new(p).unwrap(), *p)).collect()
}

static COMMAND_RULES: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| compile(DANGEROUS_COMMAND_PATTERNS));
static INTERPRETER_RULES: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| compile(DANGEROUS_INTERPRETER_PATTERNS));

/// Audit a command string. `Err` carries the rejection reason, which names
/// the offending pattern and never reaches the shell.
pub fn audit_command(command: &str) -> Result<(), String> {
    for (regex, pattern) in COMMAND_RULES.iter() {
        if regex.is_match(command) {
            return Err(format!(
                "Security Breach: Command '{command}' contains forbidden pattern ({pattern})."
            ));
        }
    }

    // Inline interpreter payloads get a second pass with the dynamic-code
    // pool, the same nested re-scan applied to `bash -lc` scripts.
    for payload in inline_interpreter_payloads(command) {
        for (regex, pattern) in INTERPRETER_RULES.iter() {
            if regex.is_match(&payload) {
                return Err(format!(
                    "Security Breach: Inline interpreter code contains suspicious pattern ({pattern})."
                ));
            }
        }
    }

    Ok(())
}

/// Extract the quoted payloads of inline interpreter invocations such as
/// `python -c "..."` or `pwsh -Command "..."` anywhere in the command line.
fn inline_interpreter_payloads(command: &str) -> Vec<String> {
    let Some(tokens) = shlex::split(command) else {
        return Vec::new();
    };

    let mut payloads = Vec::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        let program = token.rsplit(['/', '\\']).next().unwrap_or(token);
        let is_interpreter = program.starts_with("python")
            || program == "pwsh"
            || program == "powershell"
            || program == "powershell.exe";
        if !is_interpreter {
            continue;
        }
        if let Some(flag) = iter.peek()
            && matches!(flag.as_str(), "-c" | "-Command" | "-command")
        {
            iter.next();
            if let Some(payload) = iter.next() {
                payloads.push(payload.clone());
            }
        }
    }
    payloads
}

/// Audit a filesystem path. The path is normalized to an absolute,
/// case-insensitive form; anything rooted under a protected system
/// directory is rejected.
pub fn audit_path(path: &str) -> Result<(), String> {
    let absolute = std::path::absolute(path)
        .map(|p| p.to_string_lossy().to_lowercase())
        .unwrap_or_else(|_| path.to_lowercase());

    for root in PROTECTED_ROOTS {
        if absolute.starts_with(root) {
            return Err(format!(
                "Security Breach: Access to system directory '{root}' is restricted."
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rm_rf_is_rejected() {
        assert!(audit_command("rm -rf /").is_err());
        assert!(audit_command("rm -r build/").is_err());
    }

    #[test]
    fn plain_listing_is_allowed() {
        assert_eq!(audit_command("ls -la"), Ok(()));
        assert_eq!(audit_command("git status"), Ok(()));
    }

    #[test]
    fn elevation_and_power_controls_are_rejected() {
        assert!(audit_command("sudo apt install vim").is_err());
        assert!(audit_command("shutdown -h now").is_err());
        assert!(audit_command("REBOOT").is_err());
    }

    #[test]
    fn disk_operations_are_rejected() {
        assert!(audit_command("dd if=/dev/zero of=/dev/sda").is_err());
        assert!(audit_command("mkfs.ext4 /dev/sdb1").is_err());
        assert!(audit_command("format c:").is_err());
    }

    #[test]
    fn rejection_names_the_pattern() {
        let reason = audit_command("sudo ls").unwrap_err();
        assert!(reason.contains("sudo"), "reason: {reason}");
    }

    #[test]
    fn inline_python_eval_is_rejected() {
        assert!(audit_command(r#"python -c "eval(input())""#).is_err());
        assert!(audit_command(r#"python3 -c "import os; os.remove('x')""#).is_err());
    }

    #[test]
    fn inline_python_print_is_allowed() {
        assert_eq!(audit_command(r#"python -c "print(1 + 1)""#), Ok(()));
    }

    #[test]
    fn protected_roots_are_rejected() {
        assert!(audit_path("/etc/passwd").is_err());
        assert!(audit_path("/root/.ssh/id_rsa").is_err());
        assert!(audit_path("/bin/sh").is_err());
    }

    #[test]
    fn sandbox_paths_are_allowed() {
        assert_eq!(audit_path("/tmp/sandbox/project/main.rs"), Ok(()));
        assert_eq!(audit_path("/home/user/workdir"), Ok(()));
    }

    #[test]
    fn path_audit_is_case_insensitive() {
        assert!(audit_path("/ETC/passwd").is_err());
    }
}
