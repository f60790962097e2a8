//! The completion-marker wire format and the pure scan/clean functions that
//! recognize it in a session transcript.
//!
//! Markers are emitted by the shell itself (via the injected integration
//! preamble) as a private OSC-style escape sequence:
//!
//! ```text
//! ESC ] 6 3 3 ; P ; M c p <Kind> = <payload> BEL
//! ```
//!
//! `Kind` is `Start` (payload: correlation id) or `End` (payload: signed
//! exit code). Using a non-printable introducer plus a per-command random
//! id keeps the markers out of reach of ordinary command output.

use once_cell::sync::Lazy;
use regex_lite::Regex;

pub(crate) const MARKER_INTRODUCER: &str = "\x1b]633;P;Mcp";
pub(crate) const MARKER_TERMINATOR: char = '\x07';

pub(crate) const EMPTY_OUTPUT_MESSAGE: &str = "Command executed successfully (no output).";

/// End marker: kind tag, `=`, a signed integer, closed by BEL, whitespace,
/// or end-of-input (some shells swallow the BEL when re-rendering).
#[allow(clippy::unwrap_used)]
static END_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\]633;P;McpEnd=(-?\d+)(?:\x07|\s|$)").unwrap());

/// ANSI CSI sequences (colors, styles, cursor and mode controls).
#[allow(clippy::unwrap_used)]
static CSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// OSC sequences, including our own markers; terminated by BEL or ST.
#[allow(clippy::unwrap_used)]
static OSC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\].*?(?:\x07|\x1b\\)").unwrap());

/// The literal `Start` marker text the preamble makes the shell emit for a
/// given correlation id.
pub(crate) fn start_marker(correlation_id: &str) -> String {
    format!("{MARKER_INTRODUCER}Start={correlation_id}{MARKER_TERMINATOR}")
}

/// A completed command located in the transcript: the raw span between the
/// markers and the exit code carried by the `End` marker.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Completion {
    pub raw_output: String,
    pub exit_code: i32,
}

/// Scan decoded transcript text (already sliced to start at the byte
/// offset recorded when the command was sent) for the command's `Start`
/// marker followed by any `End` marker. `None` means "keep waiting".
pub(crate) fn find_completion(decoded_tail: &str, start_marker: &str) -> Option<Completion> {
    let (_, after_start) = decoded_tail.split_once(start_marker)?;
    let captures = END_MARKER_RE.captures(after_start)?;
    let end_match = captures.get(0)?;
    let exit_code = captures.get(1)?.as_str().parse::<i32>().ok()?;
    Some(Completion {
        raw_output: after_start[..end_match.start()].to_string(),
        exit_code,
    })
}

/// Remove all escape sequences (CSI and OSC) from `text`. Idempotent:
/// stripping already-clean text is a no-op.
pub(crate) fn strip_escapes(text: &str) -> String {
    let without_csi = CSI_RE.replace_all(text, "");
    OSC_RE.replace_all(&without_csi, "").into_owned()
}

/// Normalize a raw marker-delimited span for a non-terminal consumer:
/// strip escape sequences, trim, annotate a non-zero exit code, and
/// substitute a fixed message when the command produced nothing.
pub(crate) fn clean_output(raw_output: &str, exit_code: i32) -> String {
    let clean = strip_escapes(raw_output);
    let clean = clean.trim();

    if exit_code != 0 {
        return format!("[Exit Code: {exit_code}] {clean}");
    }
    if clean.is_empty() {
        EMPTY_OUTPUT_MESSAGE.to_string()
    } else {
        clean.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn end_marker(code: i32) -> String {
        format!("{MARKER_INTRODUCER}End={code}{MARKER_TERMINATOR}")
    }

    #[test]
    fn completion_between_markers_is_found() {
        let start = start_marker("abc12345");
        let transcript = format!("> echo hello\n{start}hello\n{}> ", end_marker(0));
        let completion = find_completion(&transcript, &start).unwrap();
        assert_eq!(completion.raw_output, "hello\n");
        assert_eq!(completion.exit_code, 0);
    }

    #[test]
    fn missing_start_marker_keeps_waiting() {
        let start = start_marker("abc12345");
        assert_eq!(find_completion("no markers here", &start), None);
    }

    #[test]
    fn start_without_end_keeps_waiting() {
        let start = start_marker("abc12345");
        let transcript = format!("{start}partial output so far");
        assert_eq!(find_completion(&transcript, &start), None);
    }

    #[test]
    fn negative_exit_code_is_parsed() {
        let start = start_marker("deadbeef");
        let transcript = format!("{start}boom\n{}", end_marker(-1));
        let completion = find_completion(&transcript, &start).unwrap();
        assert_eq!(completion.exit_code, -1);
    }

    #[test]
    fn end_marker_terminated_by_newline_is_accepted() {
        let start = start_marker("deadbeef");
        let transcript = format!("{start}out\n{MARKER_INTRODUCER}End=3\n> ");
        let completion = find_completion(&transcript, &start).unwrap();
        assert_eq!(completion.exit_code, 3);
    }

    #[test]
    fn stale_end_marker_before_start_is_ignored() {
        let start = start_marker("abc12345");
        let transcript = format!("{}{start}hello\n{}", end_marker(130), end_marker(0));
        let completion = find_completion(&transcript, &start).unwrap();
        assert_eq!(completion.exit_code, 0);
        assert_eq!(completion.raw_output, "hello\n");
    }

    #[test]
    fn cleaning_strips_colors_and_osc() {
        let raw = "\x1b[31mred\x1b[0m \x1b]0;title\x07plain \x1b[?2004h";
        assert_eq!(clean_output(raw, 0), "red plain");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let raw = "\x1b[32mgreen\x1b[0m text\n";
        let once = clean_output(raw, 0);
        assert_eq!(clean_output(&once, 0), once);
    }

    #[test]
    fn nonzero_exit_is_annotated() {
        assert_eq!(
            clean_output("not found\n", 127),
            "[Exit Code: 127] not found"
        );
    }

    #[test]
    fn empty_output_gets_fixed_message() {
        assert_eq!(clean_output("  \n", 0), EMPTY_OUTPUT_MESSAGE);
    }
}
