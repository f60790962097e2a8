// Truncate a &str to a byte budget at a char boundary (prefix)
#[inline]
pub fn take_bytes_at_char_boundary(s: &str, maxb: usize) -> &str {
    if s.len() <= maxb {
        return s;
    }
    let mut last_ok = 0;
    for (i, ch) in s.char_indices() {
        let nb = i + ch.len_utf8();
        if nb > maxb {
            break;
        }
        last_ok = nb;
    }
    &s[..last_ok]
}

// Take a suffix of a &str within a byte budget at a char boundary
#[inline]
pub fn take_last_bytes_at_char_boundary(s: &str, maxb: usize) -> &str {
    if s.len() <= maxb {
        return s;
    }
    let mut start = s.len();
    let mut used = 0usize;
    for (i, ch) in s.char_indices().rev() {
        let nb = ch.len_utf8();
        if used + nb > maxb {
            break;
        }
        start = i;
        used += nb;
        if start == 0 {
            break;
        }
    }
    &s[start..]
}

/// Truncate `s` to at most `max_bytes` bytes, keeping a prefix and a suffix
/// and replacing the middle with an elision marker that names the number of
/// bytes removed. Strings within budget are returned unchanged.
pub fn truncate_middle(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    // Reserve room for the marker, sized for the widest count it could
    // carry; fall back to a plain prefix when the budget is too small to
    // fit one.
    let marker_width = format!("\n[... {} bytes truncated ...]\n", s.len()).len();
    if max_bytes <= marker_width {
        return take_bytes_at_char_boundary(s, max_bytes).to_string();
    }

    let keep = max_bytes - marker_width;
    let head_budget = keep / 2;
    let tail_budget = keep - head_budget;
    let head = take_bytes_at_char_boundary(s, head_budget);
    let tail = take_last_bytes_at_char_boundary(s, tail_budget);
    let removed = s.len() - head.len() - tail.len();
    format!("{head}\n[... {removed} bytes truncated ...]\n{tail}")
}

/// Return the last `n` lines of `s`, preserving the original line
/// terminators. `n == 0` yields an empty string.
pub fn tail_lines(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = s.strip_suffix('\n').unwrap_or(s);
    let mut newlines_seen = 0;
    for (i, b) in body.bytes().enumerate().rev() {
        if b == b'\n' {
            newlines_seen += 1;
            if newlines_seen == n {
                return &s[i + 1..];
            }
        }
    }
    s
}
