//! Small string helpers for diagnostics.

use std::borrow::Cow;

/// Longest prefix of `s` that fits in `max_bytes` and ends on a char boundary.
pub fn clip(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// Single-line preview for log fields and error strings.
///
/// Line breaks become spaces and text longer than `max_bytes` is clipped
/// with a trailing `…`.
pub fn preview(s: &str, max_bytes: usize) -> Cow<'_, str> {
    let flat: Cow<'_, str> = if s.contains(['\r', '\n']) {
        Cow::Owned(s.replace("\r\n", " ").replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(s)
    };
    if flat.len() <= max_bytes {
        return flat;
    }
    Cow::Owned(format!("{}…", clip(&flat, max_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("status ok", 6), "status");
        // "é" is two bytes; byte 2 falls inside it.
        assert_eq!(clip("héllo", 2), "h");
        assert_eq!(clip("héllo", 3), "hé");
        assert_eq!(clip("", 4), "");
    }

    #[test]
    fn preview_flattens_and_marks_clipping() {
        assert_eq!(preview("line one\r\nline two", 64), "line one line two");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert!(matches!(preview("short", 10), Cow::Borrowed("short")));
    }
}
