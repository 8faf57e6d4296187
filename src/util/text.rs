use std::borrow::Cow;

use html_escape::decode_html_entities;
use unicode_width::UnicodeWidthChar;

/// Ellipsis appended by [`truncate_to_width`]
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string to fit within a maximum display width.
///
/// Width is counted in terminal columns (CJK and emoji count as two), so a
/// truncated summary lines up the same way in a mail client's plain-text view.
/// When text is cut, `"..."` is appended and the result still fits
/// `max_width`. Widths of 3 or less cut without an ellipsis.
///
/// ```
/// use bear::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Hello, World!", 8), "Hello...");
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if max_width == 0 {
        return Cow::Borrowed("");
    }

    let budget = if max_width <= ELLIPSIS_WIDTH {
        max_width
    } else {
        max_width - ELLIPSIS_WIDTH
    };

    let mut width = 0;
    let mut cut = None;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if cut.is_none() && width + w > budget {
            cut = Some(idx);
        }
        if width + w > max_width {
            let end = cut.unwrap_or(idx);
            return if max_width <= ELLIPSIS_WIDTH {
                Cow::Owned(s[..end].to_string())
            } else {
                Cow::Owned(format!("{}{}", &s[..end], ELLIPSIS))
            };
        }
        width += w;
    }

    Cow::Borrowed(s)
}

/// Strip control characters and ANSI CSI escape sequences.
///
/// Tab, newline and carriage return are kept. Returns `Cow::Borrowed` when
/// there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // Parameter bytes run until the final byte in 0x40..=0x7e
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        if !is_stripped_control(c) {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn is_stripped_control(c: char) -> bool {
    (c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r')) || c == '\x1b'
}

/// Reduce an HTML fragment to plain text.
///
/// Tags are dropped, named and numeric entities are decoded once, and runs
/// of whitespace collapse to a single space. This is not a general HTML
/// parser; it is meant for entry summaries.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => text.push(c),
        }
    }

    decode_html_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_truncation() {
        assert_eq!(truncate_to_width("Hello, World!", 8), "Hello...");
        assert_eq!(truncate_to_width("Hello", 5), "Hello");
        assert_eq!(truncate_to_width("Hello", 10), "Hello");
    }

    #[test]
    fn test_cjk_truncation() {
        // Each character is two columns wide
        assert_eq!(truncate_to_width("你好世界", 8), "你好世界");
        assert_eq!(truncate_to_width("你好世界", 7), "你好...");
    }

    #[test]
    fn test_narrow_widths_cut_without_ellipsis() {
        assert_eq!(truncate_to_width("Test", 0), "");
        assert_eq!(truncate_to_width("Test", 1), "T");
        assert_eq!(truncate_to_width("Test", 3), "Tes");
    }

    #[test]
    fn test_fitting_text_is_borrowed() {
        assert!(matches!(truncate_to_width("fits", 10), Cow::Borrowed(_)));
    }

    #[test]
    fn test_no_panic_on_utf8_boundaries() {
        let s = "aé你🎉b";
        for w in 0..12 {
            let _ = truncate_to_width(s, w);
        }
    }

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        assert!(matches!(strip_control_chars("clean text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_preserves_tabs_newlines_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_strip_controls_and_ansi() {
        assert_eq!(strip_control_chars("a\x00b\x07c\x7f"), "abc");
        assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_control_chars("bare\x1besc"), "bareesc");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello <b>world</b></p>\n<p>second&nbsp;line</p>"),
            "Hello world second line"
        );
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3"), "Tom & Jerry <3");
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn test_html_to_text_decodes_named_and_numeric_entities() {
        assert_eq!(
            html_to_text("<p>It&#8217;s &eacute;t&#xE9; &mdash; ok</p>"),
            "It\u{2019}s \u{e9}t\u{e9} \u{2014} ok"
        );
        assert_eq!(html_to_text("&copy; 2020&hellip;"), "\u{a9} 2020\u{2026}");
    }

    #[test]
    fn test_html_to_text_does_not_double_decode() {
        assert_eq!(html_to_text("&amp;lt;"), "&lt;");
    }
}
