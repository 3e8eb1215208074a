//! file: core/src/lower/strings.rs
//! description: string literal escaping and identifier hygiene.
//!
use std::fmt::Write;

/// Escape `raw` for the inside of a double-quoted target string literal.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`]; also accepts `\'` and `\0`. Unknown escapes are
/// kept verbatim.
pub fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = (0..2).filter_map(|_| chars.next_if(|h| h.is_ascii_hexdigit())).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 2 => out.push(decoded),
                    _ => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A complete double-quoted literal.
pub fn quoted(raw: &str) -> String {
    format!("\"{}\"", escape(raw))
}

/// Escape text for use inside a `std.fmt` format string: the literal
/// escaping plus doubled braces.
pub fn escape_format(raw: &str) -> String {
    escape(raw).replace('{', "{{").replace('}', "}}")
}

const KEYWORDS: &[&str] = &[
    "addrspace", "align", "allowzero", "and", "anyframe", "anytype", "asm", "async", "await", "break",
    "callconv", "catch", "comptime", "const", "continue", "defer", "else", "enum", "errdefer", "error",
    "export", "extern", "fn", "for", "if", "inline", "linksection", "noalias", "noinline", "nosuspend",
    "opaque", "or", "orelse", "packed", "pub", "resume", "return", "struct", "suspend", "switch", "test",
    "threadlocal", "try", "type", "union", "unreachable", "usingnamespace", "var", "volatile", "while",
    // primitive type names cannot be shadowed either
    "bool", "void", "anyerror", "isize", "usize", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64",
    "f32", "f64", "null", "undefined", "true", "false",
];

/// Target identifier for a source name.
pub fn ident(name: &str) -> String {
    if KEYWORDS.contains(&name) {
        format!("@\"{}\"", name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_characters_round_trip() {
        let raw = "say \"hi\"\\n\tnext\r\nline";
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(escape("a\"b"), "a\\\"b");
    }

    #[test]
    fn control_characters_use_hex() {
        assert_eq!(escape("\u{1}"), "\\x01");
        assert_eq!(unescape("\\x01"), "\u{1}");
    }

    #[test]
    fn format_strings_double_braces() {
        assert_eq!(escape_format("{x}"), "{{x}}");
    }

    #[test]
    fn keywords_are_quoted() {
        assert_eq!(ident("type"), "@\"type\"");
        assert_eq!(ident("total"), "total");
    }
}
