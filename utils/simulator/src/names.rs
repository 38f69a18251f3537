//! Raw symbol names to logical path segments.

use crate::model::NameEncoding;

const VERILATOR_SCOPE: &str = "__DOT__";

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl",
    "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The accessor spelling of a logical name before sibling deduplication.
/// Names that are not identifiers have none.
pub fn attr_spelling(name: &str) -> Option<String> {
    if !is_identifier(name) {
        return None;
    }
    if is_keyword(name) {
        Some(format!("{name}_"))
    } else {
        Some(name.to_string())
    }
}

/// Drops the escaped-identifier marker and its terminating whitespace.
pub fn strip_escape(segment: &str) -> &str {
    match segment.strip_prefix('\\') {
        Some(rest) => rest.trim_end(),
        None => segment,
    }
}

fn is_separator(c: char) -> bool {
    c == '.' || c == '/'
}

/// Splits a raw name into logical segments.
pub fn split(raw: &str, encoding: NameEncoding) -> Vec<String> {
    match encoding {
        NameEncoding::Plain => split_plain(raw),
        NameEncoding::Verilator => raw
            .split(VERILATOR_SCOPE)
            .map(|segment| strip_escape(&demangle(segment)).to_string())
            .collect(),
    }
}

fn split_plain(raw: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut chars = raw.chars().peekable();

    loop {
        let mut segment = String::new();
        if chars.peek() == Some(&'\\') {
            // An escaped identifier runs to the next whitespace and may
            // contain separators.
            chars.next();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                segment.push(c);
                chars.next();
            }
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            match chars.next() {
                Some(c) if is_separator(c) => {
                    segments.push(segment);
                    continue;
                }
                Some(c) => {
                    // Anything trailing an escaped name stays in that segment.
                    segment.push(c);
                    segment.extend(chars.by_ref());
                    segments.push(segment);
                    break;
                }
                None => {
                    segments.push(segment);
                    break;
                }
            }
        }

        let mut ended = true;
        for c in chars.by_ref() {
            if is_separator(c) {
                ended = false;
                break;
            }
            segment.push(c);
        }
        segments.push(segment);
        if ended {
            break;
        }
    }

    segments
}

/// Undoes Verilator's `__0XX` character escapes.
pub fn demangle(mangled: &str) -> String {
    let bytes = mangled.as_bytes();
    let mut out = String::with_capacity(mangled.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"__0")
            && i + 5 <= bytes.len()
            && bytes[i + 3..i + 5].iter().all(u8::is_ascii_hexdigit)
        {
            let code = (hex_value(bytes[i + 3]) << 4) | hex_value(bytes[i + 4]);
            out.push(char::from(code));
            i += 5;
            continue;
        }
        let c = mangled[i..].chars().next().unwrap_or_default();
        out.push(c);
        i += c.len_utf8().max(1);
    }
    out
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_split_on_either_separator() {
        assert_eq!(split("a.b/c", NameEncoding::Plain), vec!["a", "b", "c"]);
        assert_eq!(split("in_reg", NameEncoding::Plain), vec!["in_reg"]);
    }

    #[test]
    fn escaped_identifier_keeps_separators() {
        assert_eq!(split("\\.][. ", NameEncoding::Plain), vec![".][."]);
        assert_eq!(
            split("top.\\a.b .c", NameEncoding::Plain),
            vec!["top", "a.b", "c"]
        );
        assert_eq!(split("\\$^_^", NameEncoding::Plain), vec!["$^_^"]);
    }

    #[test]
    fn verilator_names_demangle() {
        assert_eq!(demangle("a___05Fa"), "a__a");
        assert_eq!(demangle("a___05F020a"), "a__020a");
        assert_eq!(demangle("__024__05E___05E"), "$^_^");
        assert_eq!(demangle("___05F_a"), "___a");
        assert_eq!(demangle("___05F___05F"), "____");
        assert_eq!(demangle("plain"), "plain");
        assert_eq!(
            split("top__DOT__child_1__DOT__in_reg", NameEncoding::Verilator),
            vec!["top", "child_1", "in_reg"]
        );
        assert_eq!(
            split("__02E__05D__05B__02E", NameEncoding::Verilator),
            vec![".][."]
        );
    }

    #[test]
    fn keywords_get_trailing_underscore() {
        assert_eq!(attr_spelling("in").as_deref(), Some("in_"));
        assert_eq!(attr_spelling("type").as_deref(), Some("type_"));
        assert_eq!(attr_spelling("gen").as_deref(), Some("gen_"));
        assert_eq!(attr_spelling("input_a").as_deref(), Some("input_a"));
        assert_eq!(attr_spelling("___a").as_deref(), Some("___a"));
    }

    #[test]
    fn non_identifiers_have_no_attribute_spelling() {
        assert_eq!(attr_spelling("$^_^"), None);
        assert_eq!(attr_spelling("%20"), None);
        assert_eq!(attr_spelling("007"), None);
        assert_eq!(attr_spelling("_"), None);
    }

    #[test]
    fn strip_escape_only_touches_marked_names() {
        assert_eq!(strip_escape("\\%20 "), "%20");
        assert_eq!(strip_escape("a_"), "a_");
    }
}
