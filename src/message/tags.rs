//! IRCv3 message tag parsing and escaping.
//!
//! # Reference
//! - <https://ircv3.net/specs/extensions/message-tags>

use crate::error::MessageParseError;

use super::types::Tag;

/// Escape a tag value for serialization.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => escaped.push_str("\\:"),
            ' ' => escaped.push_str("\\s"),
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Unescape a tag value from wire format.
///
/// Reverses [`escape_value`]. An unrecognized escape yields the escaped
/// character itself, and a lone trailing `\` is dropped.
pub fn unescape_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// Check a tag key: optional `+` client prefix, optional `vendor/`
/// namespace, then letters, digits and `-`.
pub fn is_valid_key(key: &str) -> bool {
    let key = key.strip_prefix('+').unwrap_or(key);
    if key.is_empty() {
        return false;
    }
    let name = match key.rsplit_once('/') {
        Some((vendor, name)) => {
            if vendor.is_empty()
                || !vendor
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return false;
            }
            name
        }
        None => key,
    };
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Parse the raw tag segment (without the leading `@`) into tags.
///
/// Tags are `;`-separated `key[=value]` pairs; values are unescaped. A
/// key without `=` and a key with an empty value both parse to an empty
/// value, which is how the wire format defines them to compare.
pub fn parse_segment(raw: &str) -> Result<Vec<Tag>, MessageParseError> {
    let mut tags = Vec::new();
    for part in raw.split(';') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = match part.split_once('=') {
            Some((k, v)) => (k, unescape_value(v)),
            None => (part, String::new()),
        };
        if !is_valid_key(key) {
            return Err(MessageParseError::InvalidTagKey(key.to_string()));
        }
        tags.push(Tag::new(key, value));
    }
    Ok(tags)
}

/// Serialize tags into the wire segment (without the leading `@`).
pub fn serialize_segment(tags: &[Tag]) -> String {
    let mut out = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        out.push_str(&tag.key);
        if !tag.value.is_empty() {
            out.push('=');
            out.push_str(&escape_value(&tag.value));
        }
    }
    out
}
