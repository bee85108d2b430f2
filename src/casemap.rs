//! IRC case mapping.
//!
//! Nicknames and channel names are case-insensitive, but which characters
//! fold depends on the server's advertised `CASEMAPPING` ISUPPORT token.
//! Under the historical `rfc1459` mapping the characters `[]\~` are the
//! upper-case forms of `{}|^` (a leftover from IRC's Scandinavian origins).
//!
//! # Reference
//! - <https://modern.ircdocs.horse/#casemapping-parameter>

/// A case mapping advertised via `CASEMAPPING`.
///
/// All identity comparisons and table keys in this crate go through
/// [`CaseMapping::normalize`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaseMapping {
    /// Plain ASCII: `A-Z` fold to `a-z`.
    Ascii,
    /// RFC 1459: ASCII plus `[]\~` folding to `{}|^`.
    #[default]
    Rfc1459,
    /// Like `rfc1459` but without the `~` → `^` pair.
    Rfc1459Strict,
}

impl CaseMapping {
    /// Parse a `CASEMAPPING` token value. Unknown values return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Some(Self::Ascii),
            "rfc1459" => Some(Self::Rfc1459),
            "rfc1459-strict" => Some(Self::Rfc1459Strict),
            _ => None,
        }
    }

    /// The token value for this mapping.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Rfc1459 => "rfc1459",
            Self::Rfc1459Strict => "rfc1459-strict",
        }
    }

    fn lower_char(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => c.to_ascii_lowercase(),
            (Self::Ascii, _) => c,
            (_, '[') => '{',
            (_, ']') => '}',
            (_, '\\') => '|',
            (Self::Rfc1459, '~') => '^',
            _ => c,
        }
    }

    /// Lower-case `s` under this mapping.
    ///
    /// This is the canonical form used to key user and channel tables.
    pub fn normalize(&self, s: &str) -> String {
        s.chars().map(|c| self.lower_char(c)).collect()
    }

    /// Compare two identifiers for equality under this mapping.
    pub fn eq(&self, a: &str, b: &str) -> bool {
        if a.len() != b.len() {
            // All foldings here are 1:1 on byte length.
            return false;
        }
        a.chars()
            .zip(b.chars())
            .all(|(ca, cb)| self.lower_char(ca) == self.lower_char(cb))
    }
}

/// Lower-case a string under the default `rfc1459` mapping.
pub fn irc_to_lower(s: &str) -> String {
    CaseMapping::Rfc1459.normalize(s)
}

/// Compare two strings under the default `rfc1459` mapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    CaseMapping::Rfc1459.eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii() {
        let m = CaseMapping::Ascii;
        assert_eq!(m.normalize("NickName"), "nickname");
        assert_eq!(m.normalize("foo[]\\~"), "foo[]\\~");
    }

    #[test]
    fn test_rfc1459() {
        let m = CaseMapping::Rfc1459;
        assert_eq!(m.normalize("Nick[a]\\B~"), "nick{a}|b^");
        assert!(m.eq("FOO[]", "foo{}"));
        assert!(m.eq("a~b", "A^B"));
    }

    #[test]
    fn test_rfc1459_strict_excludes_tilde() {
        let m = CaseMapping::Rfc1459Strict;
        assert_eq!(m.normalize("x[~]"), "x{~}");
        assert!(!m.eq("a~", "a^"));
        assert!(m.eq("A[", "a{"));
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(CaseMapping::parse("rfc1459"), Some(CaseMapping::Rfc1459));
        assert_eq!(CaseMapping::parse("ASCII"), Some(CaseMapping::Ascii));
        assert_eq!(
            CaseMapping::parse("rfc1459-strict"),
            Some(CaseMapping::Rfc1459Strict)
        );
        assert_eq!(CaseMapping::parse("rfc7613"), None);
    }

    #[test]
    fn test_default_helpers() {
        assert_eq!(irc_to_lower("Foo[Bar]"), "foo{bar}");
        assert!(irc_eq("Foo|x", "foo\\X"));
    }
}
