//! CTCP (Client-to-Client Protocol) message splitting.
//!
//! CTCP requests ride inside PRIVMSG/NOTICE payloads between `\x01`
//! delimiters. This module only splits them apart so the dispatcher can
//! route them; building CTCP conversations on top is left to handlers.
//!
//! # Reference
//! - <https://modern.ircdocs.horse/ctcp.html>

/// The CTCP delimiter character.
pub const CTCP_DELIM: char = '\x01';

/// A CTCP message extracted from a PRIVMSG or NOTICE body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctcp {
    /// Upper-cased CTCP command (e.g. `ACTION`, `VERSION`).
    pub command: String,
    /// The rest of the payload, if any.
    pub params: Option<String>,
}

impl Ctcp {
    /// Parse a message body as CTCP.
    ///
    /// Returns `None` when the body is not CTCP. The closing delimiter
    /// is accepted but not required; some clients omit it when they
    /// split long messages.
    pub fn parse(body: &str) -> Option<Ctcp> {
        let inner = body.strip_prefix(CTCP_DELIM)?;
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }
        let (command, params) = match inner.split_once(' ') {
            Some((cmd, rest)) => (cmd, (!rest.is_empty()).then(|| rest.to_string())),
            None => (inner, None),
        };
        Some(Ctcp {
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Serialize back into a PRIVMSG/NOTICE body.
    pub fn to_body(&self) -> String {
        match &self.params {
            Some(params) => format!("{}{} {}{}", CTCP_DELIM, self.command, params, CTCP_DELIM),
            None => format!("{}{}{}", CTCP_DELIM, self.command, CTCP_DELIM),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        let ctcp = Ctcp::parse("\x01ACTION waves hello\x01").unwrap();
        assert_eq!(ctcp.command, "ACTION");
        assert_eq!(ctcp.params.as_deref(), Some("waves hello"));
    }

    #[test]
    fn test_parse_without_closing_delimiter() {
        let ctcp = Ctcp::parse("\x01ACTION waves").unwrap();
        assert_eq!(ctcp.command, "ACTION");
        assert_eq!(ctcp.params.as_deref(), Some("waves"));
    }

    #[test]
    fn test_parse_bare_command() {
        let ctcp = Ctcp::parse("\x01VERSION\x01").unwrap();
        assert_eq!(ctcp.command, "VERSION");
        assert_eq!(ctcp.params, None);
    }

    #[test]
    fn test_command_uppercased() {
        let ctcp = Ctcp::parse("\x01version\x01").unwrap();
        assert_eq!(ctcp.command, "VERSION");
    }

    #[test]
    fn test_not_ctcp() {
        assert_eq!(Ctcp::parse("hello world"), None);
        assert_eq!(Ctcp::parse("\x01\x01"), None);
    }

    #[test]
    fn test_round_trip() {
        for body in ["\x01ACTION does things\x01", "\x01PING 12345\x01"] {
            let ctcp = Ctcp::parse(body).unwrap();
            assert_eq!(ctcp.to_body(), body);
        }
    }
}
