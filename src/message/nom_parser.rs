//! Nom-based IRC line parser.
//!
//! Splits a single line into its raw tag segment, prefix, command and
//! parameters without allocating. Unescaping, case folding and limit
//! checks happen in [`super::types`].

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};

/// Parse IRCv3 message tags (the part after `@` and before the first space).
fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse the message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command word (letters or digits).
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

/// Parse parameters from the remaining input after the command.
///
/// Handles space-separated middles and the `:`-introduced trailing
/// parameter, which may contain spaces or be empty. Runs of spaces
/// collapse into a single separator.
fn parse_params(input: &str) -> (&str, Vec<&str>, bool) {
    let mut params: Vec<&str> = Vec::new();
    let mut rest = input;
    let mut has_trailing = false;

    while let Some(b' ') = rest.as_bytes().first().copied() {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }

        if let Some(b':') = rest.as_bytes().first().copied() {
            // Trailing parameter: everything after `:` until line end.
            let after_colon = &rest[1..];
            let end = after_colon.find(['\r', '\n']).unwrap_or(after_colon.len());
            params.push(&after_colon[..end]);
            rest = &after_colon[end..];
            has_trailing = true;
            break;
        }

        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        params.push(param);
        rest = &rest[end..];
    }

    (rest, params, has_trailing)
}

/// Parse a complete IRC line into its raw components.
///
/// ```text
/// [@tags] [:prefix] <command> [params...] [:trailing]
/// ```
pub(crate) fn parse_line(input: &str) -> IResult<&str, RawMessage<'_>> {
    let (input, tags) = opt(parse_tags)(input)?;
    let (input, _) = space0(input)?;

    let (input, prefix) = opt(parse_prefix)(input)?;
    let (input, _) = space0(input)?;

    let (input, command) = parse_command(input)?;

    let (rest, params, has_trailing) = parse_params(input);

    Ok((
        rest,
        RawMessage {
            tags,
            prefix,
            command,
            params,
            has_trailing,
        },
    ))
}

/// A raw parsed line holding references into the input.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawMessage<'a> {
    /// Raw tag segment (without the leading `@`), if present.
    pub tags: Option<&'a str>,
    /// Raw prefix string (without the leading `:`), if present.
    pub prefix: Option<&'a str>,
    /// The command word as it appeared on the wire.
    pub command: &'a str,
    /// Parameters, including the trailing one.
    pub params: Vec<&'a str>,
    /// Whether the last parameter was introduced with `:`.
    pub has_trailing: bool,
}

impl<'a> RawMessage<'a> {
    /// Parse an IRC line, returning the error position kind on failure.
    pub fn parse(input: &'a str) -> Result<Self, ErrorKind> {
        match parse_line(input) {
            Ok((_remaining, msg)) => Ok(msg),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.code),
            Err(nom::Err::Incomplete(_)) => Err(ErrorKind::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let msg = RawMessage::parse("PING").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.tags.is_none());
        assert!(msg.prefix.is_none());
        assert!(msg.params.is_empty());
    }

    #[test]
    fn test_parse_command_with_params() {
        let msg = RawMessage::parse("PRIVMSG #channel :Hello, world!").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
        assert!(msg.has_trailing);
    }

    #[test]
    fn test_parse_with_prefix() {
        let msg = RawMessage::parse(":nick!user@host PRIVMSG #channel :Hello").unwrap();
        assert_eq!(msg.prefix, Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello"]);
    }

    #[test]
    fn test_parse_with_tags() {
        let msg =
            RawMessage::parse("@time=2023-01-01T00:00:00Z :nick PRIVMSG #ch :Hi").unwrap();
        assert_eq!(msg.tags, Some("time=2023-01-01T00:00:00Z"));
        assert_eq!(msg.prefix, Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#ch", "Hi"]);
    }

    #[test]
    fn test_parse_with_crlf() {
        let msg = RawMessage::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["server"]);
    }

    #[test]
    fn test_parse_numeric() {
        let msg = RawMessage::parse(":server 001 nick :Welcome").unwrap();
        assert_eq!(msg.prefix, Some("server"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["nick", "Welcome"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = RawMessage::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(msg.params, vec!["#channel", ""]);
        assert!(msg.has_trailing);
    }

    #[test]
    fn test_no_trailing_marker_without_colon() {
        let msg = RawMessage::parse("JOIN #channel").unwrap();
        assert!(!msg.has_trailing);
    }

    #[test]
    fn test_parse_collapses_space_runs() {
        let msg = RawMessage::parse("USER guest  0  * :Real Name").unwrap();
        assert_eq!(msg.params, vec!["guest", "0", "*", "Real Name"]);
    }

    #[test]
    fn test_missing_command_is_error() {
        assert!(RawMessage::parse(":prefix-only").is_err());
        assert!(RawMessage::parse("").is_err());
    }
}
