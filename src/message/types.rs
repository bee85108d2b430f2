//! The owned IRC message type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::MessageParseError;
use crate::prefix::Prefix;

use super::nom_parser::RawMessage;
use super::tags;

/// The wire format caps messages at 15 parameters.
pub const MAX_PARAMS: usize = 15;

/// An IRCv3 message tag.
///
/// Tags are key-value pairs attached to messages. A tag present without
/// a value carries the empty string; the wire format defines the two as
/// equivalent.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tag {
    /// Tag key (e.g., `time`, `+draft/typing`).
    pub key: String,
    /// Tag value, unescaped. Empty if the tag had no value.
    pub value: String,
}

impl Tag {
    /// Create a new tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An owned, parsed IRC message.
///
/// The command is stored textually: named commands are upper-cased on
/// parse, numeric replies keep their three-digit form (leading zeros
/// included), so `"005"` and `"PRIVMSG"` are both valid commands.
///
/// # Example
///
/// ```
/// use slirc_client::Message;
///
/// let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
/// assert_eq!(msg.command, "PRIVMSG");
/// assert_eq!(msg.params, vec!["#channel", "Hello!"]);
///
/// let msg = Message::privmsg("#channel", "Hello!");
/// assert_eq!(msg.to_string(), "PRIVMSG #channel :Hello!");
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    /// IRCv3 message tags.
    pub tags: Vec<Tag>,
    /// Message origin (server or user mask), if present.
    pub prefix: Option<Prefix>,
    /// Upper-cased command word or three-digit numeric.
    pub command: String,
    /// Ordered parameters; only the last may be empty or contain spaces.
    pub params: Vec<String>,
}

fn normalize_command(raw: &str) -> Result<String, MessageParseError> {
    if raw.is_empty() {
        return Err(MessageParseError::InvalidCommand(raw.to_string()));
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        if raw.len() != 3 {
            return Err(MessageParseError::InvalidCommand(raw.to_string()));
        }
        return Ok(raw.to_string());
    }
    if raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return Ok(raw.to_ascii_uppercase());
    }
    Err(MessageParseError::InvalidCommand(raw.to_string()))
}

impl Message {
    /// Create a message from raw components, validating the command and
    /// parameter count.
    pub fn new(command: &str, params: Vec<&str>) -> Result<Message, MessageParseError> {
        if params.len() > MAX_PARAMS {
            return Err(MessageParseError::TooManyParams(params.len()));
        }
        Ok(Message {
            tags: Vec::new(),
            prefix: None,
            command: normalize_command(command)?,
            params: params.into_iter().map(str::to_string).collect(),
        })
    }

    // Internal constructor for known-good commands.
    fn cmd(command: &str, params: Vec<String>) -> Message {
        Message {
            tags: Vec::new(),
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Get the nickname from the message prefix, if present.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// The numeric reply code, if the command is a numeric.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.chars().all(|c| c.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }

    /// Get the value of a tag by key. Valueless tags yield `""`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// Get the `server-time` tag as a parsed timestamp.
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        self.tag("time")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Get the `msgid` tag.
    pub fn msgid(&self) -> Option<&str> {
        self.tag("msgid")
    }

    /// Get the `account` tag.
    pub fn account_tag(&self) -> Option<&str> {
        self.tag("account")
    }

    /// Parameter accessor tolerating short messages.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Create a PRIVMSG to a target.
    #[must_use]
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::cmd("PRIVMSG", vec![target.into(), text.into()])
    }

    /// Create a NOTICE to a target.
    #[must_use]
    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::cmd("NOTICE", vec![target.into(), text.into()])
    }

    /// Create a JOIN for a channel, optionally with a key.
    #[must_use]
    pub fn join(channel: impl Into<String>, key: Option<String>) -> Self {
        let mut params = vec![channel.into()];
        params.extend(key);
        Self::cmd("JOIN", params)
    }

    /// Create a PART, optionally with a reason.
    #[must_use]
    pub fn part(channel: impl Into<String>, reason: Option<String>) -> Self {
        let mut params = vec![channel.into()];
        params.extend(reason);
        Self::cmd("PART", params)
    }

    /// Create a NICK change.
    #[must_use]
    pub fn nick(nickname: impl Into<String>) -> Self {
        Self::cmd("NICK", vec![nickname.into()])
    }

    /// Create a USER registration message.
    #[must_use]
    pub fn user(username: impl Into<String>, realname: impl Into<String>) -> Self {
        Self::cmd(
            "USER",
            vec![username.into(), "0".into(), "*".into(), realname.into()],
        )
    }

    /// Create a PASS message.
    #[must_use]
    pub fn pass(password: impl Into<String>) -> Self {
        Self::cmd("PASS", vec![password.into()])
    }

    /// Create a PING with a token.
    #[must_use]
    pub fn ping(token: impl Into<String>) -> Self {
        Self::cmd("PING", vec![token.into()])
    }

    /// Create a PONG echoing a token.
    #[must_use]
    pub fn pong(token: impl Into<String>) -> Self {
        Self::cmd("PONG", vec![token.into()])
    }

    /// Create a QUIT, optionally with a reason.
    #[must_use]
    pub fn quit(reason: Option<String>) -> Self {
        Self::cmd("QUIT", reason.into_iter().collect())
    }

    /// Create an AWAY message. `None` clears away status.
    #[must_use]
    pub fn away(reason: Option<String>) -> Self {
        Self::cmd("AWAY", reason.into_iter().collect())
    }

    /// Create a KICK, optionally with a reason.
    #[must_use]
    pub fn kick(
        channel: impl Into<String>,
        nickname: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        let mut params = vec![channel.into(), nickname.into()];
        params.extend(reason);
        Self::cmd("KICK", params)
    }

    /// Create a TOPIC query or change.
    #[must_use]
    pub fn topic(channel: impl Into<String>, topic: Option<String>) -> Self {
        let mut params = vec![channel.into()];
        params.extend(topic);
        Self::cmd("TOPIC", params)
    }

    /// Create a CAP subcommand message.
    #[must_use]
    pub fn cap(subcommand: &str, arg: Option<String>) -> Self {
        let mut params = vec![subcommand.to_string()];
        params.extend(arg);
        Self::cmd("CAP", params)
    }

    /// Create an AUTHENTICATE message.
    #[must_use]
    pub fn authenticate(payload: impl Into<String>) -> Self {
        Self::cmd("AUTHENTICATE", vec![payload.into()])
    }

    /// Create a WHOIS query.
    #[must_use]
    pub fn whois(nickname: impl Into<String>) -> Self {
        Self::cmd("WHOIS", vec![nickname.into()])
    }

    /// Create a WHOWAS query.
    #[must_use]
    pub fn whowas(nickname: impl Into<String>) -> Self {
        Self::cmd("WHOWAS", vec![nickname.into()])
    }

    /// Create a MONITOR subcommand (`+`, `-`, `C`, `L`, `S`).
    #[must_use]
    pub fn monitor(subcommand: &str, targets: Option<String>) -> Self {
        let mut params = vec![subcommand.to_string()];
        params.extend(targets);
        Self::cmd("MONITOR", params)
    }

    /// Create a WHO query.
    #[must_use]
    pub fn who(mask: impl Into<String>) -> Self {
        Self::cmd("WHO", vec![mask.into()])
    }

    /// Attach a tag, builder style.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Set the prefix, builder style.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Serialize to canonical wire form, without CRLF.
    ///
    /// Fails if any parameter other than the last is empty, contains a
    /// space, CR, LF or NUL, or starts with `:`; such a parameter cannot
    /// be framed in its position. The trailing parameter is introduced
    /// with `:` exactly when needed.
    pub fn to_wire(&self) -> Result<String, MessageParseError> {
        if self.params.len() > MAX_PARAMS {
            return Err(MessageParseError::TooManyParams(self.params.len()));
        }
        for (index, param) in self.params.iter().enumerate() {
            if param.contains(['\r', '\n', '\0']) {
                return Err(MessageParseError::BadParamPosition {
                    index,
                    param: param.clone(),
                });
            }
            if index + 1 < self.params.len()
                && (param.is_empty() || param.contains(' ') || param.starts_with(':'))
            {
                return Err(MessageParseError::BadParamPosition {
                    index,
                    param: param.clone(),
                });
            }
        }
        Ok(self.to_string())
    }

    fn needs_trailing_marker(param: &str) -> bool {
        param.is_empty() || param.contains(' ') || param.starts_with(':')
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@{} ", tags::serialize_segment(&self.tags))?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i + 1 == self.params.len() && Self::needs_trailing_marker(param) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }

        let raw = RawMessage::parse(trimmed)
            .map_err(|_| MessageParseError::InvalidCommand(trimmed.to_string()))?;

        if raw.params.len() > MAX_PARAMS {
            return Err(MessageParseError::TooManyParams(raw.params.len()));
        }

        let tags = match raw.tags {
            Some(segment) => tags::parse_segment(segment)?,
            None => Vec::new(),
        };

        Ok(Message {
            tags,
            prefix: raw.prefix.map(Prefix::new_from_str),
            command: normalize_command(raw.command)?,
            params: raw.params.into_iter().map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uppercases_command() {
        let msg: Message = "privmsg #chan :hi".parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_numeric_keeps_leading_zeros() {
        let msg: Message = ":srv 005 nick CHANTYPES=# :are supported".parse().unwrap();
        assert_eq!(msg.command, "005");
        assert_eq!(msg.numeric(), Some(5));
    }

    #[test]
    fn test_mixed_alnum_command_rejected() {
        assert!("1AB x".parse::<Message>().is_err());
        assert!("12 x".parse::<Message>().is_err());
        assert!("1234 x".parse::<Message>().is_err());
    }

    #[test]
    fn test_tag_scenario() {
        let msg: Message =
            "@time=2024-01-01T00:00:00.000Z;+vendor/x=a\\:b\\sc :nick!u@h PRIVMSG #chan :hi there"
                .parse()
                .unwrap();
        assert_eq!(msg.tag("time"), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(msg.tag("+vendor/x"), Some("a;b c"));
        assert_eq!(msg.source_nickname(), Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hi there"]);
        assert!(msg.server_time().is_some());
    }

    #[test]
    fn test_serialize_trailing_rules() {
        assert_eq!(
            Message::privmsg("#c", "hello world").to_string(),
            "PRIVMSG #c :hello world"
        );
        assert_eq!(Message::privmsg("#c", "").to_string(), "PRIVMSG #c :");
        assert_eq!(Message::privmsg("#c", ":x").to_string(), "PRIVMSG #c ::x");
        // Single-word trailing needs no marker.
        assert_eq!(Message::privmsg("#c", "hi").to_string(), "PRIVMSG #c hi");
    }

    #[test]
    fn test_to_wire_rejects_bad_middles() {
        let msg = Message::cmd("KICK", vec!["#c".into(), "a b".into(), "r".into()]);
        assert!(matches!(
            msg.to_wire(),
            Err(MessageParseError::BadParamPosition { index: 1, .. })
        ));

        let msg = Message::cmd("PRIVMSG", vec!["#c".into(), "inject\r\nQUIT".into()]);
        assert!(msg.to_wire().is_err());
    }

    #[test]
    fn test_round_trip() {
        let original = Message::privmsg("#test", "Hello, world!")
            .with_tag("time", "2023-01-01T00:00:00Z")
            .with_tag("msgid", "abc123");
        let parsed: Message = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_too_many_params() {
        let line = format!("FOO {}", ["x"; 16].join(" "));
        assert!(matches!(
            line.parse::<Message>(),
            Err(MessageParseError::TooManyParams(16))
        ));
    }

    #[test]
    fn test_user_constructor_fields() {
        let msg = Message::user("ident", "Real Name");
        assert_eq!(msg.to_string(), "USER ident 0 * :Real Name");
    }

    #[test]
    fn test_tag_round_trip_with_escapes() {
        let original = Message::privmsg("#t", "m").with_tag("k", "a;b c\\d");
        let parsed: Message = original.to_string().parse().unwrap();
        assert_eq!(parsed.tag("k"), Some("a;b c\\d"));
    }
}
