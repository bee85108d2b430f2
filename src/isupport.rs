//! ISUPPORT (005) handling.
//!
//! The server advertises its protocol parameters in `RPL_ISUPPORT`
//! tokens. [`ProtocolParameters`] is the live, mutable view of those
//! parameters; sensible RFC 1459 defaults apply until the server says
//! otherwise.
//!
//! # Reference
//! - <https://modern.ircdocs.horse/#rplisupport-005>

use std::collections::HashMap;

use tracing::warn;

use crate::casemap::CaseMapping;
use crate::message::Message;

/// The four channel-mode classes from `CHANMODES=A,B,C,D`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanModes {
    /// Type A: list modes (always take a parameter; query without one).
    pub a: String,
    /// Type B: always take a parameter.
    pub b: String,
    /// Type C: take a parameter only when set.
    pub c: String,
    /// Type D: never take a parameter.
    pub d: String,
}

impl Default for ChanModes {
    fn default() -> Self {
        ChanModes {
            a: "b".to_string(),
            b: "k".to_string(),
            c: "l".to_string(),
            d: "imnpst".to_string(),
        }
    }
}

impl ChanModes {
    /// Parse a `CHANMODES` value (four comma-separated classes).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (a, b, c, d) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        Some(ChanModes {
            a: a.to_string(),
            b: b.to_string(),
            c: c.to_string(),
            d: d.to_string(),
        })
    }
}

/// How a channel mode character consumes parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    /// A membership mode from `PREFIX` (takes a nickname).
    Prefix,
    /// Type A list mode.
    List,
    /// Type B, always takes a parameter.
    AlwaysArg,
    /// Type C, takes a parameter only when set.
    SetArg,
    /// Type D flag, never takes a parameter.
    Flag,
}

/// Live protocol parameters, updated by 005 tokens.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolParameters {
    /// Active case mapping for identity comparison.
    pub casemapping: CaseMapping,
    /// Channel name sigils.
    pub chantypes: Vec<char>,
    /// Prefixes permitted on PRIVMSG/NOTICE targets.
    pub statusmsg: Vec<char>,
    /// Membership `(mode, prefix)` pairs, highest priority first.
    pub prefix: Vec<(char, char)>,
    /// Channel mode classes.
    pub chanmodes: ChanModes,
    /// Maximum nickname length, if advertised.
    pub nicklen: Option<usize>,
    /// Maximum channel name length, if advertised.
    pub channellen: Option<usize>,
    /// Network name.
    pub network: Option<String>,
    /// MONITOR support: maximum target count, `usize::MAX` if unlimited,
    /// `None` when the server does not support MONITOR.
    pub monitor: Option<usize>,
    /// Whether WHOX queries are supported.
    pub whox: bool,
    /// The `EXTBAN` value, if advertised.
    pub extban: Option<String>,
    /// Raw last-seen tokens, including ones with no defined effect here.
    tokens: HashMap<String, Option<String>>,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        ProtocolParameters {
            casemapping: CaseMapping::default(),
            chantypes: vec!['#', '&', '+', '!'],
            statusmsg: Vec::new(),
            prefix: vec![('o', '@'), ('v', '+')],
            chanmodes: ChanModes::default(),
            nicklen: None,
            channellen: None,
            network: None,
            monitor: None,
            whox: false,
            extban: None,
            tokens: HashMap::new(),
        }
    }
}

impl ProtocolParameters {
    /// Apply every token of an `RPL_ISUPPORT` message.
    ///
    /// Tokens sit between the target nickname and the trailing
    /// `:are supported by this server`. Returns the tokens that have no
    /// defined effect here so callers can surface them.
    pub fn apply_message(&mut self, msg: &Message) -> Vec<(String, Option<String>)> {
        let mut unknown = Vec::new();
        let params = &msg.params;
        if params.len() < 2 {
            return unknown;
        }
        // Skip the leading target nick; drop the trailing explanation
        // ("are supported by this server"), recognizable by its spaces.
        let mut tokens = &params[1..];
        if let Some(last) = tokens.last() {
            if last.contains(' ') || last.is_empty() {
                tokens = &tokens[..tokens.len() - 1];
            }
        }
        for token in tokens {
            if let Some((key, value)) = self.apply_token(token) {
                unknown.push((key, value));
            }
        }
        unknown
    }

    /// Apply a single token. Returns `Some((key, value))` when the token
    /// has no defined effect on the parameter set.
    pub fn apply_token(&mut self, token: &str) -> Option<(String, Option<String>)> {
        if let Some(key) = token.strip_prefix('-') {
            let key = key.to_ascii_uppercase();
            self.tokens.remove(&key);
            self.reset(&key);
            return None;
        }

        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k.to_ascii_uppercase(), Some(v.to_string())),
            None => (token.to_ascii_uppercase(), None),
        };
        self.tokens.insert(key.clone(), value.clone());

        let val = value.as_deref().unwrap_or("");
        match key.as_str() {
            "CASEMAPPING" => match CaseMapping::parse(val) {
                Some(mapping) => self.casemapping = mapping,
                None => warn!(value = val, "unrecognized CASEMAPPING, keeping current"),
            },
            "CHANTYPES" => self.chantypes = val.chars().collect(),
            "STATUSMSG" => self.statusmsg = val.chars().collect(),
            "PREFIX" => match parse_prefix_token(val) {
                Some(pairs) => self.prefix = pairs,
                None => warn!(value = val, "unparseable PREFIX token"),
            },
            "CHANMODES" => match ChanModes::parse(val) {
                Some(modes) => self.chanmodes = modes,
                None => warn!(value = val, "unparseable CHANMODES token"),
            },
            "NICKLEN" => self.nicklen = val.parse().ok(),
            "CHANNELLEN" => self.channellen = val.parse().ok(),
            "NETWORK" => self.network = Some(val.to_string()),
            "MONITOR" => self.monitor = Some(val.parse().unwrap_or(usize::MAX)),
            "WHOX" => self.whox = true,
            "EXTBAN" => self.extban = Some(val.to_string()),
            _ => return Some((key, value)),
        }
        None
    }

    fn reset(&mut self, key: &str) {
        let defaults = ProtocolParameters::default();
        match key {
            "CASEMAPPING" => self.casemapping = defaults.casemapping,
            "CHANTYPES" => self.chantypes = defaults.chantypes,
            "STATUSMSG" => self.statusmsg = defaults.statusmsg,
            "PREFIX" => self.prefix = defaults.prefix,
            "CHANMODES" => self.chanmodes = defaults.chanmodes,
            "NICKLEN" => self.nicklen = None,
            "CHANNELLEN" => self.channellen = None,
            "NETWORK" => self.network = None,
            "MONITOR" => self.monitor = None,
            "WHOX" => self.whox = false,
            "EXTBAN" => self.extban = None,
            _ => {}
        }
    }

    /// Raw token lookup: `Some(None)` for a bare flag, `Some(Some(_))`
    /// for a valued token, `None` when absent.
    pub fn token(&self, key: &str) -> Option<Option<&str>> {
        self.tokens
            .get(&key.to_ascii_uppercase())
            .map(|v| v.as_deref())
    }

    /// Whether `name` is a channel name under the active `CHANTYPES`.
    pub fn is_channel_name(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(&c))
    }

    /// The membership mode for a NAMES-style prefix character.
    pub fn mode_for_prefix(&self, prefix: char) -> Option<char> {
        self.prefix
            .iter()
            .find(|(_, p)| *p == prefix)
            .map(|(m, _)| *m)
    }

    /// The prefix character displayed for a membership mode.
    pub fn prefix_for_mode(&self, mode: char) -> Option<char> {
        self.prefix
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, p)| *p)
    }

    /// Priority of a membership mode; 0 is the highest.
    pub fn prefix_rank(&self, mode: char) -> Option<usize> {
        self.prefix.iter().position(|(m, _)| *m == mode)
    }

    /// Split leading STATUSMSG sigils off a message target.
    pub fn split_statusmsg<'a>(&self, target: &'a str) -> (&'a str, &'a str) {
        let end = target
            .char_indices()
            .find(|(_, c)| !self.statusmsg.contains(c))
            .map(|(i, _)| i)
            .unwrap_or(target.len());
        target.split_at(end)
    }

    /// Classify a channel mode character for parameter consumption.
    pub fn mode_kind(&self, mode: char) -> ModeKind {
        if self.prefix.iter().any(|(m, _)| *m == mode) {
            ModeKind::Prefix
        } else if self.chanmodes.a.contains(mode) {
            ModeKind::List
        } else if self.chanmodes.b.contains(mode) {
            ModeKind::AlwaysArg
        } else if self.chanmodes.c.contains(mode) {
            ModeKind::SetArg
        } else {
            // Unknown modes are treated as flags, the only safe guess.
            ModeKind::Flag
        }
    }
}

/// Parse a `PREFIX` value of the form `(modes)prefixes`.
fn parse_prefix_token(s: &str) -> Option<Vec<(char, char)>> {
    let rest = s.strip_prefix('(')?;
    let (modes, prefixes) = rest.split_once(')')?;
    if modes.is_empty() || modes.chars().count() != prefixes.chars().count() {
        return None;
    }
    Some(modes.chars().zip(prefixes.chars()).collect())
}
