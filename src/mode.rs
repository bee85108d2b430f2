//! IRC mode parsing.
//!
//! Channel mode strings cannot be parsed without the server's `PREFIX`
//! and `CHANMODES` parameters: those decide which mode characters
//! consume an argument. Parsing therefore takes the live
//! [`ProtocolParameters`].

use tracing::warn;

use crate::error::ModeParseError;
use crate::isupport::{ModeKind, ProtocolParameters};

/// A single applied mode change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeChange {
    /// `+x [arg]`
    Set(char, Option<String>),
    /// `-x [arg]`
    Unset(char, Option<String>),
}

impl ModeChange {
    /// The mode character.
    pub fn mode(&self) -> char {
        match self {
            ModeChange::Set(c, _) | ModeChange::Unset(c, _) => *c,
        }
    }

    /// The argument, if one was consumed.
    pub fn arg(&self) -> Option<&str> {
        match self {
            ModeChange::Set(_, arg) | ModeChange::Unset(_, arg) => arg.as_deref(),
        }
    }

    /// Whether this sets (`+`) rather than unsets (`-`) the mode.
    pub fn is_set(&self) -> bool {
        matches!(self, ModeChange::Set(_, _))
    }
}

/// Whether a mode char in a given direction must, may, or must not
/// consume an argument.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Need {
    Mandatory,
    Optional,
    None,
}

fn need_for(kind: ModeKind, set: bool) -> Need {
    match kind {
        ModeKind::Prefix | ModeKind::AlwaysArg | ModeKind::List => Need::Mandatory,
        ModeKind::SetArg if set => Need::Optional,
        ModeKind::SetArg => Need::None,
        ModeKind::Flag => Need::None,
    }
}

/// Parse a channel MODE parameter list (`["+ov", "a", "b"]`) into
/// ordered changes.
///
/// Arguments are assigned left to right. Modes that must carry an
/// argument reserve theirs first; a type C mode only consumes one when
/// enough arguments remain for the mandatory modes after it, and is
/// dropped otherwise. A list mode with no argument left is kept as an
/// argument-less query.
pub fn parse_channel_modes(
    pieces: &[&str],
    params: &ProtocolParameters,
) -> Result<Vec<ModeChange>, ModeParseError> {
    let Some((modestring, args)) = pieces.split_first() else {
        return Ok(Vec::new());
    };

    let mut entries: Vec<(bool, char, Need)> = Vec::new();
    let mut set = true;
    for c in modestring.chars() {
        match c {
            '+' => set = true,
            '-' => set = false,
            _ => entries.push((set, c, need_for(params.mode_kind(c), set))),
        }
    }

    // Suffix counts of mandatory consumers, for the type C lookahead.
    let mut mandatory_after = vec![0usize; entries.len() + 1];
    for i in (0..entries.len()).rev() {
        mandatory_after[i] =
            mandatory_after[i + 1] + usize::from(entries[i].2 == Need::Mandatory);
    }

    let mut changes = Vec::with_capacity(entries.len());
    let mut args = args.iter();
    let mut remaining = pieces.len() - 1;

    for (i, (set, mode, need)) in entries.into_iter().enumerate() {
        let arg = match need {
            Need::None => None,
            Need::Mandatory => match args.next() {
                Some(arg) => {
                    remaining -= 1;
                    Some(arg.to_string())
                }
                // List modes double as argument-less queries.
                None if params.mode_kind(mode) == ModeKind::List => None,
                None => return Err(ModeParseError::MissingArgument(mode)),
            },
            Need::Optional => {
                if remaining > mandatory_after[i + 1] {
                    remaining -= 1;
                    args.next().map(|s| s.to_string())
                } else {
                    warn!(mode = %mode, "dropping mode with no argument to consume");
                    continue;
                }
            }
        };
        changes.push(if set {
            ModeChange::Set(mode, arg)
        } else {
            ModeChange::Unset(mode, arg)
        });
    }

    if args.next().is_some() {
        return Err(ModeParseError::UnusedArguments);
    }

    Ok(changes)
}

/// Parse a user mode string (`"+iw-x"`); user modes never take
/// arguments.
pub fn parse_user_modes(modestring: &str) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut set = true;
    for c in modestring.chars() {
        match c {
            '+' => set = true,
            '-' => set = false,
            _ => changes.push(if set {
                ModeChange::Set(c, None)
            } else {
                ModeChange::Unset(c, None)
            }),
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProtocolParameters {
        let mut p = ProtocolParameters::default();
        p.apply_token("PREFIX=(ohv)@%+");
        p.apply_token("CHANMODES=b,k,l,imnpst");
        p
    }

    #[test]
    fn test_simple_op() {
        let changes = parse_channel_modes(&["+o", "nick"], &params()).unwrap();
        assert_eq!(changes, vec![ModeChange::Set('o', Some("nick".into()))]);
    }

    #[test]
    fn test_mixed_directions() {
        let changes = parse_channel_modes(&["+o-v", "a", "b"], &params()).unwrap();
        assert_eq!(
            changes,
            vec![
                ModeChange::Set('o', Some("a".into())),
                ModeChange::Unset('v', Some("b".into())),
            ]
        );
    }

    #[test]
    fn test_short_args_reserved_for_mandatory_modes() {
        // Four consumers, three arguments: the second +l is dropped so
        // -v still gets its nickname.
        let changes =
            parse_channel_modes(&["+oll-v", "nickA", "42", "nickB"], &params()).unwrap();
        assert_eq!(
            changes,
            vec![
                ModeChange::Set('o', Some("nickA".into())),
                ModeChange::Set('l', Some("42".into())),
                ModeChange::Unset('v', Some("nickB".into())),
            ]
        );
    }

    #[test]
    fn test_set_arg_mode_unset_takes_nothing() {
        let changes = parse_channel_modes(&["-l+i"], &params()).unwrap();
        assert_eq!(
            changes,
            vec![ModeChange::Unset('l', None), ModeChange::Set('i', None)]
        );
    }

    #[test]
    fn test_key_requires_argument() {
        assert_eq!(
            parse_channel_modes(&["+k"], &params()),
            Err(ModeParseError::MissingArgument('k'))
        );
        let changes = parse_channel_modes(&["+k", "secret"], &params()).unwrap();
        assert_eq!(changes, vec![ModeChange::Set('k', Some("secret".into()))]);
    }

    #[test]
    fn test_ban_list_query_without_argument() {
        let changes = parse_channel_modes(&["+b"], &params()).unwrap();
        assert_eq!(changes, vec![ModeChange::Set('b', None)]);
    }

    #[test]
    fn test_ban_with_mask() {
        let changes = parse_channel_modes(&["+b", "*!*@example.com"], &params()).unwrap();
        assert_eq!(
            changes,
            vec![ModeChange::Set('b', Some("*!*@example.com".into()))]
        );
    }

    #[test]
    fn test_unused_arguments_rejected() {
        assert_eq!(
            parse_channel_modes(&["+i", "stray"], &params()),
            Err(ModeParseError::UnusedArguments)
        );
    }

    #[test]
    fn test_flags_only() {
        let changes = parse_channel_modes(&["+imn"], &params()).unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.is_set() && c.arg().is_none()));
    }

    #[test]
    fn test_user_modes() {
        let changes = parse_user_modes("+iw-x");
        assert_eq!(
            changes,
            vec![
                ModeChange::Set('i', None),
                ModeChange::Set('w', None),
                ModeChange::Unset('x', None),
            ]
        );
    }
}
