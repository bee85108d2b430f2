//! High-level client events.
//!
//! Raw messages that change tracked state or carry chat traffic are
//! distilled into [`Event`]s, delivered to features in dispatch order
//! and to the application through the client's event channel.

use crate::message::Message;
use crate::mode::ModeChange;

/// A high-level IRC event.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// Registration completed (001 received). Fired once per connection.
    Connect,
    /// Connection ended. `expected` is true for user-initiated quits.
    Disconnect {
        /// Whether the disconnect was requested locally.
        expected: bool,
    },
    /// PRIVMSG to a channel.
    ChannelMessage {
        /// Target channel.
        channel: String,
        /// Sender nickname.
        by: String,
        /// Message body.
        text: String,
    },
    /// PRIVMSG directly to us.
    PrivateMessage {
        /// Sender nickname.
        by: String,
        /// Message body.
        text: String,
    },
    /// NOTICE to a channel or to us.
    Notice {
        /// Target (channel name or our nickname).
        target: String,
        /// Sender nickname or server name.
        by: String,
        /// Notice body.
        text: String,
    },
    /// Someone joined a channel (possibly us).
    Join {
        /// The channel.
        channel: String,
        /// Who joined.
        who: String,
    },
    /// Someone left a channel.
    Part {
        /// The channel.
        channel: String,
        /// Who left.
        who: String,
        /// Part reason, if given.
        reason: Option<String>,
    },
    /// Someone was kicked from a channel.
    Kick {
        /// The channel.
        channel: String,
        /// Who was kicked.
        target: String,
        /// Who did the kicking.
        by: String,
        /// Kick reason, if given.
        reason: Option<String>,
    },
    /// A user quit the network.
    Quit {
        /// Who quit.
        who: String,
        /// Quit reason, if given.
        reason: Option<String>,
    },
    /// A user changed nickname (possibly us).
    NickChange {
        /// Previous nickname.
        old: String,
        /// New nickname.
        new: String,
    },
    /// A channel topic changed.
    TopicChange {
        /// The channel.
        channel: String,
        /// Who changed it, when known.
        by: Option<String>,
        /// The new topic.
        topic: String,
    },
    /// Channel or user modes changed.
    ModeChange {
        /// The channel, or our nickname for user modes.
        target: String,
        /// Who changed them, when known.
        by: Option<String>,
        /// The applied changes, in order.
        changes: Vec<ModeChange>,
    },
    /// We were invited to a channel.
    Invite {
        /// The channel.
        channel: String,
        /// Who invited us.
        by: String,
    },
    /// A monitored user came online (730).
    UserOnline {
        /// The nickname.
        nickname: String,
    },
    /// A monitored user went offline (731).
    UserOffline {
        /// The nickname.
        nickname: String,
    },
    /// A CTCP request arrived inside a PRIVMSG.
    Ctcp {
        /// Sender nickname.
        by: String,
        /// Target (channel or us).
        target: String,
        /// CTCP command, upper-cased.
        command: String,
        /// CTCP parameters, if any.
        params: Option<String>,
    },
    /// A CTCP reply arrived inside a NOTICE.
    CtcpReply {
        /// Sender nickname.
        by: String,
        /// Target (channel or us).
        target: String,
        /// CTCP command, upper-cased.
        command: String,
        /// CTCP parameters, if any.
        params: Option<String>,
    },
    /// An ISUPPORT token with no built-in effect.
    Isupport {
        /// Token name, upper-cased.
        name: String,
        /// Token value, if any.
        value: Option<String>,
    },
    /// A capability was advertised by the server.
    CapAvailable {
        /// Capability name.
        name: String,
        /// Advertised value, if any.
        value: Option<String>,
    },
    /// A capability finished negotiation and is active.
    CapEnabled {
        /// Capability name.
        name: String,
    },
    /// A capability was rejected or disabled.
    CapDisabled {
        /// Capability name.
        name: String,
    },
    /// A command no handler recognized.
    Unknown(Message),
}
