//! User, channel and membership tracking.
//!
//! The tracker is the client's view of the network, derived purely from
//! server messages: JOIN/PART/KICK/QUIT, NICK, MODE, TOPIC and its
//! numerics, NAMES and WHO replies, CHGHOST, MONITOR numerics, and the
//! `away-notify`/`account-notify` extensions.
//!
//! Tables are keyed by names normalized under the active case mapping;
//! every membership entry resolves to a user in the user table. A user
//! is dropped as soon as they become unobservable: no shared channel
//! left and not on the monitor list.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::event::Event;
use crate::isupport::{ModeKind, ProtocolParameters};
use crate::message::Message;
use crate::mode::{parse_channel_modes, ModeChange};
use crate::prefix::Prefix;

/// A known user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    /// Display-form nickname (original casing).
    pub nickname: String,
    /// Ident/username, when seen.
    pub username: Option<String>,
    /// Hostname, when seen.
    pub hostname: Option<String>,
    /// Realname/GECOS, when seen (WHO, extended-join, WHOIS).
    pub realname: Option<String>,
    /// Whether the user is marked away.
    pub away: bool,
    /// Whether the user is identified with services.
    pub identified: bool,
    /// Services account name, when known.
    pub account: Option<String>,
}

/// A channel mode value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeValue {
    /// Type D flag.
    Flag,
    /// Type B/C mode with its parameter.
    Arg(String),
    /// Type A list mode entries.
    List(Vec<String>),
}

/// A joined channel.
#[derive(Clone, Debug, Default)]
pub struct Channel {
    /// Display-form channel name.
    pub name: String,
    /// Current topic, when known.
    pub topic: Option<String>,
    /// Who set the topic (from 333 or TOPIC).
    pub topic_setter: Option<String>,
    /// When the topic was set (from 333).
    pub topic_time: Option<DateTime<Utc>>,
    /// Channel modes, keyed by mode character.
    pub modes: HashMap<char, ModeValue>,
    /// Members, as normalized nicknames.
    users: HashSet<String>,
    /// Membership prefix modes per normalized nickname.
    prefixes: HashMap<String, BTreeSet<char>>,
    /// Inside a NAMES burst (between the first 353 and 366).
    receiving_names: bool,
}

impl Channel {
    /// Normalized nicknames of all members.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the channel has no tracked members.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Whether the normalized nickname is a member.
    pub fn has_member(&self, normalized_nick: &str) -> bool {
        self.users.contains(normalized_nick)
    }

    /// The full set of membership prefix modes for a member.
    pub fn prefix_modes(&self, normalized_nick: &str) -> Option<&BTreeSet<char>> {
        self.prefixes.get(normalized_nick)
    }
}

/// The client's tracked network state.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    own_nick: String,
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    monitored: HashSet<String>,
}

impl Tracker {
    /// Create a tracker for a client using `own_nick`.
    pub fn new(own_nick: &str) -> Self {
        Tracker {
            own_nick: own_nick.to_string(),
            ..Default::default()
        }
    }

    /// Our current nickname.
    pub fn own_nick(&self) -> &str {
        &self.own_nick
    }

    /// Update our nickname (001, NICK).
    pub fn set_own_nick(&mut self, nick: &str) {
        self.own_nick = nick.to_string();
    }

    /// Whether `nick` is us under the active case mapping.
    pub fn is_self(&self, params: &ProtocolParameters, nick: &str) -> bool {
        params.casemapping.eq(&self.own_nick, nick)
    }

    /// Look up a channel.
    pub fn channel(&self, params: &ProtocolParameters, name: &str) -> Option<&Channel> {
        self.channels.get(&params.casemapping.normalize(name))
    }

    /// Look up a user.
    pub fn user(&self, params: &ProtocolParameters, nick: &str) -> Option<&User> {
        self.users.get(&params.casemapping.normalize(nick))
    }

    /// All tracked channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// All tracked users.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// The displayed (highest-priority) prefix of a member.
    pub fn display_prefix(
        &self,
        params: &ProtocolParameters,
        channel: &str,
        nick: &str,
    ) -> Option<char> {
        let chan = self.channel(params, channel)?;
        let modes = chan.prefix_modes(&params.casemapping.normalize(nick))?;
        modes
            .iter()
            .filter_map(|&m| params.prefix_rank(m).map(|rank| (rank, m)))
            .min_by_key(|&(rank, _)| rank)
            .and_then(|(_, m)| params.prefix_for_mode(m))
    }

    /// Record a monitored target.
    pub fn add_monitored(&mut self, params: &ProtocolParameters, nick: &str) {
        self.monitored.insert(params.casemapping.normalize(nick));
    }

    /// Forget a monitored target; may drop the user from the table.
    pub fn remove_monitored(&mut self, params: &ProtocolParameters, nick: &str) {
        let key = params.casemapping.normalize(nick);
        self.monitored.remove(&key);
        self.gc_user(&key);
    }

    /// Drop all state (disconnect).
    pub fn clear(&mut self) {
        self.users.clear();
        self.channels.clear();
        // The monitor list survives reconnects; it is resent by the
        // client on registration.
    }

    /// Re-key every table under a new case mapping (CASEMAPPING token
    /// arriving after state already exists).
    pub fn rekey(&mut self, params: &ProtocolParameters) {
        let map = &params.casemapping;
        self.users = self
            .users
            .drain()
            .map(|(_, u)| (map.normalize(&u.nickname), u))
            .collect();
        self.monitored = self.monitored.drain().map(|n| map.normalize(&n)).collect();
        self.channels = self
            .channels
            .drain()
            .map(|(_, mut chan)| {
                chan.users = chan.users.drain().map(|n| map.normalize(&n)).collect();
                chan.prefixes = chan
                    .prefixes
                    .drain()
                    .map(|(n, modes)| (map.normalize(&n), modes))
                    .collect();
                (map.normalize(&chan.name), chan)
            })
            .collect();
    }

    /// Feed one message; returns the high-level events it implies.
    pub fn handle(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        match msg.command.as_str() {
            "JOIN" => self.on_join(params, msg),
            "PART" => self.on_part(params, msg),
            "KICK" => self.on_kick(params, msg),
            "QUIT" => self.on_quit(params, msg),
            "NICK" => self.on_nick(params, msg),
            "MODE" => self.on_mode(params, msg),
            "TOPIC" => self.on_topic(params, msg),
            "AWAY" => self.on_away(params, msg),
            "ACCOUNT" => self.on_account(params, msg),
            "CHGHOST" => self.on_chghost(params, msg),
            "PRIVMSG" | "NOTICE" => {
                // Source sighting only; message events are derived by
                // the dispatcher.
                self.sight_prefix(params, msg);
                Vec::new()
            }
            "332" => self.on_topic_reply(params, msg),
            "333" => self.on_topic_whotime(params, msg),
            "353" => self.on_names_reply(params, msg),
            "366" => self.on_names_end(params, msg),
            "352" => self.on_who_reply(params, msg),
            "730" => self.on_mon_change(params, msg, true),
            "731" => self.on_mon_change(params, msg, false),
            _ => Vec::new(),
        }
    }

    fn norm(params: &ProtocolParameters, s: &str) -> String {
        params.casemapping.normalize(s)
    }

    /// Create or refresh a user from a message prefix.
    fn sight_prefix(&mut self, params: &ProtocolParameters, msg: &Message) -> Option<String> {
        let prefix = msg.prefix.as_ref()?;
        let nick = prefix.nick()?.to_string();
        let key = Self::norm(params, &nick);
        let user = self.users.entry(key.clone()).or_insert_with(|| User {
            nickname: nick.clone(),
            ..Default::default()
        });
        if let Some(username) = prefix.user() {
            user.username = Some(username.to_string());
        }
        if let Some(host) = prefix.host() {
            if matches!(prefix, Prefix::Nickname(..)) {
                user.hostname = Some(host.to_string());
            }
        }
        if let Some(account) = msg.account_tag() {
            user.identified = account != "*";
            user.account = (account != "*").then(|| account.to_string());
        }
        Some(key)
    }

    fn ensure_user(&mut self, params: &ProtocolParameters, nick: &str) -> String {
        let key = Self::norm(params, nick);
        self.users.entry(key.clone()).or_insert_with(|| User {
            nickname: nick.to_string(),
            ..Default::default()
        });
        key
    }

    /// Drop a user if nothing references them any more.
    fn gc_user(&mut self, key: &str) {
        let shared = self.channels.values().any(|c| c.users.contains(key));
        let monitored = self.monitored.contains(key);
        let is_self = !self.own_nick.is_empty()
            && self
                .users
                .get(key)
                .is_some_and(|u| u.nickname == self.own_nick);
        if !shared && !monitored && !is_self {
            self.users.remove(key);
        }
    }

    fn drop_channel(&mut self, chan_key: &str) {
        if let Some(chan) = self.channels.remove(chan_key) {
            for member in chan.users {
                self.gc_user(&member);
            }
        }
    }

    fn on_join(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let Some(who) = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string) else {
            return Vec::new();
        };
        let Some(channel) = msg.param(0).map(str::to_string) else {
            return Vec::new();
        };
        let chan_key = Self::norm(params, &channel);
        let user_key = self.sight_prefix(params, msg).unwrap_or_else(|| {
            self.ensure_user(params, &who)
        });

        // extended-join carries account and realname.
        if msg.params.len() >= 3 {
            if let Some(user) = self.users.get_mut(&user_key) {
                let account = msg.param(1).unwrap_or("*");
                user.identified = account != "*";
                user.account = (account != "*").then(|| account.to_string());
                user.realname = msg.param(2).map(str::to_string);
            }
        }

        if self.is_self(params, &who) {
            self.channels.insert(
                chan_key.clone(),
                Channel {
                    name: channel.clone(),
                    ..Default::default()
                },
            );
        }

        match self.channels.get_mut(&chan_key) {
            Some(chan) => {
                chan.users.insert(user_key);
            }
            None => {
                debug!(channel = %channel, "JOIN for channel we are not in");
                self.gc_user(&user_key);
                return Vec::new();
            }
        }

        vec![Event::Join { channel, who }]
    }

    fn on_part(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let Some(who) = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string) else {
            return Vec::new();
        };
        let Some(channel) = msg.param(0).map(str::to_string) else {
            return Vec::new();
        };
        let reason = msg.param(1).map(str::to_string);
        let chan_key = Self::norm(params, &channel);
        let user_key = Self::norm(params, &who);

        if self.is_self(params, &who) {
            self.drop_channel(&chan_key);
        } else if let Some(chan) = self.channels.get_mut(&chan_key) {
            chan.users.remove(&user_key);
            chan.prefixes.remove(&user_key);
            self.gc_user(&user_key);
        } else {
            return Vec::new();
        }

        vec![Event::Part {
            channel,
            who,
            reason,
        }]
    }

    fn on_kick(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let by = msg
            .prefix
            .as_ref()
            .and_then(Prefix::nick)
            .unwrap_or("")
            .to_string();
        let (Some(channel), Some(target)) = (
            msg.param(0).map(str::to_string),
            msg.param(1).map(str::to_string),
        ) else {
            return Vec::new();
        };
        let reason = msg.param(2).map(str::to_string);
        let chan_key = Self::norm(params, &channel);
        let target_key = Self::norm(params, &target);

        if self.is_self(params, &target) {
            self.drop_channel(&chan_key);
        } else if let Some(chan) = self.channels.get_mut(&chan_key) {
            chan.users.remove(&target_key);
            chan.prefixes.remove(&target_key);
            self.gc_user(&target_key);
        } else {
            return Vec::new();
        }

        vec![Event::Kick {
            channel,
            target,
            by,
            reason,
        }]
    }

    fn on_quit(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let Some(who) = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string) else {
            return Vec::new();
        };
        let reason = msg.param(0).map(str::to_string);
        let user_key = Self::norm(params, &who);

        for chan in self.channels.values_mut() {
            chan.users.remove(&user_key);
            chan.prefixes.remove(&user_key);
        }
        self.gc_user(&user_key);

        vec![Event::Quit { who, reason }]
    }

    fn on_nick(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let Some(old) = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string) else {
            return Vec::new();
        };
        let Some(new) = msg.param(0).map(str::to_string) else {
            return Vec::new();
        };
        let old_key = Self::norm(params, &old);
        let new_key = Self::norm(params, &new);

        if let Some(mut user) = self.users.remove(&old_key) {
            user.nickname = new.clone();
            self.users.insert(new_key.clone(), user);
        }
        for chan in self.channels.values_mut() {
            if chan.users.remove(&old_key) {
                chan.users.insert(new_key.clone());
            }
            if let Some(modes) = chan.prefixes.remove(&old_key) {
                chan.prefixes.insert(new_key.clone(), modes);
            }
        }
        if self.monitored.remove(&old_key) {
            self.monitored.insert(new_key);
        }
        if self.is_self(params, &old) {
            self.own_nick = new.clone();
        }

        vec![Event::NickChange { old, new }]
    }

    fn on_mode(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let by = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string);
        let Some(target) = msg.param(0).map(str::to_string) else {
            return Vec::new();
        };

        if !params.is_channel_name(&target) {
            // User modes on ourselves; nothing to track beyond the event.
            let changes = crate::mode::parse_user_modes(msg.param(1).unwrap_or(""));
            return vec![Event::ModeChange {
                target,
                by,
                changes,
            }];
        }

        let pieces: Vec<&str> = msg.params[1..].iter().map(String::as_str).collect();
        let changes = match parse_channel_modes(&pieces, params) {
            Ok(changes) => changes,
            Err(err) => {
                warn!(%err, target = %target, "unparseable MODE change");
                return Vec::new();
            }
        };

        let chan_key = Self::norm(params, &target);
        let member_keys: Vec<Option<String>> = changes
            .iter()
            .map(|change| {
                (params.mode_kind(change.mode()) == ModeKind::Prefix)
                    .then(|| change.arg().map(|a| Self::norm(params, a)))
                    .flatten()
            })
            .collect();

        if let Some(chan) = self.channels.get_mut(&chan_key) {
            for (change, member_key) in changes.iter().zip(member_keys) {
                let mode = change.mode();
                match params.mode_kind(mode) {
                    ModeKind::Prefix => {
                        let Some(member) = member_key else { continue };
                        let modes = chan.prefixes.entry(member).or_default();
                        if change.is_set() {
                            modes.insert(mode);
                        } else {
                            modes.remove(&mode);
                        }
                    }
                    ModeKind::List => {
                        let Some(arg) = change.arg() else { continue };
                        let entry = chan
                            .modes
                            .entry(mode)
                            .or_insert_with(|| ModeValue::List(Vec::new()));
                        if let ModeValue::List(list) = entry {
                            if change.is_set() {
                                list.push(arg.to_string());
                            } else {
                                list.retain(|e| e != arg);
                            }
                        }
                    }
                    ModeKind::AlwaysArg | ModeKind::SetArg => {
                        if change.is_set() {
                            let value = change
                                .arg()
                                .map(|a| ModeValue::Arg(a.to_string()))
                                .unwrap_or(ModeValue::Flag);
                            chan.modes.insert(mode, value);
                        } else {
                            chan.modes.remove(&mode);
                        }
                    }
                    ModeKind::Flag => {
                        if change.is_set() {
                            chan.modes.insert(mode, ModeValue::Flag);
                        } else {
                            chan.modes.remove(&mode);
                        }
                    }
                }
            }
        }

        vec![Event::ModeChange {
            target,
            by,
            changes,
        }]
    }

    fn on_topic(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        let by = msg.prefix.as_ref().and_then(Prefix::nick).map(str::to_string);
        let (Some(channel), Some(topic)) = (
            msg.param(0).map(str::to_string),
            msg.param(1).map(str::to_string),
        ) else {
            return Vec::new();
        };
        let chan_key = Self::norm(params, &channel);
        if let Some(chan) = self.channels.get_mut(&chan_key) {
            chan.topic = Some(topic.clone());
            chan.topic_setter = by.clone();
            chan.topic_time = Some(Utc::now());
        }
        vec![Event::TopicChange { channel, by, topic }]
    }

    fn on_topic_reply(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        // 332: <me> <channel> :<topic> — state only, no event.
        if let (Some(channel), Some(topic)) = (msg.param(1), msg.param(2)) {
            let chan_key = Self::norm(params, channel);
            if let Some(chan) = self.channels.get_mut(&chan_key) {
                chan.topic = Some(topic.to_string());
            }
        }
        Vec::new()
    }

    fn on_topic_whotime(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        // 333: <me> <channel> <setter> <unixtime>
        if let (Some(channel), Some(setter)) = (msg.param(1), msg.param(2)) {
            let chan_key = Self::norm(params, channel);
            if let Some(chan) = self.channels.get_mut(&chan_key) {
                chan.topic_setter = Some(
                    Prefix::new_from_str(setter)
                        .nick()
                        .unwrap_or(setter)
                        .to_string(),
                );
                chan.topic_time = msg
                    .param(3)
                    .and_then(|t| t.parse::<i64>().ok())
                    .and_then(|t| Utc.timestamp_opt(t, 0).single());
            }
        }
        Vec::new()
    }

    fn on_names_reply(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        // 353: <me> <symbol> <channel> :<entries>
        let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) else {
            return Vec::new();
        };
        let chan_key = Self::norm(params, channel);
        let entries: Vec<String> = names.split_whitespace().map(str::to_string).collect();

        if !self.channels.contains_key(&chan_key) {
            return Vec::new();
        }
        if !self.channels[&chan_key].receiving_names {
            // Fresh NAMES burst replaces the member list.
            let chan = self.channels.get_mut(&chan_key).unwrap();
            let old: Vec<String> = chan.users.drain().collect();
            chan.prefixes.clear();
            chan.receiving_names = true;
            for member in old {
                self.gc_user(&member);
            }
        }

        for entry in entries {
            // With multi-prefix an entry may stack several sigils.
            let stripped = entry.trim_start_matches(|c| params.mode_for_prefix(c).is_some());
            let sigils = &entry[..entry.len() - stripped.len()];
            // With userhost-in-names the entry is a full mask.
            let prefix = Prefix::new_from_str(stripped);
            let nick = prefix.nick().unwrap_or(stripped).to_string();

            let user_key = self.ensure_user(params, &nick);
            if let Some(user) = self.users.get_mut(&user_key) {
                if let Some(username) = prefix.user() {
                    user.username = Some(username.to_string());
                }
                if let Prefix::Nickname(_, _, host) = &prefix {
                    if !host.is_empty() {
                        user.hostname = Some(host.clone());
                    }
                }
            }

            let chan = self.channels.get_mut(&chan_key).unwrap();
            chan.users.insert(user_key.clone());
            let modes = chan.prefixes.entry(user_key).or_default();
            for sigil in sigils.chars() {
                if let Some(mode) = params.mode_for_prefix(sigil) {
                    modes.insert(mode);
                }
            }
        }
        Vec::new()
    }

    fn on_names_end(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        if let Some(channel) = msg.param(1) {
            let chan_key = Self::norm(params, channel);
            if let Some(chan) = self.channels.get_mut(&chan_key) {
                chan.receiving_names = false;
            }
        }
        Vec::new()
    }

    fn on_who_reply(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        // 352: <me> <channel> <user> <host> <server> <nick> <flags> :<hop> <realname>
        let (Some(username), Some(host), Some(nick), Some(flags)) = (
            msg.param(2),
            msg.param(3),
            msg.param(5),
            msg.param(6),
        ) else {
            return Vec::new();
        };
        let user_key = self.ensure_user(params, nick);
        if let Some(user) = self.users.get_mut(&user_key) {
            user.username = Some(username.to_string());
            user.hostname = Some(host.to_string());
            user.away = flags.starts_with('G');
            user.realname = msg
                .param(7)
                .and_then(|t| t.split_once(' '))
                .map(|(_, realname)| realname.to_string());
        }
        Vec::new()
    }

    fn on_away(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        if let Some(key) = self.sight_prefix(params, msg) {
            if let Some(user) = self.users.get_mut(&key) {
                user.away = msg.param(0).is_some_and(|r| !r.is_empty());
            }
        }
        Vec::new()
    }

    fn on_account(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        if let Some(key) = self.sight_prefix(params, msg) {
            if let Some(user) = self.users.get_mut(&key) {
                let account = msg.param(0).unwrap_or("*");
                user.identified = account != "*";
                user.account = (account != "*").then(|| account.to_string());
            }
        }
        Vec::new()
    }

    fn on_chghost(&mut self, params: &ProtocolParameters, msg: &Message) -> Vec<Event> {
        if let Some(key) = self.sight_prefix(params, msg) {
            if let Some(user) = self.users.get_mut(&key) {
                user.username = msg.param(0).map(str::to_string);
                user.hostname = msg.param(1).map(str::to_string);
            }
        }
        Vec::new()
    }

    fn on_mon_change(
        &mut self,
        params: &ProtocolParameters,
        msg: &Message,
        online: bool,
    ) -> Vec<Event> {
        // 730/731: <me> :target[!user@host],...
        let Some(targets) = msg.param(1) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for target in targets.split(',') {
            let prefix = Prefix::new_from_str(target.trim());
            let Some(nick) = prefix.nick().map(str::to_string) else {
                continue;
            };
            if online {
                let key = self.ensure_user(params, &nick);
                if let Some(user) = self.users.get_mut(&key) {
                    if let Some(username) = prefix.user() {
                        user.username = Some(username.to_string());
                    }
                    if let Prefix::Nickname(_, _, host) = &prefix {
                        if !host.is_empty() {
                            user.hostname = Some(host.clone());
                        }
                    }
                }
                events.push(Event::UserOnline { nickname: nick });
            } else {
                let key = Self::norm(params, &nick);
                self.gc_user(&key);
                events.push(Event::UserOffline { nickname: nick });
            }
        }
        events
    }
}

/// Apply-order helper used by tests and handlers.
pub fn changes_to_strings(changes: &[ModeChange]) -> Vec<String> {
    changes
        .iter()
        .map(|c| {
            let sign = if c.is_set() { '+' } else { '-' };
            match c.arg() {
                Some(arg) => format!("{}{} {}", sign, c.mode(), arg),
                None => format!("{}{}", sign, c.mode()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProtocolParameters {
        ProtocolParameters::default()
    }

    fn msg(line: &str) -> Message {
        line.parse().unwrap()
    }

    fn joined_tracker() -> (Tracker, ProtocolParameters) {
        let p = params();
        let mut t = Tracker::new("me");
        t.handle(&p, &msg(":me!u@h JOIN :#Chan"));
        (t, p)
    }

    #[test]
    fn test_self_join_creates_channel() {
        let (t, p) = joined_tracker();
        let chan = t.channel(&p, "#chan").unwrap();
        assert_eq!(chan.name, "#Chan");
        assert!(chan.has_member("me"));
        assert!(t.user(&p, "me").is_some());
    }

    #[test]
    fn test_case_insensitive_join_single_entry() {
        let (mut t, p) = joined_tracker();
        let events = t.handle(&p, &msg(":Other!u@h JOIN #CHAN"));
        assert_eq!(
            events,
            vec![Event::Join {
                channel: "#CHAN".into(),
                who: "Other".into()
            }]
        );
        assert_eq!(t.channels().count(), 1);
        let chan = t.channel(&p, "#chan").unwrap();
        assert_eq!(chan.len(), 2);
        assert!(chan.has_member("other"));
    }

    #[test]
    fn test_join_for_unjoined_channel_ignored() {
        let p = params();
        let mut t = Tracker::new("me");
        let events = t.handle(&p, &msg(":x!u@h JOIN #elsewhere"));
        assert!(events.is_empty());
        assert!(t.channel(&p, "#elsewhere").is_none());
        assert!(t.user(&p, "x").is_none());
    }

    #[test]
    fn test_part_removes_member_and_gcs_user() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        let events = t.handle(&p, &msg(":Other!u@h PART #chan :bye"));
        assert_eq!(
            events,
            vec![Event::Part {
                channel: "#chan".into(),
                who: "Other".into(),
                reason: Some("bye".into())
            }]
        );
        assert!(!t.channel(&p, "#chan").unwrap().has_member("other"));
        assert!(t.user(&p, "other").is_none());
    }

    #[test]
    fn test_self_part_drops_channel() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.handle(&p, &msg(":me!u@h PART #chan"));
        assert!(t.channel(&p, "#chan").is_none());
        assert!(t.user(&p, "other").is_none());
    }

    #[test]
    fn test_kick_self_drops_channel() {
        let (mut t, p) = joined_tracker();
        let events = t.handle(&p, &msg(":op!o@h KICK #chan me :out"));
        assert_eq!(events.len(), 1);
        assert!(t.channel(&p, "#chan").is_none());
    }

    #[test]
    fn test_quit_removes_from_all_channels() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":me!u@h JOIN #two"));
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.handle(&p, &msg(":Other!u@h JOIN #two"));
        let events = t.handle(&p, &msg(":Other!u@h QUIT :gone"));
        assert_eq!(
            events,
            vec![Event::Quit {
                who: "Other".into(),
                reason: Some("gone".into())
            }]
        );
        assert!(t.user(&p, "other").is_none());
        assert!(!t.channel(&p, "#chan").unwrap().has_member("other"));
        assert!(!t.channel(&p, "#two").unwrap().has_member("other"));
    }

    #[test]
    fn test_monitored_user_survives_quit() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.add_monitored(&p, "Other");
        t.handle(&p, &msg(":Other!u@h QUIT"));
        assert!(t.user(&p, "other").is_some());
        t.remove_monitored(&p, "Other");
        assert!(t.user(&p, "other").is_none());
    }

    #[test]
    fn test_nick_rekeys_everything() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.handle(&p, &msg("MODE #chan +o Other").with_server());
        let events = t.handle(&p, &msg(":Other!u@h NICK NewNick"));
        assert_eq!(
            events,
            vec![Event::NickChange {
                old: "Other".into(),
                new: "NewNick".into()
            }]
        );
        assert!(t.user(&p, "other").is_none());
        assert_eq!(t.user(&p, "newnick").unwrap().nickname, "NewNick");
        let chan = t.channel(&p, "#chan").unwrap();
        assert!(chan.has_member("newnick"));
        assert!(chan.prefix_modes("newnick").unwrap().contains(&'o'));
    }

    #[test]
    fn test_self_nick_change() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":me!u@h NICK me2"));
        assert_eq!(t.own_nick(), "me2");
        assert!(t.is_self(&p, "ME2"));
    }

    #[test]
    fn test_names_population_and_prefixes() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 353 me = #chan :me @op +voiced plain"));
        t.handle(&p, &msg(":srv 366 me #chan :End of /NAMES list"));
        let chan = t.channel(&p, "#chan").unwrap();
        assert_eq!(chan.len(), 4);
        assert!(chan.prefix_modes("op").unwrap().contains(&'o'));
        assert!(chan.prefix_modes("voiced").unwrap().contains(&'v'));
        assert_eq!(t.display_prefix(&p, "#chan", "op"), Some('@'));
        assert_eq!(t.display_prefix(&p, "#chan", "plain"), None);
    }

    #[test]
    fn test_names_multi_prefix_and_userhost() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 353 me = #chan :@+both!user@host.example"));
        let chan = t.channel(&p, "#chan").unwrap();
        let modes = chan.prefix_modes("both").unwrap();
        assert!(modes.contains(&'o') && modes.contains(&'v'));
        let user = t.user(&p, "both").unwrap();
        assert_eq!(user.username.as_deref(), Some("user"));
        assert_eq!(user.hostname.as_deref(), Some("host.example"));
    }

    #[test]
    fn test_fresh_names_burst_replaces_members() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 353 me = #chan :me old"));
        t.handle(&p, &msg(":srv 366 me #chan :End"));
        t.handle(&p, &msg(":srv 353 me = #chan :me new"));
        t.handle(&p, &msg(":srv 366 me #chan :End"));
        let chan = t.channel(&p, "#chan").unwrap();
        assert!(chan.has_member("new"));
        assert!(!chan.has_member("old"));
        assert!(t.user(&p, "old").is_none());
    }

    #[test]
    fn test_mode_scenario_with_prefix_and_chanmodes() {
        let mut p = params();
        p.apply_token("PREFIX=(ohv)@%+");
        p.apply_token("CHANMODES=b,k,l,imnpst");
        let mut t = Tracker::new("me");
        t.handle(&p, &msg(":me!u@h JOIN #c"));
        t.handle(&p, &msg(":srv 353 me = #c :me nickA nickB"));

        let events = t.handle(&p, &msg(":srv MODE #c +oll-v nickA 42 nickB"));
        let Event::ModeChange { changes, .. } = &events[0] else {
            panic!("expected mode change event");
        };
        assert_eq!(
            changes_to_strings(changes),
            vec!["+o nickA", "+l 42", "-v nickB"]
        );

        let chan = t.channel(&p, "#c").unwrap();
        assert!(chan.prefix_modes("nicka").unwrap().contains(&'o'));
        assert_eq!(chan.modes.get(&'l'), Some(&ModeValue::Arg("42".into())));
        assert!(!chan
            .prefix_modes("nickb")
            .is_some_and(|m| m.contains(&'v')));
    }

    #[test]
    fn test_list_mode_accumulates() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv MODE #chan +b *!*@bad.example"));
        t.handle(&p, &msg(":srv MODE #chan +b *!*@worse.example"));
        t.handle(&p, &msg(":srv MODE #chan -b *!*@bad.example"));
        let chan = t.channel(&p, "#chan").unwrap();
        assert_eq!(
            chan.modes.get(&'b'),
            Some(&ModeValue::List(vec!["*!*@worse.example".into()]))
        );
    }

    #[test]
    fn test_topic_via_numerics_and_command() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 332 me #chan :old topic"));
        t.handle(&p, &msg(":srv 333 me #chan setter!u@h 1700000000"));
        {
            let chan = t.channel(&p, "#chan").unwrap();
            assert_eq!(chan.topic.as_deref(), Some("old topic"));
            assert_eq!(chan.topic_setter.as_deref(), Some("setter"));
            assert!(chan.topic_time.is_some());
        }

        let events = t.handle(&p, &msg(":changer!u@h TOPIC #chan :new topic"));
        assert_eq!(
            events,
            vec![Event::TopicChange {
                channel: "#chan".into(),
                by: Some("changer".into()),
                topic: "new topic".into()
            }]
        );
        let chan = t.channel(&p, "#chan").unwrap();
        assert_eq!(chan.topic.as_deref(), Some("new topic"));
    }

    #[test]
    fn test_who_reply_backfills_user() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 353 me = #chan :me target"));
        t.handle(
            &p,
            &msg(":srv 352 me #chan ident host.example srv target G :0 Real Name"),
        );
        let user = t.user(&p, "target").unwrap();
        assert_eq!(user.username.as_deref(), Some("ident"));
        assert_eq!(user.hostname.as_deref(), Some("host.example"));
        assert_eq!(user.realname.as_deref(), Some("Real Name"));
        assert!(user.away);
    }

    #[test]
    fn test_away_and_account_notify() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.handle(&p, &msg(":Other!u@h AWAY :brb"));
        assert!(t.user(&p, "other").unwrap().away);
        t.handle(&p, &msg(":Other!u@h AWAY"));
        assert!(!t.user(&p, "other").unwrap().away);

        t.handle(&p, &msg(":Other!u@h ACCOUNT services-name"));
        let user = t.user(&p, "other").unwrap();
        assert!(user.identified);
        assert_eq!(user.account.as_deref(), Some("services-name"));
        t.handle(&p, &msg(":Other!u@h ACCOUNT *"));
        assert!(!t.user(&p, "other").unwrap().identified);
    }

    #[test]
    fn test_chghost() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan"));
        t.handle(&p, &msg(":Other!u@h CHGHOST newuser new.host"));
        let user = t.user(&p, "other").unwrap();
        assert_eq!(user.username.as_deref(), Some("newuser"));
        assert_eq!(user.hostname.as_deref(), Some("new.host"));
    }

    #[test]
    fn test_monitor_numerics() {
        let p = params();
        let mut t = Tracker::new("me");
        t.add_monitored(&p, "friend");
        let events = t.handle(&p, &msg(":srv 730 me :friend!u@h,pal!x@y"));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::UserOnline { nickname } if nickname == "friend"));
        assert!(t.user(&p, "friend").is_some());

        let events = t.handle(&p, &msg(":srv 731 me :friend"));
        assert!(matches!(&events[0], Event::UserOffline { nickname } if nickname == "friend"));
        // Still monitored, so the user record stays.
        assert!(t.user(&p, "friend").is_some());
    }

    #[test]
    fn test_extended_join_account() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":Other!u@h JOIN #chan account-name :Real Name"));
        let user = t.user(&p, "other").unwrap();
        assert!(user.identified);
        assert_eq!(user.account.as_deref(), Some("account-name"));
        assert_eq!(user.realname.as_deref(), Some("Real Name"));
    }

    #[test]
    fn test_rekey_under_new_casemapping() {
        let (mut t, mut p) = joined_tracker();
        t.handle(&p, &msg(":User[x]!u@h JOIN #chan"));
        assert!(t.user(&p, "user{x}").is_some());
        p.apply_token("CASEMAPPING=ascii");
        t.rekey(&p);
        assert!(t.user(&p, "user[x]").is_some());
        assert!(t.user(&p, "user{x}").is_none());
    }

    #[test]
    fn test_no_dangling_membership_references() {
        let (mut t, p) = joined_tracker();
        t.handle(&p, &msg(":srv 353 me = #chan :me a b c"));
        t.handle(&p, &msg(":a!u@h QUIT"));
        for chan in t.channels() {
            for member in chan.members() {
                assert!(t.users.contains_key(member), "dangling member {}", member);
            }
        }
    }

    // Test helper: attach a server prefix to a prefix-less message.
    trait WithServer {
        fn with_server(self) -> Message;
    }
    impl WithServer for Message {
        fn with_server(mut self) -> Message {
            self.prefix = Some(Prefix::ServerName("srv.example".into()));
            self
        }
    }
}
