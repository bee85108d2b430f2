//! Connection registration state machine.
//!
//! Sans-IO: consumes parsed replies, produces messages to send. The
//! client loop owns the timing (when to connect, when to give up);
//! capability negotiation runs alongside via [`crate::caps`] and gates
//! the NICK/USER introduction.

use rand::Rng;

use crate::error::ClientError;
use crate::message::Message;

/// Lifecycle of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, none being attempted.
    Disconnected,
    /// TCP/TLS connect in progress.
    Connecting,
    /// Transport up; negotiating capabilities.
    Capability,
    /// CAP END sent (or no CAP support); awaiting 001.
    Registering,
    /// 001 received; fully connected.
    Registered,
    /// Connection lost; waiting out the backoff timer.
    Reconnecting,
    /// User-initiated QUIT in flight.
    Closing,
}

/// How many nicknames we invent after the configured ones run out.
const MAX_RANDOM_NICKS: u32 = 3;

/// Drives PASS/NICK/USER and nickname fallback.
#[derive(Clone, Debug)]
pub struct Registration {
    nicknames: Vec<String>,
    username: String,
    realname: String,
    password: Option<String>,
    state: ConnectionState,
    nick_idx: usize,
    random_attempts: u32,
    current_nick: String,
    introduced: bool,
}

impl Registration {
    /// Create a registration machine.
    ///
    /// `nicknames` holds the primary nickname first, then the fallbacks
    /// tried on 433.
    pub fn new(
        nicknames: Vec<String>,
        username: String,
        realname: String,
        password: Option<String>,
    ) -> Self {
        let current_nick = nicknames.first().cloned().unwrap_or_default();
        Registration {
            nicknames,
            username,
            realname,
            password,
            state: ConnectionState::Disconnected,
            nick_idx: 0,
            random_attempts: 0,
            current_nick,
            introduced: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Force a lifecycle state (used by the connection loop for the
    /// transitions it owns: connecting, reconnecting, closing).
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// The nickname we currently hold or are trying to get.
    pub fn nickname(&self) -> &str {
        &self.current_nick
    }

    /// Record a confirmed nickname change.
    pub fn set_nickname(&mut self, nick: &str) {
        self.current_nick = nick.to_string();
    }

    /// Whether the 001 welcome has arrived.
    pub fn is_registered(&self) -> bool {
        self.state == ConnectionState::Registered
    }

    /// Reset for a fresh connection attempt.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.nick_idx = 0;
        self.random_attempts = 0;
        self.current_nick = self.nicknames.first().cloned().unwrap_or_default();
        self.introduced = false;
    }

    /// Transport is up: enter capability negotiation and emit PASS if
    /// configured. The caller sends `CAP LS` right after.
    pub fn start(&mut self) -> Vec<Message> {
        self.state = ConnectionState::Capability;
        self.password
            .as_ref()
            .map(|pass| Message::pass(pass.clone()))
            .into_iter()
            .collect()
    }

    /// Capability negotiation settled (CAP END sent, or the server
    /// never answered CAP LS): introduce ourselves.
    pub fn introduce(&mut self) -> Vec<Message> {
        self.state = ConnectionState::Registering;
        if self.introduced {
            return Vec::new();
        }
        self.introduced = true;
        vec![
            Message::nick(self.current_nick.clone()),
            Message::user(self.username.clone(), self.realname.clone()),
        ]
    }

    /// 001 welcome. The server's view of our nickname wins.
    pub fn on_welcome(&mut self, msg: &Message) {
        if let Some(nick) = msg.param(0) {
            if nick != "*" {
                self.current_nick = nick.to_string();
            }
        }
        self.state = ConnectionState::Registered;
    }

    /// 432/433 while registering: try the next nickname.
    ///
    /// Cycles through the configured fallbacks, then invents a few
    /// random-suffixed nicknames before giving up.
    pub fn on_nick_rejected(&mut self) -> Result<Message, ClientError> {
        self.nick_idx += 1;
        let next = if self.nick_idx < self.nicknames.len() {
            self.nicknames[self.nick_idx].clone()
        } else {
            if self.random_attempts >= MAX_RANDOM_NICKS {
                return Err(ClientError::RegistrationFailed(
                    "no nickname accepted by the server".to_string(),
                ));
            }
            self.random_attempts += 1;
            let base = self
                .nicknames
                .first()
                .map(String::as_str)
                .unwrap_or("irc");
            format!("{}{}", base, rand::thread_rng().gen_range(100..1000))
        };
        self.current_nick = next.clone();
        Ok(Message::nick(next))
    }

    /// 464 (bad password) or 465 (banned): terminal for this attempt.
    pub fn on_rejected(&self, numeric: u16, msg: &Message) -> ClientError {
        let reason = msg
            .params
            .last()
            .cloned()
            .unwrap_or_else(|| format!("registration rejected ({})", numeric));
        ClientError::RegistrationFailed(reason)
    }
}
