//! IRCv3 capability negotiation.
//!
//! [`CapNegotiator`] is a sans-IO bookkeeping machine: it consumes
//! parsed CAP messages and produces messages to send, while the
//! dispatcher consults features about which advertised capabilities to
//! request and how acknowledged ones resolve. `CAP END` is emitted
//! exactly once per connection, only after every requested capability
//! has settled.
//!
//! # Reference
//! - <https://ircv3.net/specs/extensions/capability-negotiation>

use std::collections::BTreeMap;

use tracing::debug;

use crate::message::Message;

/// The CAP version we advertise in `CAP LS`.
pub const CAP_LS_VERSION: &str = "302";

/// Budget for one `CAP REQ` line (payload limit minus CRLF).
const REQ_LINE_BUDGET: usize = 510;

/// Negotiation state of a single capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapState {
    /// Advertised by the server, not requested.
    Available,
    /// Requested, awaiting ACK/NAK.
    Requested,
    /// Acknowledged and active.
    Enabled,
    /// Acknowledged; a feature is still negotiating (e.g. SASL).
    Negotiating,
    /// Rejected, or negotiation failed.
    Failed,
    /// Explicitly disabled after being acknowledged.
    Disabled,
}

/// A server-advertised capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capability {
    /// Capability name (e.g. `sasl`).
    pub name: String,
    /// Advertised value (e.g. `PLAIN,EXTERNAL` for `sasl`).
    pub value: Option<String>,
    /// Current negotiation state.
    pub state: CapState,
}

/// What a CAP message from the server meant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapTransition {
    /// Nothing actionable (continuation line, unknown subcommand).
    None,
    /// The capability list is complete; time to decide requests.
    LsComplete,
    /// These capabilities were acknowledged.
    Acked(Vec<String>),
    /// These capabilities were rejected.
    Nacked(Vec<String>),
    /// These previously-acknowledged capabilities were disabled.
    Disabled(Vec<String>),
}

/// Sans-IO capability negotiation bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct CapNegotiator {
    caps: BTreeMap<String, Capability>,
    saw_cap: bool,
    ls_complete: bool,
    end_sent: bool,
}

impl CapNegotiator {
    /// Create a fresh negotiator for a new connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The message opening negotiation: `CAP LS 302`.
    pub fn begin(&self) -> Message {
        Message::cap("LS", Some(CAP_LS_VERSION.to_string()))
    }

    /// Feed a `CAP` message from the server.
    pub fn on_cap_message(&mut self, msg: &Message) -> CapTransition {
        // CAP <client> <subcommand> [*] <caps>
        let subcommand = msg.param(1).unwrap_or("");
        match subcommand.to_ascii_uppercase().as_str() {
            "LS" => {
                self.saw_cap = true;
                let (more, caps) = if msg.param(2) == Some("*") {
                    (true, msg.param(3).unwrap_or(""))
                } else {
                    (false, msg.param(2).unwrap_or(""))
                };
                for cap in caps.split_whitespace() {
                    let (name, value) = match cap.split_once('=') {
                        Some((n, v)) => (n, Some(v.to_string())),
                        None => (cap, None),
                    };
                    self.caps.insert(
                        name.to_string(),
                        Capability {
                            name: name.to_string(),
                            value,
                            state: CapState::Available,
                        },
                    );
                }
                if more {
                    CapTransition::None
                } else {
                    self.ls_complete = true;
                    CapTransition::LsComplete
                }
            }
            "ACK" => {
                let caps = msg.param(2).unwrap_or("");
                let mut enabled = Vec::new();
                let mut disabled = Vec::new();
                for cap in caps.split_whitespace() {
                    if let Some(name) = cap.strip_prefix('-') {
                        self.set_state(name, CapState::Disabled);
                        disabled.push(name.to_string());
                    } else {
                        self.set_state(cap, CapState::Enabled);
                        enabled.push(cap.to_string());
                    }
                }
                if !disabled.is_empty() && enabled.is_empty() {
                    CapTransition::Disabled(disabled)
                } else {
                    CapTransition::Acked(enabled)
                }
            }
            "NAK" => {
                let caps = msg.param(2).unwrap_or("");
                let mut rejected = Vec::new();
                for cap in caps.split_whitespace() {
                    self.set_state(cap, CapState::Failed);
                    rejected.push(cap.to_string());
                }
                CapTransition::Nacked(rejected)
            }
            other => {
                debug!(subcommand = other, "ignoring CAP subcommand");
                CapTransition::None
            }
        }
    }

    /// All advertised capabilities.
    pub fn advertised(&self) -> impl Iterator<Item = &Capability> {
        self.caps.values()
    }

    /// Look up one capability.
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.caps.get(name)
    }

    /// Whether a capability is currently enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(
            self.caps.get(name).map(|c| c.state),
            Some(CapState::Enabled) | Some(CapState::Negotiating)
        )
    }

    /// Mark capabilities as requested and build the `CAP REQ` lines,
    /// batched to fit the line budget. An entry may carry a value
    /// (`name=value`); state is keyed by the bare name.
    pub fn request(&mut self, names: &[String]) -> Vec<Message> {
        let mut lines = Vec::new();
        let mut batch = String::new();
        for name in names {
            let key = name.split('=').next().unwrap_or(name).to_string();
            self.set_state(&key, CapState::Requested);
            if !batch.is_empty() && "CAP REQ :".len() + batch.len() + 1 + name.len() > REQ_LINE_BUDGET
            {
                lines.push(Message::cap("REQ", Some(std::mem::take(&mut batch))));
            }
            if !batch.is_empty() {
                batch.push(' ');
            }
            batch.push_str(name);
        }
        if !batch.is_empty() {
            lines.push(Message::cap("REQ", Some(batch)));
        }
        lines
    }

    /// A feature deferred resolution of an acknowledged capability.
    pub fn defer(&mut self, name: &str) {
        self.set_state(name, CapState::Negotiating);
    }

    /// Resolve a deferred capability (`capability_negotiated`).
    pub fn resolve(&mut self, name: &str, success: bool) {
        let state = if success {
            CapState::Enabled
        } else {
            CapState::Failed
        };
        self.set_state(name, state);
    }

    /// A feature rejected an acknowledged capability; disable it on the
    /// server too.
    pub fn reject(&mut self, name: &str) -> Message {
        self.set_state(name, CapState::Failed);
        Message::cap("REQ", Some(format!("-{}", name)))
    }

    /// Whether any capability still awaits ACK/NAK or deferred
    /// resolution.
    pub fn pending(&self) -> bool {
        self.caps
            .values()
            .any(|c| matches!(c.state, CapState::Requested | CapState::Negotiating))
    }

    /// Emit `CAP END` when negotiation has settled. Returns `None` if it
    /// is not time yet, or if END was already sent.
    pub fn finish(&mut self) -> Option<Message> {
        if self.saw_cap && self.ls_complete && !self.pending() && !self.end_sent {
            self.end_sent = true;
            Some(Message::cap("END", None))
        } else {
            None
        }
    }

    /// Whether `CAP END` has been emitted.
    pub fn finished(&self) -> bool {
        self.end_sent
    }

    /// Whether the server answered `CAP LS` at all.
    pub fn negotiating(&self) -> bool {
        self.saw_cap
    }

    fn set_state(&mut self, name: &str, state: CapState) {
        self.caps
            .entry(name.to_string())
            .or_insert_with(|| Capability {
                name: name.to_string(),
                value: None,
                state: CapState::Available,
            })
            .state = state;
    }
}
