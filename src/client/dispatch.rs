//! Per-message dispatch.
//!
//! [`Session`] holds everything a connection knows: registration and
//! capability machines, protocol parameters, tracked state, pending
//! requests and the feature set. Each inbound message runs through a
//! fixed order: tag preprocessing, core protocol handling, subscribed
//! feature handlers, then high-level event dispatch. Handlers for one
//! message run sequentially, so state mutations compose
//! deterministically; sends they queue leave in dispatch order.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::caps::{CapNegotiator, CapTransition, Capability};
use crate::ctcp::Ctcp;
use crate::error::ClientError;
use crate::event::Event;
use crate::features::{CapOutcome, CapRequest, Context, FeatureSet};
use crate::isupport::ProtocolParameters;
use crate::message::Message;
use crate::prefix::Prefix;
use crate::state::Registration;
use crate::track::Tracker;

use super::requests::PendingRequests;

/// Out-of-band outcomes of handling one message.
#[derive(Debug)]
pub(crate) enum Status {
    /// 001 arrived; the connection is registered.
    Registered,
    /// A capability deferred its resolution; arm a timeout for it.
    CapDeferred(String),
    /// This connection attempt is over (bad password, exhausted
    /// nicknames, required authentication failed).
    Fatal(ClientError),
}

/// Everything produced by one dispatched message.
#[derive(Debug, Default)]
pub(crate) struct Output {
    /// Messages to put on the wire, in order.
    pub outbound: Vec<Message>,
    /// Events for the application, in order.
    pub events: Vec<Event>,
    /// Lifecycle changes for the connection loop.
    pub statuses: Vec<Status>,
}

/// Numerics the core understands well enough not to call unknown.
fn is_known_numeric(code: u16) -> bool {
    matches!(
        code,
        1..=5
            | 250..=266
            | 301..=306
            | 311..=319
            | 324
            | 329..=333
            | 352..=353
            | 366
            | 369
            | 372..=376
            | 396
            | 421
            | 432..=437
            | 451
            | 462
            | 464..=465
            | 671
            | 730..=731
            | 900..=908
    )
}

/// Commands the core path handles itself.
fn is_core_command(command: &str) -> bool {
    matches!(
        command,
        "PING" | "PONG" | "CAP" | "ERROR" | "PRIVMSG" | "NOTICE" | "INVITE"
    )
}

/// The full protocol state of one connection.
pub(crate) struct Session {
    pub registration: Registration,
    pub caps: CapNegotiator,
    pub params: ProtocolParameters,
    pub tracker: Tracker,
    pub pending: PendingRequests,
    features: FeatureSet,
    /// Which features asked for each capability.
    requested_by: HashMap<String, Vec<usize>>,
}

impl Session {
    pub fn new(registration: Registration, features: FeatureSet) -> Self {
        let tracker = Tracker::new(registration.nickname());
        Session {
            registration,
            caps: CapNegotiator::new(),
            params: ProtocolParameters::default(),
            tracker,
            pending: PendingRequests::default(),
            features,
            requested_by: HashMap::new(),
        }
    }

    /// Reset per-connection state for a fresh attempt. Pending requests
    /// resolve with `Disconnected`.
    pub fn reset_connection(&mut self) {
        self.registration.reset();
        self.caps = CapNegotiator::new();
        self.params = ProtocolParameters::default();
        self.tracker.clear();
        self.tracker.set_own_nick(self.registration.nickname());
        self.requested_by.clear();
        self.pending.disconnect_all();
    }

    /// Messages opening a connection: PASS (if set) then `CAP LS`.
    pub fn start(&mut self) -> Vec<Message> {
        let mut out = self.registration.start();
        out.push(self.caps.begin());
        out
    }

    /// The server never answered `CAP LS`; register without
    /// capabilities.
    pub fn cap_ls_timed_out(&mut self) -> Vec<Message> {
        if self.caps.negotiating() || self.registration.is_registered() {
            return Vec::new();
        }
        debug!("no CAP response; registering without capabilities");
        self.registration.introduce()
    }

    /// A deferred capability ran out of time.
    pub async fn cap_negotiation_timed_out(&mut self, name: &str) -> Output {
        let mut out = Output::default();
        warn!(cap = name, "capability negotiation timed out");
        self.caps.resolve(name, false);
        let mut cap_results = Vec::new();
        let nickname = self.registration.nickname().to_string();
        let indices = self.requested_by.get(name).cloned().unwrap_or_default();
        for idx in indices {
            let Session {
                params,
                tracker,
                caps,
                features,
                ..
            } = self;
            let mut ctx = Context::new(
                params,
                tracker,
                caps,
                &nickname,
                &mut out.outbound,
                &mut out.events,
                &mut cap_results,
            );
            features.get_mut(idx).cap_disabled(&mut ctx, name).await;
        }
        out.events.push(Event::CapDisabled {
            name: name.to_string(),
        });
        self.apply_cap_results(cap_results, &mut out);
        self.finish_caps_if_settled(&mut out);
        out
    }

    /// Dispatch one inbound message.
    pub async fn handle_message(&mut self, msg: &Message) -> Output {
        let mut out = Output::default();
        let mut cap_results: Vec<(String, bool)> = Vec::new();

        // Tag preprocessing: normalized metadata is exposed through the
        // message accessors; a bad timestamp is worth a note.
        if msg.tag("time").is_some() && msg.server_time().is_none() {
            debug!(tag = ?msg.tag("time"), "unparsable server-time tag");
        }

        self.handle_core(msg, &mut out, &mut cap_results).await;

        // Subscribed feature handlers, in linearization order.
        let nickname = self.registration.nickname().to_string();
        let indices = self.features.handlers_for_message(&msg.command);
        for idx in indices {
            let Session {
                params,
                tracker,
                caps,
                features,
                ..
            } = self;
            let mut ctx = Context::new(
                params,
                tracker,
                caps,
                &nickname,
                &mut out.outbound,
                &mut out.events,
                &mut cap_results,
            );
            if let Err(err) = features.get_mut(idx).on_raw(&mut ctx, msg).await {
                if matches!(err, ClientError::AuthenticationFailed(_)) {
                    out.statuses.push(Status::Fatal(err));
                } else {
                    warn!(%err, command = %msg.command, "feature handler failed");
                }
            }
        }

        self.apply_cap_results(cap_results, &mut out);
        self.finish_caps_if_settled(&mut out);

        // High-level chat events derived after the raw handlers ran.
        self.derive_message_events(msg, &mut out);

        // Keep the registration machine's nickname in sync with ours.
        for event in &out.events {
            if let Event::NickChange { old, new } = event {
                if self.params.casemapping.eq(old, self.registration.nickname()) {
                    self.registration.set_nickname(new);
                }
            }
        }

        if self.is_unknown(msg) {
            out.events.push(Event::Unknown(msg.clone()));
        }

        self.dispatch_events(&mut out).await;
        out
    }

    async fn handle_core(
        &mut self,
        msg: &Message,
        out: &mut Output,
        cap_results: &mut Vec<(String, bool)>,
    ) {
        match msg.command.as_str() {
            "PING" => {
                let token = msg.params.last().cloned().unwrap_or_default();
                out.outbound.push(Message::pong(token));
            }
            "CAP" => {
                let transition = self.caps.on_cap_message(msg);
                self.handle_cap_transition(transition, out, cap_results)
                    .await;
            }
            "ERROR" => {
                warn!(reason = ?msg.param(0), "server sent ERROR");
            }
            _ => {}
        }

        if let Some(code) = msg.numeric() {
            self.pending.handle_numeric(&self.params, msg);
            match code {
                1 => {
                    if self.caps.negotiating() && !self.caps.finished() {
                        warn!("welcome before CAP END; reconciling");
                    }
                    self.registration.on_welcome(msg);
                    self.tracker.set_own_nick(self.registration.nickname());
                    out.events.push(Event::Connect);
                    out.statuses.push(Status::Registered);
                }
                421 => {
                    // ERR_UNKNOWNCOMMAND for CAP: no capability support.
                    if msg.param(1) == Some("CAP") && !self.registration.is_registered() {
                        out.outbound.extend(self.registration.introduce());
                    }
                }
                432 | 433 if !self.registration.is_registered() => {
                    match self.registration.on_nick_rejected() {
                        Ok(nick_msg) => out.outbound.push(nick_msg),
                        Err(err) => out.statuses.push(Status::Fatal(err)),
                    }
                }
                464 | 465 => {
                    out.statuses
                        .push(Status::Fatal(self.registration.on_rejected(code, msg)));
                }
                _ => {}
            }
        }
    }

    async fn handle_cap_transition(
        &mut self,
        transition: CapTransition,
        out: &mut Output,
        cap_results: &mut Vec<(String, bool)>,
    ) {
        match transition {
            CapTransition::None => {}
            CapTransition::LsComplete => {
                let advertised: Vec<Capability> = self.caps.advertised().cloned().collect();
                let mut to_request = Vec::new();
                for cap in advertised {
                    out.events.push(Event::CapAvailable {
                        name: cap.name.clone(),
                        value: cap.value.clone(),
                    });
                    let mut wanted: Option<String> = None;
                    let mut requesters = Vec::new();
                    for (idx, feature) in self.features.iter_mut().enumerate() {
                        match feature.cap_available(&cap.name, cap.value.as_deref()) {
                            CapRequest::Ignore => {}
                            CapRequest::Request => {
                                wanted.get_or_insert_with(|| cap.name.clone());
                                requesters.push(idx);
                            }
                            CapRequest::RequestWithValue(value) => {
                                wanted = Some(format!("{}={}", cap.name, value));
                                requesters.push(idx);
                            }
                        }
                    }
                    if let Some(entry) = wanted {
                        self.requested_by.insert(cap.name.clone(), requesters);
                        to_request.push(entry);
                    }
                }
                if to_request.is_empty() {
                    self.finish_caps_if_settled(out);
                } else {
                    out.outbound.extend(self.caps.request(&to_request));
                }
            }
            CapTransition::Acked(names) => {
                for name in names {
                    self.handle_cap_acked(&name, out, cap_results).await;
                }
                self.finish_caps_if_settled(out);
            }
            CapTransition::Nacked(names) | CapTransition::Disabled(names) => {
                for name in names {
                    self.notify_cap_disabled(&name, out, cap_results).await;
                    out.events.push(Event::CapDisabled { name });
                }
                self.finish_caps_if_settled(out);
            }
        }
    }

    async fn handle_cap_acked(
        &mut self,
        name: &str,
        out: &mut Output,
        cap_results: &mut Vec<(String, bool)>,
    ) {
        let nickname = self.registration.nickname().to_string();
        let indices = self.requested_by.get(name).cloned().unwrap_or_default();
        let mut outcome = CapOutcome::Negotiated;
        for idx in indices {
            let Session {
                params,
                tracker,
                caps,
                features,
                ..
            } = self;
            let mut ctx = Context::new(
                params,
                tracker,
                caps,
                &nickname,
                &mut out.outbound,
                &mut out.events,
                cap_results,
            );
            match features.get_mut(idx).cap_enabled(&mut ctx, name).await {
                CapOutcome::Negotiated => {}
                CapOutcome::Negotiating => outcome = CapOutcome::Negotiating,
                CapOutcome::Failed => {
                    outcome = CapOutcome::Failed;
                    break;
                }
            }
        }
        match outcome {
            CapOutcome::Negotiated => {
                out.events.push(Event::CapEnabled {
                    name: name.to_string(),
                });
            }
            CapOutcome::Negotiating => {
                self.caps.defer(name);
                out.statuses.push(Status::CapDeferred(name.to_string()));
            }
            CapOutcome::Failed => {
                out.outbound.push(self.caps.reject(name));
                self.notify_cap_disabled(name, out, cap_results).await;
                out.events.push(Event::CapDisabled {
                    name: name.to_string(),
                });
            }
        }
    }

    async fn notify_cap_disabled(
        &mut self,
        name: &str,
        out: &mut Output,
        cap_results: &mut Vec<(String, bool)>,
    ) {
        let nickname = self.registration.nickname().to_string();
        let indices = self.requested_by.get(name).cloned().unwrap_or_default();
        for idx in indices {
            let Session {
                params,
                tracker,
                caps,
                features,
                ..
            } = self;
            let mut ctx = Context::new(
                params,
                tracker,
                caps,
                &nickname,
                &mut out.outbound,
                &mut out.events,
                cap_results,
            );
            features.get_mut(idx).cap_disabled(&mut ctx, name).await;
        }
    }

    fn apply_cap_results(&mut self, cap_results: Vec<(String, bool)>, out: &mut Output) {
        for (name, success) in cap_results {
            self.caps.resolve(&name, success);
            out.events.push(if success {
                Event::CapEnabled { name }
            } else {
                Event::CapDisabled { name }
            });
        }
    }

    fn finish_caps_if_settled(&mut self, out: &mut Output) {
        if let Some(end) = self.caps.finish() {
            out.outbound.push(end);
            out.outbound.extend(self.registration.introduce());
        }
    }

    fn derive_message_events(&self, msg: &Message, out: &mut Output) {
        match msg.command.as_str() {
            "PRIVMSG" => {
                let (Some(by), Some(target), Some(text)) =
                    (msg.source_nickname(), msg.param(0), msg.param(1))
                else {
                    return;
                };
                let (_, bare_target) = self.params.split_statusmsg(target);
                if let Some(ctcp) = Ctcp::parse(text) {
                    out.events.push(Event::Ctcp {
                        by: by.to_string(),
                        target: target.to_string(),
                        command: ctcp.command,
                        params: ctcp.params,
                    });
                } else if self.params.is_channel_name(bare_target) {
                    out.events.push(Event::ChannelMessage {
                        channel: target.to_string(),
                        by: by.to_string(),
                        text: text.to_string(),
                    });
                } else {
                    out.events.push(Event::PrivateMessage {
                        by: by.to_string(),
                        text: text.to_string(),
                    });
                }
            }
            "NOTICE" => {
                let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
                    return;
                };
                let by = match &msg.prefix {
                    Some(Prefix::Nickname(nick, _, _)) => nick.clone(),
                    Some(Prefix::ServerName(name)) => name.clone(),
                    None => String::new(),
                };
                if let Some(ctcp) = Ctcp::parse(text) {
                    out.events.push(Event::CtcpReply {
                        by,
                        target: target.to_string(),
                        command: ctcp.command,
                        params: ctcp.params,
                    });
                } else {
                    out.events.push(Event::Notice {
                        target: target.to_string(),
                        by,
                        text: text.to_string(),
                    });
                }
            }
            "INVITE" => {
                let (Some(by), Some(channel)) = (msg.source_nickname(), msg.param(1)) else {
                    return;
                };
                out.events.push(Event::Invite {
                    channel: channel.to_string(),
                    by: by.to_string(),
                });
            }
            _ => {}
        }
    }

    fn is_unknown(&self, msg: &Message) -> bool {
        if is_core_command(&msg.command) || self.features.handles(&msg.command) {
            return false;
        }
        match msg.numeric() {
            Some(code) => !is_known_numeric(code),
            None => true,
        }
    }

    /// Run queued events past every feature, in order. Features may emit
    /// further events; those are appended and dispatched too.
    async fn dispatch_events(&mut self, out: &mut Output) {
        let nickname = self.registration.nickname().to_string();
        let mut cap_results = Vec::new();
        let mut i = 0;
        while i < out.events.len() {
            let event = out.events[i].clone();
            let mut emitted = Vec::new();
            for idx in 0..self.features.len() {
                let Session {
                    params,
                    tracker,
                    caps,
                    features,
                    ..
                } = self;
                let mut ctx = Context::new(
                    params,
                    tracker,
                    caps,
                    &nickname,
                    &mut out.outbound,
                    &mut emitted,
                    &mut cap_results,
                );
                if let Err(err) = features.get_mut(idx).on_event(&mut ctx, &event).await {
                    warn!(%err, "feature event handler failed");
                }
            }
            out.events.append(&mut emitted);
            i += 1;
        }
        self.apply_cap_results(cap_results, out);
        self.finish_caps_if_settled(out);
    }
}
