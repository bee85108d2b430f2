//! The IRC client: configuration, connection loop, and the cloneable
//! handle.
//!
//! One spawned task per client owns the transport and all protocol
//! state; the [`Client`] handle talks to it over a command channel and
//! the application consumes [`Event`]s from the event channel. Several
//! clients share one thread when spawned on the same
//! [`ClientPool`](pool::ClientPool).
//!
//! Handlers and handles never write to the socket directly: every send
//! goes through the loop's outbound queues, so wire order always equals
//! submission order per class, with chat traffic rate-limited by the
//! throttle.

pub mod builtin;
pub mod pool;
pub mod requests;
pub mod throttle;

mod dispatch;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::event::Event;
use crate::features::FeatureSet;
use crate::message::Message;
use crate::sasl::SASL_TIMEOUT;
use crate::state::{ConnectionState, Registration};
use crate::transport::{TlsConfig, Transport};

use self::builtin::{IsupportFeature, SaslConfig, SaslFeature, TrackingFeature};
use self::dispatch::{Output, Session, Status};
use self::requests::{WhoisInfo, WhowasInfo};
use self::throttle::Throttle;

/// Reconnect backoff floor.
const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
/// Reconnect backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(300);
/// A registered stretch at least this long resets the backoff.
const BACKOFF_STABLE: Duration = Duration::from_secs(60);
/// How long to wait for a CAP LS answer before registering without
/// capabilities.
const CAP_LS_TIMEOUT: Duration = Duration::from_secs(10);
/// Far-future placeholder for unarmed timers.
const NEVER: Duration = Duration::from_secs(86_400);

/// Client configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Primary nickname.
    pub nickname: String,
    /// Alternatives tried in order on 433.
    pub fallback_nicknames: Vec<String>,
    /// USER username; defaults to the nickname.
    pub username: Option<String>,
    /// USER realname; defaults to the nickname.
    pub realname: Option<String>,
    /// Server password (PASS, sent before NICK).
    pub password: Option<String>,
    /// Connect over TLS.
    pub tls: bool,
    /// Verify the server certificate.
    pub tls_verify: bool,
    /// PEM client certificate chain.
    pub tls_client_cert: Option<PathBuf>,
    /// PEM client key (defaults to the certificate file).
    pub tls_client_cert_key: Option<PathBuf>,
    /// Passphrase for an encrypted client key.
    pub tls_client_cert_password: Option<String>,
    /// Encoding label; UTF-8 with Latin-1 fallback by default.
    pub encoding: String,
    /// SASL mechanism override (`PLAIN`, `EXTERNAL`).
    pub sasl_mechanism: Option<String>,
    /// SASL account name.
    pub sasl_username: Option<String>,
    /// SASL password.
    pub sasl_password: Option<String>,
    /// SASL authorization identity.
    pub sasl_identity: Option<String>,
    /// Disconnect when authentication fails.
    pub sasl_required: bool,
    /// Inbound idle threshold before we PING the server.
    pub ping_timeout: Duration,
    /// Issue WHO after joining a channel.
    pub who_on_join: bool,
}

impl Config {
    /// A configuration with the defaults filled in.
    pub fn new(host: impl Into<String>, nickname: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            port: 6667,
            nickname: nickname.into(),
            fallback_nicknames: Vec::new(),
            username: None,
            realname: None,
            password: None,
            tls: false,
            tls_verify: true,
            tls_client_cert: None,
            tls_client_cert_key: None,
            tls_client_cert_password: None,
            encoding: "utf-8".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            sasl_identity: None,
            sasl_required: false,
            ping_timeout: Duration::from_secs(180),
            who_on_join: false,
        }
    }

    fn sasl_config(&self) -> SaslConfig {
        SaslConfig {
            mechanism: self.sasl_mechanism.clone(),
            username: self.sasl_username.clone(),
            password: self.sasl_password.clone(),
            identity: self.sasl_identity.clone(),
            has_client_cert: self.tls_client_cert.is_some(),
            required: self.sasl_required,
        }
    }

    fn tls_config(&self) -> Option<TlsConfig> {
        self.tls.then(|| TlsConfig {
            verify: self.tls_verify,
            client_cert: self.tls_client_cert.clone(),
            client_cert_key: self.tls_client_cert_key.clone(),
            client_cert_password: self.tls_client_cert_password.clone(),
        })
    }

    /// The built-in features fitting this configuration: tracking,
    /// ISUPPORT, and SASL when credentials are present.
    pub fn default_features(&self) -> Result<FeatureSet, crate::features::FeatureOrderError> {
        let mut features: Vec<Box<dyn crate::features::Feature>> = vec![
            Box::new(TrackingFeature::new(self.who_on_join)),
            Box::new(IsupportFeature),
        ];
        let sasl = self.sasl_config();
        if sasl.is_configured() {
            features.push(Box::new(SaslFeature::new(sasl)));
        }
        FeatureSet::featurize(features)
    }
}

/// Commands from the handle to the connection task.
enum Cmd {
    Send(Message),
    Join(String, Option<String>, oneshot::Sender<Result<(), ClientError>>),
    Part(String, Option<String>, oneshot::Sender<Result<(), ClientError>>),
    Whois(String, oneshot::Sender<Result<WhoisInfo, ClientError>>),
    Whowas(String, oneshot::Sender<Result<WhowasInfo, ClientError>>),
    Monitor(String),
    Unmonitor(String),
    Quit(Option<String>),
}

/// Cloneable handle to a running client.
///
/// Created by [`Client::connect`] or
/// [`ClientPool::connect`](pool::ClientPool::connect). All methods are
/// fire-and-forget unless they await a server answer.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl Client {
    /// Spawn a client on the current `LocalSet` and return the handle
    /// plus the event stream.
    ///
    /// Must be called from within a task running on a
    /// [`tokio::task::LocalSet`]; [`ClientPool`](pool::ClientPool)
    /// arranges that for you.
    pub fn connect(
        config: Config,
        features: FeatureSet,
    ) -> (Client, mpsc::UnboundedReceiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_local(run_client(config, features, cmd_rx, event_tx));
        (Client { cmd_tx }, event_rx)
    }

    fn command(&self, cmd: Cmd) -> Result<(), ClientError> {
        self.cmd_tx.send(cmd).map_err(|_| ClientError::Disconnected)
    }

    /// Send a raw message. Chat traffic is throttled; everything else
    /// leaves as soon as the loop gets to it.
    pub fn send_message(&self, msg: Message) -> Result<(), ClientError> {
        self.command(Cmd::Send(msg))
    }

    /// Send a PRIVMSG.
    pub fn privmsg(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.send_message(Message::privmsg(target, text))
    }

    /// Send a NOTICE.
    pub fn notice(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.send_message(Message::notice(target, text))
    }

    /// Request a nickname change.
    pub fn set_nickname(&self, nick: &str) -> Result<(), ClientError> {
        self.send_message(Message::nick(nick))
    }

    /// Join a channel. Fails with `AlreadyInChannel` if we are in it.
    pub async fn join(&self, channel: &str, key: Option<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Cmd::Join(channel.to_string(), key, tx))?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    /// Leave a channel. Fails with `NotInChannel` if we are not in it.
    pub async fn part(&self, channel: &str, reason: Option<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Cmd::Part(channel.to_string(), reason, tx))?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    /// WHOIS a nickname; resolves on the end-of-WHOIS numeric or times
    /// out after 30 seconds.
    pub async fn whois(&self, nick: &str) -> Result<WhoisInfo, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Cmd::Whois(nick.to_string(), tx))?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    /// WHOWAS a nickname.
    pub async fn whowas(&self, nick: &str) -> Result<WhowasInfo, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Cmd::Whowas(nick.to_string(), tx))?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    /// Watch a nickname with MONITOR; online/offline transitions arrive
    /// as [`Event::UserOnline`]/[`Event::UserOffline`].
    pub fn monitor(&self, nick: &str) -> Result<(), ClientError> {
        self.command(Cmd::Monitor(nick.to_string()))
    }

    /// Stop watching a nickname.
    pub fn unmonitor(&self, nick: &str) -> Result<(), ClientError> {
        self.command(Cmd::Unmonitor(nick.to_string()))
    }

    /// Quit and stop reconnecting.
    pub fn quit(&self, reason: Option<String>) -> Result<(), ClientError> {
        self.command(Cmd::Quit(reason))
    }
}

/// Exponential reconnect backoff with jitter.
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Backoff {
            next: BACKOFF_INITIAL,
        }
    }

    fn reset(&mut self) {
        self.next = BACKOFF_INITIAL;
    }

    fn delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (base * 2).min(BACKOFF_CAP);
        base.mul_f64(rand::thread_rng().gen_range(0.9..1.1))
    }
}

/// Commands that may go out before 001.
fn allowed_before_registration(msg: &Message) -> bool {
    matches!(
        msg.command.as_str(),
        "PASS" | "NICK" | "USER" | "CAP" | "AUTHENTICATE" | "PING" | "PONG" | "QUIT"
    )
}

/// Per-connection outbound plumbing.
struct Outbound {
    urgent: VecDeque<Message>,
    throttled: VecDeque<Message>,
    pre_registration: Vec<Message>,
    throttle: Throttle,
}

impl Outbound {
    fn new() -> Self {
        Outbound {
            urgent: VecDeque::new(),
            throttled: VecDeque::new(),
            pre_registration: Vec::new(),
            throttle: Throttle::default(),
        }
    }

    fn route(&mut self, msg: Message, registered: bool) {
        if !registered && !allowed_before_registration(&msg) {
            self.pre_registration.push(msg);
        } else if Throttle::applies_to(&msg) {
            self.throttled.push_back(msg);
        } else {
            self.urgent.push_back(msg);
        }
    }

    fn flush_pre_registration(&mut self) {
        for msg in std::mem::take(&mut self.pre_registration) {
            self.route(msg, true);
        }
    }

    /// Send everything currently admissible. Returns `Err` on transport
    /// failure.
    async fn flush(&mut self, transport: &mut Transport) -> crate::error::Result<()> {
        while let Some(msg) = self.urgent.pop_front() {
            send_logged(transport, msg).await?;
        }
        while !self.throttled.is_empty() {
            if self.throttle.try_acquire(Instant::now()).is_err() {
                break;
            }
            let msg = self.throttled.pop_front().unwrap();
            send_logged(transport, msg).await?;
        }
        Ok(())
    }

    fn next_ready(&mut self, now: Instant) -> Option<Instant> {
        if self.throttled.is_empty() {
            return None;
        }
        match self.throttle.delay_until_ready(now) {
            None => Some(now),
            Some(wait) => Some(now + wait),
        }
    }
}

async fn send_logged(transport: &mut Transport, msg: Message) -> crate::error::Result<()> {
    match transport.send(msg).await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Serialization rejections drop the one message; transport
            // faults propagate.
            match err {
                crate::error::ProtocolError::MalformedLine { .. }
                | crate::error::ProtocolError::MessageTooLong { .. } => {
                    warn!(%err, "dropping unsendable message");
                    Ok(())
                }
                other => Err(other),
            }
        }
    }
}

/// The connection task.
async fn run_client(
    config: Config,
    features: FeatureSet,
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    event_tx: mpsc::UnboundedSender<Event>,
) {
    let mut nicknames = vec![config.nickname.clone()];
    nicknames.extend(config.fallback_nicknames.iter().cloned());
    let registration = Registration::new(
        nicknames,
        config
            .username
            .clone()
            .unwrap_or_else(|| config.nickname.clone()),
        config
            .realname
            .clone()
            .unwrap_or_else(|| config.nickname.clone()),
        config.password.clone(),
    );
    let mut session = Session::new(registration, features);
    let mut backoff = Backoff::new();
    let mut monitored: Vec<String> = Vec::new();
    let tls_config = config.tls_config();

    loop {
        session.reset_connection();
        session
            .registration
            .set_state(ConnectionState::Connecting);
        debug!(host = %config.host, port = config.port, "connecting");

        let transport = Transport::connect(
            &config.host,
            config.port,
            tls_config.as_ref(),
            &config.encoding,
        )
        .await;

        let mut transport = match transport {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%err, "connection failed");
                let _ = event_tx.send(Event::Disconnect { expected: false });
                if wait_backoff(&mut backoff, &mut cmd_rx, &mut monitored).await {
                    return;
                }
                continue;
            }
        };

        let stop = run_connection(
            &config,
            &mut session,
            &mut transport,
            &mut cmd_rx,
            &event_tx,
            &mut backoff,
            &mut monitored,
        )
        .await;

        session.pending.disconnect_all();
        session
            .registration
            .set_state(ConnectionState::Reconnecting);

        match stop {
            ConnectionEnd::Quit => {
                let _ = event_tx.send(Event::Disconnect { expected: true });
                break;
            }
            ConnectionEnd::Fatal => {
                let _ = event_tx.send(Event::Disconnect { expected: false });
                break;
            }
            ConnectionEnd::Lost => {
                let _ = event_tx.send(Event::Disconnect { expected: false });
                if wait_backoff(&mut backoff, &mut cmd_rx, &mut monitored).await {
                    break;
                }
            }
        }
    }
    session.registration.set_state(ConnectionState::Disconnected);
}

enum ConnectionEnd {
    /// User-initiated QUIT; do not reconnect.
    Quit,
    /// Unrecoverable for this configuration; do not reconnect.
    Fatal,
    /// Transport loss or registration failure; reconnect with backoff.
    Lost,
}

#[allow(clippy::too_many_arguments)]
async fn run_connection(
    config: &Config,
    session: &mut Session,
    transport: &mut Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    event_tx: &mpsc::UnboundedSender<Event>,
    backoff: &mut Backoff,
    monitored: &mut Vec<String>,
) -> ConnectionEnd {
    let mut outbound = Outbound::new();
    for msg in session.start() {
        outbound.route(msg, false);
    }

    let mut cap_deadlines: Vec<(String, Instant)> = Vec::new();
    let mut cap_ls_deadline = Some(Instant::now() + CAP_LS_TIMEOUT);
    let mut last_activity = Instant::now();
    let mut ping_sent = false;
    let mut registered_at: Option<Instant> = None;
    let mut quit_after_flush = false;

    loop {
        if outbound.flush(transport).await.is_err() {
            return lost(backoff, registered_at);
        }
        if quit_after_flush {
            let _ = transport.close().await;
            return ConnectionEnd::Quit;
        }

        let now = Instant::now();
        let ping_deadline = if ping_sent {
            last_activity + config.ping_timeout * 2
        } else {
            last_activity + config.ping_timeout
        };
        let mut next_timer = ping_deadline;
        if let Some(ready) = outbound.next_ready(now) {
            next_timer = next_timer.min(ready);
        }
        if let Some(deadline) = session.pending.next_deadline() {
            next_timer = next_timer.min(deadline);
        }
        if let Some(deadline) = cap_ls_deadline {
            next_timer = next_timer.min(deadline);
        }
        for (_, deadline) in &cap_deadlines {
            next_timer = next_timer.min(*deadline);
        }
        // Keep the arm bounded even when nothing is due.
        next_timer = next_timer.min(now + NEVER);

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let registered = session.registration.is_registered();
                match cmd {
                    None | Some(Cmd::Quit(_)) => {
                        let reason = match cmd {
                            Some(Cmd::Quit(reason)) => reason,
                            _ => None,
                        };
                        session.registration.set_state(ConnectionState::Closing);
                        outbound.urgent.push_back(Message::quit(reason));
                        quit_after_flush = true;
                    }
                    Some(Cmd::Send(msg)) => outbound.route(msg, registered),
                    Some(Cmd::Join(channel, key, reply)) => {
                        if session.tracker.channel(&session.params, &channel).is_some() {
                            let _ = reply.send(Err(ClientError::AlreadyInChannel(channel)));
                        } else {
                            outbound.route(Message::join(channel, key), registered);
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Some(Cmd::Part(channel, reason, reply)) => {
                        if session.tracker.channel(&session.params, &channel).is_none() {
                            let _ = reply.send(Err(ClientError::NotInChannel(channel)));
                        } else {
                            outbound.route(Message::part(channel, reason), registered);
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Some(Cmd::Whois(nick, reply)) => {
                        session.pending.add_whois(&session.params, &nick, reply);
                        outbound.route(Message::whois(nick), registered);
                    }
                    Some(Cmd::Whowas(nick, reply)) => {
                        session.pending.add_whowas(&session.params, &nick, reply);
                        outbound.route(Message::whowas(nick), registered);
                    }
                    Some(Cmd::Monitor(nick)) => {
                        session.tracker.add_monitored(&session.params, &nick);
                        if !monitored.iter().any(|n| session.params.casemapping.eq(n, &nick)) {
                            monitored.push(nick.clone());
                        }
                        outbound.route(Message::monitor("+", Some(nick)), registered);
                    }
                    Some(Cmd::Unmonitor(nick)) => {
                        session.tracker.remove_monitored(&session.params, &nick);
                        monitored.retain(|n| !session.params.casemapping.eq(n, &nick));
                        outbound.route(Message::monitor("-", Some(nick)), registered);
                    }
                }
            }

            inbound = transport.read_message() => {
                match inbound {
                    Ok(Some(msg)) => {
                        last_activity = Instant::now();
                        ping_sent = false;
                        let output = session.handle_message(&msg).await;
                        if let Some(end) = apply_output(
                            output,
                            session,
                            &mut outbound,
                            event_tx,
                            &mut cap_deadlines,
                            &mut registered_at,
                            monitored,
                        ) {
                            return end;
                        }
                        if session.caps.negotiating() {
                            cap_ls_deadline = None;
                        }
                        cap_deadlines.retain(|(name, _)| {
                            session.caps.get(name).is_some_and(|c| {
                                matches!(c.state, crate::caps::CapState::Negotiating)
                            })
                        });
                    }
                    Ok(None) => {
                        info!("connection closed by server");
                        return lost(backoff, registered_at);
                    }
                    Err(err) => {
                        warn!(%err, "transport error");
                        return lost(backoff, registered_at);
                    }
                }
            }

            _ = tokio::time::sleep_until(next_timer) => {
                let now = Instant::now();
                if now >= ping_deadline {
                    if ping_sent {
                        warn!("ping timeout; reconnecting");
                        return lost(backoff, registered_at);
                    }
                    outbound.urgent.push_back(Message::ping(config.host.clone()));
                    ping_sent = true;
                }
                session.pending.expire(now);
                if cap_ls_deadline.is_some_and(|d| now >= d) {
                    cap_ls_deadline = None;
                    for msg in session.cap_ls_timed_out() {
                        outbound.route(msg, false);
                    }
                }
                let due: Vec<String> = cap_deadlines
                    .iter()
                    .filter(|(_, d)| now >= *d)
                    .map(|(n, _)| n.clone())
                    .collect();
                cap_deadlines.retain(|(_, d)| now < *d);
                for name in due {
                    let output = session.cap_negotiation_timed_out(&name).await;
                    if let Some(end) = apply_output(
                        output,
                        session,
                        &mut outbound,
                        event_tx,
                        &mut cap_deadlines,
                        &mut registered_at,
                        monitored,
                    ) {
                        return end;
                    }
                }
            }
        }
    }
}

fn lost(backoff: &mut Backoff, registered_at: Option<Instant>) -> ConnectionEnd {
    if registered_at.is_some_and(|t| t.elapsed() >= BACKOFF_STABLE) {
        backoff.reset();
    }
    ConnectionEnd::Lost
}

/// Fold one dispatch output into the connection state. Returns an end
/// state when the connection must stop.
fn apply_output(
    output: Output,
    session: &mut Session,
    outbound: &mut Outbound,
    event_tx: &mpsc::UnboundedSender<Event>,
    cap_deadlines: &mut Vec<(String, Instant)>,
    registered_at: &mut Option<Instant>,
    monitored: &[String],
) -> Option<ConnectionEnd> {
    let registered = session.registration.is_registered();
    for msg in output.outbound {
        outbound.route(msg, registered);
    }

    let mut end = None;
    for status in output.statuses {
        match status {
            Status::Registered => {
                info!(nickname = session.registration.nickname(), "registered");
                *registered_at = Some(Instant::now());
                outbound.flush_pre_registration();
                if !monitored.is_empty() {
                    for nick in monitored {
                        session.tracker.add_monitored(&session.params, nick);
                    }
                    outbound.route(
                        Message::monitor("+", Some(monitored.join(","))),
                        true,
                    );
                }
            }
            Status::CapDeferred(name) => {
                cap_deadlines.push((name, Instant::now() + SASL_TIMEOUT));
            }
            Status::Fatal(err) => {
                warn!(%err, "connection attempt failed");
                end = Some(match err {
                    ClientError::AuthenticationFailed(_) => ConnectionEnd::Fatal,
                    _ => ConnectionEnd::Lost,
                });
            }
        }
    }

    for event in output.events {
        let _ = event_tx.send(event);
    }
    end
}

/// Sleep out the backoff while still answering commands. Returns true
/// when the client should stop entirely.
async fn wait_backoff(
    backoff: &mut Backoff,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    monitored: &mut Vec<String>,
) -> bool {
    let delay = backoff.delay();
    debug!(?delay, "waiting before reconnect");
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(Cmd::Quit(_)) => return true,
                Some(Cmd::Monitor(nick)) => {
                    if !monitored.contains(&nick) {
                        monitored.push(nick);
                    }
                }
                Some(Cmd::Unmonitor(nick)) => monitored.retain(|n| n != &nick),
                Some(Cmd::Send(_)) => debug!("dropping message while disconnected"),
                Some(Cmd::Join(_, _, reply)) | Some(Cmd::Part(_, _, reply)) => {
                    let _ = reply.send(Err(ClientError::Disconnected));
                }
                Some(Cmd::Whois(_, reply)) => {
                    let _ = reply.send(Err(ClientError::Disconnected));
                }
                Some(Cmd::Whowas(_, reply)) => {
                    let _ = reply.send(Err(ClientError::Disconnected));
                }
            }
        }
    }
}

// Re-exported at the crate root.
pub use self::pool::ClientPool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new("irc.example.com", "MyBot");
        assert_eq!(config.port, 6667);
        assert_eq!(config.encoding, "utf-8");
        assert_eq!(config.ping_timeout, Duration::from_secs(180));
        assert!(config.tls_verify);
        assert!(config.tls_config().is_none());
    }

    #[test]
    fn test_default_features_without_sasl() {
        let config = Config::new("h", "n");
        let features = config.default_features().unwrap();
        assert_eq!(features.order(), vec!["tracking", "isupport"]);
    }

    #[test]
    fn test_default_features_with_sasl() {
        let mut config = Config::new("h", "n");
        config.sasl_username = Some("u".into());
        config.sasl_password = Some("p".into());
        let features = config.default_features().unwrap();
        assert_eq!(features.order(), vec!["tracking", "isupport", "sasl"]);
    }

    #[test]
    fn test_registration_exempt_commands() {
        assert!(allowed_before_registration(&Message::pass("x")));
        assert!(allowed_before_registration(&Message::nick("n")));
        assert!(allowed_before_registration(&Message::cap("LS", None)));
        assert!(!allowed_before_registration(&Message::privmsg("#c", "hi")));
        assert!(!allowed_before_registration(&Message::join("#c", None)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        let first = backoff.delay();
        assert!(first >= Duration::from_secs(4) && first <= Duration::from_secs(6));
        let second = backoff.delay();
        assert!(second >= Duration::from_secs(9) && second <= Duration::from_secs(11));
        for _ in 0..10 {
            backoff.delay();
        }
        let capped = backoff.delay();
        assert!(capped <= Duration::from_secs(330));
        assert!(capped >= Duration::from_secs(270));
        backoff.reset();
        let reset = backoff.delay();
        assert!(reset <= Duration::from_secs(6));
    }

    #[test]
    fn test_outbound_routing() {
        let mut outbound = Outbound::new();
        outbound.route(Message::privmsg("#c", "early"), false);
        assert_eq!(outbound.pre_registration.len(), 1);
        outbound.route(Message::cap("LS", Some("302".into())), false);
        assert_eq!(outbound.urgent.len(), 1);
        outbound.flush_pre_registration();
        assert_eq!(outbound.throttled.len(), 1);
        outbound.route(Message::privmsg("#c", "later"), true);
        assert_eq!(outbound.throttled.len(), 2);
        outbound.route(Message::ping("x"), true);
        assert_eq!(outbound.urgent.len(), 2);
    }
}
