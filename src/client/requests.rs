//! Pending request bookkeeping for WHOIS and WHOWAS.
//!
//! A request registers an accumulator and a completion channel; the
//! numerics fill the accumulator and the terminating numeric resolves
//! the waiting future. Requests that outlive their deadline resolve
//! with a timeout, and all of them resolve on disconnect.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ClientError;
use crate::isupport::ProtocolParameters;
use crate::message::Message;

/// Default deadline for WHOIS/WHOWAS answers.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Accumulated WHOIS data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhoisInfo {
    /// The queried nickname, as echoed by the server.
    pub nickname: String,
    /// Ident/username (311).
    pub username: Option<String>,
    /// Hostname (311).
    pub hostname: Option<String>,
    /// Realname (311).
    pub realname: Option<String>,
    /// Server the user is on (312).
    pub server: Option<String>,
    /// Server description (312).
    pub server_info: Option<String>,
    /// Whether the user is an operator (313).
    pub oper: bool,
    /// Seconds idle (317).
    pub idle: Option<u64>,
    /// Sign-on time (317).
    pub signon: Option<DateTime<Utc>>,
    /// Channel memberships, with membership sigils (319).
    pub channels: Vec<String>,
    /// Services account (330).
    pub account: Option<String>,
    /// Connected over TLS (671).
    pub secure: bool,
}

/// Accumulated WHOWAS data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhowasInfo {
    /// The queried nickname.
    pub nickname: String,
    /// Ident/username (314).
    pub username: Option<String>,
    /// Hostname (314).
    pub hostname: Option<String>,
    /// Realname (314).
    pub realname: Option<String>,
}

enum Pending {
    Whois {
        acc: WhoisInfo,
        tx: oneshot::Sender<Result<WhoisInfo, ClientError>>,
    },
    Whowas {
        acc: WhowasInfo,
        tx: oneshot::Sender<Result<WhowasInfo, ClientError>>,
    },
}

struct Entry {
    nick_key: String,
    deadline: Instant,
    pending: Pending,
}

/// The table of in-flight requests.
#[derive(Default)]
pub struct PendingRequests {
    entries: Vec<Entry>,
}

impl PendingRequests {
    /// Register a WHOIS request keyed by the queried nickname.
    pub fn add_whois(
        &mut self,
        params: &ProtocolParameters,
        nick: &str,
        tx: oneshot::Sender<Result<WhoisInfo, ClientError>>,
    ) {
        self.entries.push(Entry {
            nick_key: params.casemapping.normalize(nick),
            deadline: Instant::now() + REQUEST_TIMEOUT,
            pending: Pending::Whois {
                acc: WhoisInfo::default(),
                tx,
            },
        });
    }

    /// Register a WHOWAS request keyed by the queried nickname.
    pub fn add_whowas(
        &mut self,
        params: &ProtocolParameters,
        nick: &str,
        tx: oneshot::Sender<Result<WhowasInfo, ClientError>>,
    ) {
        self.entries.push(Entry {
            nick_key: params.casemapping.normalize(nick),
            deadline: Instant::now() + REQUEST_TIMEOUT,
            pending: Pending::Whowas {
                acc: WhowasInfo::default(),
                tx,
            },
        });
    }

    /// Whether anything is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The earliest deadline, for the timer arm.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Feed a numeric; returns true when it belonged to a request.
    ///
    /// WHOIS responses carry the nickname in the second parameter
    /// (`<me> <nick> ...`); the terminating numerics are 318 (WHOIS)
    /// and 369 (WHOWAS).
    pub fn handle_numeric(&mut self, params: &ProtocolParameters, msg: &Message) -> bool {
        let Some(code) = msg.numeric() else {
            return false;
        };
        let Some(nick) = msg.param(1) else {
            return false;
        };
        let key = params.casemapping.normalize(nick);

        let position = self.entries.iter().position(|e| {
            e.nick_key == key
                && match (&e.pending, code) {
                    (Pending::Whois { .. }, 311 | 312 | 313 | 317 | 318 | 319 | 330 | 671) => true,
                    (Pending::Whowas { .. }, 314 | 369) => true,
                    _ => false,
                }
        });
        let Some(position) = position else {
            return false;
        };

        let complete = matches!(code, 318 | 369);
        if complete {
            let entry = self.entries.swap_remove(position);
            match entry.pending {
                Pending::Whois { acc, tx } => {
                    let _ = tx.send(Ok(acc));
                }
                Pending::Whowas { acc, tx } => {
                    let _ = tx.send(Ok(acc));
                }
            }
            return true;
        }

        match &mut self.entries[position].pending {
            Pending::Whois { acc, .. } => accumulate_whois(acc, code, msg),
            Pending::Whowas { acc, .. } => accumulate_whowas(acc, code, msg),
        }
        true
    }

    /// Resolve expired requests with [`ClientError::Timeout`].
    pub fn expire(&mut self, now: Instant) {
        let expired: Vec<Entry> = {
            let mut kept = Vec::new();
            let mut gone = Vec::new();
            for entry in self.entries.drain(..) {
                if entry.deadline <= now {
                    gone.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            self.entries = kept;
            gone
        };
        for entry in expired {
            match entry.pending {
                Pending::Whois { tx, .. } => {
                    let _ = tx.send(Err(ClientError::Timeout));
                }
                Pending::Whowas { tx, .. } => {
                    let _ = tx.send(Err(ClientError::Timeout));
                }
            }
        }
    }

    /// Resolve everything with [`ClientError::Disconnected`].
    pub fn disconnect_all(&mut self) {
        for entry in self.entries.drain(..) {
            match entry.pending {
                Pending::Whois { tx, .. } => {
                    let _ = tx.send(Err(ClientError::Disconnected));
                }
                Pending::Whowas { tx, .. } => {
                    let _ = tx.send(Err(ClientError::Disconnected));
                }
            }
        }
    }
}

fn accumulate_whois(acc: &mut WhoisInfo, code: u16, msg: &Message) {
    match code {
        // 311: <me> <nick> <user> <host> * :<realname>
        311 => {
            acc.nickname = msg.param(1).unwrap_or_default().to_string();
            acc.username = msg.param(2).map(str::to_string);
            acc.hostname = msg.param(3).map(str::to_string);
            acc.realname = msg.param(5).map(str::to_string);
        }
        // 312: <me> <nick> <server> :<server info>
        312 => {
            acc.server = msg.param(2).map(str::to_string);
            acc.server_info = msg.param(3).map(str::to_string);
        }
        313 => acc.oper = true,
        // 317: <me> <nick> <idle> <signon> :seconds idle, signon time
        317 => {
            acc.idle = msg.param(2).and_then(|s| s.parse().ok());
            acc.signon = msg
                .param(3)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|t| Utc.timestamp_opt(t, 0).single());
        }
        // 319: <me> <nick> :<channels>
        319 => acc.channels.extend(
            msg.param(2)
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string),
        ),
        // 330: <me> <nick> <account> :is logged in as
        330 => acc.account = msg.param(2).map(str::to_string),
        671 => acc.secure = true,
        _ => {}
    }
}

fn accumulate_whowas(acc: &mut WhowasInfo, code: u16, msg: &Message) {
    // 314: <me> <nick> <user> <host> * :<realname>
    if code == 314 {
        acc.nickname = msg.param(1).unwrap_or_default().to_string();
        acc.username = msg.param(2).map(str::to_string);
        acc.hostname = msg.param(3).map(str::to_string);
        acc.realname = msg.param(5).map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(line: &str) -> Message {
        line.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_whois_accumulates_and_completes() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.add_whois(&params, "Target", tx);

        assert!(pending.handle_numeric(&params, &msg(":srv 311 me Target user host * :Real")));
        assert!(pending.handle_numeric(&params, &msg(":srv 312 me Target srv.example :desc")));
        assert!(pending.handle_numeric(&params, &msg(":srv 317 me Target 42 1700000000 :idle")));
        assert!(pending.handle_numeric(&params, &msg(":srv 319 me Target :@#a +#b")));
        assert!(pending.handle_numeric(&params, &msg(":srv 330 me Target acct :is logged in as")));
        assert!(pending.handle_numeric(&params, &msg(":srv 671 me Target :is using TLS")));
        assert!(pending.handle_numeric(&params, &msg(":srv 318 me Target :End of /WHOIS")));

        let info = rx.await.unwrap().unwrap();
        assert_eq!(info.nickname, "Target");
        assert_eq!(info.username.as_deref(), Some("user"));
        assert_eq!(info.hostname.as_deref(), Some("host"));
        assert_eq!(info.realname.as_deref(), Some("Real"));
        assert_eq!(info.server.as_deref(), Some("srv.example"));
        assert_eq!(info.idle, Some(42));
        assert_eq!(info.channels, vec!["@#a", "+#b"]);
        assert_eq!(info.account.as_deref(), Some("acct"));
        assert!(info.secure);
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_whois_nick_matching_is_case_mapped() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.add_whois(&params, "Tar[get]", tx);
        assert!(pending.handle_numeric(&params, &msg(":srv 311 me tar{get} u h * :r")));
        assert!(pending.handle_numeric(&params, &msg(":srv 318 me TAR[GET] :End")));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_numeric_not_consumed() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, _rx) = oneshot::channel();
        pending.add_whois(&params, "a", tx);
        assert!(!pending.handle_numeric(&params, &msg(":srv 311 me other u h * :r")));
        assert!(!pending.handle_numeric(&params, &msg(":srv 001 me :Welcome")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_whowas() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.add_whowas(&params, "Ghost", tx);
        assert!(pending.handle_numeric(&params, &msg(":srv 314 me Ghost user host * :Was Real")));
        assert!(pending.handle_numeric(&params, &msg(":srv 369 me Ghost :End of WHOWAS")));
        let info = rx.await.unwrap().unwrap();
        assert_eq!(info.nickname, "Ghost");
        assert_eq!(info.realname.as_deref(), Some("Was Real"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolution() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.add_whois(&params, "slow", tx);
        pending.expire(Instant::now() + REQUEST_TIMEOUT + Duration::from_secs(1));
        assert!(matches!(rx.await.unwrap(), Err(ClientError::Timeout)));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resolution() {
        let params = ProtocolParameters::default();
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.add_whois(&params, "x", tx);
        pending.disconnect_all();
        assert!(matches!(rx.await.unwrap(), Err(ClientError::Disconnected)));
    }
}
