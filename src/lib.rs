//! # slirc-client
//!
//! An extensible IRC client library: wire parsing and serialization
//! with full IRCv3 tag support, the registration and capability
//! negotiation state machines (SASL included), ISUPPORT-driven
//! protocol parameters, user/channel tracking, and a cooperative
//! single-threaded core that multiplexes any number of clients onto
//! one event loop.
//!
//! ## Features
//!
//! - IRC message parsing with tags, prefixes, commands, and parameters
//! - Registration lifecycle with nickname fallback and reconnect backoff
//! - IRCv3 capability negotiation with pluggable feature hooks
//! - SASL PLAIN and EXTERNAL inside capability negotiation
//! - ISUPPORT (005) tracking: casemapping, PREFIX, CHANMODES, and more
//! - Channel, user and membership state derived from server messages
//! - Outbound throttling that never delays PING/PONG or registration
//! - WHOIS/WHOWAS/MONITOR as awaitable requests
//!
//! ## Quick Start
//!
//! ```no_run
//! use slirc_client::{ClientPool, Config, Event};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ClientPool::new();
//!     let config = Config::new("irc.libera.chat", "slirc-bot");
//!     let features = config.default_features()?;
//!     let (client, mut events) = pool.connect(config, features);
//!
//!     pool.local_set().spawn_local(async move {
//!         while let Some(event) = events.recv().await {
//!             match event {
//!                 Event::Connect => {
//!                     let _ = client.join("#slirc", None).await;
//!                 }
//!                 Event::ChannelMessage { channel, by, text } => {
//!                     println!("[{}] <{}> {}", channel, by, text);
//!                 }
//!                 _ => {}
//!             }
//!         }
//!     });
//!
//!     pool.handle_forever().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Parsing messages directly
//!
//! ```rust
//! use slirc_client::Message;
//!
//! let raw = "@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #channel :Hello!";
//! let message: Message = raw.parse().expect("valid IRC message");
//! assert_eq!(message.command, "PRIVMSG");
//! assert_eq!(message.tag("time"), Some("2023-01-01T12:00:00Z"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod caps;
pub mod casemap;
pub mod client;
pub mod ctcp;
pub mod error;
pub mod event;
pub mod features;
pub mod irc;
pub mod isupport;
pub mod line;
pub mod message;
pub mod mode;
pub mod prefix;
pub mod sasl;
pub mod state;
pub mod track;
pub mod transport;

pub use self::caps::{CapNegotiator, CapState, Capability};
pub use self::casemap::{irc_eq, irc_to_lower, CaseMapping};
pub use self::client::builtin::{IsupportFeature, SaslFeature, TrackingFeature};
pub use self::client::pool::ClientPool;
pub use self::client::requests::{WhoisInfo, WhowasInfo};
pub use self::client::throttle::Throttle;
pub use self::client::{Client, Config};
pub use self::ctcp::Ctcp;
pub use self::error::{ClientError, MessageParseError, ProtocolError};
pub use self::event::Event;
pub use self::features::{CapOutcome, CapRequest, Context, Feature, FeatureOrderError, FeatureSet};
pub use self::irc::IrcCodec;
pub use self::isupport::{ChanModes, ModeKind, ProtocolParameters};
pub use self::line::LineCodec;
pub use self::message::{Message, Tag};
pub use self::mode::ModeChange;
pub use self::prefix::Prefix;
pub use self::sasl::{encode_external, encode_plain, Mechanism, SaslSession, SaslState};
pub use self::state::{ConnectionState, Registration};
pub use self::track::{Channel, Tracker, User};
pub use self::transport::{TlsConfig, Transport};
