//! SASL authentication.
//!
//! Mechanisms are pluggable behind the [`Mechanism`] trait; PLAIN
//! (RFC 4616) and EXTERNAL (client certificate) are provided.
//! [`SaslSession`] drives the AUTHENTICATE exchange inside capability
//! negotiation: challenges come in base64, responses go out base64 in
//! 400-byte chunks.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN): <https://tools.ietf.org/html/rfc4616>

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::ClientError;
use crate::message::Message;

/// Maximum length of a single AUTHENTICATE payload chunk.
pub const SASL_CHUNK_SIZE: usize = 400;

/// How long to wait for the server before aborting authentication.
pub const SASL_TIMEOUT: Duration = Duration::from_secs(10);

/// A SASL mechanism: turns server challenges into responses.
///
/// Implementations hold their own credentials; the session never sees
/// them, only the produced bytes.
pub trait Mechanism {
    /// Canonical mechanism name as sent in `AUTHENTICATE <name>`.
    fn name(&self) -> &'static str;

    /// Produce the response to a (decoded) server challenge.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, ClientError>;
}

/// The PLAIN mechanism: `authzid NUL authcid NUL password`.
pub struct Plain {
    authzid: String,
    username: String,
    password: String,
}

impl Plain {
    /// Create a PLAIN mechanism. `authzid` is usually `None`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_identity(String::new(), username, password)
    }

    /// Create a PLAIN mechanism with an explicit authorization identity.
    pub fn with_identity(
        authzid: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Plain {
            authzid: authzid.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(format!("{}\0{}\0{}", self.authzid, self.username, self.password).into_bytes())
    }
}

/// The EXTERNAL mechanism: identity comes from the TLS client
/// certificate; the response is the optional authorization identity.
pub struct External {
    authzid: Option<String>,
}

impl External {
    /// Create an EXTERNAL mechanism.
    pub fn new(authzid: Option<String>) -> Self {
        External { authzid }
    }
}

impl Mechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(self
            .authzid
            .as_deref()
            .unwrap_or("")
            .as_bytes()
            .to_vec())
    }
}

/// Base64-encode PLAIN credentials (no authzid).
pub fn encode_plain(username: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", username, password).as_bytes())
}

/// Base64-encode an EXTERNAL response.
pub fn encode_external(authzid: Option<&str>) -> String {
    match authzid {
        Some(id) if !id.is_empty() => BASE64.encode(id.as_bytes()),
        _ => "+".to_owned(),
    }
}

/// Decode a base64 AUTHENTICATE payload; `+` means empty.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if encoded == "+" {
        return Ok(Vec::new());
    }
    BASE64.decode(encoded)
}

/// Split an encoded response into AUTHENTICATE payload chunks.
///
/// An empty response is a single `+`. When the response length is an
/// exact multiple of the chunk size, a final `+` tells the server there
/// is no more data.
pub fn chunk_payload(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return vec!["+".to_owned()];
    }
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        // Base64 output is ASCII, chunk boundaries cannot split a char.
        .map(|c| std::str::from_utf8(c).unwrap().to_owned())
        .collect();
    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        chunks.push("+".to_owned());
    }
    chunks
}

/// Session state of the AUTHENTICATE exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslState {
    /// Nothing sent yet.
    Idle,
    /// `AUTHENTICATE <mech>` sent, awaiting the first challenge.
    MechanismSent,
    /// Challenge/response exchange in progress.
    Exchanging,
    /// Authentication succeeded (903).
    Done,
    /// Authentication failed or was aborted.
    Failed,
}

/// What a SASL-related numeric meant for the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaslOutcome {
    /// Not terminal; keep going.
    Continue,
    /// 903: authentication succeeded.
    Success,
    /// 902/904/905/906/907: authentication failed.
    Failure(String),
}

/// Drives one SASL authentication attempt.
pub struct SaslSession {
    mechanism: Box<dyn Mechanism>,
    state: SaslState,
}

impl SaslSession {
    /// Create a session around a mechanism.
    pub fn new(mechanism: Box<dyn Mechanism>) -> Self {
        SaslSession {
            mechanism,
            state: SaslState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SaslState {
        self.state
    }

    /// Open the exchange: `AUTHENTICATE <mechanism>`.
    pub fn begin(&mut self) -> Message {
        self.state = SaslState::MechanismSent;
        Message::authenticate(self.mechanism.name())
    }

    /// Feed a server `AUTHENTICATE` challenge; returns the response
    /// messages to send.
    pub fn on_challenge(&mut self, payload: &str) -> Result<Vec<Message>, ClientError> {
        let challenge = decode_base64(payload)
            .map_err(|e| ClientError::AuthenticationFailed(format!("bad challenge: {}", e)))?;
        self.state = SaslState::Exchanging;
        let response = self.mechanism.respond(&challenge)?;
        let encoded = if response.is_empty() {
            String::new()
        } else {
            BASE64.encode(&response)
        };
        Ok(chunk_payload(&encoded)
            .into_iter()
            .map(Message::authenticate)
            .collect())
    }

    /// Feed a numeric reply; 903 and the 90x failure family terminate
    /// the exchange.
    pub fn on_numeric(&mut self, code: u16, msg: &Message) -> SaslOutcome {
        match code {
            903 => {
                self.state = SaslState::Done;
                SaslOutcome::Success
            }
            902 | 904 | 905 | 906 | 907 => {
                self.state = SaslState::Failed;
                let reason = msg
                    .params
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "authentication failed".to_string());
                SaslOutcome::Failure(reason)
            }
            _ => SaslOutcome::Continue,
        }
    }

    /// Abort the exchange (`AUTHENTICATE *`), e.g. on timeout.
    pub fn abort(&mut self) -> Message {
        self.state = SaslState::Failed;
        Message::authenticate("*")
    }
}
