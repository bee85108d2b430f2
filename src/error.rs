//! Error types for the IRC client library.
//!
//! Protocol-level failures (framing, parsing) are kept separate from
//! client-level failures (registration, authentication, request
//! timeouts) so that transport code can recover locally while callers
//! see typed errors on their awaited operations.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Protocol and transport level errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Line exceeded the maximum allowed length.
    #[error("message too long: {actual} bytes (limit {limit})")]
    MessageTooLong {
        /// Observed line length in bytes.
        actual: usize,
        /// The limit that was exceeded.
        limit: usize,
    },

    /// Illegal control character in an outgoing message.
    #[error("illegal control character: {0:?}")]
    IllegalControlChar(char),

    /// A line that could not be parsed as an IRC message.
    ///
    /// On the inbound path these are logged and skipped; the stream
    /// continues with the next line.
    #[error("malformed line: {line}")]
    MalformedLine {
        /// The offending line (tags and CRLF stripped).
        line: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },

    /// The configured encoding label is not recognized.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// TLS setup failed (bad certificate file, no trust roots, ...).
    #[error("tls error: {0}")]
    Tls(String),
}

/// Errors encountered when parsing or serializing IRC messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was missing or not a word / three-digit numeric.
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    /// More than the 15 parameters the wire format permits.
    #[error("too many parameters: {0}")]
    TooManyParams(usize),

    /// A non-trailing parameter contains a space, CR/LF, or leading `:`
    /// and therefore cannot be placed on the wire.
    #[error("parameter not serializable in position {index}: {param:?}")]
    BadParamPosition {
        /// Zero-based parameter index.
        index: usize,
        /// The offending parameter.
        param: String,
    },

    /// A tag key is empty or contains forbidden characters.
    #[error("invalid tag key: {0:?}")]
    InvalidTagKey(String),
}

/// Errors encountered when parsing mode strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModeParseError {
    /// A mode that must carry an argument arrived without one.
    #[error("mode '{0}' requires an argument")]
    MissingArgument(char),

    /// Arguments were left over after the mode string was consumed.
    #[error("unused arguments after mode string")]
    UnusedArguments,
}

/// Client-level errors surfaced to callers and handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The peer closed the connection.
    #[error("transport closed by peer")]
    TransportClosed,

    /// A transport fault below the protocol layer.
    #[error("transport error")]
    Transport(#[from] ProtocolError),

    /// The server rejected every nickname, the password, or the
    /// connection itself (432/433 exhausted, 464, 465).
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// Capability negotiation could not complete for a capability.
    #[error("capability negotiation failed: {0}")]
    CapabilityFailed(String),

    /// SASL authentication failed or was aborted.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A pending request expired before the server answered.
    #[error("request timed out")]
    Timeout,

    /// The operation requires membership in a channel we are not in.
    #[error("not in channel: {0}")]
    NotInChannel(String),

    /// The client is already a member of the channel.
    #[error("already in channel: {0}")]
    AlreadyInChannel(String),

    /// The awaited operation was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// The client disconnected while the operation was pending.
    #[error("disconnected")]
    Disconnected,
}
