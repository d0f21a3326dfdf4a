//! Error types for NTLM message handling and negotiation.


use std::io;

use http::StatusCode;
use thiserror::Error;


/// An error that may occur while parsing existing NTLM packets.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParsingError {
    /// The message is shorter than its fixed-size part.
    #[error("message too short (expected at least {expected_min_len} bytes, obtained {obtained_len})")]
    ShortMessage { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match the expected one.
    #[error("mismatched magic (obtained {obtained:?})")]
    MagicMismatch { obtained: [u8; 8] },

    /// The message type is not one of Negotiate, Challenge or Authenticate.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// The message type is valid but not the one expected at this point.
    #[error("unexpected message type (expected {expected}, obtained {obtained})")]
    UnexpectedMessageType { expected: u32, obtained: u32 },

    /// A security buffer points past the end of the message.
    #[error("field at offset {offset} with length {length} exceeds message of {message_len} bytes")]
    FieldOutOfBounds { offset: u32, length: u16, message_len: usize },

    /// A security buffer points into the fixed-size part of the message.
    #[error("field at offset {offset} overlaps the {header_len}-byte fixed header")]
    FieldOverlapsHeader { offset: u32, header_len: usize },

    /// An internal item's length is not divisible by an expected divisor.
    #[error("item length {obtained_length} not divisible by {expected_divisor}")]
    ItemLengthNotDivisible { expected_divisor: usize, obtained_length: usize },

    /// A string of 16-bit characters could not be decoded.
    #[error("failed to decode value as UTF-16: {value:?}")]
    InvalidUtf16 { value: Vec<u16> },

    /// Neither Unicode nor OEM encoding was selected.
    #[error("neither Unicode nor OEM encoding was selected")]
    NeitherUnicodeNorOem,

    /// A target information entry runs past the end of the target information block.
    #[error("target information entry truncated (expected at least {expected_at_least} bytes, obtained {obtained})")]
    TruncatedTargetInfo { expected_at_least: usize, obtained: usize },

    /// The target information block ends without a terminator entry.
    #[error("target information is not terminated")]
    UnterminatedTargetInfo,

    /// The terminator entry of the target information block carries data.
    #[error("target information terminator carries {length} bytes of data")]
    TerminatorWithData { length: usize },

    /// A challenge was expected but the server sent none.
    #[error("server sent no NTLM challenge")]
    MissingChallenge,

    /// The token in an authentication header is not valid base64.
    #[error("invalid base64 in authentication header: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// An error that may occur while writing an NTLM packet.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum StoringError {
    /// The string cannot be encoded using the OEM encoding.
    #[error("failed to encode {string:?} using OEM encoding")]
    NonOemEncodable { string: String },

    /// Neither Unicode nor OEM encoding was selected.
    #[error("neither Unicode nor OEM encoding was selected")]
    NeitherUnicodeNorOem,

    /// A field payload does not fit into a 16-bit length.
    #[error("field of {length} bytes is too long for a security buffer")]
    FieldTooLong { length: usize },

    /// The message does not fit into 32-bit offsets.
    #[error("message of {length} bytes is too long")]
    MessageTooLong { length: usize },
}

/// An error that terminates an NTLM negotiation.
#[derive(Debug, Error)]
pub enum Error {
    /// A message received from the server could not be decoded.
    #[error("malformed NTLM message: {0}")]
    MalformedMessage(#[from] ParsingError),

    /// A message could not be encoded.
    #[error("failed to encode NTLM message: {0}")]
    Encoding(#[from] StoringError),

    /// An encoded token could not be placed into a header.
    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The server answered the Authenticate message with a failure status.
    #[error("server rejected the NTLM handshake with status {status}")]
    HandshakeRejected { status: StatusCode },

    /// The caller's deadline fired while a leg of the handshake was in flight.
    #[error("NTLM handshake cancelled")]
    Cancelled,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
}
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => Self::Cancelled,
            _ => Self::Transport(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "deadline");
        assert!(matches!(Error::from(timed_out), Error::Cancelled));

        let interrupted = io::Error::from(io::ErrorKind::Interrupted);
        assert!(matches!(Error::from(interrupted), Error::Cancelled));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        match Error::from(reset) {
            Error::Transport(inner) => {
                assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset);
                assert_eq!(inner.to_string(), "reset by peer");
            },
            other => panic!("unexpected error {:?}", other),
        }
    }
}
