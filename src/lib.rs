//! An NTLM negotiation engine for HTTP clients.
//!
//! When a server or proxy answers a request with `401`/`407` and an `NTLM` or `Negotiate`
//! challenge, the [`Negotiator`] completes the three-leg NTLMv2 handshake on a single leased
//! connection and hands back the server's final response. Responses that do not demand NTLM are
//! passed through untouched.
//!
//! Sample usage:
//! ```
//! use std::io::{self, Cursor};
//!
//! use http::{Request, Response};
//! use ntlmssp::{Connection, Credentials, Negotiator, Transport};
//!
//! struct Anonymous;
//! impl Connection<Vec<u8>> for Anonymous {
//!     type Body = Cursor<Vec<u8>>;
//!
//!     fn send(&mut self, _request: Request<Vec<u8>>) -> io::Result<Response<Self::Body>> {
//!         Ok(Response::new(Cursor::new(b"hello\n".to_vec())))
//!     }
//! }
//!
//! struct Pool;
//! impl Transport<Vec<u8>> for Pool {
//!     type Connection = Anonymous;
//!
//!     fn lease(&self, _request: &Request<Vec<u8>>) -> io::Result<Anonymous> {
//!         Ok(Anonymous)
//!     }
//! }
//!
//! let negotiator = Negotiator::new(Pool);
//! let request = Request::get("http://intranet.example/").body(Vec::new()).unwrap();
//! let creds = Credentials::new("ISIS", "malory", "guest");
//! let response = negotiator.send_with_credentials(request, &creds).unwrap();
//! assert_eq!(response.status(), 200);
//! ```
//!
//! The message codec and the NTLMv2 calculations are usable on their own:
//! ```
//! use ntlmssp::{ChallengeMessage, Flags, NegotiateMessage};
//!
//! let negotiate = NegotiateMessage::new(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM, None, None);
//! let bytes = negotiate.to_bytes().unwrap();
//! assert_eq!(&bytes[0..8], b"NTLMSSP\0");
//! assert!(ChallengeMessage::try_from(bytes.as_slice()).is_err());
//! ```


mod credentials;
pub mod crypto;
mod encoding;
mod error;
pub mod messages;
pub mod negotiator;


use bitflags::bitflags;

pub use crate::credentials::{Credentials, Secret};
pub use crate::crypto::{ChallengeResponse, get_ntlm_time, respond_challenge_ntlm_v2};
pub use crate::error::{Error, ParsingError, StoringError};
pub use crate::messages::{
    AuthenticateMessage, ChallengeMessage, Message, MessageHeader, NegotiateMessage, OsVersion,
    SecurityBuffer, TargetInfoEntry, TargetInfoType,
};
pub use crate::negotiator::{
    AuthScheme, AuthTarget, Classification, Config, Connection, NegotiationState, Negotiator,
    Transport,
};


bitflags! {
    /// NTLM operation flags.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LANMAN_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_LOCAL_CALL = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const TARGET_TYPE_SHARE = 0x0004_0000;
        /// Extended session security.
        const NEGOTIATE_NTLM2_KEY = 0x0008_0000;
        const REQUEST_INIT_RESPONSE = 0x0010_0000;
        const REQUEST_ACCEPT_RESPONSE = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        const NEGOTIATE_KEY_EXCHANGE = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}
