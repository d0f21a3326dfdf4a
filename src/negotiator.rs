//! The client side of the NTLM handshake over HTTP.
//!
//! A handshake takes three round trips, all of which must travel over the same connection since
//! servers bind the authentication state to it:
//!
//! 1. the original request, which the server answers with `401`/`407` and an NTLM challenge
//!    header without a token;
//! 2. the request again, carrying a Negotiate message, answered with a Challenge message;
//! 3. the request once more, carrying the Authenticate message; the server's answer to this leg
//!    is handed back to the caller.


use std::env;
use std::io::{self, Read};

use base64::prelude::{BASE64_STANDARD, Engine};
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use http::header::{AUTHORIZATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE};
use log::{debug, trace, warn};

use crate::Flags;
use crate::credentials::Credentials;
use crate::crypto::{generate_client_challenge, get_ntlm_time, respond_challenge_ntlm_v2};
use crate::error::{Error, ParsingError};
use crate::messages::{ChallengeMessage, NegotiateMessage};


/// The flags sent in the Negotiate message unless configured otherwise.
pub const DEFAULT_NEGOTIATE_FLAGS: Flags = Flags::NEGOTIATE_UNICODE
    .union(Flags::NEGOTIATE_OEM)
    .union(Flags::REQUEST_TARGET)
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_NTLM2_KEY)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_56BIT);


/// A single connection to a server, able to carry one request at a time.
pub trait Connection<B> {
    /// The body of the responses arriving on this connection.
    type Body: Read;

    /// Sends the request and waits for the response head.
    ///
    /// Errors of kind [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::Interrupted`] signal that the
    /// caller's deadline has fired.
    fn send(&mut self, request: Request<B>) -> io::Result<Response<Self::Body>>;
}

/// A pool of connections.
pub trait Transport<B> {
    /// A leased connection; dropping it returns the connection to the pool.
    type Connection: Connection<B>;

    /// Leases a connection suitable for the given request for exclusive use.
    fn lease(&self, request: &Request<B>) -> io::Result<Self::Connection>;
}

/// The body type of the responses produced by a transport.
pub type ResponseBody<T, B> = <<T as Transport<B>>::Connection as Connection<B>>::Body;


/// The authentication scheme under which the NTLM messages travel.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AuthScheme {
    Ntlm,
    Negotiate,
}
impl AuthScheme {
    /// The scheme name as it appears in the headers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ntlm => "NTLM",
            Self::Negotiate => "Negotiate",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("NTLM") {
            Some(Self::Ntlm)
        } else if name.eq_ignore_ascii_case("Negotiate") {
            Some(Self::Negotiate)
        } else {
            None
        }
    }
}

/// The party demanding authentication.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AuthTarget {
    /// The origin server (status 401).
    Server,

    /// An intermediate proxy (status 407).
    Proxy,
}
impl AuthTarget {
    /// The target demanding authentication with the given status, if any.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::UNAUTHORIZED => Some(Self::Server),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => Some(Self::Proxy),
            _ => None,
        }
    }

    /// The response header carrying the challenges.
    pub fn challenge_header(&self) -> HeaderName {
        match self {
            Self::Server => WWW_AUTHENTICATE,
            Self::Proxy => PROXY_AUTHENTICATE,
        }
    }

    /// The request header carrying the client's answer.
    pub fn authorization_header(&self) -> HeaderName {
        match self {
            Self::Server => AUTHORIZATION,
            Self::Proxy => PROXY_AUTHORIZATION,
        }
    }
}

/// The reading of a response, computed once per leg.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Classification {
    /// The response does not ask for NTLM.
    NotChallenging,

    /// The response demands NTLM authentication.
    Challenging {
        target: AuthTarget,
        scheme: AuthScheme,

        /// The base64 token following the scheme name, if there is one.
        token: Option<String>,
    },
}
impl Classification {
    /// Classifies a response by its status and challenge headers.
    ///
    /// Challenges may be spread across several headers or listed comma-separated in one. NTLM is
    /// preferred over Negotiate when a server offers both.
    pub fn of<R>(response: &Response<R>) -> Self {
        let target = match AuthTarget::from_status(response.status()) {
            Some(t) => t,
            None => return Self::NotChallenging,
        };

        let mut best: Option<(AuthScheme, Option<String>)> = None;
        let challenges = response.headers()
            .get_all(target.challenge_header())
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','));
        for challenge in challenges {
            let challenge = challenge.trim();
            let (name, token) = match challenge.split_once(' ') {
                Some((name, token)) => (name, token.trim()),
                None => (challenge, ""),
            };
            let scheme = match AuthScheme::from_name(name) {
                Some(s) => s,
                None => continue,
            };
            let token = if token.is_empty() { None } else { Some(token.to_owned()) };
            let better = match &best {
                None => true,
                Some((current, _)) => scheme < *current,
            };
            if better {
                best = Some((scheme, token));
            }
        }

        match best {
            Some((scheme, token)) => Self::Challenging { target, scheme, token },
            None => Self::NotChallenging,
        }
    }
}

/// The progress of a single handshake.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NegotiationState {
    Idle,
    NegotiateSent,
    ChallengeReceived,
    AuthenticateSent,
    Done,
    Failed,
}


/// Configuration of a [`Negotiator`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Config {
    /// The workstation name announced to the server.
    pub workstation: Option<String>,

    /// The flags offered in the Negotiate message.
    pub negotiate_flags: Flags,

    /// Whether a failure status in response to the Authenticate message is turned into
    /// [`Error::HandshakeRejected`] instead of being returned as the response.
    pub reject_failed_handshake: bool,
}
impl Config {
    /// Announces the given workstation name.
    pub fn with_workstation(mut self, workstation: &str) -> Self {
        self.workstation = Some(workstation.to_owned());
        self
    }

    /// Announces the host name found in the `COMPUTERNAME` or `HOSTNAME` environment variables.
    pub fn with_workstation_from_env(mut self) -> Self {
        self.workstation = env::var("COMPUTERNAME")
            .or_else(|_| env::var("HOSTNAME"))
            .ok()
            .filter(|name| !name.is_empty());
        self
    }

    pub fn with_negotiate_flags(mut self, flags: Flags) -> Self {
        self.negotiate_flags = flags;
        self
    }

    pub fn with_reject_failed_handshake(mut self, reject: bool) -> Self {
        self.reject_failed_handshake = reject;
        self
    }
}
impl Default for Config {
    fn default() -> Self {
        Self {
            workstation: None,
            negotiate_flags: DEFAULT_NEGOTIATE_FLAGS,
            reject_failed_handshake: false,
        }
    }
}


/// Sends requests, completing NTLM handshakes where the server demands them.
#[derive(Debug)]
pub struct Negotiator<T> {
    transport: T,
    config: Config,
}
impl<T> Negotiator<T> {
    /// Creates a negotiator with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::default())
    }

    pub fn with_config(transport: T, config: Config) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn transport(&self) -> &T { &self.transport }

    /// Sends a request, authenticating with the credentials of its `Authorization: Basic` header.
    ///
    /// The Basic header is never sent to the server. Requests without Basic credentials are sent
    /// as they are and their response is returned unmodified.
    pub fn send<B>(&self, mut request: Request<B>) -> Result<Response<ResponseBody<T, B>>, Error>
    where
        T: Transport<B>,
        B: Clone,
    {
        let credentials = request.headers()
            .get(AUTHORIZATION)
            .and_then(Credentials::from_basic_auth);
        match credentials {
            Some(credentials) => {
                request.headers_mut().remove(AUTHORIZATION);
                self.send_with_credentials(request, &credentials)
            },
            None => {
                debug!("no credentials on request to {}; passing through", loggable(request.uri()));
                let mut connection = self.transport.lease(&request)?;
                Ok(connection.send(request)?)
            },
        }
    }

    /// Sends a request, authenticating with the given credentials if the server demands NTLM.
    ///
    /// Exactly one handshake is attempted. Whatever the server answers to the Authenticate
    /// message is returned, even if it is another challenge.
    pub fn send_with_credentials<B>(&self, request: Request<B>, credentials: &Credentials) -> Result<Response<ResponseBody<T, B>>, Error>
    where
        T: Transport<B>,
        B: Clone,
    {
        let mut handshake = Handshake {
            config: &self.config,
            credentials,
            state: NegotiationState::Idle,
        };
        let result = handshake.run(&self.transport, request);
        if let Err(e) = &result {
            warn!("NTLM handshake failed: {}", e);
            handshake.transition(NegotiationState::Failed);
        }
        result
    }
}


struct Handshake<'a> {
    config: &'a Config,
    credentials: &'a Credentials,
    state: NegotiationState,
}
impl<'a> Handshake<'a> {
    fn transition(&mut self, next: NegotiationState) {
        debug!("NTLM handshake: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run<T, B>(&mut self, transport: &T, request: Request<B>) -> Result<Response<ResponseBody<T, B>>, Error>
    where
        T: Transport<B>,
        B: Clone,
    {
        // held until every leg has completed
        let mut connection = transport.lease(&request)?;

        let response = connection.send(duplicate_request(&request))?;
        let (target, scheme) = match Classification::of(&response) {
            Classification::Challenging { target, scheme, .. } => (target, scheme),
            Classification::NotChallenging => {
                debug!("{} does not demand NTLM; passing response through", loggable(request.uri()));
                self.transition(NegotiationState::Done);
                return Ok(response);
            },
        };
        drain(response)?;

        let domain = Some(self.credentials.domain.as_str()).filter(|d| !d.is_empty());
        let negotiate = NegotiateMessage::new(self.config.negotiate_flags, domain, self.config.workstation.as_deref());
        let negotiate_bytes = negotiate.to_bytes()?;
        trace!("sending {}-byte Negotiate message", negotiate_bytes.len());
        let leg = authorized_request(&request, target, scheme, &negotiate_bytes)?;
        let response = connection.send(leg)?;
        self.transition(NegotiationState::NegotiateSent);

        let token = match Classification::of(&response) {
            Classification::Challenging { token: Some(token), .. } => token,
            Classification::NotChallenging if AuthTarget::from_status(response.status()).is_none() => {
                debug!("server answered Negotiate message with {}; passing response through", response.status());
                self.transition(NegotiationState::Done);
                return Ok(response);
            },
            _ => {
                drain(response)?;
                return Err(ParsingError::MissingChallenge.into());
            },
        };
        drain(response)?;

        let challenge_bytes = BASE64_STANDARD.decode(token)
            .map_err(ParsingError::from)?;
        trace!("received {}-byte Challenge message", challenge_bytes.len());
        let challenge = ChallengeMessage::try_from(challenge_bytes.as_slice())?;
        self.transition(NegotiationState::ChallengeReceived);

        let time = challenge.timestamp().unwrap_or_else(get_ntlm_time);
        let target_info = challenge.target_info_bytes()?;
        let answer = respond_challenge_ntlm_v2(
            challenge.challenge,
            &target_info,
            time,
            generate_client_challenge(),
            self.credentials,
        );
        let flags = authenticate_flags(challenge.flags, self.config.negotiate_flags);
        let workstation = self.config.workstation.as_deref().unwrap_or("");
        let authenticate_bytes = answer.to_message(self.credentials, workstation, flags).to_bytes()?;
        trace!("sending {}-byte Authenticate message", authenticate_bytes.len());
        let leg = authorized_request(&request, target, scheme, &authenticate_bytes)?;
        let response = connection.send(leg)?;
        self.transition(NegotiationState::AuthenticateSent);

        let status = response.status();
        if self.config.reject_failed_handshake && !(status.is_success() || status.is_redirection()) {
            drain(response)?;
            return Err(Error::HandshakeRejected { status });
        }

        self.transition(NegotiationState::Done);
        Ok(response)
    }
}


/// The flags of the Authenticate message: what both sides support, with exactly one string
/// encoding.
fn authenticate_flags(server_flags: Flags, client_flags: Flags) -> Flags {
    let mut flags = server_flags & client_flags;
    flags.remove(Flags::NEGOTIATE_KEY_EXCHANGE | Flags::NEGOTIATE_VERSION);

    let unicode = server_flags.contains(Flags::NEGOTIATE_UNICODE) && client_flags.contains(Flags::NEGOTIATE_UNICODE);
    flags.set(Flags::NEGOTIATE_UNICODE, unicode);
    flags.set(Flags::NEGOTIATE_OEM, !unicode);
    flags
}

fn duplicate_request<B: Clone>(request: &Request<B>) -> Request<B> {
    let mut duplicate = Request::new(request.body().clone());
    *duplicate.method_mut() = request.method().clone();
    *duplicate.uri_mut() = request.uri().clone();
    *duplicate.version_mut() = request.version();
    *duplicate.headers_mut() = request.headers().clone();
    duplicate
}

fn authorized_request<B: Clone>(request: &Request<B>, target: AuthTarget, scheme: AuthScheme, message: &[u8]) -> Result<Request<B>, Error> {
    let value = HeaderValue::from_str(&format!("{} {}", scheme.name(), BASE64_STANDARD.encode(message)))?;
    let mut leg = duplicate_request(request);
    leg.headers_mut().insert(target.authorization_header(), value);
    Ok(leg)
}

/// Host and path of a URI; user info and query are left out of the logs.
fn loggable(uri: &Uri) -> String {
    format!("{}{}", uri.host().unwrap_or(""), uri.path())
}

/// Reads and discards the rest of a response so that its connection can carry the next leg.
fn drain<R: Read>(response: Response<R>) -> io::Result<()> {
    let mut body = response.into_body();
    let discarded = io::copy(&mut body, &mut io::sink())?;
    trace!("drained {} bytes of intermediate response", discarded);
    Ok(())
}
