//! Caller-supplied identities.


use std::fmt;

use base64::prelude::{BASE64_STANDARD, Engine};
use http::HeaderValue;


/// The secret part of the credentials.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum Secret {
    /// A plaintext password.
    Password(String),

    /// The NT hash (MD4 of the UTF-16LE password), computed ahead of time.
    NtHash([u8; 16]),
}
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::NtHash(_) => f.write_str("NtHash(<redacted>)"),
        }
    }
}

/// Standard NTLM credentials, consisting of username, secret and domain.
///
/// The `Debug` output never contains the secret.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// The username part of the credentials.
    pub username: String,

    /// The secret part of the credentials.
    pub secret: Secret,

    /// The domain part of the credentials.
    ///
    /// Often specified in combination with the username as `<DOMAIN>\<USERNAME>`. In credentials
    /// without a domain, the domain is an empty string.
    pub domain: String,
}
impl Credentials {
    /// Creates password credentials.
    pub fn new(domain: &str, username: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            secret: Secret::Password(password.to_owned()),
            domain: domain.to_owned(),
        }
    }

    /// Creates credentials from a pre-computed NT hash.
    pub fn with_nt_hash(domain: &str, username: &str, nt_hash: [u8; 16]) -> Self {
        Self {
            username: username.to_owned(),
            secret: Secret::NtHash(nt_hash),
            domain: domain.to_owned(),
        }
    }

    /// Creates credentials from a user specification that may contain a domain, as in
    /// `DOMAIN\user`. Without a backslash the domain is empty and the user is taken verbatim,
    /// which keeps `user@domain` principal names intact.
    pub fn from_qualified_user(qualified_user: &str, password: &str) -> Self {
        match qualified_user.split_once('\\') {
            Some((domain, username)) => Self::new(domain, username, password),
            None => Self::new("", qualified_user, password),
        }
    }

    /// Extracts credentials from the value of an `Authorization: Basic ...` header.
    ///
    /// Returns `None` if the header uses another scheme or is not well-formed.
    pub fn from_basic_auth(header: &HeaderValue) -> Option<Self> {
        let value = header.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("Basic") {
            return None;
        }
        let decoded = BASE64_STANDARD.decode(token.trim()).ok()?;
        let user_pass = String::from_utf8(decoded).ok()?;
        let (user, password) = user_pass.split_once(':')?;
        Some(Self::from_qualified_user(user, password))
    }
}
