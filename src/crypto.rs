//! NTLMv2 response calculation.
//!
//! All functions are pure functions of their inputs; randomness and the clock are only consulted
//! by [`generate_client_challenge`] and [`get_ntlm_time`], whose results callers pass in.


use chrono::{DateTime, Utc};
use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::Flags;
use crate::credentials::{Credentials, Secret};
use crate::encoding::string_to_utf16_le_bytes;
use crate::messages::{AuthenticateMessage, OsVersion};


/// Microseconds between 1601-01-01 (the NTLM epoch) and 1970-01-01 (the Unix epoch).
const UNIX_EPOCH_IN_NTLM_MICROS: i64 = 11_644_473_600 * 1_000_000;

/// Blob signature of an NTLMv2 client challenge: response type 1, highest response type 1.
const NTLM_V2_BLOB_SIGNATURE: [u8; 8] = [0x01, 0x01, 0, 0, 0, 0, 0, 0];


/// The response to an NTLM challenge.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeResponse {
    /// The classic LanManager (LM) response; all zeroes, since only NTLMv2 is spoken.
    pub lm_response: Vec<u8>,

    /// The NT LanManager (NTLM) response: the proof followed by the client blob.
    pub ntlm_response: Vec<u8>,

    /// The proof of knowledge of the password (NTProofStr).
    pub nt_proof: [u8; 16],

    /// The session base key.
    pub session_key: [u8; 16],
}
impl ChallengeResponse {
    /// Converts this response to a challenge into a full-blown Authenticate NTLM message.
    ///
    /// The session key is not transmitted since no key exchange takes place.
    pub fn to_message(&self, creds: &Credentials, workstation_name: &str, flags: Flags) -> AuthenticateMessage {
        AuthenticateMessage {
            lm_response: self.lm_response.clone(),
            ntlm_response: self.ntlm_response.clone(),
            domain_name: creds.domain.clone(),
            user_name: creds.username.clone(),
            workstation_name: workstation_name.to_owned(),
            session_key: Vec::new(),
            flags,
            os_version: OsVersion::default(),
            mic: None,
        }
    }
}


fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut hmac_md5 = <Hmac<Md5> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    for part in parts {
        hmac_md5.update(part);
    }
    let mut ret = [0u8; 16];
    ret.copy_from_slice(hmac_md5.finalize().into_bytes().as_slice());
    ret
}


/// Obtains the current NTLM timestamp.
pub fn get_ntlm_time() -> u64 {
    ntlm_time_from(Utc::now())
}

/// Converts an instant into an NTLM timestamp, counting tenths of a microsecond since
/// 1601-01-01T00:00:00Z.
pub fn ntlm_time_from(instant: DateTime<Utc>) -> u64 {
    let micros = instant.timestamp_micros().saturating_add(UNIX_EPOCH_IN_NTLM_MICROS);
    u64::try_from(micros).unwrap_or(0).saturating_mul(10)
}

/// Generates a cryptographically random client challenge.
pub fn generate_client_challenge() -> [u8; 8] {
    let mut client_challenge = [0u8; 8];
    OsRng.fill_bytes(&mut client_challenge);
    client_challenge
}


/// Derives the NT hash from a password.
///
/// The password is encoded as UTF-16 in little-endian byte order (without the Byte Order Mark) and
/// hashed using MD4.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let mut md4_state = <Md4 as Digest>::new();
    md4_state.update(string_to_utf16_le_bytes(password));
    let mut ret = [0u8; 16];
    ret.copy_from_slice(md4_state.finalize().as_slice());
    ret
}

/// Derives the encryption key from credentials according to the NTLMv2 scheme (NTOWFv2).
///
/// The NTLMv2 scheme is a HMAC-MD5 scheme whose key is the NT hash and whose plaintext is a
/// concatenation of uppercase username and unchanged-case domain, each encoded as UTF-16 in
/// little-endian byte order without the Byte Order Mark.
pub fn ntlm_v2_password_func(creds: &Credentials) -> [u8; 16] {
    let hmac_key = match &creds.secret {
        Secret::Password(password) => nt_hash(password),
        Secret::NtHash(hash) => *hash,
    };
    let upper_user_bytes = string_to_utf16_le_bytes(&creds.username.to_uppercase());
    let dom_bytes = string_to_utf16_le_bytes(&creds.domain);
    hmac_md5(&hmac_key, &[&upper_user_bytes[..], &dom_bytes[..]])
}

/// Calculates an NTLMv2 response to the given server challenge, including target info and time
/// value to protect against replay attacks.
///
/// `target_info` is the serialized target information including its terminator. `time` and
/// `client_challenge` are normally [`get_ntlm_time`] and [`generate_client_challenge`].
pub fn respond_challenge_ntlm_v2(
    server_challenge: [u8; 8],
    target_info: &[u8],
    time: u64,
    client_challenge: [u8; 8],
    creds: &Credentials,
) -> ChallengeResponse {
    let mut temp = Vec::with_capacity(28 + target_info.len() + 4);
    temp.extend_from_slice(&NTLM_V2_BLOB_SIGNATURE);
    temp.extend_from_slice(&time.to_le_bytes());
    temp.extend_from_slice(&client_challenge);
    temp.extend_from_slice(&[0; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0; 4]);

    let ntlm_key = ntlm_v2_password_func(creds);
    let nt_proof = hmac_md5(&ntlm_key, &[&server_challenge[..], &temp[..]]);

    let mut ntlm_response = Vec::with_capacity(16 + temp.len());
    ntlm_response.extend_from_slice(&nt_proof);
    ntlm_response.extend_from_slice(&temp);

    let session_key = hmac_md5(&ntlm_key, &[&nt_proof[..]]);

    ChallengeResponse {
        lm_response: vec![0; 24],
        ntlm_response,
        nt_proof,
        session_key,
    }
}

/// Calculates the message integrity code over the three messages of a handshake.
///
/// `authenticate` must be the serialized Authenticate message with its MIC field zeroed.
pub fn compute_mic(session_key: &[u8; 16], negotiate: &[u8], challenge: &[u8], authenticate: &[u8]) -> [u8; 16] {
    hmac_md5(session_key, &[negotiate, challenge, authenticate])
}
