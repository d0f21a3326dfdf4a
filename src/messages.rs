//! NTLM messages and their wire format.
//!
//! Every message starts with a 12-byte header (the magic value followed by the message type),
//! continues with a fixed-size part and ends with a payload region. Variable-length values live in
//! the payload region and are located through [`SecurityBuffer`]s in the fixed-size part; offsets
//! are relative to the start of the message. All integers are little-endian.


use crate::Flags;
use crate::encoding::{decode_string, encode_string, string_to_oem_bytes};
use crate::error::{ParsingError, StoringError};


/// The magic value at the start of every NTLMSSP data packet.
pub const NTLMSSP_MAGIC: [u8; 8] = *b"NTLMSSP\0";

/// The message type of a Negotiate message.
pub const NEGOTIATE_MESSAGE_TYPE: u32 = 0x0000_0001;

/// The message type of a Challenge message.
pub const CHALLENGE_MESSAGE_TYPE: u32 = 0x0000_0002;

/// The message type of an Authenticate message.
pub const AUTHENTICATE_MESSAGE_TYPE: u32 = 0x0000_0003;

const HEADER_LEN: usize = 12;
const NEGOTIATE_FIXED_LEN: usize = 32;
const CHALLENGE_FIXED_LEN: usize = 48;
const AUTHENTICATE_FIXED_LEN: usize = 64;
const VERSION_LEN: usize = 8;
const MIC_LEN: usize = 16;


fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn array_at<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut ret = [0u8; N];
    ret.copy_from_slice(&bytes[at..at + N]);
    ret
}

/// Whether strings are wide (UTF-16) or OEM, as declared by the negotiation flags.
fn strings_are_wide(flags: Flags) -> Result<bool, ParsingError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        Ok(true)
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        Ok(false)
    } else {
        Err(ParsingError::NeitherUnicodeNorOem)
    }
}

fn strings_are_wide_for_storing(flags: Flags) -> Result<bool, StoringError> {
    strings_are_wide(flags)
        .or(Err(StoringError::NeitherUnicodeNorOem))
}

/// Returns the lowest offset of all non-empty security buffers, i.e. where the payload begins.
fn payload_start(buffers: &[SecurityBuffer]) -> Option<usize> {
    buffers.iter()
        .filter(|sb| sb.length > 0)
        .map(|sb| sb.offset as usize)
        .min()
}


/// The common 12-byte prefix of every NTLM message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MessageHeader {
    pub signature: [u8; 8],
    pub message_type: u32,
}
impl MessageHeader {
    /// Creates a header with the NTLMSSP magic and the given message type.
    pub fn new(message_type: u32) -> Self {
        Self {
            signature: NTLMSSP_MAGIC,
            message_type,
        }
    }

    /// Returns whether the signature is the NTLMSSP magic and the message type is known.
    pub fn is_valid(&self) -> bool {
        self.signature == NTLMSSP_MAGIC
            && (NEGOTIATE_MESSAGE_TYPE..=AUTHENTICATE_MESSAGE_TYPE).contains(&self.message_type)
    }

    /// Like [`is_valid`](Self::is_valid), but explains what is wrong.
    pub fn validate(&self) -> Result<(), ParsingError> {
        if self.signature != NTLMSSP_MAGIC {
            Err(ParsingError::MagicMismatch { obtained: self.signature })
        } else if !self.is_valid() {
            Err(ParsingError::UnknownMessageType(self.message_type))
        } else {
            Ok(())
        }
    }

    /// Serializes the header into bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut ret = [0u8; HEADER_LEN];
        ret[0..8].copy_from_slice(&self.signature);
        ret[8..12].copy_from_slice(&self.message_type.to_le_bytes());
        ret
    }

    /// Reads a validated header of the given type from the start of a message that must be at
    /// least `fixed_len` bytes long.
    fn expect(message: &[u8], message_type: u32, fixed_len: usize) -> Result<Self, ParsingError> {
        let header = Self::try_from(message)?;
        header.validate()?;
        if header.message_type != message_type {
            return Err(ParsingError::UnexpectedMessageType { expected: message_type, obtained: header.message_type });
        }
        if message.len() < fixed_len {
            return Err(ParsingError::ShortMessage { expected_min_len: fixed_len, obtained_len: message.len() });
        }
        Ok(header)
    }
}
impl TryFrom<&[u8]> for MessageHeader {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < HEADER_LEN {
            return Err(ParsingError::ShortMessage { expected_min_len: HEADER_LEN, obtained_len: value.len() });
        }
        Ok(Self {
            signature: array_at(value, 0),
            message_type: le_u32(value, 8),
        })
    }
}


/// An NTLM security buffer, pointing to a value contained later in the message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    pub length: u16,

    /// Only a hint for writers; never consulted when reading.
    pub capacity: u16,

    /// Offset of the value relative to the start of the message.
    pub offset: u32,
}
impl SecurityBuffer {
    /// Serializes the security buffer into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Reads the security buffer stored at `at`; the caller has checked the message length.
    fn read_at(message: &[u8], at: usize) -> Self {
        Self {
            length: le_u16(message, at),
            capacity: le_u16(message, at + 2),
            offset: le_u32(message, at + 4),
        }
    }

    /// Extracts the value this security buffer points to from `message`.
    ///
    /// Non-empty values must lie entirely within `message` and must not start within the first
    /// `header_len` bytes, which make up the fixed-size part of the message.
    pub fn slice<'a>(&self, message: &'a [u8], header_len: usize) -> Result<&'a [u8], ParsingError> {
        if self.length == 0 {
            return Ok(&[]);
        }

        let start = usize::try_from(self.offset).unwrap_or(usize::MAX);
        if start < header_len {
            return Err(ParsingError::FieldOverlapsHeader { offset: self.offset, header_len });
        }
        let out_of_bounds = ParsingError::FieldOutOfBounds {
            offset: self.offset,
            length: self.length,
            message_len: message.len(),
        };
        let end = start.checked_add(usize::from(self.length))
            .ok_or_else(|| out_of_bounds.clone())?;
        if end > message.len() {
            return Err(out_of_bounds);
        }
        Ok(&message[start..end])
    }

    /// Extracts a string from `message`, decoding it as UTF-16 if `wide` and as OEM otherwise.
    pub fn read_string(&self, message: &[u8], header_len: usize, wide: bool) -> Result<String, ParsingError> {
        decode_string(self.slice(message, header_len)?, wide)
    }
}


/// Lays out a message as its fixed-size part followed by the payload its security buffers
/// point to.
struct MessageWriter {
    fixed: Vec<u8>,
    payload: Vec<u8>,
    fixed_len: usize,
}
impl MessageWriter {
    fn new(message_type: u32, fixed_len: usize) -> Self {
        let mut fixed = Vec::with_capacity(fixed_len);
        fixed.extend_from_slice(&MessageHeader::new(message_type).to_bytes());
        Self {
            fixed,
            payload: Vec::new(),
            fixed_len,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.fixed.extend_from_slice(bytes);
    }

    /// Appends `data` to the payload and a security buffer pointing to it to the fixed part.
    fn put_field(&mut self, data: &[u8]) -> Result<SecurityBuffer, StoringError> {
        let length = u16::try_from(data.len())
            .or(Err(StoringError::FieldTooLong { length: data.len() }))?;
        let offset_usize = self.fixed_len + self.payload.len();
        let offset = u32::try_from(offset_usize)
            .or(Err(StoringError::MessageTooLong { length: offset_usize }))?;

        let sb = SecurityBuffer {
            length,
            capacity: length,
            offset,
        };
        self.fixed.extend_from_slice(&sb.to_bytes());
        self.payload.extend_from_slice(data);
        Ok(sb)
    }

    fn put_string_field(&mut self, string: &str, wide: bool) -> Result<SecurityBuffer, StoringError> {
        let bytes = encode_string(string, wide)?;
        self.put_field(&bytes)
    }

    fn finish(mut self) -> Vec<u8> {
        debug_assert_eq!(self.fixed.len(), self.fixed_len);
        self.fixed.append(&mut self.payload);
        self.fixed
    }
}


/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Message {
    Negotiate(NegotiateMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
}
impl Message {
    /// Returns the 32-bit message number identifying the type of this message.
    pub fn message_type(&self) -> u32 {
        match self {
            Self::Negotiate(_) => NEGOTIATE_MESSAGE_TYPE,
            Self::Challenge(_) => CHALLENGE_MESSAGE_TYPE,
            Self::Authenticate(_) => AUTHENTICATE_MESSAGE_TYPE,
        }
    }

    /// Serializes the NTLM message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        match self {
            Self::Negotiate(t1m) => t1m.to_bytes(),
            Self::Challenge(t2m) => t2m.to_bytes(),
            Self::Authenticate(t3m) => t3m.to_bytes(),
        }
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let header = MessageHeader::try_from(value)?;
        header.validate()?;
        match header.message_type {
            NEGOTIATE_MESSAGE_TYPE => NegotiateMessage::try_from(value)
                .map(Message::Negotiate),
            CHALLENGE_MESSAGE_TYPE => ChallengeMessage::try_from(value)
                .map(Message::Challenge),
            _ => AuthenticateMessage::try_from(value)
                .map(Message::Authenticate),
        }
    }
}


/// A structure representing the version of an operating system as well as the NTLM revision used.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub reserved: [u8; 3],
    pub ntlm_revision: u8,
}
impl OsVersion {
    /// Serializes the OS version structure into bytes.
    pub fn to_bytes(&self) -> [u8; VERSION_LEN] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version,
            self.minor_version,
            build[0],
            build[1],
            self.reserved[0],
            self.reserved[1],
            self.reserved[2],
            self.ntlm_revision,
        ]
    }

    fn read_at(message: &[u8], at: usize) -> Self {
        Self {
            major_version: message[at],
            minor_version: message[at + 1],
            build_number: le_u16(message, at + 2),
            reserved: array_at(message, at + 4),
            ntlm_revision: message[at + 7],
        }
    }
}


/// The contents of an NTLM Negotiate message.
///
/// The Negotiate message is the first message in an NTLM challenge-response process and is sent by
/// the client to the server; the server is expected to respond with a Challenge message. The
/// supplied domain and workstation are always OEM strings; empty strings are sent as empty fields.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NegotiateMessage {
    /// Stores which information has been specified and which NTLM behavior should be negotiated.
    pub flags: Flags,

    /// The domain against which the client wishes to authenticate.
    pub supplied_domain: String,

    /// The NT hostname of the client.
    pub supplied_workstation: String,

    /// Version information about the client's operating system; only sent with
    /// [`Flags::NEGOTIATE_VERSION`].
    pub os_version: OsVersion,
}
impl NegotiateMessage {
    /// Creates a Negotiate message, setting the "supplied" flags for the values that are given.
    ///
    /// Both values are optional hints; one that has no OEM representation is left out.
    pub fn new(flags: Flags, domain: Option<&str>, workstation: Option<&str>) -> Self {
        let oem_only = |value: &&str| string_to_oem_bytes(value).is_ok();
        let mut flags = flags;
        let supplied_domain = domain.filter(oem_only).unwrap_or("").to_owned();
        let supplied_workstation = workstation.filter(oem_only).unwrap_or("").to_owned();
        flags.set(Flags::NEGOTIATE_DOMAIN_SUPPLIED, !supplied_domain.is_empty());
        flags.set(Flags::NEGOTIATE_WORKSTATION_SUPPLIED, !supplied_workstation.is_empty());
        Self {
            flags,
            supplied_domain,
            supplied_workstation,
            os_version: OsVersion::default(),
        }
    }

    /// Serializes the Negotiate message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let with_version = self.flags.contains(Flags::NEGOTIATE_VERSION);
        let fixed_len = NEGOTIATE_FIXED_LEN + if with_version { VERSION_LEN } else { 0 };

        let mut writer = MessageWriter::new(NEGOTIATE_MESSAGE_TYPE, fixed_len);
        writer.put(&self.flags.bits().to_le_bytes());
        writer.put_string_field(&self.supplied_domain, false)?;
        writer.put_string_field(&self.supplied_workstation, false)?;
        if with_version {
            writer.put(&self.os_version.to_bytes());
        }
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for NegotiateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        MessageHeader::expect(value, NEGOTIATE_MESSAGE_TYPE, NEGOTIATE_FIXED_LEN)?;

        let flags = Flags::from_bits_retain(le_u32(value, 12));
        let domain_secbuf = SecurityBuffer::read_at(value, 16);
        let workstation_secbuf = SecurityBuffer::read_at(value, 24);

        let mut header_len = NEGOTIATE_FIXED_LEN;
        let mut os_version = OsVersion::default();
        let start = payload_start(&[domain_secbuf, workstation_secbuf]).unwrap_or(value.len());
        if flags.contains(Flags::NEGOTIATE_VERSION) && start >= header_len + VERSION_LEN && value.len() >= header_len + VERSION_LEN {
            os_version = OsVersion::read_at(value, header_len);
            header_len += VERSION_LEN;
        }

        Ok(Self {
            flags,
            supplied_domain: domain_secbuf.read_string(value, header_len, false)?,
            supplied_workstation: workstation_secbuf.read_string(value, header_len, false)?,
            os_version,
        })
    }
}


/// The contents of an NTLM Challenge message.
///
/// The Challenge message is sent by the server in response to the client's Negotiate message; the
/// client is expected to respond with an Authenticate message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeMessage {
    /// The host against which the client is authenticating.
    pub target_name: String,

    /// Stores which NTLM behavior has been accepted by the server from the client's request.
    pub flags: Flags,

    /// The server challenge (nonce).
    pub challenge: [u8; 8],

    /// The reserved context value.
    pub context: [u8; 8],

    /// Information about the targets of the authentication, without the terminating entry.
    pub target_information: Vec<TargetInfoEntry>,

    /// Version information about the server's operating system.
    pub os_version: OsVersion,
}
impl ChallengeMessage {
    /// Serializes the target information, including its terminator, as used by the NTLMv2
    /// response.
    pub fn target_info_bytes(&self) -> Result<Vec<u8>, StoringError> {
        encode_target_info(&self.target_information)
    }

    /// Returns the server's timestamp from the target information, if it sent one.
    pub fn timestamp(&self) -> Option<u64> {
        self.target_information.iter()
            .find(|tie| tie.entry_type == TargetInfoType::Timestamp)
            .and_then(|tie| <[u8; 8]>::try_from(tie.data.as_slice()).ok())
            .map(u64::from_le_bytes)
    }

    /// Serializes the Challenge message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let wide = strings_are_wide_for_storing(self.flags)?;
        let with_version = self.flags.contains(Flags::NEGOTIATE_VERSION);
        let fixed_len = CHALLENGE_FIXED_LEN + if with_version { VERSION_LEN } else { 0 };

        let target_info = if self.target_information.is_empty() {
            Vec::new()
        } else {
            self.target_info_bytes()?
        };

        let mut writer = MessageWriter::new(CHALLENGE_MESSAGE_TYPE, fixed_len);
        writer.put_string_field(&self.target_name, wide)?;
        writer.put(&self.flags.bits().to_le_bytes());
        writer.put(&self.challenge);
        writer.put(&self.context);
        writer.put_field(&target_info)?;
        if with_version {
            writer.put(&self.os_version.to_bytes());
        }
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for ChallengeMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        MessageHeader::expect(value, CHALLENGE_MESSAGE_TYPE, CHALLENGE_FIXED_LEN)?;

        let target_name_secbuf = SecurityBuffer::read_at(value, 12);
        let flags = Flags::from_bits_retain(le_u32(value, 20));
        let challenge = array_at(value, 24);
        let context = array_at(value, 32);
        let target_info_secbuf = SecurityBuffer::read_at(value, 40);

        // the version block is only present if announced and if the payload leaves room for it
        let mut header_len = CHALLENGE_FIXED_LEN;
        let mut os_version = OsVersion::default();
        let start = payload_start(&[target_name_secbuf, target_info_secbuf]).unwrap_or(value.len());
        if flags.contains(Flags::NEGOTIATE_VERSION) && start >= header_len + VERSION_LEN && value.len() >= header_len + VERSION_LEN {
            os_version = OsVersion::read_at(value, header_len);
            header_len += VERSION_LEN;
        }

        let target_name = if target_name_secbuf.length == 0 {
            String::new()
        } else {
            target_name_secbuf.read_string(value, header_len, strings_are_wide(flags)?)?
        };
        let target_information = parse_target_info(target_info_secbuf.slice(value, header_len)?)?;

        Ok(Self {
            target_name,
            flags,
            challenge,
            context,
            target_information,
            os_version,
        })
    }
}


/// The contents of an NTLM Authenticate message.
///
/// The Authenticate message is sent by the client in response to the server's Challenge message;
/// once it is accepted by the server, the authentication has succeeded.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AuthenticateMessage {
    pub lm_response: Vec<u8>,
    pub ntlm_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation_name: String,

    /// The encrypted random session key; empty unless key exchange was negotiated.
    pub session_key: Vec<u8>,

    pub flags: Flags,
    pub os_version: OsVersion,

    /// The message integrity code over all three messages.
    pub mic: Option<[u8; MIC_LEN]>,
}
impl AuthenticateMessage {
    /// Serializes the Authenticate message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let wide = strings_are_wide_for_storing(self.flags)?;
        let with_version = self.flags.contains(Flags::NEGOTIATE_VERSION);
        let fixed_len = AUTHENTICATE_FIXED_LEN
            + if with_version { VERSION_LEN } else { 0 }
            + if self.mic.is_some() { MIC_LEN } else { 0 };

        let mut writer = MessageWriter::new(AUTHENTICATE_MESSAGE_TYPE, fixed_len);
        writer.put_field(&self.lm_response)?;
        writer.put_field(&self.ntlm_response)?;
        writer.put_string_field(&self.domain_name, wide)?;
        writer.put_string_field(&self.user_name, wide)?;
        writer.put_string_field(&self.workstation_name, wide)?;
        writer.put_field(&self.session_key)?;
        writer.put(&self.flags.bits().to_le_bytes());
        if with_version {
            writer.put(&self.os_version.to_bytes());
        }
        if let Some(mic) = &self.mic {
            writer.put(mic);
        }
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for AuthenticateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        MessageHeader::expect(value, AUTHENTICATE_MESSAGE_TYPE, AUTHENTICATE_FIXED_LEN)?;

        let lm_response_secbuf = SecurityBuffer::read_at(value, 12);
        let ntlm_response_secbuf = SecurityBuffer::read_at(value, 20);
        let domain_name_secbuf = SecurityBuffer::read_at(value, 28);
        let user_name_secbuf = SecurityBuffer::read_at(value, 36);
        let workstation_name_secbuf = SecurityBuffer::read_at(value, 44);
        let session_key_secbuf = SecurityBuffer::read_at(value, 52);
        let flags = Flags::from_bits_retain(le_u32(value, 60));

        // version and MIC are optional; they are present if the payload starts late enough
        let start = payload_start(&[
            lm_response_secbuf,
            ntlm_response_secbuf,
            domain_name_secbuf,
            user_name_secbuf,
            workstation_name_secbuf,
            session_key_secbuf,
        ]).unwrap_or(value.len());
        let mut header_len = AUTHENTICATE_FIXED_LEN;
        let mut os_version = OsVersion::default();
        if flags.contains(Flags::NEGOTIATE_VERSION) && start >= header_len + VERSION_LEN && value.len() >= header_len + VERSION_LEN {
            os_version = OsVersion::read_at(value, header_len);
            header_len += VERSION_LEN;
        }
        let mut mic = None;
        if start >= header_len + MIC_LEN && value.len() >= header_len + MIC_LEN {
            mic = Some(array_at(value, header_len));
            header_len += MIC_LEN;
        }

        let wide = strings_are_wide(flags)?;
        Ok(Self {
            lm_response: Vec::from(lm_response_secbuf.slice(value, header_len)?),
            ntlm_response: Vec::from(ntlm_response_secbuf.slice(value, header_len)?),
            domain_name: domain_name_secbuf.read_string(value, header_len, wide)?,
            user_name: user_name_secbuf.read_string(value, header_len, wide)?,
            workstation_name: workstation_name_secbuf.read_string(value, header_len, wide)?,
            session_key: Vec::from(session_key_secbuf.slice(value, header_len)?),
            flags,
            os_version,
            mic,
        })
    }
}


/// The type of additional target information included in the Challenge message.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TargetInfoType {
    Terminator,
    NtServer,
    NtDomain,
    DnsServer,
    DnsDomain,
    DnsForest,
    Flags,
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<TargetInfoType> for u16 {
    fn from(t: TargetInfoType) -> Self {
        match t {
            TargetInfoType::Terminator => 0x0000,
            TargetInfoType::NtServer => 0x0001,
            TargetInfoType::NtDomain => 0x0002,
            TargetInfoType::DnsServer => 0x0003,
            TargetInfoType::DnsDomain => 0x0004,
            TargetInfoType::DnsForest => 0x0005,
            TargetInfoType::Flags => 0x0006,
            TargetInfoType::Timestamp => 0x0007,
            TargetInfoType::SingleHost => 0x0008,
            TargetInfoType::TargetName => 0x0009,
            TargetInfoType::ChannelBindings => 0x000A,
            TargetInfoType::Unknown(w) => w,
        }
    }
}
impl From<u16> for TargetInfoType {
    fn from(w: u16) -> Self {
        match w {
            0x0000 => TargetInfoType::Terminator,
            0x0001 => TargetInfoType::NtServer,
            0x0002 => TargetInfoType::NtDomain,
            0x0003 => TargetInfoType::DnsServer,
            0x0004 => TargetInfoType::DnsDomain,
            0x0005 => TargetInfoType::DnsForest,
            0x0006 => TargetInfoType::Flags,
            0x0007 => TargetInfoType::Timestamp,
            0x0008 => TargetInfoType::SingleHost,
            0x0009 => TargetInfoType::TargetName,
            0x000A => TargetInfoType::ChannelBindings,
            other => TargetInfoType::Unknown(other),
        }
    }
}

/// An entry (AV pair) of additional target information included in the Challenge message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TargetInfoEntry {
    pub entry_type: TargetInfoType,
    pub data: Vec<u8>,
}
impl TargetInfoEntry {
    /// Serializes the target info entry into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let entry_type_u16: u16 = self.entry_type.into();
        let data_len = u16::try_from(self.data.len())
            .or(Err(StoringError::FieldTooLong { length: self.data.len() }))?;

        let mut ret = Vec::with_capacity(4 + self.data.len());
        ret.extend_from_slice(&entry_type_u16.to_le_bytes());
        ret.extend_from_slice(&data_len.to_le_bytes());
        ret.extend_from_slice(&self.data);
        Ok(ret)
    }

    /// Attempts to deserialize a target info entry from the given byte slice. If successful,
    /// returns the deserialized target info entry as well as any bytes remaining in the slice.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<(Self, &[u8]), ParsingError> {
        if bytes.len() < 4 {
            return Err(ParsingError::TruncatedTargetInfo { expected_at_least: 4, obtained: bytes.len() });
        }

        let entry_type: TargetInfoType = le_u16(bytes, 0).into();
        let length = usize::from(le_u16(bytes, 2));
        if 4 + length > bytes.len() {
            return Err(ParsingError::TruncatedTargetInfo { expected_at_least: 4 + length, obtained: bytes.len() });
        }

        let entry = Self {
            entry_type,
            data: Vec::from(&bytes[4..4 + length]),
        };
        Ok((entry, &bytes[4 + length..]))
    }

    /// Attempts to convert the data within this target info entry into a string.
    ///
    /// Target information strings are always Unicode, even if the flags claim OEM.
    pub fn value_string(&self) -> Result<String, ParsingError> {
        decode_string(&self.data, true)
    }

    /// Creates a target info entry from an entry type and a string.
    pub fn from_string(entry_type: TargetInfoType, string: &str) -> Self {
        Self {
            entry_type,
            data: crate::encoding::string_to_utf16_le_bytes(string),
        }
    }
}

/// Parses a target information block up to its terminator.
///
/// An empty block yields no entries; a non-empty block must contain a terminator entry.
pub fn parse_target_info(bytes: &[u8]) -> Result<Vec<TargetInfoEntry>, ParsingError> {
    let mut entries = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (entry, next) = TargetInfoEntry::try_from_bytes(rest)?;
        if entry.entry_type == TargetInfoType::Terminator {
            if !entry.data.is_empty() {
                return Err(ParsingError::TerminatorWithData { length: entry.data.len() });
            }
            return Ok(entries);
        }
        entries.push(entry);
        rest = next;
    }
    if bytes.is_empty() {
        Ok(entries)
    } else {
        Err(ParsingError::UnterminatedTargetInfo)
    }
}

/// Serializes target information entries followed by a terminator.
pub fn encode_target_info(entries: &[TargetInfoEntry]) -> Result<Vec<u8>, StoringError> {
    let mut ret = Vec::new();
    for entry in entries {
        ret.append(&mut entry.to_bytes()?);
    }
    ret.extend_from_slice(&[0, 0, 0, 0]);
    Ok(ret)
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // https://davenport.sourceforge.net/ntlm.html#type2MessageExample
    const DAVENPORT_CHALLENGE: [u8; 158] = hex!(
        "4e544c4d53535000020000000c000c0030000000010281000123456789abcdef"
        "0000000000000000620062003c00000044004f004d00410049004e0002000c00"
        "44004f004d00410049004e0001000c0053004500520056004500520004001400"
        "64006f006d00610069006e002e0063006f006d00030022007300650072007600"
        "650072002e0064006f006d00610069006e002e0063006f006d0000000000"
    );

    // https://davenport.sourceforge.net/ntlm.html#type1MessageExample
    const DAVENPORT_NEGOTIATE: [u8; 57] = hex!(
        "4e544c4d53535000010000000732000006000600330000000b000b0028000000"
        "050093080000000f574f524b53544154494f4e444f4d41494e"
    );

    fn sample_authenticate() -> AuthenticateMessage {
        AuthenticateMessage {
            lm_response: vec![0; 24],
            ntlm_response: (0u8..40).collect(),
            domain_name: "DOMAIN".to_owned(),
            user_name: "user".to_owned(),
            workstation_name: "WORKSTATION".to_owned(),
            session_key: Vec::new(),
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_NTLM2_KEY,
            os_version: OsVersion::default(),
            mic: None,
        }
    }

    #[test]
    fn test_header_validity() {
        assert!(MessageHeader::new(NEGOTIATE_MESSAGE_TYPE).is_valid());
        assert!(MessageHeader::new(AUTHENTICATE_MESSAGE_TYPE).is_valid());
        assert!(!MessageHeader::new(0).is_valid());
        assert!(!MessageHeader::new(4).is_valid());

        let wrong_magic = MessageHeader { signature: *b"NTLMSSP\x01", message_type: 1 };
        assert!(!wrong_magic.is_valid());
        assert_eq!(wrong_magic.validate(), Err(ParsingError::MagicMismatch { obtained: *b"NTLMSSP\x01" }));
        assert_eq!(MessageHeader::new(7).validate(), Err(ParsingError::UnknownMessageType(7)));
    }

    #[test]
    fn test_magic_mismatch_rejected_regardless_of_content() {
        for position in 0..8 {
            let mut corrupted = DAVENPORT_CHALLENGE;
            corrupted[position] ^= 0x20;
            assert!(matches!(
                Message::try_from(&corrupted[..]),
                Err(ParsingError::MagicMismatch { .. }),
            ));
            assert!(matches!(
                ChallengeMessage::try_from(&corrupted[..]),
                Err(ParsingError::MagicMismatch { .. }),
            ));
        }
        assert!(matches!(
            Message::try_from(&b"NTLMSS"[..]),
            Err(ParsingError::ShortMessage { expected_min_len: 12, obtained_len: 6 }),
        ));
    }

    #[test]
    fn test_unexpected_message_type() {
        let negotiate = NegotiateMessage::new(Flags::NEGOTIATE_OEM, None, None).to_bytes().unwrap();
        assert_eq!(
            ChallengeMessage::try_from(negotiate.as_slice()),
            Err(ParsingError::UnexpectedMessageType { expected: 2, obtained: 1 }),
        );
    }

    #[test]
    fn test_security_buffer_bounds() {
        let message = [0u8; 20];
        let inside = SecurityBuffer { length: 4, capacity: 4, offset: 16 };
        assert_eq!(inside.slice(&message, 12).unwrap().len(), 4);

        let past_end = SecurityBuffer { length: 5, capacity: 5, offset: 16 };
        assert_eq!(
            past_end.slice(&message, 12),
            Err(ParsingError::FieldOutOfBounds { offset: 16, length: 5, message_len: 20 }),
        );

        let huge_offset = SecurityBuffer { length: 1, capacity: 1, offset: u32::MAX };
        assert!(matches!(huge_offset.slice(&message, 12), Err(ParsingError::FieldOutOfBounds { .. })));

        let overlapping = SecurityBuffer { length: 2, capacity: 2, offset: 8 };
        assert_eq!(
            overlapping.slice(&message, 12),
            Err(ParsingError::FieldOverlapsHeader { offset: 8, header_len: 12 }),
        );

        // capacity is never trusted, and empty fields may point anywhere
        let lying_capacity = SecurityBuffer { length: 2, capacity: 0xFFFF, offset: 18 };
        assert_eq!(lying_capacity.slice(&message, 12).unwrap().len(), 2);
        let empty = SecurityBuffer { length: 0, capacity: 0, offset: 0xFFFF };
        assert_eq!(empty.slice(&message, 12).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_decode_davenport_challenge() {
        let challenge = ChallengeMessage::try_from(&DAVENPORT_CHALLENGE[..]).unwrap();
        assert_eq!(challenge.target_name, "DOMAIN");
        assert_eq!(challenge.flags.bits(), 0x0081_0201);
        assert!(challenge.flags.contains(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_TARGET_INFO));
        assert_eq!(challenge.challenge, hex!("0123456789abcdef"));
        assert_eq!(challenge.context, [0; 8]);
        assert_eq!(challenge.os_version, OsVersion::default());
        assert_eq!(challenge.timestamp(), None);

        let entries: Vec<(TargetInfoType, String)> = challenge.target_information.iter()
            .map(|tie| (tie.entry_type, tie.value_string().unwrap()))
            .collect();
        assert_eq!(entries, vec![
            (TargetInfoType::NtDomain, "DOMAIN".to_owned()),
            (TargetInfoType::NtServer, "SERVER".to_owned()),
            (TargetInfoType::DnsDomain, "domain.com".to_owned()),
            (TargetInfoType::DnsServer, "server.domain.com".to_owned()),
        ]);

        // re-encoding the entries reproduces the block the server sent
        assert_eq!(challenge.target_info_bytes().unwrap(), &DAVENPORT_CHALLENGE[60..]);
        assert_eq!(challenge.to_bytes().unwrap(), &DAVENPORT_CHALLENGE[..]);
    }

    #[test]
    fn test_challenge_field_past_end() {
        let mut truncated = Vec::from(&DAVENPORT_CHALLENGE[..]);
        truncated.truncate(150);
        assert!(matches!(
            ChallengeMessage::try_from(truncated.as_slice()),
            Err(ParsingError::FieldOutOfBounds { offset: 60, length: 98, message_len: 150 }),
        ));
        assert!(matches!(
            ChallengeMessage::try_from(&DAVENPORT_CHALLENGE[..40]),
            Err(ParsingError::ShortMessage { expected_min_len: 48, obtained_len: 40 }),
        ));
    }

    #[test]
    fn test_target_info_without_terminator() {
        // drop the terminator and shrink the target info field accordingly
        let mut unterminated = Vec::from(&DAVENPORT_CHALLENGE[..154]);
        unterminated[40] = 0x5e;
        assert_eq!(
            ChallengeMessage::try_from(unterminated.as_slice()),
            Err(ParsingError::UnterminatedTargetInfo),
        );

        // an entry claiming more data than the block holds
        let overrun = hex!("0200 0c00 4400 4f00");
        assert_eq!(
            parse_target_info(&overrun),
            Err(ParsingError::TruncatedTargetInfo { expected_at_least: 16, obtained: 8 }),
        );
        assert_eq!(parse_target_info(&[]), Ok(Vec::new()));

        // anything after the terminator is ignored
        let trailing = hex!("0000 0000 ffff");
        assert_eq!(parse_target_info(&trailing), Ok(Vec::new()));
    }

    #[test]
    fn test_terminator_with_data() {
        let padded_terminator = hex!("0200 0200 4400 0000 0200 ffff");
        assert_eq!(
            parse_target_info(&padded_terminator),
            Err(ParsingError::TerminatorWithData { length: 2 }),
        );
    }

    #[test]
    fn test_build_davenport_challenge() {
        let challenge = ChallengeMessage {
            target_name: "DOMAIN".to_owned(),
            flags: Flags::from_bits_retain(0x0081_0201),
            challenge: hex!("0123456789abcdef"),
            context: [0; 8],
            target_information: vec![
                TargetInfoEntry::from_string(TargetInfoType::NtDomain, "DOMAIN"),
                TargetInfoEntry::from_string(TargetInfoType::NtServer, "SERVER"),
                TargetInfoEntry::from_string(TargetInfoType::DnsDomain, "domain.com"),
                TargetInfoEntry::from_string(TargetInfoType::DnsServer, "server.domain.com"),
            ],
            os_version: OsVersion::default(),
        };
        let bytes = challenge.to_bytes().unwrap();
        assert_eq!(bytes, &DAVENPORT_CHALLENGE[..]);

        let message = Message::try_from(bytes.as_slice()).unwrap();
        assert_eq!(message.message_type(), CHALLENGE_MESSAGE_TYPE);
        assert_eq!(message, Message::Challenge(challenge));
    }

    #[test]
    fn test_negotiate_layout() {
        let flags = Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_OEM | Flags::REQUEST_TARGET | Flags::NEGOTIATE_NTLM;
        let bytes = NegotiateMessage::new(flags, None, None).to_bytes().unwrap();
        assert_eq!(bytes, hex!(
            "4e544c4d5353500001000000"
            "07020000"
            "0000000020000000"
            "0000000020000000"
        ));
    }

    #[test]
    fn test_negotiate_round_trip() {
        let flags = Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_NTLM;
        let message = NegotiateMessage::new(flags, Some("DOMAIN"), Some("WORKSTATION"));
        assert!(message.flags.contains(Flags::NEGOTIATE_DOMAIN_SUPPLIED | Flags::NEGOTIATE_WORKSTATION_SUPPLIED));
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[32..], b"DOMAINWORKSTATION");
        assert_eq!(NegotiateMessage::try_from(bytes.as_slice()).unwrap(), message);

        let mut versioned = message.clone();
        versioned.flags |= Flags::NEGOTIATE_VERSION;
        versioned.os_version = OsVersion { major_version: 10, minor_version: 0, build_number: 19041, reserved: [0; 3], ntlm_revision: 15 };
        let bytes = versioned.to_bytes().unwrap();
        assert_eq!(&bytes[32..40], &hex!("0a00614a0000000f"));
        assert_eq!(Message::try_from(bytes.as_slice()).unwrap(), Message::Negotiate(versioned));
    }

    #[test]
    fn test_negotiate_skips_non_oem_values() {
        let flags = Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM;
        let message = NegotiateMessage::new(flags, Some("\u{41a}\u{41e}\u{420}\u{41f}"), Some("WORKSTATION"));
        assert_eq!(message.supplied_domain, "");
        assert!(!message.flags.contains(Flags::NEGOTIATE_DOMAIN_SUPPLIED));
        assert!(message.flags.contains(Flags::NEGOTIATE_WORKSTATION_SUPPLIED));

        let message = NegotiateMessage::new(flags, Some("DOMAIN"), Some("\u{5de5}\u{4f5c}\u{7ad9}"));
        assert_eq!(message.supplied_workstation, "");
        assert!(!message.flags.contains(Flags::NEGOTIATE_WORKSTATION_SUPPLIED));
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[32..], b"DOMAIN");
        assert_eq!(Message::try_from(bytes.as_slice()).unwrap().message_type(), NEGOTIATE_MESSAGE_TYPE);
    }

    #[test]
    fn test_decode_davenport_negotiate() {
        // the version block is present although the flag is not; the payload still decodes
        let negotiate = NegotiateMessage::try_from(&DAVENPORT_NEGOTIATE[..]).unwrap();
        assert_eq!(negotiate.flags.bits(), 0x0000_3207);
        assert_eq!(negotiate.supplied_domain, "DOMAIN");
        assert_eq!(negotiate.supplied_workstation, "WORKSTATION");
        assert_eq!(negotiate.os_version, OsVersion::default());
    }

    #[test]
    fn test_authenticate_round_trip() {
        let message = sample_authenticate();
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[12..20], &SecurityBuffer { length: 24, capacity: 24, offset: 64 }.to_bytes());
        assert_eq!(&bytes[20..28], &SecurityBuffer { length: 40, capacity: 40, offset: 88 }.to_bytes());
        assert_eq!(&bytes[28..36], &SecurityBuffer { length: 12, capacity: 12, offset: 128 }.to_bytes());
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn test_authenticate_round_trip_with_mic_and_version() {
        let mut message = sample_authenticate();
        message.mic = Some([0xA5; 16]);
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[64..80], &[0xA5; 16]);
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);

        message.flags |= Flags::NEGOTIATE_VERSION;
        message.os_version.major_version = 6;
        message.session_key = vec![0x11; 16];
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes[64], 6);
        assert_eq!(&bytes[72..88], &[0xA5; 16]);
        assert_eq!(Message::try_from(bytes.as_slice()).unwrap(), Message::Authenticate(message));
    }

    #[test]
    fn test_authenticate_oem_strings() {
        let mut message = sample_authenticate();
        message.flags = Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_NTLM;
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[128..134], b"DOMAIN");
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);

        message.flags = Flags::NEGOTIATE_NTLM;
        assert_eq!(message.to_bytes(), Err(StoringError::NeitherUnicodeNorOem));
    }

    #[test]
    fn test_field_too_long() {
        let mut message = sample_authenticate();
        message.ntlm_response = vec![0; 0x1_0000];
        assert_eq!(message.to_bytes(), Err(StoringError::FieldTooLong { length: 0x1_0000 }));
    }

    #[test]
    fn test_server_timestamp() {
        let mut challenge = ChallengeMessage::try_from(&DAVENPORT_CHALLENGE[..]).unwrap();
        challenge.target_information.push(TargetInfoEntry {
            entry_type: TargetInfoType::Timestamp,
            data: hex!("0090d336b734c301").to_vec(),
        });
        assert_eq!(challenge.timestamp(), Some(0x01c3_34b7_36d3_9000));

        let bytes = challenge.to_bytes().unwrap();
        assert_eq!(ChallengeMessage::try_from(bytes.as_slice()).unwrap(), challenge);
    }
}
