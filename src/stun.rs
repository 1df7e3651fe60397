//! STUN message codec (RFC 5389 subset).
//!
//! This module implements the binding subset of STUN used for connectivity
//! checks: byte-exact header layout, TLV attribute framing, magic-cookie XOR
//! address encoding, MESSAGE-INTEGRITY (HMAC-SHA1) and FINGERPRINT
//! (CRC-32/IEEE) computation, and the ICE nomination/role attributes. All
//! multi-byte fields are big-endian (network byte order).
//!
//! Building goes through [`MessageBuilder`]; parsing through
//! [`Message::parse`]. Both sides of the connectivity engine speak only this
//! subset, and emitted packets always carry a FINGERPRINT.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// STUN magic cookie (RFC 5389).
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes).
pub const HEADER_SIZE: usize = 20;

/// FINGERPRINT XOR mask, the ASCII bytes "STUN".
pub const FINGERPRINT_XOR: u32 = 0x5354_554E;

const METHOD_BINDING: u16 = 0x0001;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_USERNAME: u16 = 0x0006;
const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
const ATTR_ERROR_CODE: u16 = 0x0009;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ATTR_USE_CANDIDATE: u16 = 0x0025;
const ATTR_FINGERPRINT: u16 = 0x8028;
const ATTR_ICE_CONTROLLED: u16 = 0x8029;
const ATTR_ICE_CONTROLLING: u16 = 0x802A;

const FAMILY_V4: u8 = 0x01;
const FAMILY_V6: u8 = 0x02;

/// Message class.
///
/// The two class bits are scattered through the 16-bit message type field
/// (bit 4 and bit 8); [`Message::parse`] and [`MessageBuilder::build`] do
/// the shuffling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Request expecting a response.
    Request,
    /// One-way indication.
    Indication,
    /// Success response.
    Success,
    /// Error response.
    Error,
}

impl Class {
    fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::Success => 0b10,
            Self::Error => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::Success,
            _ => Self::Error,
        }
    }
}

/// Message method. Only Binding is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Binding request/response (method value 1).
    Binding,
}

/// An ERROR-CODE attribute: numeric code plus UTF-8 reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    /// Error class times 100 plus number, e.g. 487.
    pub code: u16,
    /// Human-readable reason phrase.
    pub reason: String,
}

/// Codec failures.
///
/// Every variant is recoverable from the engine's point of view: an
/// offending datagram is dropped and the probe loop continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Datagram shorter than a STUN header.
    #[error("packet shorter than a STUN header")]
    ShortPacket,

    /// Magic cookie mismatch, or the two top bits of the type field set.
    #[error("bad magic cookie")]
    BadMagic,

    /// Header length is not a multiple of four, disagrees with the buffer,
    /// or an attribute overruns the message.
    #[error("bad message length")]
    BadLength,

    /// A comprehension-required attribute this codec does not understand.
    #[error("comprehension-required attribute 0x{0:04x} not understood")]
    UnknownAttributeRequired(u16),

    /// A method other than Binding.
    #[error("unknown method 0x{0:03x}")]
    UnknownMethod(u16),

    /// MESSAGE-INTEGRITY did not verify against the supplied key.
    #[error("message integrity check failed")]
    IntegrityFailure,

    /// FINGERPRINT did not match the message contents.
    #[error("fingerprint mismatch")]
    BadFingerprint,

    /// An address attribute with a family other than IPv4/IPv6.
    #[error("unknown address family 0x{0:02x}")]
    BadAddressFamily(u8),

    /// An attribute other than FINGERPRINT after MESSAGE-INTEGRITY.
    #[error("attribute after message integrity")]
    AttributeAfterIntegrity,
}

/// A parsed STUN message (structured view).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message class.
    pub class: Class,
    /// Message method.
    pub method: Method,
    /// 96-bit transaction id.
    pub tid: [u8; 12],
    /// Mapped transport address, preferring XOR-MAPPED-ADDRESS over the
    /// plain MAPPED-ADDRESS when both are present.
    pub addr: Option<SocketAddr>,
    /// ERROR-CODE attribute, if any.
    pub error: Option<ErrorCode>,
    /// USE-CANDIDATE presence flag.
    pub use_candidate: bool,
    /// ICE-CONTROLLING tiebreaker, if carried.
    pub controlling: Option<[u8; 8]>,
    /// ICE-CONTROLLED tiebreaker, if carried.
    pub controlled: Option<[u8; 8]>,
    /// USERNAME attribute, if carried.
    pub username: Option<String>,
}

impl Message {
    /// Parse a datagram into a structured message.
    ///
    /// When `integrity_key` is provided and the message carries
    /// MESSAGE-INTEGRITY, the HMAC is verified over the prefix up to that
    /// attribute with the header length patched to end at it. Without a
    /// key, MESSAGE-INTEGRITY is ignored. A FINGERPRINT is always verified
    /// when present.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for any structural, integrity or
    /// fingerprint violation.
    pub fn parse(packet: &[u8], integrity_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if packet.len() < HEADER_SIZE {
            return Err(CodecError::ShortPacket);
        }
        let raw_type = u16::from_be_bytes([packet[0], packet[1]]);
        if raw_type & 0xC000 != 0 {
            return Err(CodecError::BadMagic);
        }
        let cookie = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(CodecError::BadMagic);
        }
        let msg_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
        if msg_len % 4 != 0 || HEADER_SIZE + msg_len != packet.len() {
            return Err(CodecError::BadLength);
        }

        let class = Class::from_bits(((raw_type >> 4) & 0x1) | ((raw_type >> 7) & 0x2));
        let method = (raw_type & 0x000F) | ((raw_type >> 1) & 0x0070) | ((raw_type >> 2) & 0x0F80);
        if method != METHOD_BINDING {
            return Err(CodecError::UnknownMethod(method));
        }

        let mut tid = [0u8; 12];
        tid.copy_from_slice(&packet[8..20]);

        let mut msg = Self {
            class,
            method: Method::Binding,
            tid,
            addr: None,
            error: None,
            use_candidate: false,
            controlling: None,
            controlled: None,
            username: None,
        };
        let mut mapped = None;
        let mut xor_mapped = None;
        let mut integrity_seen = false;

        let mut pos = HEADER_SIZE;
        while pos < packet.len() {
            if pos + 4 > packet.len() {
                return Err(CodecError::BadLength);
            }
            let attr_type = u16::from_be_bytes([packet[pos], packet[pos + 1]]);
            let attr_len = u16::from_be_bytes([packet[pos + 2], packet[pos + 3]]) as usize;
            let value_start = pos + 4;
            let value_end = value_start + attr_len;
            if value_end > packet.len() {
                return Err(CodecError::BadLength);
            }
            if integrity_seen && attr_type != ATTR_FINGERPRINT {
                return Err(CodecError::AttributeAfterIntegrity);
            }
            let value = &packet[value_start..value_end];

            match attr_type {
                ATTR_MAPPED_ADDRESS => {
                    if mapped.is_none() {
                        mapped = Some(parse_address(value, None)?);
                    }
                }
                ATTR_XOR_MAPPED_ADDRESS => {
                    if xor_mapped.is_none() {
                        xor_mapped = Some(parse_address(value, Some(&tid))?);
                    }
                }
                ATTR_USERNAME => {
                    msg.username = Some(String::from_utf8_lossy(value).into_owned());
                }
                ATTR_ERROR_CODE => {
                    if value.len() < 4 {
                        return Err(CodecError::BadLength);
                    }
                    msg.error = Some(ErrorCode {
                        code: u16::from(value[2] & 0x07) * 100 + u16::from(value[3]),
                        reason: String::from_utf8_lossy(&value[4..]).into_owned(),
                    });
                }
                ATTR_USE_CANDIDATE => msg.use_candidate = true,
                ATTR_MESSAGE_INTEGRITY => {
                    if attr_len != 20 {
                        return Err(CodecError::BadLength);
                    }
                    if let Some(key) = integrity_key {
                        verify_integrity(packet, pos, key, value)?;
                    }
                    integrity_seen = true;
                }
                ATTR_FINGERPRINT => {
                    if attr_len != 4 {
                        return Err(CodecError::BadLength);
                    }
                    verify_fingerprint(packet, pos, value)?;
                }
                ATTR_ICE_CONTROLLING if value.len() == 8 => {
                    let mut tb = [0u8; 8];
                    tb.copy_from_slice(value);
                    msg.controlling = Some(tb);
                }
                ATTR_ICE_CONTROLLED if value.len() == 8 => {
                    let mut tb = [0u8; 8];
                    tb.copy_from_slice(value);
                    msg.controlled = Some(tb);
                }
                // Comprehension-required attributes we do not understand only
                // invalidate a success response; elsewhere they are skipped,
                // as is everything in the comprehension-optional range.
                t if t < 0x8000 && class == Class::Success => {
                    return Err(CodecError::UnknownAttributeRequired(t));
                }
                _ => {}
            }

            pos = value_start + ((attr_len + 3) & !3);
        }
        if pos != packet.len() {
            return Err(CodecError::BadLength);
        }

        msg.addr = xor_mapped.or(mapped);
        Ok(msg)
    }
}

/// Builds serialized STUN messages.
///
/// Attributes are appended in call order. `build` finishes the packet:
/// MESSAGE-INTEGRITY if a key was supplied, then a FINGERPRINT
/// unconditionally, each computed over the prefix with the header length
/// temporarily patched to include the attribute being appended.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    class: Class,
    method: Method,
    tid: [u8; 12],
    attrs: Vec<u8>,
    integrity_key: Option<Vec<u8>>,
}

impl MessageBuilder {
    /// Start a message with the given class, method and transaction id.
    #[must_use]
    pub fn new(class: Class, method: Method, tid: [u8; 12]) -> Self {
        Self {
            class,
            method,
            tid,
            attrs: Vec::new(),
            integrity_key: None,
        }
    }

    /// Append a plain MAPPED-ADDRESS attribute.
    #[must_use]
    pub fn mapped_address(mut self, addr: SocketAddr) -> Self {
        let value = encode_address(addr, None);
        self.push_attr(ATTR_MAPPED_ADDRESS, &value);
        self
    }

    /// Append an XOR-MAPPED-ADDRESS attribute.
    #[must_use]
    pub fn xor_mapped_address(mut self, addr: SocketAddr) -> Self {
        let value = encode_address(addr, Some(&self.tid));
        self.push_attr(ATTR_XOR_MAPPED_ADDRESS, &value);
        self
    }

    /// Append a USERNAME attribute.
    #[must_use]
    pub fn username(mut self, username: &str) -> Self {
        self.push_attr(ATTR_USERNAME, username.as_bytes());
        self
    }

    /// Append an ERROR-CODE attribute.
    #[must_use]
    pub fn error_code(mut self, code: u16, reason: &str) -> Self {
        let mut value = vec![0, 0, (code / 100) as u8, (code % 100) as u8];
        value.extend_from_slice(reason.as_bytes());
        self.push_attr(ATTR_ERROR_CODE, &value);
        self
    }

    /// Append the zero-length USE-CANDIDATE attribute.
    #[must_use]
    pub fn use_candidate(mut self) -> Self {
        self.push_attr(ATTR_USE_CANDIDATE, &[]);
        self
    }

    /// Append an ICE-CONTROLLING attribute with the given tiebreaker.
    #[must_use]
    pub fn ice_controlling(mut self, tiebreaker: [u8; 8]) -> Self {
        self.push_attr(ATTR_ICE_CONTROLLING, &tiebreaker);
        self
    }

    /// Append an ICE-CONTROLLED attribute with the given tiebreaker.
    #[must_use]
    pub fn ice_controlled(mut self, tiebreaker: [u8; 8]) -> Self {
        self.push_attr(ATTR_ICE_CONTROLLED, &tiebreaker);
        self
    }

    /// Sign the message with MESSAGE-INTEGRITY under `key`.
    #[must_use]
    pub fn integrity_key(mut self, key: &[u8]) -> Self {
        self.integrity_key = Some(key.to_vec());
        self
    }

    /// Serialize the message.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.attrs.len() + 32);
        out.extend_from_slice(&message_type(self.class, self.method).to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&self.tid);
        out.extend_from_slice(&self.attrs);

        if let Some(key) = &self.integrity_key {
            let len = out.len() - HEADER_SIZE + 24;
            patch_length(&mut out, len);
            let mut mac =
                HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(&out);
            let tag = mac.finalize().into_bytes();
            push_raw_attr(&mut out, ATTR_MESSAGE_INTEGRITY, tag.as_slice());
        }

        let len = out.len() - HEADER_SIZE + 8;
        patch_length(&mut out, len);
        let crc = crc32fast::hash(&out) ^ FINGERPRINT_XOR;
        push_raw_attr(&mut out, ATTR_FINGERPRINT, &crc.to_be_bytes());

        let len = out.len() - HEADER_SIZE;
        patch_length(&mut out, len);
        out
    }

    fn push_attr(&mut self, attr_type: u16, value: &[u8]) {
        self.attrs.extend_from_slice(&attr_type.to_be_bytes());
        self.attrs
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.attrs.extend_from_slice(value);
        let padding = (4 - value.len() % 4) % 4;
        self.attrs.extend(std::iter::repeat_n(0, padding));
    }
}

/// Message type field with the class bits interleaved into the method.
fn message_type(class: Class, method: Method) -> u16 {
    let m = match method {
        Method::Binding => METHOD_BINDING,
    };
    let c = class.bits();
    (m & 0x000F) | ((c & 0x1) << 4) | ((m & 0x0070) << 1) | ((c & 0x2) << 7) | ((m & 0x0F80) << 2)
}

fn patch_length(packet: &mut [u8], len: usize) {
    packet[2..4].copy_from_slice(&(len as u16).to_be_bytes());
}

fn push_raw_attr(out: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    out.extend_from_slice(&attr_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

fn verify_integrity(
    packet: &[u8],
    attr_pos: usize,
    key: &[u8],
    tag: &[u8],
) -> Result<(), CodecError> {
    let mut prefix = packet[..attr_pos].to_vec();
    patch_length(&mut prefix, attr_pos - HEADER_SIZE + 24);
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(&prefix);
    mac.verify_slice(tag)
        .map_err(|_| CodecError::IntegrityFailure)
}

fn verify_fingerprint(packet: &[u8], attr_pos: usize, value: &[u8]) -> Result<(), CodecError> {
    let mut prefix = packet[..attr_pos].to_vec();
    patch_length(&mut prefix, attr_pos - HEADER_SIZE + 8);
    let expected = crc32fast::hash(&prefix) ^ FINGERPRINT_XOR;
    if value != expected.to_be_bytes() {
        return Err(CodecError::BadFingerprint);
    }
    Ok(())
}

fn encode_address(addr: SocketAddr, xor_tid: Option<&[u8; 12]>) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0);
    let mut port = addr.port();
    if xor_tid.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_V4);
            value.extend_from_slice(&port.to_be_bytes());
            let mut octets = ip.octets();
            if xor_tid.is_some() {
                for (b, k) in octets.iter_mut().zip(MAGIC_COOKIE.to_be_bytes()) {
                    *b ^= k;
                }
            }
            value.extend_from_slice(&octets);
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_V6);
            value.extend_from_slice(&port.to_be_bytes());
            let mut octets = ip.octets();
            if let Some(tid) = xor_tid {
                let mut key = [0u8; 16];
                key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                key[4..].copy_from_slice(tid);
                for (b, k) in octets.iter_mut().zip(key) {
                    *b ^= k;
                }
            }
            value.extend_from_slice(&octets);
        }
    }
    value
}

fn parse_address(value: &[u8], xor_tid: Option<&[u8; 12]>) -> Result<SocketAddr, CodecError> {
    if value.len() < 4 {
        return Err(CodecError::BadLength);
    }
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor_tid.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }
    let ip = match value[1] {
        FAMILY_V4 => {
            if value.len() < 8 {
                return Err(CodecError::BadLength);
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&value[4..8]);
            if xor_tid.is_some() {
                for (b, k) in octets.iter_mut().zip(MAGIC_COOKIE.to_be_bytes()) {
                    *b ^= k;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_V6 => {
            if value.len() < 20 {
                return Err(CodecError::BadLength);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            if let Some(tid) = xor_tid {
                let mut key = [0u8; 16];
                key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                key[4..].copy_from_slice(tid);
                for (b, k) in octets.iter_mut().zip(key) {
                    *b ^= k;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        family => return Err(CodecError::BadAddressFamily(family)),
    };
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TID: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0a, 0x0b];

    #[test]
    fn binding_request_wire_canon() {
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        let expected: &[u8] = &[
            0x00, 0x01, 0x00, 0x08, 0x21, 0x12, 0xa4, 0x42, // header
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, // tid
            0x80, 0x28, 0x00, 0x04, 0x5b, 0x0f, 0xf6, 0xfc, // fingerprint
        ];
        assert_eq!(packet, expected);
    }

    #[test]
    fn message_type_encoding() {
        assert_eq!(message_type(Class::Request, Method::Binding), 0x0001);
        assert_eq!(message_type(Class::Indication, Method::Binding), 0x0011);
        assert_eq!(message_type(Class::Success, Method::Binding), 0x0101);
        assert_eq!(message_type(Class::Error, Method::Binding), 0x0111);
    }

    #[test]
    fn xor_mapped_v4_wire_bytes() {
        let addr: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let value = encode_address(addr, Some(&TID));
        assert_eq!(value[0], 0);
        assert_eq!(value[1], FAMILY_V4);
        // port 32853 ^ 0x2112, address ^ magic cookie
        assert_eq!(&value[2..4], &[0xa1, 0x47]);
        assert_eq!(&value[4..8], &[0xe1, 0x12, 0xa6, 0x43]);

        let back = parse_address(&value, Some(&TID)).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn xor_mapped_v6_roundtrip() {
        let addr: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let value = encode_address(addr, Some(&TID));
        assert_eq!(value.len(), 20);
        assert_eq!(value[1], FAMILY_V6);
        let back = parse_address(&value, Some(&TID)).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn structured_roundtrip_success_response() {
        let addr: SocketAddr = "203.0.113.9:40000".parse().unwrap();
        let packet = MessageBuilder::new(Class::Success, Method::Binding, TID)
            .xor_mapped_address(addr)
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        assert_eq!(msg.class, Class::Success);
        assert_eq!(msg.method, Method::Binding);
        assert_eq!(msg.tid, TID);
        assert_eq!(msg.addr, Some(addr));
        assert!(!msg.use_candidate);
        assert!(msg.error.is_none());
    }

    #[test]
    fn roundtrip_flags_and_roles() {
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .ice_controlling([1, 2, 3, 4, 5, 6, 7, 8])
            .use_candidate()
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        assert!(msg.use_candidate);
        assert_eq!(msg.controlling, Some([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(msg.controlled, None);

        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .ice_controlled([8, 7, 6, 5, 4, 3, 2, 1])
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        assert!(!msg.use_candidate);
        assert_eq!(msg.controlled, Some([8, 7, 6, 5, 4, 3, 2, 1]));
    }

    #[test]
    fn error_code_roundtrip() {
        let packet = MessageBuilder::new(Class::Error, Method::Binding, TID)
            .error_code(487, "Role Conflict")
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        let err = msg.error.unwrap();
        assert_eq!(err.code, 487);
        assert_eq!(err.reason, "Role Conflict");
    }

    #[test]
    fn username_roundtrip_with_padding() {
        // 5-byte username exercises the pad-to-4 path
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .username("alice")
            .build();
        assert_eq!(packet.len() % 4, 0);
        let msg = Message::parse(&packet, None).unwrap();
        assert_eq!(msg.username.as_deref(), Some("alice"));
    }

    #[test]
    fn integrity_fixed_vector() {
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .integrity_key(b"swordfish")
            .build();
        let expected: &[u8] = &[
            0x00, 0x01, 0x00, 0x20, 0x21, 0x12, 0xa4, 0x42, // header, length 32
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, // tid
            0x00, 0x08, 0x00, 0x14, // message-integrity
            0x35, 0x34, 0xda, 0xd9, 0x59, 0x65, 0x25, 0x26, 0x5a, 0x6c, 0x39, 0x26, 0xba, 0x62,
            0x3a, 0x25, 0xbf, 0xac, 0xf3, 0xb5, // hmac-sha1 under "swordfish"
            0x80, 0x28, 0x00, 0x04, 0x18, 0xfd, 0xe2, 0xdc, // fingerprint
        ];
        assert_eq!(packet, expected);
    }

    #[test]
    fn integrity_closure() {
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .integrity_key(b"swordfish")
            .build();
        assert!(Message::parse(&packet, Some(b"swordfish")).is_ok());
        assert_eq!(
            Message::parse(&packet, Some(b"marlin")),
            Err(CodecError::IntegrityFailure)
        );
        // without a key the attribute is ignored
        assert!(Message::parse(&packet, None).is_ok());
    }

    #[test]
    fn integrity_covers_preceding_attributes() {
        let addr: SocketAddr = "198.51.100.2:9".parse().unwrap();
        let packet = MessageBuilder::new(Class::Success, Method::Binding, TID)
            .xor_mapped_address(addr)
            .integrity_key(b"k")
            .build();
        let msg = Message::parse(&packet, Some(b"k")).unwrap();
        assert_eq!(msg.addr, Some(addr));

        // corrupting the signed prefix fails the integrity check first
        let mut tampered = packet.clone();
        tampered[25] ^= 0xff; // inside the address attribute value
        assert!(Message::parse(&tampered, Some(b"k")).is_err());
    }

    #[test]
    fn fingerprint_detects_corruption() {
        let packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        // flip one bit inside the transaction id
        let mut bad = packet.clone();
        bad[10] ^= 0x04;
        assert_eq!(Message::parse(&bad, None), Err(CodecError::BadFingerprint));
        // flip one bit of the checksum itself
        let mut bad = packet;
        bad[27] ^= 0x01;
        assert_eq!(Message::parse(&bad, None), Err(CodecError::BadFingerprint));
    }

    #[test]
    fn structural_failures() {
        assert_eq!(
            Message::parse(&[0u8; 8], None),
            Err(CodecError::ShortPacket)
        );

        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        packet[4] = 0x00; // cookie
        assert_eq!(Message::parse(&packet, None), Err(CodecError::BadMagic));

        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        packet[0] |= 0xC0; // top bits of the type field
        assert_eq!(Message::parse(&packet, None), Err(CodecError::BadMagic));

        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        packet[3] += 4; // length disagrees with the buffer
        assert_eq!(Message::parse(&packet, None), Err(CodecError::BadLength));

        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        packet[3] += 1; // not a multiple of four
        assert_eq!(Message::parse(&packet, None), Err(CodecError::BadLength));
    }

    #[test]
    fn non_binding_method_rejected() {
        // method 2 (shared secret), request class
        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID).build();
        packet[1] = 0x02;
        let err = Message::parse(&packet, None).unwrap_err();
        assert_eq!(err, CodecError::UnknownMethod(0x002));
    }

    #[test]
    fn attribute_after_integrity_rejected() {
        let mut packet = MessageBuilder::new(Class::Request, Method::Binding, TID)
            .integrity_key(b"k")
            .build();
        // replace the trailing fingerprint with a USE-CANDIDATE attribute
        let len = packet.len();
        packet.truncate(len - 8);
        packet.extend_from_slice(&ATTR_USE_CANDIDATE.to_be_bytes());
        packet.extend_from_slice(&0u16.to_be_bytes());
        let len = packet.len() - HEADER_SIZE;
        patch_length(&mut packet, len);
        assert_eq!(
            Message::parse(&packet, None),
            Err(CodecError::AttributeAfterIntegrity)
        );
    }

    #[test]
    fn unknown_comprehension_required_attribute() {
        // hand-rolled packet with an unknown 0x7fff attribute, no fingerprint
        fn with_class(class: Class) -> Vec<u8> {
            let mut packet = Vec::new();
            packet.extend_from_slice(&message_type(class, Method::Binding).to_be_bytes());
            packet.extend_from_slice(&8u16.to_be_bytes());
            packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
            packet.extend_from_slice(&TID);
            packet.extend_from_slice(&0x7fffu16.to_be_bytes());
            packet.extend_from_slice(&4u16.to_be_bytes());
            packet.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            packet
        }
        // fatal in a success response
        assert_eq!(
            Message::parse(&with_class(Class::Success), None),
            Err(CodecError::UnknownAttributeRequired(0x7fff))
        );
        // skipped in a request
        assert!(Message::parse(&with_class(Class::Request), None).is_ok());
    }

    #[test]
    fn unknown_optional_attribute_skipped() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&message_type(Class::Success, Method::Binding).to_be_bytes());
        packet.extend_from_slice(&8u16.to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&TID);
        packet.extend_from_slice(&0x8022u16.to_be_bytes()); // SOFTWARE
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(b"test");
        assert!(Message::parse(&packet, None).is_ok());
    }

    #[test]
    fn bad_address_family() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&message_type(Class::Success, Method::Binding).to_be_bytes());
        packet.extend_from_slice(&12u16.to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&TID);
        packet.extend_from_slice(&ATTR_MAPPED_ADDRESS.to_be_bytes());
        packet.extend_from_slice(&8u16.to_be_bytes());
        packet.extend_from_slice(&[0, 0x03, 0x1f, 0x40, 1, 2, 3, 4]);
        assert_eq!(
            Message::parse(&packet, None),
            Err(CodecError::BadAddressFamily(0x03))
        );
    }

    #[test]
    fn truncated_attribute_rejected() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&message_type(Class::Request, Method::Binding).to_be_bytes());
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&TID);
        packet.extend_from_slice(&ATTR_USERNAME.to_be_bytes());
        packet.extend_from_slice(&32u16.to_be_bytes()); // claims more than present
        assert_eq!(Message::parse(&packet, None), Err(CodecError::BadLength));
    }

    #[test]
    fn plain_mapped_address_used_when_xor_absent() {
        let addr: SocketAddr = "198.51.100.7:1234".parse().unwrap();
        let packet = MessageBuilder::new(Class::Success, Method::Binding, TID)
            .mapped_address(addr)
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        assert_eq!(msg.addr, Some(addr));
    }

    #[test]
    fn xor_mapped_preferred_over_plain() {
        let plain: SocketAddr = "198.51.100.7:1234".parse().unwrap();
        let xored: SocketAddr = "203.0.113.1:4321".parse().unwrap();
        let packet = MessageBuilder::new(Class::Success, Method::Binding, TID)
            .mapped_address(plain)
            .xor_mapped_address(xored)
            .build();
        let msg = Message::parse(&packet, None).unwrap();
        assert_eq!(msg.addr, Some(xored));
    }
}
