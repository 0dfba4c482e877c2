//! ISAKMP / IKEv1 protocol constants from RFC 2407, RFC 2408 and RFC 2409

/// ISAKMP version 1.0 (major version = 1, minor version = 0)
pub const ISAKMP_VERSION: u8 = 0x10;

/// Maximum ISAKMP message size (64KB - 1)
pub const MAX_ISAKMP_MESSAGE_SIZE: u32 = 65535;

/// ISAKMP header size (28 bytes)
pub const ISAKMP_HEADER_SIZE: usize = 28;

/// Generic payload header size (4 bytes)
pub const PAYLOAD_HEADER_SIZE: usize = 4;

/// IPsec Domain of Interpretation (RFC 2407)
pub const DOI_IPSEC: u32 = 1;

/// SIT_IDENTITY_ONLY situation
pub const SIT_IDENTITY_ONLY: u32 = 0x01;

/// Proposal number used for every outbound Phase 2 proposal
pub const PHASE2_PROPOSAL_NUMBER: u8 = 1;

/// SPI size of AH and ESP proposals
pub const IPSEC_SPI_SIZE: usize = 4;

/// SPI size of ISAKMP notifications and deletes (both cookies)
pub const ISAKMP_SPI_SIZE: usize = 16;

/// Upper bound of the SPI range reserved by IANA (RFC 4303 Section 2.1)
pub const IPSEC_SPI_END: u32 = 255;

/// IPsec DOI default SA lifetime in seconds (RFC 2407 Section 4.5)
pub const DOI_DEFAULT_LIFETIME_SECS: u32 = 28800;

/// Exchange Types (RFC 2408 Section 3.1, RFC 2409 Section 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeType {
    /// Identity Protection, a.k.a. Main Mode (2)
    IdentityProtection = 2,
    /// Aggressive Mode (4)
    Aggressive = 4,
    /// Informational (5)
    Informational = 5,
    /// Quick Mode (32)
    Quick = 32,
}

impl ExchangeType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(ExchangeType::IdentityProtection),
            4 => Some(ExchangeType::Aggressive),
            5 => Some(ExchangeType::Informational),
            32 => Some(ExchangeType::Quick),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// ISAKMP header flags (RFC 2408 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsakmpFlags(u8);

impl IsakmpFlags {
    /// Encryption bit
    pub const ENCRYPTION: u8 = 0x01;
    /// Commit bit
    pub const COMMIT: u8 = 0x02;
    /// Authentication Only bit
    pub const AUTH_ONLY: u8 = 0x04;

    /// Create new flags
    pub fn new(value: u8) -> Self {
        IsakmpFlags(value & 0x07)
    }

    /// Flags of an encrypted message, optionally carrying the commit bit
    pub fn encrypted(commit: bool) -> Self {
        let mut flags = Self::ENCRYPTION;
        if commit {
            flags |= Self::COMMIT;
        }
        IsakmpFlags(flags)
    }

    /// Check the encryption bit
    pub fn is_encrypted(self) -> bool {
        (self.0 & Self::ENCRYPTION) != 0
    }

    /// Check the commit bit
    pub fn is_commit(self) -> bool {
        (self.0 & Self::COMMIT) != 0
    }

    /// Check the authentication-only bit
    pub fn is_auth_only(self) -> bool {
        (self.0 & Self::AUTH_ONLY) != 0
    }

    /// Get raw value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// Payload Types (RFC 2408 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    /// No next payload (0)
    None = 0,
    /// Security Association (1)
    SA = 1,
    /// Proposal (2)
    P = 2,
    /// Transform (3)
    T = 3,
    /// Key Exchange (4)
    KE = 4,
    /// Identification (5)
    ID = 5,
    /// Certificate (6)
    CERT = 6,
    /// Certificate Request (7)
    CR = 7,
    /// Hash (8)
    HASH = 8,
    /// Signature (9)
    SIG = 9,
    /// Nonce (10)
    Nonce = 10,
    /// Notification (11)
    N = 11,
    /// Delete (12)
    D = 12,
    /// Vendor ID (13)
    VID = 13,
}

impl PayloadType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PayloadType::None),
            1 => Some(PayloadType::SA),
            2 => Some(PayloadType::P),
            3 => Some(PayloadType::T),
            4 => Some(PayloadType::KE),
            5 => Some(PayloadType::ID),
            6 => Some(PayloadType::CERT),
            7 => Some(PayloadType::CR),
            8 => Some(PayloadType::HASH),
            9 => Some(PayloadType::SIG),
            10 => Some(PayloadType::Nonce),
            11 => Some(PayloadType::N),
            12 => Some(PayloadType::D),
            13 => Some(PayloadType::VID),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol identifiers (RFC 2407 Section 4.4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// ISAKMP (1)
    Isakmp = 1,
    /// IPsec AH (2)
    Ah = 2,
    /// IPsec ESP (3)
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Isakmp),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// IPsec DOI SA attribute types (RFC 2407 Section 4.5)
pub mod attr {
    /// SA Life Type
    pub const LIFE_TYPE: u16 = 1;
    /// SA Life Duration
    pub const LIFE_DURATION: u16 = 2;
    /// Group Description
    pub const GROUP_DESC: u16 = 3;
    /// Encapsulation Mode
    pub const ENCAP_MODE: u16 = 4;
    /// Authentication Algorithm
    pub const AUTH_ALGO: u16 = 5;
    /// Key Length
    pub const KEY_LENGTH: u16 = 6;

    /// Life type: seconds
    pub const LIFE_TYPE_SECONDS: u16 = 1;
    /// Life type: kilobytes
    pub const LIFE_TYPE_KILOBYTES: u16 = 2;

    /// Attribute Format bit (TV when set, TLV when clear)
    pub const AF_TV: u16 = 0x8000;
}

/// Notify message types (RFC 2408 Section 3.14.1, RFC 2407 Section 4.6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotifyType {
    /// INVALID-PAYLOAD-TYPE (1)
    InvalidPayloadType = 1,
    /// DOI-NOT-SUPPORTED (2)
    DoiNotSupported = 2,
    /// SITUATION-NOT-SUPPORTED (3)
    SituationNotSupported = 3,
    /// INVALID-COOKIE (4)
    InvalidCookie = 4,
    /// INVALID-MAJOR-VERSION (5)
    InvalidMajorVersion = 5,
    /// INVALID-MINOR-VERSION (6)
    InvalidMinorVersion = 6,
    /// INVALID-EXCHANGE-TYPE (7)
    InvalidExchangeType = 7,
    /// INVALID-FLAGS (8)
    InvalidFlags = 8,
    /// INVALID-MESSAGE-ID (9)
    InvalidMessageId = 9,
    /// INVALID-PROTOCOL-ID (10)
    InvalidProtocolId = 10,
    /// INVALID-SPI (11)
    InvalidSpi = 11,
    /// INVALID-TRANSFORM-ID (12)
    InvalidTransformId = 12,
    /// ATTRIBUTES-NOT-SUPPORTED (13)
    AttributesNotSupported = 13,
    /// NO-PROPOSAL-CHOSEN (14)
    NoProposalChosen = 14,
    /// BAD-PROPOSAL-SYNTAX (15)
    BadProposalSyntax = 15,
    /// PAYLOAD-MALFORMED (16)
    PayloadMalformed = 16,
    /// INVALID-KEY-INFORMATION (17)
    InvalidKeyInformation = 17,
    /// INVALID-ID-INFORMATION (18)
    InvalidIdInformation = 18,
    /// AUTHENTICATION-FAILED (24)
    AuthenticationFailed = 24,
    /// UNEQUAL-PAYLOAD-LENGTHS (30)
    UnequalPayloadLengths = 30,
    /// CONNECTED (16384)
    Connected = 16384,
    /// RESPONDER-LIFETIME (24576)
    ResponderLifetime = 24576,
    /// REPLAY-STATUS (24577)
    ReplayStatus = 24577,
    /// INITIAL-CONTACT (24578)
    InitialContact = 24578,
}

impl NotifyType {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(NotifyType::InvalidPayloadType),
            2 => Some(NotifyType::DoiNotSupported),
            3 => Some(NotifyType::SituationNotSupported),
            4 => Some(NotifyType::InvalidCookie),
            5 => Some(NotifyType::InvalidMajorVersion),
            6 => Some(NotifyType::InvalidMinorVersion),
            7 => Some(NotifyType::InvalidExchangeType),
            8 => Some(NotifyType::InvalidFlags),
            9 => Some(NotifyType::InvalidMessageId),
            10 => Some(NotifyType::InvalidProtocolId),
            11 => Some(NotifyType::InvalidSpi),
            12 => Some(NotifyType::InvalidTransformId),
            13 => Some(NotifyType::AttributesNotSupported),
            14 => Some(NotifyType::NoProposalChosen),
            15 => Some(NotifyType::BadProposalSyntax),
            16 => Some(NotifyType::PayloadMalformed),
            17 => Some(NotifyType::InvalidKeyInformation),
            18 => Some(NotifyType::InvalidIdInformation),
            24 => Some(NotifyType::AuthenticationFailed),
            30 => Some(NotifyType::UnequalPayloadLengths),
            16384 => Some(NotifyType::Connected),
            24576 => Some(NotifyType::ResponderLifetime),
            24577 => Some(NotifyType::ReplayStatus),
            24578 => Some(NotifyType::InitialContact),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Error notifications occupy 1..=16383
    pub fn is_error(self) -> bool {
        self.to_u16() < 16384
    }
}

/// Identification types (RFC 2407 Section 4.6.2.1)
pub mod id_type {
    /// ID_IPV4_ADDR
    pub const IPV4_ADDR: u8 = 1;
    /// ID_IPV4_ADDR_SUBNET
    pub const IPV4_ADDR_SUBNET: u8 = 4;
    /// ID_IPV6_ADDR
    pub const IPV6_ADDR: u8 = 5;
    /// ID_IPV6_ADDR_SUBNET
    pub const IPV6_ADDR_SUBNET: u8 = 6;
}
