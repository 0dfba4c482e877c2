//! IPsec security-protocol descriptors
//!
//! A [`SecurityProtocol`] is the internal record a Phase 2 proposal is
//! converted to and from: which IPsec protocol (AH or ESP), which
//! algorithms, and which encapsulation mode. Policies hold ordered arrays of
//! them; SA2 items carry one each.

use super::constants::{ProtocolId, DOI_DEFAULT_LIFETIME_SECS};

/// IPsec security protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IpsecProtocol {
    /// Authentication Header
    Ah,
    /// Encapsulating Security Payload
    Esp,
}

impl IpsecProtocol {
    /// ISAKMP protocol identifier
    pub fn protocol_id(self) -> ProtocolId {
        match self {
            IpsecProtocol::Ah => ProtocolId::Ah,
            IpsecProtocol::Esp => ProtocolId::Esp,
        }
    }

    /// Protocol name for logs
    pub fn name(self) -> &'static str {
        match self {
            IpsecProtocol::Ah => "AH",
            IpsecProtocol::Esp => "ESP",
        }
    }

    /// Map an ISAKMP protocol identifier back to an IPsec protocol
    pub fn from_protocol_id(id: u8) -> Option<Self> {
        match ProtocolId::from_u8(id)? {
            ProtocolId::Ah => Some(IpsecProtocol::Ah),
            ProtocolId::Esp => Some(IpsecProtocol::Esp),
            ProtocolId::Isakmp => None,
        }
    }
}

/// ESP encryption algorithm (RFC 2407 Section 4.4.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncryptionAlgorithm {
    /// ESP_DES
    Des,
    /// ESP_3DES
    TripleDes,
    /// ESP_AES with a 128-bit key
    Aes128,
    /// ESP_AES with a 192-bit key
    Aes192,
    /// ESP_AES with a 256-bit key
    Aes256,
    /// ESP_NULL
    Null,
}

impl EncryptionAlgorithm {
    /// ESP transform identifier
    pub fn transform_id(self) -> u8 {
        match self {
            EncryptionAlgorithm::Des => 2,
            EncryptionAlgorithm::TripleDes => 3,
            EncryptionAlgorithm::Null => 11,
            EncryptionAlgorithm::Aes128
            | EncryptionAlgorithm::Aes192
            | EncryptionAlgorithm::Aes256 => 12,
        }
    }

    /// Natural key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            EncryptionAlgorithm::Des => 8,
            EncryptionAlgorithm::TripleDes => 24,
            EncryptionAlgorithm::Aes128 => 16,
            EncryptionAlgorithm::Aes192 => 24,
            EncryptionAlgorithm::Aes256 => 32,
            EncryptionAlgorithm::Null => 0,
        }
    }

    /// Natural key length in bits, as carried in the KEY_LENGTH attribute
    pub fn key_bits(self) -> u16 {
        (self.key_len() * 8) as u16
    }

    /// Map a transform identifier, refined by an optional KEY_LENGTH
    ///
    /// AES without a key length attribute is AES-128.
    pub fn from_transform_id(id: u8, key_bits: Option<u16>) -> Option<Self> {
        match (id, key_bits) {
            (2, _) => Some(EncryptionAlgorithm::Des),
            (3, _) => Some(EncryptionAlgorithm::TripleDes),
            (11, _) => Some(EncryptionAlgorithm::Null),
            (12, None) | (12, Some(128)) => Some(EncryptionAlgorithm::Aes128),
            (12, Some(192)) => Some(EncryptionAlgorithm::Aes192),
            (12, Some(256)) => Some(EncryptionAlgorithm::Aes256),
            _ => None,
        }
    }
}

/// IPsec authentication algorithm (RFC 2407 Section 4.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AuthAlgorithm {
    /// No authentication (ESP only)
    None,
    /// HMAC-MD5
    HmacMd5,
    /// HMAC-SHA1
    HmacSha1,
    /// HMAC-SHA2-256
    HmacSha256,
}

impl AuthAlgorithm {
    /// AH transform identifier (RFC 2407 Section 4.4.3)
    pub fn ah_transform_id(self) -> Option<u8> {
        match self {
            AuthAlgorithm::None => None,
            AuthAlgorithm::HmacMd5 => Some(2),
            AuthAlgorithm::HmacSha1 => Some(3),
            AuthAlgorithm::HmacSha256 => Some(5),
        }
    }

    /// Map an AH transform identifier
    pub fn from_ah_transform_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(AuthAlgorithm::HmacMd5),
            3 => Some(AuthAlgorithm::HmacSha1),
            5 => Some(AuthAlgorithm::HmacSha256),
            _ => None,
        }
    }

    /// Value of the AUTH_ALGO attribute
    pub fn attribute_value(self) -> Option<u16> {
        match self {
            AuthAlgorithm::None => None,
            AuthAlgorithm::HmacMd5 => Some(1),
            AuthAlgorithm::HmacSha1 => Some(2),
            AuthAlgorithm::HmacSha256 => Some(5),
        }
    }

    /// Map an AUTH_ALGO attribute value
    pub fn from_attribute_value(value: u16) -> Option<Self> {
        match value {
            1 => Some(AuthAlgorithm::HmacMd5),
            2 => Some(AuthAlgorithm::HmacSha1),
            5 => Some(AuthAlgorithm::HmacSha256),
            _ => None,
        }
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            AuthAlgorithm::None => 0,
            AuthAlgorithm::HmacMd5 => 16,
            AuthAlgorithm::HmacSha1 => 20,
            AuthAlgorithm::HmacSha256 => 32,
        }
    }
}

/// Encapsulation mode (RFC 2407 Section 4.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncapsulationMode {
    /// Tunnel mode (1)
    Tunnel,
    /// Transport mode (2)
    Transport,
}

impl EncapsulationMode {
    /// Attribute value
    pub fn attribute_value(self) -> u16 {
        match self {
            EncapsulationMode::Tunnel => 1,
            EncapsulationMode::Transport => 2,
        }
    }

    /// Map an ENCAP_MODE attribute value
    pub fn from_attribute_value(value: u16) -> Option<Self> {
        match value {
            1 => Some(EncapsulationMode::Tunnel),
            2 => Some(EncapsulationMode::Transport),
            _ => None,
        }
    }
}

/// One acceptable IPsec security configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecurityProtocol {
    /// AH or ESP
    pub protocol: IpsecProtocol,
    /// Encryption algorithm, `None` for AH
    pub encryption: Option<EncryptionAlgorithm>,
    /// Authentication algorithm
    pub auth: AuthAlgorithm,
    /// Encapsulation mode
    pub mode: EncapsulationMode,
}

impl SecurityProtocol {
    /// ESP with the given algorithms
    pub fn esp(
        encryption: EncryptionAlgorithm,
        auth: AuthAlgorithm,
        mode: EncapsulationMode,
    ) -> Self {
        SecurityProtocol {
            protocol: IpsecProtocol::Esp,
            encryption: Some(encryption),
            auth,
            mode,
        }
    }

    /// AH with the given algorithm
    pub fn ah(auth: AuthAlgorithm, mode: EncapsulationMode) -> Self {
        SecurityProtocol {
            protocol: IpsecProtocol::Ah,
            encryption: None,
            auth,
            mode,
        }
    }

    /// Transform identifier carried in a proposal for this protocol
    pub fn transform_id(&self) -> Option<u8> {
        match self.protocol {
            IpsecProtocol::Ah => self.auth.ah_transform_id(),
            IpsecProtocol::Esp => self.encryption.map(EncryptionAlgorithm::transform_id),
        }
    }

    /// Natural encryption key length in bytes (0 for AH)
    pub fn encryption_key_len(&self) -> usize {
        self.encryption.map(EncryptionAlgorithm::key_len).unwrap_or(0)
    }

    /// KEYMAT length needed for one direction of this protocol
    pub fn keymat_len(&self) -> usize {
        self.encryption_key_len() + self.auth.key_len()
    }
}

/// Requested or negotiated SA lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lifetime {
    /// Not specified; the DOI default applies and any offer is accepted
    #[default]
    Unspecified,
    /// Finite lifetime in seconds
    Seconds(u32),
}

impl Lifetime {
    /// Seconds, falling back to the DOI default
    pub fn seconds_or_default(self) -> u32 {
        match self {
            Lifetime::Unspecified => DOI_DEFAULT_LIFETIME_SECS,
            Lifetime::Seconds(secs) => secs,
        }
    }
}
