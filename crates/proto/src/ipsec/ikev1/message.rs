//! ISAKMP message header and cookies
//!
//! Implements the fixed header defined in RFC 2408 Section 3.1

use super::constants::*;
use crate::ipsec::{Error, Result};
use std::fmt;

/// Initiator and responder cookies naming an IKE SA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cookies {
    /// Initiator cookie (CKY-I)
    pub initiator: [u8; 8],
    /// Responder cookie (CKY-R)
    pub responder: [u8; 8],
}

impl Cookies {
    /// Create a cookie pair
    pub fn new(initiator: [u8; 8], responder: [u8; 8]) -> Self {
        Cookies {
            initiator,
            responder,
        }
    }

    /// Both cookies as the 16-byte ISAKMP SPI
    pub fn to_bytes(&self) -> [u8; ISAKMP_SPI_SIZE] {
        let mut out = [0u8; ISAKMP_SPI_SIZE];
        out[..8].copy_from_slice(&self.initiator);
        out[8..].copy_from_slice(&self.responder);
        out
    }

    /// Parse a 16-byte ISAKMP SPI
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != ISAKMP_SPI_SIZE {
            return None;
        }
        let mut cookies = Cookies::default();
        cookies.initiator.copy_from_slice(&data[..8]);
        cookies.responder.copy_from_slice(&data[8..]);
        Some(cookies)
    }

    /// Whether the responder has assigned its cookie
    pub fn has_responder(&self) -> bool {
        self.responder != [0u8; 8]
    }
}

impl fmt::Display for Cookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            hex::encode(self.initiator),
            hex::encode(self.responder)
        )
    }
}

/// ISAKMP message header (28 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// !                          Initiator                            !
/// !                            Cookie                             !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// !                          Responder                            !
/// !                            Cookie                             !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// !  Next Payload ! MjVer ! MnVer ! Exchange Type !     Flags     !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// !                          Message ID                           !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// !                            Length                             !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsakmpHeader {
    /// Cookie pair
    pub cookies: Cookies,

    /// First payload of the chain
    pub next_payload: PayloadType,

    /// Protocol version (0x10)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Header flags
    pub flags: IsakmpFlags,

    /// Message ID, zero during Phase 1
    pub message_id: u32,

    /// Total message length including the header
    pub length: u32,
}

impl IsakmpHeader {
    /// Create a header; `length` is filled in when the message is sealed
    pub fn new(
        cookies: Cookies,
        next_payload: PayloadType,
        exchange_type: ExchangeType,
        flags: IsakmpFlags,
        message_id: u32,
    ) -> Self {
        IsakmpHeader {
            cookies,
            next_payload,
            version: ISAKMP_VERSION,
            exchange_type,
            flags,
            message_id,
            length: ISAKMP_HEADER_SIZE as u32,
        }
    }

    /// Parse the header of a received datagram
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is shorter than the header or than the length field
    /// - Major version is not 1
    /// - Exchange type is unknown
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ISAKMP_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: ISAKMP_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut initiator = [0u8; 8];
        let mut responder = [0u8; 8];
        initiator.copy_from_slice(&data[0..8]);
        responder.copy_from_slice(&data[8..16]);

        let next_payload = PayloadType::from_u8(data[16])
            .ok_or_else(|| Error::InvalidPayload(format!("Unknown payload type: {}", data[16])))?;

        // Only the major version is checked (RFC 2408 Section 5.1)
        let version = data[17];
        if version >> 4 != ISAKMP_VERSION >> 4 {
            return Err(Error::UnsupportedVersion(version));
        }

        let exchange_type =
            ExchangeType::from_u8(data[18]).ok_or(Error::UnsupportedExchangeType(data[18]))?;

        let flags = IsakmpFlags::new(data[19]);
        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length < ISAKMP_HEADER_SIZE as u32 || length > MAX_ISAKMP_MESSAGE_SIZE {
            return Err(Error::InvalidPayload(format!(
                "Invalid message length: {}",
                length
            )));
        }
        if length as usize > data.len() {
            return Err(Error::BufferTooShort {
                required: length as usize,
                available: data.len(),
            });
        }

        Ok(IsakmpHeader {
            cookies: Cookies::new(initiator, responder),
            next_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; ISAKMP_HEADER_SIZE] {
        let mut bytes = [0u8; ISAKMP_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.cookies.initiator);
        bytes[8..16].copy_from_slice(&self.cookies.responder);
        bytes[16] = self.next_payload.to_u8();
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}
