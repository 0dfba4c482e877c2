//! ISAKMP payload structures and parsing
//!
//! Implements the payloads used by Quick Mode and Informational exchanges
//! as defined in RFC 2408 Section 3 and RFC 2407 Section 4.6.

use super::constants::*;
use crate::ipsec::{Error, Result};

/// Generic ISAKMP payload header (4 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ! Next Payload  !   RESERVED    !         Payload Length        !
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The next payload field is kept raw so that unknown types can be
/// reported with their actual value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Next payload type
    pub next_payload: u8,

    /// Total payload length including this header
    pub length: u16,
}

impl PayloadHeader {
    /// Payload header size
    pub const SIZE: usize = PAYLOAD_HEADER_SIZE;

    /// Parse payload header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::BufferTooShort {
                required: Self::SIZE,
                available: data.len(),
            });
        }

        let length = u16::from_be_bytes([data[2], data[3]]);
        if (length as usize) < Self::SIZE || (length as usize) > data.len() {
            return Err(Error::InvalidPayload(format!(
                "Invalid payload length: {}",
                length
            )));
        }

        Ok(PayloadHeader {
            next_payload: data[0],
            length,
        })
    }

    /// Serialize payload header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.next_payload;
        bytes[2..4].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

/// Prefix `body` with a generic payload header
fn with_header(next_payload: u8, body: &[u8]) -> Result<Vec<u8>> {
    let length = body.len() + PayloadHeader::SIZE;
    if length > u16::MAX as usize {
        return Err(Error::InvalidPayload(format!(
            "Payload too long: {} bytes",
            length
        )));
    }
    let header = PayloadHeader {
        next_payload,
        length: length as u16,
    };
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Error::BufferTooShort {
            required: offset + 4,
            available: data.len(),
        })
}

/// Bounds applied while decoding untrusted payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Proposal payloads decoded from one SA payload
    pub max_proposals: usize,
    /// Transform payloads allowed per proposal
    pub max_transforms: usize,
    /// SPIs allowed in one Delete payload
    pub max_delete_spis: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        DecodeLimits {
            max_proposals: 4,
            max_transforms: 5,
            max_delete_spis: 2,
        }
    }
}

/// Value of a data attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    /// TV format, value carried in the header
    Basic(u16),
    /// TLV format, variable length value
    Variable(Vec<u8>),
}

/// SA data attribute (RFC 2408 Section 3.3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataAttribute {
    /// Attribute type without the AF bit
    pub attr_type: u16,
    /// Attribute value
    pub value: AttributeValue,
}

impl DataAttribute {
    /// Basic (TV) attribute
    pub fn basic(attr_type: u16, value: u16) -> Self {
        DataAttribute {
            attr_type,
            value: AttributeValue::Basic(value),
        }
    }

    /// Variable (TLV) attribute
    pub fn variable(attr_type: u16, value: Vec<u8>) -> Self {
        DataAttribute {
            attr_type,
            value: AttributeValue::Variable(value),
        }
    }

    /// Attribute carrying a 32-bit value, using TV when it fits
    pub fn with_u32(attr_type: u16, value: u32) -> Self {
        match u16::try_from(value) {
            Ok(short) => Self::basic(attr_type, short),
            Err(_) => Self::variable(attr_type, value.to_be_bytes().to_vec()),
        }
    }

    /// Basic value, if this is a TV attribute
    pub fn basic_value(&self) -> Option<u16> {
        match self.value {
            AttributeValue::Basic(v) => Some(v),
            AttributeValue::Variable(_) => None,
        }
    }

    /// Decode the value as an integer of at most 32 bits
    pub fn value_u32(&self) -> Result<u32> {
        match &self.value {
            AttributeValue::Basic(v) => Ok(*v as u32),
            AttributeValue::Variable(bytes) => {
                if bytes.len() > 4 {
                    return Err(Error::AttributeTooLong(self.attr_type));
                }
                Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
            }
        }
    }

    /// Parse one attribute, returning it and the bytes consumed
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }
        let raw_type = u16::from_be_bytes([data[0], data[1]]);
        let len_or_value = u16::from_be_bytes([data[2], data[3]]);
        let attr_type = raw_type & !attr::AF_TV;

        if raw_type & attr::AF_TV != 0 {
            return Ok((Self::basic(attr_type, len_or_value), 4));
        }

        let end = 4 + len_or_value as usize;
        if data.len() < end {
            return Err(Error::BufferTooShort {
                required: end,
                available: data.len(),
            });
        }
        Ok((Self::variable(attr_type, data[4..end].to_vec()), end))
    }

    /// Serialize the attribute
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.value {
            AttributeValue::Basic(v) => {
                let mut out = Vec::with_capacity(4);
                out.extend_from_slice(&(self.attr_type | attr::AF_TV).to_be_bytes());
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            AttributeValue::Variable(bytes) => {
                let mut out = Vec::with_capacity(4 + bytes.len());
                out.extend_from_slice(&(self.attr_type & !attr::AF_TV).to_be_bytes());
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

/// Transform payload (RFC 2408 Section 3.6)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformPayload {
    /// Transform number
    pub number: u8,
    /// Transform ID, interpreted per protocol
    pub transform_id: u8,
    /// SA attributes
    pub attributes: Vec<DataAttribute>,
}

impl TransformPayload {
    /// Create a transform without attributes
    pub fn new(number: u8, transform_id: u8) -> Self {
        TransformPayload {
            number,
            transform_id,
            attributes: Vec::new(),
        }
    }

    /// Look up the first attribute of `attr_type`
    pub fn attribute(&self, attr_type: u16) -> Option<&DataAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Parse the body of a transform payload
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }
        let mut transform = TransformPayload::new(data[0], data[1]);
        let mut offset = 4;
        while offset < data.len() {
            let (attribute, used) = DataAttribute::from_bytes(&data[offset..])?;
            transform.attributes.push(attribute);
            offset += used;
        }
        Ok(transform)
    }

    /// Serialize the body of a transform payload
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = vec![self.number, self.transform_id, 0, 0];
        for attribute in &self.attributes {
            out.extend_from_slice(&attribute.to_bytes());
        }
        out
    }
}

/// Proposal payload (RFC 2408 Section 3.5)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProposalPayload {
    /// Proposal number; payloads sharing it form one logical proposal
    pub number: u8,
    /// Protocol ID
    pub protocol_id: u8,
    /// SPI of the sender for this protocol
    pub spi: Vec<u8>,
    /// Offered transforms
    pub transforms: Vec<TransformPayload>,
}

impl ProposalPayload {
    /// IPsec SPI as an integer, if 4 bytes long
    pub fn spi_u32(&self) -> Option<u32> {
        let bytes: [u8; IPSEC_SPI_SIZE] = self.spi.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Parse the body of a proposal payload
    pub fn from_payload_data(data: &[u8], limits: &DecodeLimits) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }
        let number = data[0];
        let protocol_id = data[1];
        let spi_size = data[2] as usize;
        let num_transforms = data[3] as usize;

        if num_transforms == 0 {
            return Err(Error::InvalidPayload("Proposal without transforms".into()));
        }
        if num_transforms > limits.max_transforms {
            return Err(Error::TooManyTransforms);
        }

        let spi_end = 4 + spi_size;
        if data.len() < spi_end {
            return Err(Error::BufferTooShort {
                required: spi_end,
                available: data.len(),
            });
        }
        let spi = data[4..spi_end].to_vec();

        let mut transforms = Vec::with_capacity(num_transforms);
        let mut offset = spi_end;
        for i in 0..num_transforms {
            let header = PayloadHeader::from_bytes(&data[offset..])?;
            let expected = if i + 1 == num_transforms {
                PayloadType::None
            } else {
                PayloadType::T
            };
            if header.next_payload != expected.to_u8() {
                return Err(Error::InvalidPayload(
                    "Transform count does not match transform chain".into(),
                ));
            }
            let end = offset + header.length as usize;
            transforms.push(TransformPayload::from_payload_data(
                &data[offset + PayloadHeader::SIZE..end],
            )?);
            offset = end;
        }

        Ok(ProposalPayload {
            number,
            protocol_id,
            spi,
            transforms,
        })
    }

    /// Serialize the body of a proposal payload
    pub fn to_payload_data(&self) -> Result<Vec<u8>> {
        if self.transforms.is_empty() || self.transforms.len() > u8::MAX as usize {
            return Err(Error::InvalidPayload("Invalid transform count".into()));
        }
        let mut out = vec![
            self.number,
            self.protocol_id,
            self.spi.len() as u8,
            self.transforms.len() as u8,
        ];
        out.extend_from_slice(&self.spi);
        for (i, transform) in self.transforms.iter().enumerate() {
            let next = if i + 1 == self.transforms.len() {
                PayloadType::None
            } else {
                PayloadType::T
            };
            out.extend_from_slice(&with_header(next.to_u8(), &transform.to_payload_data())?);
        }
        Ok(out)
    }
}

/// Security Association payload (RFC 2407 Section 4.6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Domain of Interpretation
    pub doi: u32,
    /// Situation bitmap
    pub situation: u32,
    /// Proposal payloads in wire order
    pub proposals: Vec<ProposalPayload>,
    /// Set when more proposals were present than were decoded
    pub partial: bool,
}

impl SaPayload {
    /// SA payload for the IPsec DOI with SIT_IDENTITY_ONLY
    pub fn new(proposals: Vec<ProposalPayload>) -> Self {
        SaPayload {
            doi: DOI_IPSEC,
            situation: SIT_IDENTITY_ONLY,
            proposals,
            partial: false,
        }
    }

    /// Parse the body of an SA payload
    ///
    /// At most `limits.max_proposals` proposal payloads are decoded; any
    /// beyond that mark the payload as partial.
    pub fn from_payload_data(data: &[u8], limits: &DecodeLimits) -> Result<Self> {
        let doi = read_u32(data, 0)?;
        if doi != DOI_IPSEC {
            return Err(Error::UnsupportedDoi(doi));
        }
        let situation = read_u32(data, 4)?;
        if situation != SIT_IDENTITY_ONLY {
            return Err(Error::UnsupportedSituation(situation));
        }

        let mut proposals = Vec::new();
        let mut partial = false;
        let mut offset = 8;
        loop {
            let header = PayloadHeader::from_bytes(&data[offset..])?;
            if proposals.len() == limits.max_proposals {
                partial = true;
                break;
            }
            let end = offset + header.length as usize;
            proposals.push(ProposalPayload::from_payload_data(
                &data[offset + PayloadHeader::SIZE..end],
                limits,
            )?);
            offset = end;

            match PayloadType::from_u8(header.next_payload) {
                Some(PayloadType::None) => break,
                Some(PayloadType::P) => continue,
                _ => {
                    return Err(Error::InvalidPayload(format!(
                        "Unexpected payload {} in proposal chain",
                        header.next_payload
                    )))
                }
            }
        }

        Ok(SaPayload {
            doi,
            situation,
            proposals,
            partial,
        })
    }

    /// Serialize the body of an SA payload
    pub fn to_payload_data(&self) -> Result<Vec<u8>> {
        if self.proposals.is_empty() {
            return Err(Error::InvalidPayload("SA without proposals".into()));
        }
        let mut out = Vec::new();
        out.extend_from_slice(&self.doi.to_be_bytes());
        out.extend_from_slice(&self.situation.to_be_bytes());
        for (i, proposal) in self.proposals.iter().enumerate() {
            let next = if i + 1 == self.proposals.len() {
                PayloadType::None
            } else {
                PayloadType::P
            };
            out.extend_from_slice(&with_header(next.to_u8(), &proposal.to_payload_data()?)?);
        }
        Ok(out)
    }
}

/// Identification payload (RFC 2407 Section 4.6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    /// ID type
    pub id_type: u8,
    /// IP protocol, zero for any
    pub protocol: u8,
    /// Port, zero for any
    pub port: u16,
    /// Identification data
    pub data: Vec<u8>,
}

impl IdPayload {
    /// Parse the body of an ID payload
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }
        Ok(IdPayload {
            id_type: data[0],
            protocol: data[1],
            port: u16::from_be_bytes([data[2], data[3]]),
            data: data[4..].to_vec(),
        })
    }

    /// Serialize the body of an ID payload
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = vec![self.id_type, self.protocol];
        out.extend_from_slice(&self.port.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// Notification payload (RFC 2408 Section 3.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Domain of Interpretation
    pub doi: u32,
    /// Protocol ID the notification concerns
    pub protocol_id: u8,
    /// Notify message type
    pub notify_type: u16,
    /// SPI the notification concerns
    pub spi: Vec<u8>,
    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Create a notification for the IPsec DOI
    pub fn new(protocol_id: u8, notify_type: NotifyType, spi: Vec<u8>) -> Self {
        NotifyPayload {
            doi: DOI_IPSEC,
            protocol_id,
            notify_type: notify_type.to_u16(),
            spi,
            data: Vec::new(),
        }
    }

    /// Parse the body of a notification payload
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        let doi = read_u32(data, 0)?;
        if doi != DOI_IPSEC && doi != 0 {
            return Err(Error::UnsupportedDoi(doi));
        }
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }
        let protocol_id = data[4];
        let spi_size = data[5] as usize;
        let notify_type = u16::from_be_bytes([data[6], data[7]]);
        let spi_end = 8 + spi_size;
        if data.len() < spi_end {
            return Err(Error::BufferTooShort {
                required: spi_end,
                available: data.len(),
            });
        }
        Ok(NotifyPayload {
            doi,
            protocol_id,
            notify_type,
            spi: data[8..spi_end].to_vec(),
            data: data[spi_end..].to_vec(),
        })
    }

    /// Serialize the body of a notification payload
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.spi.len() + self.data.len());
        out.extend_from_slice(&self.doi.to_be_bytes());
        out.push(self.protocol_id);
        out.push(self.spi.len() as u8);
        out.extend_from_slice(&self.notify_type.to_be_bytes());
        out.extend_from_slice(&self.spi);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Delete payload (RFC 2408 Section 3.15)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Domain of Interpretation
    pub doi: u32,
    /// Protocol ID of the SAs being deleted
    pub protocol_id: u8,
    /// Size of every SPI
    pub spi_size: u8,
    /// SPIs of the SAs being deleted
    pub spis: Vec<Vec<u8>>,
}

impl DeletePayload {
    /// Create a delete payload for the IPsec DOI
    pub fn new(protocol_id: u8, spi_size: u8, spis: Vec<Vec<u8>>) -> Self {
        DeletePayload {
            doi: DOI_IPSEC,
            protocol_id,
            spi_size,
            spis,
        }
    }

    /// Parse the body of a delete payload
    pub fn from_payload_data(data: &[u8], limits: &DecodeLimits) -> Result<Self> {
        let doi = read_u32(data, 0)?;
        if doi != DOI_IPSEC && doi != 0 {
            return Err(Error::UnsupportedDoi(doi));
        }
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }
        let protocol_id = data[4];
        let spi_size = data[5];
        let count = u16::from_be_bytes([data[6], data[7]]) as usize;
        if count == 0 || spi_size == 0 {
            return Err(Error::InvalidPayload("Delete payload without SPIs".into()));
        }
        if count > limits.max_delete_spis {
            return Err(Error::InvalidPayload(format!(
                "Delete payload carries {} SPIs",
                count
            )));
        }
        let end = 8 + count * spi_size as usize;
        if data.len() < end {
            return Err(Error::BufferTooShort {
                required: end,
                available: data.len(),
            });
        }
        let spis = data[8..end]
            .chunks(spi_size as usize)
            .map(<[u8]>::to_vec)
            .collect();
        Ok(DeletePayload {
            doi,
            protocol_id,
            spi_size,
            spis,
        })
    }

    /// Serialize the body of a delete payload
    pub fn to_payload_data(&self) -> Result<Vec<u8>> {
        if self.spis.iter().any(|spi| spi.len() != self.spi_size as usize) {
            return Err(Error::InvalidPayload("SPI size mismatch in delete".into()));
        }
        let mut out = Vec::new();
        out.extend_from_slice(&self.doi.to_be_bytes());
        out.push(self.protocol_id);
        out.push(self.spi_size);
        out.extend_from_slice(&(self.spis.len() as u16).to_be_bytes());
        for spi in &self.spis {
            out.extend_from_slice(spi);
        }
        Ok(out)
    }
}

/// ISAKMP payloads handled by the Phase 2 engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsakmpPayload {
    /// Security Association
    Sa(SaPayload),
    /// Key Exchange data
    Ke(Vec<u8>),
    /// Identification
    Id(IdPayload),
    /// Hash data
    Hash(Vec<u8>),
    /// Nonce data
    Nonce(Vec<u8>),
    /// Notification
    Notify(NotifyPayload),
    /// Delete
    Delete(DeletePayload),
    /// Vendor ID
    VendorId(Vec<u8>),
}

impl IsakmpPayload {
    /// Get payload type
    pub fn payload_type(&self) -> PayloadType {
        match self {
            IsakmpPayload::Sa(_) => PayloadType::SA,
            IsakmpPayload::Ke(_) => PayloadType::KE,
            IsakmpPayload::Id(_) => PayloadType::ID,
            IsakmpPayload::Hash(_) => PayloadType::HASH,
            IsakmpPayload::Nonce(_) => PayloadType::Nonce,
            IsakmpPayload::Notify(_) => PayloadType::N,
            IsakmpPayload::Delete(_) => PayloadType::D,
            IsakmpPayload::VendorId(_) => PayloadType::VID,
        }
    }

    /// Parse a payload body of the given type
    pub fn from_payload_data(
        payload_type: PayloadType,
        data: &[u8],
        limits: &DecodeLimits,
    ) -> Result<Self> {
        match payload_type {
            PayloadType::SA => Ok(IsakmpPayload::Sa(SaPayload::from_payload_data(data, limits)?)),
            PayloadType::KE => Ok(IsakmpPayload::Ke(data.to_vec())),
            PayloadType::ID => Ok(IsakmpPayload::Id(IdPayload::from_payload_data(data)?)),
            PayloadType::HASH => Ok(IsakmpPayload::Hash(data.to_vec())),
            PayloadType::Nonce => Ok(IsakmpPayload::Nonce(data.to_vec())),
            PayloadType::N => Ok(IsakmpPayload::Notify(NotifyPayload::from_payload_data(data)?)),
            PayloadType::D => Ok(IsakmpPayload::Delete(DeletePayload::from_payload_data(
                data, limits,
            )?)),
            PayloadType::VID => Ok(IsakmpPayload::VendorId(data.to_vec())),
            other => Err(Error::UnexpectedPayload(other.to_u8())),
        }
    }

    /// Serialize the payload body
    pub fn to_payload_data(&self) -> Result<Vec<u8>> {
        match self {
            IsakmpPayload::Sa(sa) => sa.to_payload_data(),
            IsakmpPayload::Ke(data)
            | IsakmpPayload::Hash(data)
            | IsakmpPayload::Nonce(data)
            | IsakmpPayload::VendorId(data) => Ok(data.clone()),
            IsakmpPayload::Id(id) => Ok(id.to_payload_data()),
            IsakmpPayload::Notify(n) => Ok(n.to_payload_data()),
            IsakmpPayload::Delete(d) => d.to_payload_data(),
        }
    }

    /// Serialize with a generic header pointing at `next`
    pub fn to_bytes(&self, next: PayloadType) -> Result<Vec<u8>> {
        with_header(next.to_u8(), &self.to_payload_data()?)
    }
}
