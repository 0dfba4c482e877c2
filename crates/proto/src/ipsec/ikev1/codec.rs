//! Payload chain codec
//!
//! The engine asks for the payloads it expects through
//! [`PayloadRequirements`]; the codec walks the chain once, rejects what is
//! not allowed and hands back typed payloads together with their byte
//! offsets, which are needed to compute the Quick Mode hashes.

use super::constants::PayloadType;
use super::payload::{
    DecodeLimits, DeletePayload, IdPayload, IsakmpPayload, NotifyPayload, PayloadHeader,
    SaPayload,
};
use crate::ipsec::{Error, Result};
use std::ops::Range;

/// Whether a payload type may appear in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    /// Payload must not appear
    #[default]
    Forbidden,
    /// Payload may appear
    Optional,
    /// Payload must appear
    Required,
}

/// Expected payloads of one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadRequirements {
    entries: Vec<(PayloadType, Presence)>,
}

impl PayloadRequirements {
    /// No payloads allowed
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a payload type
    pub fn require(mut self, payload_type: PayloadType) -> Self {
        self.set(payload_type, Presence::Required);
        self
    }

    /// Allow a payload type
    pub fn allow(mut self, payload_type: PayloadType) -> Self {
        self.set(payload_type, Presence::Optional);
        self
    }

    fn set(&mut self, payload_type: PayloadType, presence: Presence) {
        match self.entries.iter_mut().find(|(t, _)| *t == payload_type) {
            Some(entry) => entry.1 = presence,
            None => self.entries.push((payload_type, presence)),
        }
    }

    /// Presence of a payload type
    pub fn presence(&self, payload_type: PayloadType) -> Presence {
        self.entries
            .iter()
            .find(|(t, _)| *t == payload_type)
            .map(|(_, p)| *p)
            .unwrap_or_default()
    }

    fn required(&self) -> impl Iterator<Item = PayloadType> + '_ {
        self.entries
            .iter()
            .filter(|(_, p)| *p == Presence::Required)
            .map(|(t, _)| *t)
    }
}

/// Result of decoding a payload chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Payloads in wire order
    pub payloads: Vec<IsakmpPayload>,
    /// Byte range of each payload, header included, within the chain
    pub spans: Vec<Range<usize>>,
    /// Length of the payload chain, padding excluded
    pub chain_len: usize,
}

impl DecodedMessage {
    /// Type of the first payload
    pub fn first_type(&self) -> Option<PayloadType> {
        self.payloads.first().map(IsakmpPayload::payload_type)
    }

    /// Hash data, if present
    pub fn hash(&self) -> Option<&[u8]> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Hash(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Offset just past the leading HASH payload
    pub fn hash_end(&self) -> Option<usize> {
        match self.payloads.first() {
            Some(IsakmpPayload::Hash(_)) => self.spans.first().map(|s| s.end),
            _ => None,
        }
    }

    /// SA payload, if present
    pub fn sa(&self) -> Option<&SaPayload> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Sa(sa) => Some(sa),
            _ => None,
        })
    }

    /// Nonce data, if present
    pub fn nonce(&self) -> Option<&[u8]> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Nonce(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Key exchange data, if present
    pub fn ke(&self) -> Option<&[u8]> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Ke(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Identification payloads in order (IDci, IDcr)
    pub fn ids(&self) -> Vec<&IdPayload> {
        self.payloads
            .iter()
            .filter_map(|p| match p {
                IsakmpPayload::Id(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Notification payload, if present
    pub fn notify(&self) -> Option<&NotifyPayload> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Notify(n) => Some(n),
            _ => None,
        })
    }

    /// Delete payload, if present
    pub fn delete(&self) -> Option<&DeletePayload> {
        self.payloads.iter().find_map(|p| match p {
            IsakmpPayload::Delete(d) => Some(d),
            _ => None,
        })
    }
}

/// Wire codec for ISAKMP payload chains
pub trait PayloadCodec: Send + Sync {
    /// Decode the chain starting with `first`
    ///
    /// # Errors
    ///
    /// - `UnexpectedPayload` for payloads the requirements forbid
    /// - `DuplicatePayload` for repeated payloads
    /// - `MissingPayload` for absent required payloads
    /// - `UnsupportedDoi` / `InvalidPayload` for malformed content
    fn decode(
        &self,
        first: PayloadType,
        chain: &[u8],
        requirements: &PayloadRequirements,
    ) -> Result<DecodedMessage>;

    /// Encode a chain of payloads, returning the first payload type and bytes
    fn encode(&self, payloads: &[IsakmpPayload]) -> Result<(PayloadType, Vec<u8>)>;
}

/// Default codec for the IPsec DOI
#[derive(Debug, Clone, Copy, Default)]
pub struct IsakmpCodec {
    limits: DecodeLimits,
}

impl IsakmpCodec {
    /// Create a codec with the given decode bounds
    pub fn new(limits: DecodeLimits) -> Self {
        IsakmpCodec { limits }
    }

    /// Decode bounds in use
    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    fn max_occurrences(payload_type: PayloadType) -> usize {
        match payload_type {
            // IDci and IDcr
            PayloadType::ID => 2,
            _ => 1,
        }
    }
}

impl PayloadCodec for IsakmpCodec {
    fn decode(
        &self,
        first: PayloadType,
        chain: &[u8],
        requirements: &PayloadRequirements,
    ) -> Result<DecodedMessage> {
        let mut decoded = DecodedMessage::default();
        let mut counts = [0usize; 14];
        let mut next = first.to_u8();
        let mut offset = 0;

        while next != PayloadType::None.to_u8() {
            let header = PayloadHeader::from_bytes(&chain[offset..])?;
            let payload_type =
                PayloadType::from_u8(next).ok_or(Error::UnexpectedPayload(next))?;
            let end = offset + header.length as usize;

            if payload_type != PayloadType::VID {
                if requirements.presence(payload_type) == Presence::Forbidden {
                    return Err(Error::UnexpectedPayload(next));
                }
                let count = &mut counts[next as usize];
                *count += 1;
                if *count > Self::max_occurrences(payload_type) {
                    return Err(Error::DuplicatePayload(next));
                }
                let payload = IsakmpPayload::from_payload_data(
                    payload_type,
                    &chain[offset + PayloadHeader::SIZE..end],
                    &self.limits,
                )?;
                decoded.payloads.push(payload);
                decoded.spans.push(offset..end);
            }

            next = header.next_payload;
            offset = end;
        }

        for payload_type in requirements.required() {
            if counts[payload_type.to_u8() as usize] == 0 {
                return Err(Error::MissingPayload(payload_type.to_u8()));
            }
        }

        decoded.chain_len = offset;
        Ok(decoded)
    }

    fn encode(&self, payloads: &[IsakmpPayload]) -> Result<(PayloadType, Vec<u8>)> {
        let first = payloads
            .first()
            .map(IsakmpPayload::payload_type)
            .ok_or_else(|| Error::InvalidParameter("Empty payload chain".into()))?;

        let mut out = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let next = payloads
                .get(i + 1)
                .map(IsakmpPayload::payload_type)
                .unwrap_or(PayloadType::None);
            out.extend_from_slice(&payload.to_bytes(next)?);
        }
        Ok((first, out))
    }
}
