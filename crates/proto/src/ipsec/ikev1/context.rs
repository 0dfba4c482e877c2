//! Per-call negotiation context
//!
//! The engine builds an [`ExchangeContext`] for every event it dispatches.
//! It borrows the collaborators and the IKE SA the event belongs to, and
//! carries the protected-message plumbing shared by Quick Mode and
//! Informational exchanges.

use super::codec::{DecodedMessage, PayloadCodec, PayloadRequirements};
use super::constants::{ExchangeType, IsakmpFlags, PayloadType, PAYLOAD_HEADER_SIZE};
use super::envelope::{self, Sealed};
use super::ike_sa::IkeSaParams;
use super::message::IsakmpHeader;
use super::payload::IsakmpPayload;
use super::policy::PolicyStore;
use super::timer::Scheduler;
use super::transport::Transport;
use crate::ipsec::config::EngineConfig;
use crate::ipsec::crypto::CryptoProvider;
use crate::ipsec::metrics::IkeMetrics;
use crate::ipsec::{Error, Result};

/// Collaborators and IKE SA an event is processed against
pub struct ExchangeContext<'a> {
    /// Crypto primitives
    pub crypto: &'a dyn CryptoProvider,
    /// Policy and SA database
    pub policy: &'a dyn PolicyStore,
    /// Payload codec
    pub codec: &'a dyn PayloadCodec,
    /// Datagram transport
    pub transport: &'a dyn Transport,
    /// Timer service
    pub scheduler: &'a dyn Scheduler,
    /// Metrics sink
    pub metrics: &'a IkeMetrics,
    /// Engine configuration
    pub config: &'a EngineConfig,
    /// IKE SA of the exchange
    pub sa: &'a IkeSaParams,
}

/// Decrypted and decoded message whose hash is not yet checked
#[derive(Debug)]
pub struct Received {
    /// ISAKMP header
    pub header: IsakmpHeader,
    /// Decoded payloads
    pub decoded: DecodedMessage,
    /// Plaintext chain
    pub plaintext: Vec<u8>,
    /// IV to adopt once the hash verifies
    pub next_iv: Vec<u8>,
}

impl Received {
    /// Hash payload data
    pub fn hash(&self) -> Result<&[u8]> {
        self.decoded
            .hash()
            .ok_or(Error::MissingPayload(PayloadType::HASH.to_u8()))
    }

    /// Bytes following the HASH payload, padding excluded
    pub fn rest(&self) -> Result<&[u8]> {
        let start = self
            .decoded
            .hash_end()
            .ok_or(Error::MissingPayload(PayloadType::HASH.to_u8()))?;
        Ok(&self.plaintext[start..self.decoded.chain_len])
    }
}

impl<'a> ExchangeContext<'a> {
    /// Peer endpoint as a string for logs
    pub fn peer(&self) -> String {
        self.sa.peer_addr.to_string()
    }

    /// Encode `payloads` behind a HASH payload and encrypt the message
    ///
    /// `hash` receives the encoded bytes that follow the HASH payload and
    /// returns the authenticator to place in it.
    #[allow(clippy::too_many_arguments)]
    pub fn seal<F>(
        &self,
        exchange_type: ExchangeType,
        msg_id: u32,
        commit: bool,
        payloads: Vec<IsakmpPayload>,
        iv: &[u8],
        hash: F,
    ) -> Result<Sealed>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        let keys = self.sa.keys()?;
        let hash_len = keys.prf.output_len();

        let mut chain = Vec::with_capacity(payloads.len() + 1);
        chain.push(IsakmpPayload::Hash(vec![0; hash_len]));
        chain.extend(payloads);
        let (first, mut bytes) = self.codec.encode(&chain)?;

        let hash_end = PAYLOAD_HEADER_SIZE + hash_len;
        let digest = hash(&bytes[hash_end..])?;
        if digest.len() != hash_len {
            return Err(Error::CryptoError(format!(
                "PRF output of {} bytes, expected {}",
                digest.len(),
                hash_len
            )));
        }
        bytes[PAYLOAD_HEADER_SIZE..hash_end].copy_from_slice(&digest);

        let header = IsakmpHeader::new(
            self.sa.cookies,
            first,
            exchange_type,
            IsakmpFlags::encrypted(commit),
            msg_id,
        );
        envelope::seal(self.crypto, keys, header, &bytes, iv)
    }

    /// Decrypt `datagram` with `iv` and decode it against `requirements`
    pub fn open(
        &self,
        datagram: &[u8],
        iv: &[u8],
        requirements: &PayloadRequirements,
    ) -> Result<Received> {
        let keys = self.sa.keys()?;
        let opened = envelope::open(self.crypto, keys, datagram, iv)?;
        let decoded = self
            .codec
            .decode(opened.header.next_payload, &opened.plaintext, requirements)?;
        Ok(Received {
            header: opened.header,
            decoded,
            plaintext: opened.plaintext,
            next_iv: opened.next_iv,
        })
    }
}
