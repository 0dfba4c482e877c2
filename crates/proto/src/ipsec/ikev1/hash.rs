//! Phase 2 authentication hashes, IVs and KEYMAT (RFC 2409 Section 5.5)
//!
//! ```text
//! HASH(1) = prf(SKEYID_a, M-ID | <rest of message after HASH>)
//! HASH(2) = prf(SKEYID_a, M-ID | Ni_b | <rest>)
//! HASH(3) = prf(SKEYID_a, 0 | M-ID | Ni_b | Nr_b)
//! KEYMAT  = prf(SKEYID_d, [g(qm)^xy |] protocol | SPI | Ni_b | Nr_b)
//! ```

use super::ike_sa::Phase1Keys;
use crate::ipsec::crypto::{CryptoProvider, HashAlgorithm};
use crate::ipsec::{Error, Result};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// HASH(1), authenticating a message with no nonce binding
pub fn hash1(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    msg_id: u32,
    rest: &[u8],
) -> Result<Vec<u8>> {
    crypto.prf(keys.prf, &keys.skeyid_a, &[&msg_id.to_be_bytes(), rest])
}

/// HASH(2), binding the responder's reply to the initiator nonce
pub fn hash2(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    msg_id: u32,
    nonce_i: &[u8],
    rest: &[u8],
) -> Result<Vec<u8>> {
    crypto.prf(
        keys.prf,
        &keys.skeyid_a,
        &[&msg_id.to_be_bytes(), nonce_i, rest],
    )
}

/// HASH(3), proving liveness of the initiator
pub fn hash3(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    msg_id: u32,
    nonce_i: &[u8],
    nonce_r: &[u8],
) -> Result<Vec<u8>> {
    crypto.prf(
        keys.prf,
        &keys.skeyid_a,
        &[&[0u8], &msg_id.to_be_bytes(), nonce_i, nonce_r],
    )
}

/// Compare a received hash against the expected value in constant time
pub fn verify(expected: &[u8], received: &[u8]) -> Result<()> {
    if expected.len() == received.len() && bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(Error::VerifyFailed)
    }
}

/// Initial IV of a Phase 2 or Informational exchange
///
/// hash(last Phase 1 CBC block | M-ID), truncated to the cipher block size.
pub fn phase2_iv(crypto: &dyn CryptoProvider, keys: &Phase1Keys, msg_id: u32) -> Result<Vec<u8>> {
    let block_size = keys.cipher.block_size();
    let mut iv = crypto.hash(keys.hash, &[keys.last_iv.as_slice(), &msg_id.to_be_bytes()])?;
    if iv.len() < block_size {
        return Err(Error::CryptoError("Hash shorter than cipher block".into()));
    }
    iv.truncate(block_size);
    Ok(iv)
}

/// Digest used to recognise a retransmitted datagram
pub fn message_digest(crypto: &dyn CryptoProvider, datagram: &[u8]) -> Result<Vec<u8>> {
    crypto.hash(HashAlgorithm::Sha1, &[datagram])
}

/// Derive `len` bytes of KEYMAT for one SA direction
///
/// `spi` is the SPI of the SA the keys are for: the local SPI yields the
/// inbound keys, the peer's SPI the outbound ones.
#[allow(clippy::too_many_arguments)]
pub fn keymat(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    shared_secret: Option<&[u8]>,
    protocol_id: u8,
    spi: u32,
    nonce_i: &[u8],
    nonce_r: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let spi = spi.to_be_bytes();
    let protocol = [protocol_id];
    let mut tail: Vec<&[u8]> = Vec::with_capacity(5);
    if let Some(secret) = shared_secret {
        tail.push(secret);
    }
    tail.extend_from_slice(&[&protocol[..], &spi[..], nonce_i, nonce_r]);

    let mut out = Zeroizing::new(Vec::with_capacity(len));
    let mut block = Zeroizing::new(crypto.prf(keys.prf, &keys.skeyid_d, &tail)?);
    if block.is_empty() {
        return Err(Error::CryptoError("Empty PRF output".into()));
    }

    loop {
        let take = block.len().min(len - out.len());
        out.extend_from_slice(&block[..take]);
        if out.len() == len {
            break;
        }
        // Kn = prf(SKEYID_d, K(n-1) | [g(qm)^xy |] protocol | SPI | Ni_b | Nr_b)
        let mut parts: Vec<&[u8]> = Vec::with_capacity(tail.len() + 1);
        parts.push(block.as_slice());
        parts.extend_from_slice(&tail);
        let next = crypto.prf(keys.prf, &keys.skeyid_d, &parts)?;
        block = Zeroizing::new(next);
    }

    Ok(out)
}
