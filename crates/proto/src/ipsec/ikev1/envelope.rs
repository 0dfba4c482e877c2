//! ISAKMP message envelope
//!
//! Wraps an encoded payload chain in an ISAKMP header, encrypting the body
//! under the Phase 1 key when the exchange is protected (RFC 2408
//! Section 3.1, RFC 2409 Appendix B). Neither direction touches exchange
//! state: the caller decides when the returned IV becomes current.

use super::constants::{ISAKMP_HEADER_SIZE, MAX_ISAKMP_MESSAGE_SIZE};
use super::ike_sa::Phase1Keys;
use super::message::IsakmpHeader;
use crate::ipsec::crypto::CryptoProvider;
use crate::ipsec::{Error, Result};

/// Encrypted datagram ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Header plus ciphertext
    pub datagram: Vec<u8>,
    /// Last ciphertext block, IV of the next message once this one is sent
    pub next_iv: Vec<u8>,
}

/// Decrypted datagram, not yet authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Parsed header
    pub header: IsakmpHeader,
    /// Plaintext payload chain, padding included
    pub plaintext: Vec<u8>,
    /// Last ciphertext block, IV of the next message once this one verifies
    pub next_iv: Vec<u8>,
}

fn finish(mut header: IsakmpHeader, body: &[u8]) -> Result<Vec<u8>> {
    let length = ISAKMP_HEADER_SIZE + body.len();
    if length > MAX_ISAKMP_MESSAGE_SIZE as usize {
        return Err(Error::InvalidPayload(format!(
            "Message too long: {} bytes",
            length
        )));
    }
    header.length = length as u32;

    let mut datagram = Vec::with_capacity(length);
    datagram.extend_from_slice(&header.to_bytes());
    datagram.extend_from_slice(body);
    Ok(datagram)
}

/// Pad and encrypt `chain` with `iv`, prefixing `header`
///
/// The header length is rewritten to cover the ciphertext.
pub fn seal(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    header: IsakmpHeader,
    chain: &[u8],
    iv: &[u8],
) -> Result<Sealed> {
    let mut plaintext = chain.to_vec();
    keys.cipher.pad(&mut plaintext);
    let ciphertext = crypto.encrypt(keys.cipher, &keys.enc_key, iv, &plaintext)?;
    let next_iv = keys.cipher.next_iv(&ciphertext);

    Ok(Sealed {
        datagram: finish(header, &ciphertext)?,
        next_iv,
    })
}

/// Parse and decrypt a protected datagram with `iv`
///
/// # Errors
///
/// - Header errors from [`IsakmpHeader::from_bytes`]
/// - `InvalidPayload` if the body is empty or not block aligned
/// - `CryptoError` if decryption fails
pub fn open(
    crypto: &dyn CryptoProvider,
    keys: &Phase1Keys,
    datagram: &[u8],
    iv: &[u8],
) -> Result<Opened> {
    let header = IsakmpHeader::from_bytes(datagram)?;
    let body = &datagram[ISAKMP_HEADER_SIZE..header.length as usize];
    if body.is_empty() || body.len() % keys.cipher.block_size() != 0 {
        return Err(Error::InvalidPayload(format!(
            "Encrypted body of {} bytes is not block aligned",
            body.len()
        )));
    }

    let plaintext = crypto.decrypt(keys.cipher, &keys.enc_key, iv, body)?;
    Ok(Opened {
        header,
        plaintext,
        next_iv: keys.cipher.next_iv(body),
    })
}

/// Build an unprotected datagram
pub fn cleartext(header: IsakmpHeader, chain: &[u8]) -> Result<Vec<u8>> {
    finish(header, chain)
}

/// Payload chain of an unprotected datagram
pub fn cleartext_body(datagram: &[u8]) -> Result<(IsakmpHeader, &[u8])> {
    let header = IsakmpHeader::from_bytes(datagram)?;
    let body = &datagram[ISAKMP_HEADER_SIZE..header.length as usize];
    Ok((header, body))
}
