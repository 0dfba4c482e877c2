//! Crypto collaborator used by the negotiation engine
//!
//! The engine never calls primitives directly; everything goes through a
//! [`CryptoProvider`] so that hardware offload or test doubles can be
//! plugged in. Every method reports `Error::CryptoError` on primitive
//! failure and never returns partial output.

use super::{
    CipherAlgorithm, DhGroup, DhKeyPair, HashAlgorithm, HashContext, PrfAlgorithm, PrfContext,
    SigningKey, VerifyingKey,
};
use crate::ipsec::{Error, Result};
use rand::RngCore;
use zeroize::Zeroizing;

/// Cryptographic primitives consumed by Quick Mode and Informational
pub trait CryptoProvider: Send + Sync {
    /// Digest length of a hash algorithm
    fn digest_len(&self, hash: HashAlgorithm) -> usize {
        hash.output_len()
    }

    /// Start a streaming PRF computation
    fn prf_init(&self, prf: PrfAlgorithm, key: &[u8]) -> Result<PrfContext>;

    /// Start a streaming hash computation
    fn hash_init(&self, hash: HashAlgorithm) -> Result<HashContext>;

    /// Generate a Diffie-Hellman key pair
    fn dh_generate(&self, group: DhGroup) -> Result<DhKeyPair>;

    /// Compute the shared secret with the peer's public value
    fn dh_compute(&self, pair: &DhKeyPair, remote_public: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Sign a digest
    fn sign(&self, key: &SigningKey, digest: &[u8]) -> Result<Vec<u8>>;

    /// Verify a signature over a digest
    fn verify(&self, key: &VerifyingKey, digest: &[u8], signature: &[u8]) -> Result<bool>;

    /// CBC-encrypt block-aligned data
    fn encrypt(
        &self,
        cipher: CipherAlgorithm,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>>;

    /// CBC-decrypt block-aligned data
    fn decrypt(
        &self,
        cipher: CipherAlgorithm,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>>;

    /// Fill `buf` with random octets
    fn random_bytes(&self, buf: &mut [u8]) -> Result<()>;

    /// One-shot PRF over the concatenation of `parts`
    fn prf(&self, prf: PrfAlgorithm, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        let mut ctx = self.prf_init(prf, key)?;
        for part in parts {
            ctx.update(part);
        }
        Ok(ctx.finalize())
    }

    /// One-shot hash over the concatenation of `parts`
    fn hash(&self, hash: HashAlgorithm, parts: &[&[u8]]) -> Result<Vec<u8>> {
        let mut ctx = self.hash_init(hash)?;
        for part in parts {
            ctx.update(part);
        }
        Ok(ctx.finalize())
    }
}

/// Software implementation backed by the RustCrypto crates
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftCrypto;

impl SoftCrypto {
    /// Create a software provider
    pub fn new() -> Self {
        SoftCrypto
    }
}

impl CryptoProvider for SoftCrypto {
    fn prf_init(&self, prf: PrfAlgorithm, key: &[u8]) -> Result<PrfContext> {
        prf.init(key)
    }

    fn hash_init(&self, hash: HashAlgorithm) -> Result<HashContext> {
        Ok(hash.context())
    }

    fn dh_generate(&self, group: DhGroup) -> Result<DhKeyPair> {
        DhKeyPair::generate(group)
    }

    fn dh_compute(&self, pair: &DhKeyPair, remote_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if remote_public.len() != pair.group().prime_len() {
            return Err(Error::CryptoError(format!(
                "Invalid DH public value length: expected {}, got {}",
                pair.group().prime_len(),
                remote_public.len()
            )));
        }
        pair.compute_shared_secret(remote_public)
    }

    fn sign(&self, key: &SigningKey, digest: &[u8]) -> Result<Vec<u8>> {
        key.sign(digest)
    }

    fn verify(&self, key: &VerifyingKey, digest: &[u8], signature: &[u8]) -> Result<bool> {
        key.verify(digest, signature)
    }

    fn encrypt(
        &self,
        cipher: CipherAlgorithm,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        cipher.encrypt(key, iv, data)
    }

    fn decrypt(
        &self,
        cipher: CipherAlgorithm,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        cipher.decrypt(key, iv, data)
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<()> {
        rand::thread_rng()
            .try_fill_bytes(buf)
            .map_err(|e| Error::CryptoError(format!("RNG failure: {}", e)))
    }
}
