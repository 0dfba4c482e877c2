//! RSA signatures for IKE authentication
//!
//! IKEv1 signs the raw HASH_I / HASH_R digest with PKCS#1 v1.5 and no
//! DigestInfo prefix (RFC 2409 Section 5.1).

use crate::ipsec::{Error, Result};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

/// Signature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// RSA PKCS#1 v1.5 over the raw digest
    RsaPkcs1,
}

/// Private signing key
#[derive(Clone)]
pub enum SigningKey {
    /// RSA private key
    Rsa(RsaPrivateKey),
}

/// Public verification key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyingKey {
    /// RSA public key
    Rsa(RsaPublicKey),
}

impl SigningKey {
    /// Generate a fresh RSA key of `bits` size
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, bits)
            .map(SigningKey::Rsa)
            .map_err(|e| Error::CryptoError(format!("RSA key generation failed: {}", e)))
    }

    /// Algorithm of this key
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKey::Rsa(_) => SignatureAlgorithm::RsaPkcs1,
        }
    }

    /// Matching public key
    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            SigningKey::Rsa(key) => VerifyingKey::Rsa(RsaPublicKey::from(key)),
        }
    }

    /// Sign a digest
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        match self {
            SigningKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new_unprefixed(), digest)
                .map_err(|e| Error::CryptoError(format!("RSA signing failed: {}", e))),
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl VerifyingKey {
    /// Verify a signature over `digest`
    ///
    /// Returns `Ok(false)` on a bad signature; errors are reserved for
    /// primitive failures.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool> {
        match self {
            VerifyingKey::Rsa(key) => {
                Ok(key
                    .verify(Pkcs1v15Sign::new_unprefixed(), digest, signature)
                    .is_ok())
            }
        }
    }
}
