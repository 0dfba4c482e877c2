//! IPsec cryptographic operations
//!
//! This module provides the primitives consumed by the IKEv1 engine:
//! - Hash and PRF functions (HMAC, AES-XCBC)
//! - CBC ciphers for ISAKMP message encryption
//! - Diffie-Hellman over the MODP groups
//! - RSA signatures
//! - The [`CryptoProvider`] collaborator trait and its software backend

pub mod cipher;
pub mod dh;
pub mod prf;
pub mod provider;
pub mod signature;

pub use self::cipher::CipherAlgorithm;
pub use dh::{DhGroup, DhKeyPair};
pub use prf::*;
pub use provider::{CryptoProvider, SoftCrypto};
pub use signature::{SignatureAlgorithm, SigningKey, VerifyingKey};
