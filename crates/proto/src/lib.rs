//! ISAKMP/IKEv1 protocol implementations.
//!
//! This crate provides the Phase 2 half of IKEv1: Quick Mode negotiation of
//! IPsec SAs and the Informational exchange, driven by a tokio worker.
//!
//! # Features
//!
//! - `ipsec` (default) - IKEv1 Quick Mode and Informational exchanges
//! - `serde` - Serialize/Deserialize for configuration and policy types
//!
//! # Example
//!
//! ```rust
//! use isakmp_proto::ipsec::ikev1::{Phase2Request, SecurityProtocol};
//! use isakmp_proto::ipsec::ikev1::security::{
//!     AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm,
//! };
//!
//! let request = Phase2Request::new(vec![SecurityProtocol::esp(
//!     EncryptionAlgorithm::Aes128,
//!     AuthAlgorithm::HmacSha1,
//!     EncapsulationMode::Tunnel,
//! )])
//! .with_lifetime(3600);
//! assert!(request.pfs_group.is_none());
//! ```
//!
//! # Security
//!
//! - Cryptographic primitives come from RustCrypto crates
//! - Constant-time comparison of authenticators (`subtle`)
//! - Secure memory handling with `zeroize`
//!
//! # References
//!
//! - [RFC 2408](https://datatracker.ietf.org/doc/html/rfc2408) - ISAKMP
//! - [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409) - IKE

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ipsec")]
pub mod ipsec;
