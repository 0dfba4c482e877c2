//! IKEv1 Phase 2 negotiation for IPsec
//!
//! This module implements the part of IKEv1 that runs after Phase 1: Quick
//! Mode negotiation of IPsec SAs and the Informational exchange.
//!
//! - **Quick Mode** - RFC 2409 section 5.5, with optional PFS and the
//!   commit bit
//! - **Informational** - RFC 2408 section 4.8: Notify and Delete, including
//!   INITIAL-CONTACT
//! - **IPsec DOI** - RFC 2407 attributes, identification types and
//!   notify messages
//!
//! # Architecture
//!
//! ```text
//! UDP 500 ──> Worker (one tokio task)
//!               ├── Datagram ──> QuickModeEngine::handle_incoming
//!               ├── Timer    ──> QuickModeEngine::handle_timer
//!               └── Initiate ──> QuickModeEngine::initiate_quick_mode
//!                                   │
//!                                   ├── PolicyStore (policy lookup, SPI, install)
//!                                   ├── CryptoProvider (PRF, DH, CBC)
//!                                   └── Transport / Scheduler
//! ```
//!
//! Phase 1 is out of scope: established IKE SAs are handed to the engine
//! together with their keying material.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use isakmp_proto::ipsec::config::EngineConfig;
//! use isakmp_proto::ipsec::ikev1::{worker, MemoryPolicyStore, Phase2Request, Policy};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = Arc::new(MemoryPolicyStore::new());
//!     let (handle, addr) =
//!         worker::bind(EngineConfig::default(), policy.clone(), "0.0.0.0:500".parse()?).await?;
//!     println!("IKE listening on {}", addr);
//!
//!     // After Phase 1:
//!     // handle.add_sa(params)?;
//!     // let outcome = handle
//!     //     .initiate_and_wait(cookies, Phase2Request::from_policy(&policy))
//!     //     .await?;
//!     # let _ = (handle, Phase2Request::new(vec![]), None::<Policy>);
//!     Ok(())
//! }
//! ```
//!
//! # References
//!
//! - [RFC 2407](https://datatracker.ietf.org/doc/html/rfc2407) - IPsec DOI
//! - [RFC 2408](https://datatracker.ietf.org/doc/html/rfc2408) - ISAKMP
//! - [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409) - IKE
//!
//! # Security
//!
//! - No unsafe code
//! - Hash payloads compared in constant time
//! - Keying material zeroized on drop

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod ikev1;
pub mod logging;
pub mod metrics;

pub use config::EngineConfig;
pub use error::{Error, ErrorClass, Result};
pub use ikev1::{QuickModeEngine, WorkerHandle};
