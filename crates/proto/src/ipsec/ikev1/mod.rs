//! IKEv1 Phase 2 (Quick Mode) and Informational exchanges
//!
//! This module negotiates IPsec SAs under an IKE SA that Phase 1 has
//! already established (RFC 2409 section 5.5) and handles the
//! Informational exchange used for notifications and deletes
//! (RFC 2408 section 4.8).
//!
//! # Quick Mode
//!
//! ```text
//! Initiator                              Responder
//! ---------                              ---------
//! HDR*, HASH(1), SA, Ni [, KE] [, IDci, IDcr]  -->
//!                  <--  HDR*, HASH(2), SA, Nr [, KE] [, IDci, IDcr]
//! HDR*, HASH(3)                          -->
//!                  <--  HDR*, HASH(4), N(CONNECTED)   (commit bit only)
//! ```
//!
//! Every message after the ISAKMP header is encrypted with the Phase 1
//! cipher. The Phase 2 IV starts as the hash of the last Phase 1 CBC
//! block and the message ID, then chains across the exchange.
//!
//! # Layout
//!
//! - [`engine`]: the event-driven entry point owning IKE SAs and handles
//! - [`worker`]: tokio task serializing datagrams, timers and requests
//! - [`quick`]: Quick Mode state handlers
//! - [`informational`]: Notify and Delete processing
//! - [`codec`], [`payload`], [`message`]: ISAKMP wire format
//! - [`proposal`], [`transform`], [`security`]: SA negotiation
//! - [`policy`]: policy lookup and the SA database seam
//!
//! # References
//!
//! - [RFC 2407](https://datatracker.ietf.org/doc/html/rfc2407) - IPsec DOI for ISAKMP
//! - [RFC 2408](https://datatracker.ietf.org/doc/html/rfc2408) - ISAKMP
//! - [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409) - IKE

pub mod codec;
pub mod constants;
pub mod context;
pub mod engine;
pub mod envelope;
pub mod hash;
pub mod ike_sa;
pub mod informational;
pub mod message;
pub mod payload;
pub mod phase2;
pub mod policy;
pub mod proposal;
pub mod quick;
pub mod sa2;
pub mod security;
pub mod selector;
pub mod timer;
pub mod transform;
pub mod transport;
pub mod worker;

pub use codec::{IsakmpCodec, PayloadCodec};
pub use constants::{ExchangeType, NotifyType, PayloadType, ProtocolId};
pub use engine::{Outcome, QuickModeEngine};
pub use ike_sa::{IkeSa, IkeSaParams, Phase1Keys};
pub use message::{Cookies, IsakmpHeader};
pub use phase2::{Phase2Handle, Phase2State};
pub use policy::{MemoryPolicyStore, Policy, PolicyStore, SaPair};
pub use quick::Phase2Request;
pub use security::{Lifetime, SecurityProtocol};
pub use selector::TrafficSelector;
pub use timer::{ManualScheduler, Scheduler, TimerEvent, TimerKey};
pub use transport::{MemoryTransport, Transport};
pub use worker::{TokioScheduler, UdpTransport, Worker, WorkerHandle};
