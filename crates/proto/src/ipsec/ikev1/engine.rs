//! Quick Mode / Informational negotiation engine
//!
//! [`QuickModeEngine`] owns the IKE SA table and the collaborators, and is
//! driven one event at a time: a received datagram, a timer expiry or a
//! local initiate call. It must be used from a single task; the async
//! worker in [`super::worker`] provides that serialization.
//!
//! Handles that fail after registration are only marked deleted during the
//! event that failed them. They are removed when the next event starts, or
//! when the owner calls [`QuickModeEngine::drain_deferred`].

use super::codec::{IsakmpCodec, PayloadCodec};
use super::constants::{ExchangeType, PayloadType, ProtocolId};
use super::context::ExchangeContext;
use super::hash;
use super::ike_sa::{IkeSa, IkeSaParams, SaTable};
use super::informational::{self, InfoAction};
use super::message::{Cookies, IsakmpHeader};
use super::phase2::{Phase2Db, Phase2Flags, Phase2Handle, Phase2State};
use super::policy::PolicyStore;
use super::quick::{self, Phase2Request};
use super::timer::{Scheduler, TimerEvent, TimerKey};
use super::transport::Transport;
use crate::ipsec::config::EngineConfig;
use crate::ipsec::crypto::{CryptoProvider, SoftCrypto};
use crate::ipsec::logging;
use crate::ipsec::metrics::IkeMetrics;
use crate::ipsec::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Final result of a Quick Mode exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// SAs installed
    Completed {
        /// IKE SA of the exchange
        cookies: Cookies,
        /// Message ID of the exchange
        msg_id: u32,
        /// Number of SA pairs installed
        sa_count: usize,
    },
    /// Exchange aborted
    Failed {
        /// IKE SA of the exchange
        cookies: Cookies,
        /// Message ID of the exchange
        msg_id: u32,
        /// Reason
        error: Error,
    },
}

impl Outcome {
    /// Message ID of the exchange
    pub fn msg_id(&self) -> u32 {
        match self {
            Outcome::Completed { msg_id, .. } | Outcome::Failed { msg_id, .. } => *msg_id,
        }
    }

    /// IKE SA of the exchange
    pub fn cookies(&self) -> Cookies {
        match self {
            Outcome::Completed { cookies, .. } | Outcome::Failed { cookies, .. } => *cookies,
        }
    }
}

struct Services {
    crypto: Arc<dyn CryptoProvider>,
    policy: Arc<dyn PolicyStore>,
    codec: Arc<dyn PayloadCodec>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    metrics: IkeMetrics,
    config: EngineConfig,
}

impl Services {
    fn context<'a>(&'a self, sa: &'a IkeSaParams) -> ExchangeContext<'a> {
        ExchangeContext {
            crypto: self.crypto.as_ref(),
            policy: self.policy.as_ref(),
            codec: self.codec.as_ref(),
            transport: self.transport.as_ref(),
            scheduler: self.scheduler.as_ref(),
            metrics: &self.metrics,
            config: &self.config,
            sa,
        }
    }
}

#[derive(Default)]
struct Ledger {
    deferred: VecDeque<(Cookies, u32)>,
    outcomes: Vec<Outcome>,
}

impl Ledger {
    /// Put a handle back after its handler ran, applying failure semantics
    fn settle(
        &mut self,
        ctx: &ExchangeContext<'_>,
        db: &mut Phase2Db,
        mut handle: Phase2Handle,
        result: Result<()>,
    ) -> Result<()> {
        let cookies = ctx.sa.cookies;
        let msg_id = handle.msg_id;

        let err = match result {
            Ok(()) => {
                if handle.state == Phase2State::Complete {
                    ctx.scheduler.cancel(&TimerKey::resend(cookies, msg_id));
                    ctx.metrics.record_quick_mode_completed();
                    logging::log_quick_mode_complete(&ctx.peer(), msg_id, handle.sa2.len());
                    self.outcomes.push(Outcome::Completed {
                        cookies,
                        msg_id,
                        sa_count: handle.sa2.len(),
                    });
                }
                db.insert(handle);
                return Ok(());
            }
            Err(e) => e,
        };

        if err.is_retryable() {
            debug!(msg_id = %format_args!("{:08x}", msg_id), error = %err, "Retryable failure");
            if handle.is_registered() {
                db.insert(handle);
            } else {
                ctx.metrics.record_phase2_released();
            }
            return Err(err);
        }

        ctx.metrics.record_quick_mode_failed();
        logging::log_quick_mode_failed(&ctx.peer(), msg_id, &err.to_string());
        notify_peer(ctx, &err);
        ctx.scheduler.cancel(&TimerKey::resend(cookies, msg_id));
        ctx.scheduler.cancel(&TimerKey::phase2_timeout(cookies, msg_id));
        self.outcomes.push(Outcome::Failed {
            cookies,
            msg_id,
            error: err.clone(),
        });

        if handle.is_registered() {
            handle.flags.insert(Phase2Flags::DELETED);
            db.insert(handle);
            self.deferred.push_back((cookies, msg_id));
        } else {
            // Never stored, so nothing else refers to it
            ctx.metrics.record_phase2_released();
        }
        Err(err)
    }
}

/// Send an error notification, best effort
fn notify_peer(ctx: &ExchangeContext<'_>, err: &Error) {
    if !err.is_notifiable() {
        return;
    }
    if let Err(e) = informational::send_error(ctx, err) {
        debug!(error = %e, "Error notification not sent");
    }
}

/// Quick Mode and Informational engine for a set of IKE SAs
pub struct QuickModeEngine {
    services: Services,
    sas: SaTable,
    ledger: Ledger,
}

impl QuickModeEngine {
    /// Create an engine with the software crypto provider and default codec
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        policy: Arc<dyn PolicyStore>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = Arc::new(IsakmpCodec::new(config.decode_limits()));
        Ok(QuickModeEngine {
            services: Services {
                crypto: Arc::new(SoftCrypto::new()),
                policy,
                codec,
                transport,
                scheduler,
                metrics: IkeMetrics::new(),
                config,
            },
            sas: SaTable::new(),
            ledger: Ledger::default(),
        })
    }

    /// Use another crypto provider
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.services.crypto = crypto;
        self
    }

    /// Use another payload codec
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.services.codec = codec;
        self
    }

    /// Share a metrics sink
    pub fn with_metrics(mut self, metrics: IkeMetrics) -> Self {
        self.services.metrics = metrics;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Engine metrics
    pub fn metrics(&self) -> &IkeMetrics {
        &self.services.metrics
    }

    /// Register an IKE SA produced by Phase 1
    pub fn add_sa(&mut self, params: IkeSaParams) {
        let cookies = params.cookies;
        if let Some(old) = self.sas.insert(IkeSa::new(params)) {
            self.release_handles(&old);
            debug!(icookie = %hex::encode(cookies.initiator), "IKE SA replaced");
        }
    }

    /// Look up an IKE SA
    pub fn sa(&self, cookies: &Cookies) -> Option<&IkeSa> {
        self.sas.get(cookies)
    }

    /// Number of IKE SAs
    pub fn sa_count(&self) -> usize {
        self.sas.len()
    }

    /// Remove an IKE SA with all its Phase 2 exchanges
    pub fn remove_sa(&mut self, cookies: &Cookies) -> Option<IkeSa> {
        let sa = self.sas.remove(cookies)?;
        self.release_handles(&sa);
        debug!(
            icookie = %hex::encode(cookies.initiator),
            rcookie = %hex::encode(cookies.responder),
            "IKE SA removed"
        );
        Some(sa)
    }

    fn release_handles(&self, sa: &IkeSa) {
        for msg_id in sa.phase2.msg_ids() {
            let cookies = sa.params.cookies;
            self.services
                .scheduler
                .cancel(&TimerKey::resend(cookies, msg_id));
            self.services
                .scheduler
                .cancel(&TimerKey::phase2_timeout(cookies, msg_id));
            self.services.metrics.record_phase2_released();
        }
    }

    /// Outcomes of exchanges finished since the last call
    pub fn take_outcomes(&mut self) -> Vec<Outcome> {
        std::mem::take(&mut self.ledger.outcomes)
    }

    /// Remove handles marked deleted
    pub fn drain_deferred(&mut self) {
        while let Some((cookies, msg_id)) = self.ledger.deferred.pop_front() {
            let Some(sa) = self.sas.get_mut(&cookies) else {
                continue;
            };
            if sa.phase2.get(msg_id).map_or(false, Phase2Handle::is_deleted) {
                sa.phase2.remove(msg_id);
                self.services.metrics.record_phase2_released();
            }
        }
    }

    /// Start a Quick Mode exchange on an established IKE SA
    ///
    /// Returns the message ID naming the exchange. Completion is reported
    /// through [`take_outcomes`](Self::take_outcomes).
    ///
    /// # Errors
    ///
    /// - `SaNotFound` for unknown cookies
    /// - `InvalidState` when Phase 1 has not completed
    /// - `InvalidParameter` / `TooManyProposals` for a bad request
    pub fn initiate_quick_mode(
        &mut self,
        cookies: &Cookies,
        request: &Phase2Request,
    ) -> Result<u32> {
        self.drain_deferred();
        if self.services.config.initial_contact {
            if let Err(e) = self.check_initial_contact(cookies) {
                debug!(error = %e, "INITIAL-CONTACT not sent");
            }
        }

        let services = &self.services;
        let sa = self
            .sas
            .get_mut(cookies)
            .ok_or_else(|| Error::SaNotFound(hex::encode(cookies.to_bytes())))?;
        if !sa.params.is_established() {
            return Err(Error::InvalidState("IKE SA not established".into()));
        }

        let msg_id = sa.phase2.new_msg_id(services.crypto.as_ref())?;
        let mut handle = Phase2Handle::initiator(msg_id, request.pfs_group, request.lifetime);
        let ctx = services.context(&sa.params);
        ctx.metrics.record_quick_mode_started();
        ctx.metrics.record_phase2_created();
        logging::log_quick_mode_started(&ctx.peer(), msg_id, handle.role());

        let result = quick::initiate(&ctx, &mut handle, request);
        if result.is_ok() {
            ctx.scheduler.schedule(
                TimerKey::phase2_timeout(*cookies, msg_id),
                ctx.config.phase2_timeout,
            );
        }
        self.ledger
            .settle(&ctx, &mut sa.phase2, handle, result)
            .map(|()| msg_id)
    }

    /// Process a received datagram
    ///
    /// # Errors
    ///
    /// The error that aborted processing. Failed exchanges are also
    /// reported through [`take_outcomes`](Self::take_outcomes).
    pub fn handle_incoming(&mut self, datagram: &[u8]) -> Result<()> {
        self.drain_deferred();
        let header = IsakmpHeader::from_bytes(datagram)?;
        match header.exchange_type {
            ExchangeType::Quick => self.handle_quick_mode(&header, datagram),
            ExchangeType::Informational => self.handle_informational(&header, datagram),
            other => Err(Error::UnsupportedExchangeType(other as u8)),
        }
    }

    fn handle_quick_mode(&mut self, header: &IsakmpHeader, datagram: &[u8]) -> Result<()> {
        logging::log_message_recv("quick_mode", header.message_id, datagram.len());
        let services = &self.services;
        let sa = self
            .sas
            .get_mut(&header.cookies)
            .ok_or_else(|| Error::SaNotFound(hex::encode(header.cookies.to_bytes())))?;
        let ctx = services.context(&sa.params);

        if let Err(e) = check_quick_header(&sa.params, header) {
            notify_peer(&ctx, &e);
            return Err(e);
        }

        let msg_id = header.message_id;
        let digest = hash::message_digest(ctx.crypto, datagram)?;

        let mut handle = match sa.phase2.get_mut(msg_id) {
            Some(existing) => {
                if existing.is_deleted() {
                    return Err(Error::UnexpectedMessage);
                }
                if existing.last_msg_hash.as_deref() == Some(digest.as_slice()) {
                    // Our reply was lost; the peer repeated its message
                    return match quick::retransmit(&ctx, existing, "duplicate") {
                        Err(Error::SendTimeout) => Ok(()),
                        other => other,
                    };
                }
                if existing.state == Phase2State::Complete {
                    return Err(Error::UnexpectedMessage);
                }
                sa.phase2
                    .take(msg_id)
                    .ok_or_else(|| Error::Internal("Phase 2 handle vanished".into()))?
            }
            None => {
                let handle = Phase2Handle::responder(msg_id);
                ctx.metrics.record_quick_mode_started();
                ctx.metrics.record_phase2_created();
                logging::log_quick_mode_started(&ctx.peer(), msg_id, handle.role());
                handle
            }
        };

        let fresh = !handle.is_registered();
        let sent_before = handle.messages_sent;
        let result = quick::process(&ctx, &mut handle, datagram);
        if result.is_ok() {
            // Only a message that got a reply is answered again on repeat
            if handle.messages_sent != sent_before {
                handle.last_msg_hash = Some(digest);
            }
            if fresh {
                ctx.scheduler.schedule(
                    TimerKey::phase2_timeout(header.cookies, msg_id),
                    ctx.config.phase2_timeout,
                );
            }
        }
        self.ledger.settle(&ctx, &mut sa.phase2, handle, result)
    }

    fn handle_informational(&mut self, header: &IsakmpHeader, datagram: &[u8]) -> Result<()> {
        let cookies = header.cookies;
        let actions = {
            let services = &self.services;
            let sa = self
                .sas
                .get(&cookies)
                .ok_or_else(|| Error::SaNotFound(hex::encode(cookies.to_bytes())))?;
            let ctx = services.context(&sa.params);
            informational::process(&ctx, datagram).map_err(|e| {
                logging::log_error("informational", &e.to_string());
                e
            })?
        };

        for action in actions {
            match action {
                InfoAction::DeleteIkeSa(target) => {
                    if self.sas.expire(&target) {
                        self.remove_sa(&target);
                    }
                }
                InfoAction::InitialContact { peer, ipsec_sas } => {
                    let stale = self.sas.with_peer(peer, Some(&cookies));
                    for target in &stale {
                        self.sas.expire(target);
                        self.remove_sa(target);
                    }
                    logging::log_initial_contact(&peer.to_string(), stale.len(), ipsec_sas);
                }
            }
        }
        Ok(())
    }

    /// Process an expired timer
    pub fn handle_timer(&mut self, key: TimerKey) -> Result<()> {
        self.drain_deferred();
        let services = &self.services;
        let Some(sa) = self.sas.get_mut(&key.cookies) else {
            return Ok(());
        };
        let Some(mut handle) = sa.phase2.take(key.msg_id) else {
            return Ok(());
        };
        let ctx = services.context(&sa.params);

        if handle.is_deleted() {
            sa.phase2.insert(handle);
            return Ok(());
        }

        match key.event {
            TimerEvent::Resend => {
                if handle.state == Phase2State::Complete {
                    sa.phase2.insert(handle);
                    return Ok(());
                }
                let result = quick::handle_resend(&ctx, &mut handle);
                self.ledger.settle(&ctx, &mut sa.phase2, handle, result)
            }
            TimerEvent::Phase2Timeout => {
                if handle.state == Phase2State::Complete {
                    // Kept only to answer retransmissions
                    ctx.scheduler.cancel(&TimerKey::resend(key.cookies, key.msg_id));
                    ctx.metrics.record_phase2_released();
                    return Ok(());
                }
                warn!(
                    peer = %ctx.sa.peer_addr,
                    msg_id = %format_args!("{:08x}", key.msg_id),
                    state = %handle.state,
                    "Quick Mode timed out"
                );
                self.ledger
                    .settle(&ctx, &mut sa.phase2, handle, Err(Error::Timeout))
            }
        }
    }

    /// Send INITIAL-CONTACT on `cookies` unless SAs with the peer exist
    ///
    /// Returns whether the notification was sent.
    pub fn check_initial_contact(&mut self, cookies: &Cookies) -> Result<bool> {
        let services = &self.services;
        let sa = self
            .sas
            .get_mut(cookies)
            .ok_or_else(|| Error::SaNotFound(hex::encode(cookies.to_bytes())))?;
        let sent = {
            let ctx = services.context(&sa.params);
            informational::check_initial_contact(&ctx)?
        };
        if sent {
            sa.params.initial_contact_sent = true;
        }
        Ok(sent)
    }

    /// Ask the peer of `cookies` to delete SAs
    pub fn send_delete(
        &self,
        cookies: &Cookies,
        protocol: ProtocolId,
        spis: Vec<Vec<u8>>,
    ) -> Result<()> {
        let sa = self
            .sas
            .get(cookies)
            .ok_or_else(|| Error::SaNotFound(hex::encode(cookies.to_bytes())))?;
        informational::send_delete(&self.services.context(&sa.params), protocol, spis)
    }
}

/// Header checks every Quick Mode message must pass before dispatch
fn check_quick_header(sa: &IkeSaParams, header: &IsakmpHeader) -> Result<()> {
    if !sa.is_established() {
        return Err(Error::InvalidState("IKE SA not established".into()));
    }
    if header.message_id == 0 {
        return Err(Error::InvalidMsgId(0));
    }
    if !header.flags.is_encrypted() || header.flags.is_auth_only() {
        return Err(Error::InvalidFlags(header.flags.value()));
    }
    if !header.cookies.has_responder() {
        return Err(Error::InvalidCookie);
    }
    if header.next_payload != PayloadType::HASH {
        return Err(Error::MissingPayload(PayloadType::HASH.to_u8()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::crypto::{CipherAlgorithm, HashAlgorithm, PrfAlgorithm};
    use crate::ipsec::ikev1::constants::IsakmpFlags;
    use crate::ipsec::ikev1::ike_sa::Phase1Keys;
    use crate::ipsec::ikev1::policy::MemoryPolicyStore;
    use crate::ipsec::ikev1::security::{
        AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm, SecurityProtocol,
    };
    use crate::ipsec::ikev1::timer::ManualScheduler;
    use crate::ipsec::ikev1::transport::MemoryTransport;
    use zeroize::Zeroizing;

    fn cookies() -> Cookies {
        Cookies::new([1; 8], [2; 8])
    }

    fn params() -> IkeSaParams {
        let keys = Phase1Keys {
            hash: HashAlgorithm::Sha1,
            prf: PrfAlgorithm::HmacSha1,
            cipher: CipherAlgorithm::Aes128Cbc,
            skeyid_d: Zeroizing::new(vec![1; 20]),
            skeyid_a: Zeroizing::new(vec![2; 20]),
            enc_key: Zeroizing::new(vec![3; 16]),
            last_iv: vec![4; 16],
        };
        IkeSaParams::established(
            cookies(),
            "192.0.2.1:500".parse().unwrap(),
            "198.51.100.7:500".parse().unwrap(),
            keys,
        )
        .unwrap()
    }

    fn engine() -> (QuickModeEngine, Arc<MemoryTransport>, Arc<ManualScheduler>) {
        let transport = Arc::new(MemoryTransport::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let config = EngineConfig::builder().with_initial_contact(false).build().unwrap();
        let mut engine = QuickModeEngine::new(
            config,
            Arc::new(MemoryPolicyStore::new()),
            transport.clone(),
            scheduler.clone(),
        )
        .unwrap();
        engine.add_sa(params());
        (engine, transport, scheduler)
    }

    fn esp() -> SecurityProtocol {
        SecurityProtocol::esp(
            EncryptionAlgorithm::Aes128,
            AuthAlgorithm::HmacSha1,
            EncapsulationMode::Transport,
        )
    }

    fn header(flags: u8, msg_id: u32, next: PayloadType, cookies: Cookies) -> IsakmpHeader {
        IsakmpHeader::new(cookies, next, ExchangeType::Quick, IsakmpFlags::new(flags), msg_id)
    }

    #[test]
    fn test_header_checks() {
        let sa = params();
        let ok = header(IsakmpFlags::ENCRYPTION, 7, PayloadType::HASH, cookies());
        assert!(check_quick_header(&sa, &ok).is_ok());

        assert_eq!(
            check_quick_header(
                &sa,
                &header(IsakmpFlags::ENCRYPTION, 0, PayloadType::HASH, cookies()),
            ),
            Err(Error::InvalidMsgId(0))
        );
        assert_eq!(
            check_quick_header(&sa, &header(0, 7, PayloadType::HASH, cookies())),
            Err(Error::InvalidFlags(0))
        );
        assert!(matches!(
            check_quick_header(
                &sa,
                &header(
                    IsakmpFlags::ENCRYPTION | IsakmpFlags::AUTH_ONLY,
                    7,
                    PayloadType::HASH,
                    cookies()
                )
            ),
            Err(Error::InvalidFlags(_))
        ));
        let no_responder = Cookies::new([1; 8], [0; 8]);
        assert_eq!(
            check_quick_header(
                &sa,
                &header(IsakmpFlags::ENCRYPTION, 7, PayloadType::HASH, no_responder),
            ),
            Err(Error::InvalidCookie)
        );
        assert_eq!(
            check_quick_header(
                &sa,
                &header(IsakmpFlags::ENCRYPTION, 7, PayloadType::SA, cookies()),
            ),
            Err(Error::MissingPayload(PayloadType::HASH.to_u8()))
        );

        let mut pending = params();
        pending.keys = None;
        assert!(matches!(
            check_quick_header(&pending, &ok),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_initiate_registers_handle() {
        let (mut engine, transport, scheduler) = engine();
        let msg_id = engine
            .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
            .unwrap();

        let handle = engine.sa(&cookies()).unwrap().phase2.get(msg_id).unwrap();
        assert_eq!(handle.state, Phase2State::State3);
        assert!(handle.is_registered());
        assert_eq!(transport.len(), 1);
        assert!(scheduler.is_pending(&TimerKey::phase2_timeout(cookies(), msg_id)));
        assert_eq!(engine.metrics().snapshot().phase2_active, 1);
    }

    #[test]
    fn test_initiate_unknown_sa() {
        let (mut engine, _, _) = engine();
        let other = Cookies::new([9; 8], [9; 8]);
        assert!(matches!(
            engine.initiate_quick_mode(&other, &Phase2Request::new(vec![esp()])),
            Err(Error::SaNotFound(_))
        ));
    }

    #[test]
    fn test_timeout_fails_exchange() {
        let (mut engine, _, scheduler) = engine();
        let msg_id = engine
            .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
            .unwrap();

        let key = scheduler
            .fire(&TimerKey::phase2_timeout(cookies(), msg_id))
            .unwrap();
        assert_eq!(engine.handle_timer(key), Err(Error::Timeout));
        assert!(!scheduler.is_pending(&TimerKey::resend(cookies(), msg_id)));

        let outcomes = engine.take_outcomes();
        assert_eq!(
            outcomes,
            vec![Outcome::Failed {
                cookies: cookies(),
                msg_id,
                error: Error::Timeout
            }]
        );

        // Marked deleted now, removed once the queue drains
        assert!(engine.sa(&cookies()).unwrap().phase2.get(msg_id).unwrap().is_deleted());
        engine.drain_deferred();
        assert!(engine.sa(&cookies()).unwrap().phase2.is_empty());
        assert_eq!(engine.metrics().snapshot().phase2_active, 0);
    }

    #[test]
    fn test_unknown_sa_datagram() {
        let (mut engine, _, _) = engine();
        let unknown = Cookies::new([5; 8], [6; 8]);
        let mut datagram = header(IsakmpFlags::ENCRYPTION, 7, PayloadType::HASH, unknown)
            .to_bytes()
            .to_vec();
        datagram[24..28].copy_from_slice(&28u32.to_be_bytes());
        assert!(matches!(
            engine.handle_incoming(&datagram),
            Err(Error::SaNotFound(_))
        ));
    }

    #[test]
    fn test_remove_sa_cancels_timers() {
        let (mut engine, _, scheduler) = engine();
        let msg_id = engine
            .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
            .unwrap();
        assert!(engine.remove_sa(&cookies()).is_some());
        assert!(!scheduler.is_pending(&TimerKey::resend(cookies(), msg_id)));
        assert!(!scheduler.is_pending(&TimerKey::phase2_timeout(cookies(), msg_id)));
        assert_eq!(engine.sa_count(), 0);
    }
}
