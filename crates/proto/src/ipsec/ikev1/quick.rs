//! Quick Mode state machine (RFC 2409 Section 5.5)
//!
//! ```text
//! Initiator                         Responder
//! ---------                         ---------
//! HDR*, HASH(1), SA, Ni
//!   [, KE ] [, IDci, IDcr ]   -->
//!                             <--   HDR*, HASH(2), SA, Nr
//!                                     [, KE ] [, IDci, IDcr ]
//! HDR*, HASH(3)               -->
//!                             <--   HDR*, HASH(1), N(CONNECTED)
//!                                     (commit bit only)
//! ```
//!
//! Each handler runs against a [`Phase2Handle`] the engine took out of the
//! IKE SA's Phase 2 database, and leaves the handle in its next state.
//! Handlers never advance an IV on their own: the receive IV moves only
//! once a hash verifies, and the send IV only once a datagram is actually
//! on the wire.

use super::codec::PayloadRequirements;
use super::constants::{ExchangeType, NotifyType, PayloadType};
use super::context::{ExchangeContext, Received};
use super::envelope::Sealed;
use super::hash;
use super::payload::{IsakmpPayload, NotifyPayload, SaPayload};
use super::phase2::{Phase2Flags, Phase2Handle, Phase2State};
use super::policy::{Policy, SaLifetime, SaPair};
use super::proposal::{self, BuildOptions};
use super::sa2::Sa2Item;
use super::security::{Lifetime, SecurityProtocol};
use super::selector::TrafficSelector;
use super::timer::TimerKey;
use super::transform;
use crate::ipsec::crypto::DhGroup;
use crate::ipsec::logging;
use crate::ipsec::{Error, Result};
use tracing::debug;
use zeroize::Zeroizing;

/// IPsec SAs to negotiate in one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase2Request {
    /// Security protocols to offer, one proposal payload each
    pub security: Vec<SecurityProtocol>,
    /// PFS group, `None` without PFS
    pub pfs_group: Option<DhGroup>,
    /// Requested lifetime
    pub lifetime: Lifetime,
    /// Local traffic selector; the local IKE address when unset
    pub local: Option<TrafficSelector>,
    /// Remote traffic selector; the peer IKE address when unset
    pub remote: Option<TrafficSelector>,
}

impl Phase2Request {
    /// Request host-to-host SAs with the given protocols
    pub fn new(security: Vec<SecurityProtocol>) -> Self {
        Phase2Request {
            security,
            pfs_group: None,
            lifetime: Lifetime::Unspecified,
            local: None,
            remote: None,
        }
    }

    /// Request everything a policy asks for
    pub fn from_policy(policy: &Policy) -> Self {
        Phase2Request {
            security: policy.security.clone(),
            pfs_group: policy.pfs_group,
            lifetime: policy.lifetime,
            local: Some(policy.local),
            remote: Some(policy.remote),
        }
    }

    /// Use PFS with `group`
    pub fn with_pfs(mut self, group: DhGroup) -> Self {
        self.pfs_group = Some(group);
        self
    }

    /// Request a finite lifetime
    pub fn with_lifetime(mut self, secs: u32) -> Self {
        self.lifetime = Lifetime::Seconds(secs);
        self
    }

    /// Protect traffic between two selectors
    pub fn with_selectors(mut self, local: TrafficSelector, remote: TrafficSelector) -> Self {
        self.local = Some(local);
        self.remote = Some(remote);
        self
    }
}

/// Dispatch a received Quick Mode message to the handler of the current state
pub fn process(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    datagram: &[u8],
) -> Result<()> {
    match handle.state {
        Phase2State::State2 => respond(ctx, handle, datagram),
        Phase2State::State3 => handle_state3(ctx, handle, datagram),
        Phase2State::State4 => handle_state4(ctx, handle, datagram),
        Phase2State::State5 => handle_state5(ctx, handle, datagram),
        Phase2State::State1 | Phase2State::Complete => Err(Error::UnexpectedMessage),
    }
}

/// State 1: build and send the initiator's first message
///
/// # Errors
///
/// - `InvalidParameter` when the request carries no security protocol
/// - `TooManyProposals` when it carries more than `max_proposals`
/// - Crypto and transport errors other than `SendTimeout`
pub fn initiate(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    request: &Phase2Request,
) -> Result<()> {
    let keys = ctx.sa.keys()?;
    if request.security.is_empty() {
        return Err(Error::InvalidParameter("No security protocol requested".into()));
    }

    let iv = hash::phase2_iv(ctx.crypto, keys, handle.msg_id)?;
    handle.sync_iv(iv);

    for security in &request.security {
        let spi = ctx.policy.allocate_spi(security.protocol);
        handle
            .sa2
            .push(Sa2Item::new(*security, spi, request.lifetime));
    }
    let options = BuildOptions {
        max_proposals: ctx.config.max_proposals,
        omit_null_auth: ctx.config.allow_null_auth_omission,
    };
    let sa = proposal::build(handle.sa2.as_slice(), handle.group, &options)?;

    handle.nonce_i = random_nonce(ctx)?;
    let mut payloads = vec![
        IsakmpPayload::Sa(sa),
        IsakmpPayload::Nonce(handle.nonce_i.to_vec()),
    ];
    if let Some(group) = handle.group {
        let pair = ctx.crypto.dh_generate(group)?;
        payloads.push(IsakmpPayload::Ke(pair.public_key().to_vec()));
        handle.dh_key = Some(pair);
    }

    let (local_host, remote_host) = host_selectors(ctx);
    let local = request.local.unwrap_or(local_host);
    let remote = request.remote.unwrap_or(remote_host);
    handle.ids_sent = local != local_host || remote != remote_host;
    if handle.ids_sent {
        payloads.push(IsakmpPayload::Id(local.to_id_payload()));
        payloads.push(IsakmpPayload::Id(remote.to_id_payload()));
    }
    handle.local_ts = Some(local);
    handle.remote_ts = Some(remote);

    if ctx.config.commit_bit {
        handle.flags.insert(Phase2Flags::COMMIT);
    }

    let msg_id = handle.msg_id;
    let sealed = ctx.seal(
        ExchangeType::Quick,
        msg_id,
        handle.is_commit(),
        payloads,
        &handle.enc_iv,
        |rest| hash::hash1(ctx.crypto, keys, msg_id, rest),
    )?;
    send(ctx, handle, sealed)?;
    schedule_resend(ctx, handle);
    transition(ctx, handle, Phase2State::State3);
    Ok(())
}

/// State 2: authenticate the initiator's offer, select and reply
pub fn respond(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    datagram: &[u8],
) -> Result<()> {
    let keys = ctx.sa.keys()?;
    if handle.dec_iv.is_empty() {
        let iv = hash::phase2_iv(ctx.crypto, keys, handle.msg_id)?;
        handle.sync_iv(iv);
    }

    let requirements = PayloadRequirements::new()
        .require(PayloadType::HASH)
        .require(PayloadType::SA)
        .require(PayloadType::Nonce)
        .allow(PayloadType::KE)
        .allow(PayloadType::ID)
        .allow(PayloadType::N);
    let received = ctx.open(datagram, &handle.dec_iv, &requirements)?;

    let expected = hash::hash1(ctx.crypto, keys, handle.msg_id, received.rest()?)?;
    authenticate(ctx, handle, &expected, &received)?;
    handle.flags.insert(Phase2Flags::REGISTERED);
    if received.header.flags.is_commit() {
        handle.flags.insert(Phase2Flags::COMMIT);
    }

    let nonce_i = received
        .decoded
        .nonce()
        .ok_or(Error::MissingPayload(PayloadType::Nonce.to_u8()))?;
    handle.nonce_i = Zeroizing::new(nonce_i.to_vec());

    // IDci names the initiator's side, which is our remote side
    let ids = received.decoded.ids();
    let (local_ts, remote_ts) = match ids.as_slice() {
        [] => host_selectors(ctx),
        [idci, idcr] => (
            TrafficSelector::from_id_payload(idcr)?,
            TrafficSelector::from_id_payload(idci)?,
        ),
        _ => return Err(Error::InvalidId("IDci without IDcr".into())),
    };
    let echoed_ids: Vec<IsakmpPayload> = ids
        .iter()
        .map(|id| IsakmpPayload::Id((*id).clone()))
        .collect();

    let policy = ctx
        .policy
        .find_policy(&local_ts, &remote_ts)
        .ok_or_else(|| {
            Error::InvalidId(format!("No policy for {:?} <-> {:?}", local_ts, remote_ts))
        })?;
    let ke = received.decoded.ke();
    if ke.is_some() != policy.pfs_group.is_some() {
        debug!(
            offered = ke.is_some(),
            required = policy.pfs_group.is_some(),
            "PFS mismatch with policy"
        );
        return Err(Error::NotNegotiable);
    }
    handle.group = policy.pfs_group;
    handle.lifetime = policy.lifetime;
    handle.local_ts = Some(local_ts);
    handle.remote_ts = Some(remote_ts);

    let sa = received
        .decoded
        .sa()
        .ok_or(Error::MissingPayload(PayloadType::SA.to_u8()))?;
    let selection = proposal::select(sa, &policy.security, policy.lifetime, policy.pfs_group)
        .map_err(|e| {
            ctx.metrics.record_proposal_selection_failed();
            e
        })?;
    let number = selection.number().unwrap_or_default();

    let mut proposals = selection.proposals;
    for (mut item, proposal) in selection.items.into_iter().zip(proposals.iter_mut()) {
        let chosen = proposal.transforms.first().ok_or(Error::ProposalTampered)?;
        let converted =
            transform::convert(proposal.protocol_id, chosen, ctx.config.default_lifetime)?;
        item.security = converted.security;
        item.lifetime = Lifetime::Seconds(converted.lifetime_secs);
        item.remote_spi = proposal.spi_u32().ok_or(Error::InvalidSpi(0))?;
        item.local_spi = ctx.policy.allocate_spi(item.security.protocol);
        proposal.spi = item.local_spi.to_be_bytes().to_vec();
        handle.sa2.push(item);
    }
    let proposal_count = proposals.len();

    handle.nonce_r = random_nonce(ctx)?;
    let mut payloads = vec![
        IsakmpPayload::Sa(SaPayload::new(proposals)),
        IsakmpPayload::Nonce(handle.nonce_r.to_vec()),
    ];
    if let (Some(group), Some(remote)) = (handle.group, ke) {
        let pair = ctx.crypto.dh_generate(group)?;
        payloads.push(IsakmpPayload::Ke(pair.public_key().to_vec()));
        handle.dh_key = Some(pair);
        handle.dh_remote = Some(remote.to_vec());
    }
    handle.ids_sent = !echoed_ids.is_empty();
    payloads.extend(echoed_ids);

    let msg_id = handle.msg_id;
    let sealed = ctx.seal(
        ExchangeType::Quick,
        msg_id,
        handle.is_commit(),
        payloads,
        &handle.enc_iv,
        |rest| hash::hash2(ctx.crypto, keys, msg_id, &handle.nonce_i, rest),
    )?;
    send(ctx, handle, sealed)?;
    schedule_resend(ctx, handle);
    logging::log_proposal_selection(msg_id, number, proposal_count);
    transition(ctx, handle, Phase2State::State4);
    Ok(())
}

/// State 3: verify the responder's choice, derive keys, send HASH(3)
pub fn handle_state3(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    datagram: &[u8],
) -> Result<()> {
    let keys = ctx.sa.keys()?;
    let mut requirements = PayloadRequirements::new()
        .require(PayloadType::HASH)
        .require(PayloadType::SA)
        .require(PayloadType::Nonce)
        .allow(PayloadType::ID)
        .allow(PayloadType::N);
    if handle.group.is_some() {
        requirements = requirements.require(PayloadType::KE);
    }
    let received = ctx.open(datagram, &handle.dec_iv, &requirements)?;

    let expected = hash::hash2(
        ctx.crypto,
        keys,
        handle.msg_id,
        &handle.nonce_i,
        received.rest()?,
    )?;
    authenticate(ctx, handle, &expected, &received)?;

    let sa = received
        .decoded
        .sa()
        .ok_or(Error::MissingPayload(PayloadType::SA.to_u8()))?;
    proposal::verify(sa, handle.sa2.as_slice(), handle.lifetime, handle.group).map_err(|e| {
        ctx.metrics.record_proposal_selection_failed();
        e
    })?;
    for (item, proposal) in handle.sa2.iter_mut().zip(&sa.proposals) {
        let chosen = proposal.transforms.first().ok_or(Error::ProposalTampered)?;
        let converted =
            transform::convert(proposal.protocol_id, chosen, ctx.config.default_lifetime)?;
        item.security = converted.security;
        item.lifetime = Lifetime::Seconds(converted.lifetime_secs);
        item.remote_spi = proposal.spi_u32().ok_or(Error::InvalidSpi(0))?;
    }
    handle.sa2.truncate(sa.proposals.len());

    let nonce_r = received
        .decoded
        .nonce()
        .ok_or(Error::MissingPayload(PayloadType::Nonce.to_u8()))?;
    handle.nonce_r = Zeroizing::new(nonce_r.to_vec());
    if handle.group.is_some() {
        let ke = received
            .decoded
            .ke()
            .ok_or(Error::MissingPayload(PayloadType::KE.to_u8()))?;
        handle.dh_remote = Some(ke.to_vec());
    }

    derive_keymat(ctx, handle)?;
    if !handle.is_commit() {
        install(ctx, handle)?;
    }

    let msg_id = handle.msg_id;
    let sealed = ctx.seal(
        ExchangeType::Quick,
        msg_id,
        handle.is_commit(),
        Vec::new(),
        &handle.enc_iv,
        |_| hash::hash3(ctx.crypto, keys, msg_id, &handle.nonce_i, &handle.nonce_r),
    )?;
    send(ctx, handle, sealed)?;

    if handle.is_commit() {
        schedule_resend(ctx, handle);
        transition(ctx, handle, Phase2State::State5);
    } else {
        transition(ctx, handle, Phase2State::Complete);
    }
    Ok(())
}

/// State 4: verify HASH(3), install, acknowledge when committing
pub fn handle_state4(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    datagram: &[u8],
) -> Result<()> {
    let keys = ctx.sa.keys()?;
    let requirements = PayloadRequirements::new().require(PayloadType::HASH);
    let received = ctx.open(datagram, &handle.dec_iv, &requirements)?;

    let expected = hash::hash3(
        ctx.crypto,
        keys,
        handle.msg_id,
        &handle.nonce_i,
        &handle.nonce_r,
    )?;
    authenticate(ctx, handle, &expected, &received)?;

    derive_keymat(ctx, handle)?;
    install(ctx, handle)?;

    if handle.is_commit() {
        let first = handle
            .sa2
            .first()
            .ok_or_else(|| Error::InvalidState("No SA to confirm".into()))?;
        let notify = NotifyPayload::new(
            first.security.protocol.protocol_id().to_u8(),
            NotifyType::Connected,
            first.remote_spi.to_be_bytes().to_vec(),
        );
        let msg_id = handle.msg_id;
        let sealed = ctx.seal(
            ExchangeType::Quick,
            msg_id,
            true,
            vec![IsakmpPayload::Notify(notify)],
            &handle.enc_iv,
            |rest| hash::hash1(ctx.crypto, keys, msg_id, rest),
        )?;
        send(ctx, handle, sealed)?;
    }

    transition(ctx, handle, Phase2State::Complete);
    Ok(())
}

/// State 5: wait for CONNECTED before installing
pub fn handle_state5(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    datagram: &[u8],
) -> Result<()> {
    let keys = ctx.sa.keys()?;
    let requirements = PayloadRequirements::new()
        .require(PayloadType::HASH)
        .require(PayloadType::N);
    let received = ctx.open(datagram, &handle.dec_iv, &requirements)?;

    let expected = hash::hash1(ctx.crypto, keys, handle.msg_id, received.rest()?)?;
    authenticate(ctx, handle, &expected, &received)?;

    let notify = received
        .decoded
        .notify()
        .ok_or(Error::MissingPayload(PayloadType::N.to_u8()))?;
    if NotifyType::from_u16(notify.notify_type) != Some(NotifyType::Connected) {
        return Err(Error::UnexpectedPayload(PayloadType::N.to_u8()));
    }

    install(ctx, handle)?;
    transition(ctx, handle, Phase2State::Complete);
    Ok(())
}

/// Resend the last message on timer expiry
///
/// # Errors
///
/// `Timeout` once `resend_count` resends went unanswered.
pub fn handle_resend(ctx: &ExchangeContext<'_>, handle: &mut Phase2Handle) -> Result<()> {
    if handle.resend_attempts >= ctx.config.resend_count {
        return Err(Error::Timeout);
    }
    handle.resend_attempts += 1;
    match retransmit(ctx, handle, "timer") {
        Ok(()) | Err(Error::SendTimeout) => {}
        Err(e) => return Err(e),
    }
    schedule_resend(ctx, handle);
    Ok(())
}

/// Resend the last message unchanged
pub fn retransmit(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    reason: &str,
) -> Result<()> {
    flush(ctx, handle)?;
    ctx.metrics.record_retransmission();
    logging::log_retransmission(handle.msg_id, handle.resend_attempts, reason);
    Ok(())
}

/// Put `last_message` on the wire and adopt its IV if not done yet
fn flush(ctx: &ExchangeContext<'_>, handle: &mut Phase2Handle) -> Result<()> {
    let datagram = handle
        .last_message
        .as_deref()
        .ok_or_else(|| Error::InvalidState("No message to send".into()))?;
    ctx.transport.send(ctx.sa.peer_addr, datagram)?;
    logging::log_message_send("quick_mode", handle.msg_id, datagram.len());
    if let Some(iv) = handle.pending_iv.take() {
        handle.sync_iv(iv);
    }
    Ok(())
}

/// Keep `sealed` for retransmission and send it
///
/// A send timeout is not fatal here: the datagram stays queued as the last
/// message and goes out with the next resend.
fn send(ctx: &ExchangeContext<'_>, handle: &mut Phase2Handle, sealed: Sealed) -> Result<()> {
    handle.last_message = Some(sealed.datagram);
    handle.pending_iv = Some(sealed.next_iv);
    handle.messages_sent += 1;
    match flush(ctx, handle) {
        Err(Error::SendTimeout) => {
            debug!(
                msg_id = %format_args!("{:08x}", handle.msg_id),
                "Send timed out, left to resend"
            );
            Ok(())
        }
        other => other,
    }
}

fn schedule_resend(ctx: &ExchangeContext<'_>, handle: &Phase2Handle) {
    ctx.scheduler.schedule(
        TimerKey::resend(ctx.sa.cookies, handle.msg_id),
        ctx.config.resend_delay(handle.resend_attempts),
    );
}

/// Check a received hash and, only then, adopt the message's IV
fn authenticate(
    ctx: &ExchangeContext<'_>,
    handle: &mut Phase2Handle,
    expected: &[u8],
    received: &Received,
) -> Result<()> {
    if let Err(e) = hash::verify(expected, received.hash()?) {
        ctx.metrics.record_authentication_failed();
        return Err(e);
    }
    handle.sync_iv(received.next_iv.clone());
    handle.pending_iv = None;

    ctx.scheduler
        .cancel(&TimerKey::resend(ctx.sa.cookies, handle.msg_id));
    handle.resend_attempts = 0;
    Ok(())
}

fn derive_keymat(ctx: &ExchangeContext<'_>, handle: &mut Phase2Handle) -> Result<()> {
    let keys = ctx.sa.keys()?;
    let shared = match (&handle.dh_key, &handle.dh_remote) {
        (Some(pair), Some(remote)) => Some(ctx.crypto.dh_compute(pair, remote)?),
        (None, None) => None,
        _ => return Err(Error::InvalidState("Incomplete PFS exchange".into())),
    };
    let shared = shared.as_ref().map(|s| s.as_slice());

    for item in handle.sa2.iter_mut() {
        let protocol = item.security.protocol.protocol_id().to_u8();
        let len = item.security.keymat_len();
        item.local_keymat = hash::keymat(
            ctx.crypto,
            keys,
            shared,
            protocol,
            item.local_spi,
            &handle.nonce_i,
            &handle.nonce_r,
            len,
        )?;
        item.remote_keymat = hash::keymat(
            ctx.crypto,
            keys,
            shared,
            protocol,
            item.remote_spi,
            &handle.nonce_i,
            &handle.nonce_r,
            len,
        )?;
    }
    Ok(())
}

fn install(ctx: &ExchangeContext<'_>, handle: &Phase2Handle) -> Result<()> {
    let (local_host, remote_host) = host_selectors(ctx);
    let local_ts = handle.local_ts.unwrap_or(local_host);
    let remote_ts = handle.remote_ts.unwrap_or(remote_host);

    let peer = ctx.sa.peer_ip();
    for (index, item) in handle.sa2.iter().enumerate() {
        let lifetime_secs = item.lifetime.seconds_or_default();
        let installed = ctx.policy.install_pair(SaPair {
            security: item.security,
            peer,
            inbound_spi: item.local_spi,
            outbound_spi: item.remote_spi,
            inbound_keymat: item.local_keymat.clone(),
            outbound_keymat: item.remote_keymat.clone(),
            lifetime: SaLifetime::from_secs(lifetime_secs, ctx.config.soft_lifetime_offset),
            local_ts,
            remote_ts,
        });
        if let Err(e) = installed {
            // A bundle goes in whole or not at all
            let mut removed = 0;
            for done in &handle.sa2.as_slice()[..index] {
                match ctx
                    .policy
                    .remove_pair(done.security.protocol, done.remote_spi, peer)
                {
                    Ok(()) => removed += 1,
                    Err(undo) => debug!(
                        spi = %format_args!("{:08x}", done.remote_spi),
                        error = %undo,
                        "Rollback of SA pair failed"
                    ),
                }
            }
            ctx.metrics.record_sa_pairs_removed(removed);
            return Err(e);
        }
        ctx.metrics.record_sa_pair_installed();
        logging::log_sa_pair_installed(
            item.security.protocol.name(),
            item.local_spi,
            item.remote_spi,
            lifetime_secs,
        );
    }
    Ok(())
}

fn host_selectors(ctx: &ExchangeContext<'_>) -> (TrafficSelector, TrafficSelector) {
    (
        TrafficSelector::host(ctx.sa.local_addr.ip()),
        TrafficSelector::host(ctx.sa.peer_ip()),
    )
}

fn random_nonce(ctx: &ExchangeContext<'_>) -> Result<Zeroizing<Vec<u8>>> {
    let mut nonce = Zeroizing::new(vec![0u8; ctx.config.nonce_len]);
    ctx.crypto.random_bytes(&mut nonce)?;
    Ok(nonce)
}

fn transition(ctx: &ExchangeContext<'_>, handle: &mut Phase2Handle, next: Phase2State) {
    logging::log_quick_mode_transition(
        &ctx.sa.cookies.initiator,
        &ctx.sa.cookies.responder,
        handle.msg_id,
        &handle.state.to_string(),
        &next.to_string(),
    );
    handle.state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::config::EngineConfig;
    use crate::ipsec::crypto::{CipherAlgorithm, HashAlgorithm, PrfAlgorithm, SoftCrypto};
    use crate::ipsec::ikev1::codec::IsakmpCodec;
    use crate::ipsec::ikev1::ike_sa::{IkeSaParams, Phase1Keys};
    use crate::ipsec::ikev1::message::Cookies;
    use crate::ipsec::ikev1::policy::{MemoryPolicyStore, Policy, PolicyStore};
    use crate::ipsec::ikev1::security::{AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm};
    use crate::ipsec::ikev1::timer::ManualScheduler;
    use crate::ipsec::ikev1::transport::MemoryTransport;
    use crate::ipsec::metrics::IkeMetrics;
    use std::net::SocketAddr;

    const MSG_ID: u32 = 0x0102_0304;

    struct Peer {
        crypto: SoftCrypto,
        policy: MemoryPolicyStore,
        codec: IsakmpCodec,
        transport: MemoryTransport,
        scheduler: ManualScheduler,
        metrics: IkeMetrics,
        config: EngineConfig,
        sa: IkeSaParams,
    }

    impl Peer {
        fn new(local: &str, remote: &str, first_spi: u32, config: EngineConfig) -> Self {
            let keys = Phase1Keys {
                hash: HashAlgorithm::Sha1,
                prf: PrfAlgorithm::HmacSha1,
                cipher: CipherAlgorithm::Aes128Cbc,
                skeyid_d: Zeroizing::new(vec![0x11; 20]),
                skeyid_a: Zeroizing::new(vec![0x22; 20]),
                enc_key: Zeroizing::new(vec![0x33; 16]),
                last_iv: vec![0x44; 16],
            };
            let local: SocketAddr = local.parse().unwrap();
            let remote: SocketAddr = remote.parse().unwrap();
            let policy = MemoryPolicyStore::with_first_spi(first_spi);
            policy.add_policy(Policy {
                local: TrafficSelector::host(local.ip()),
                remote: TrafficSelector::host(remote.ip()),
                security: vec![esp()],
                pfs_group: None,
                lifetime: Lifetime::Seconds(3600),
            });
            Peer {
                crypto: SoftCrypto::new(),
                policy,
                codec: IsakmpCodec::default(),
                transport: MemoryTransport::new(),
                scheduler: ManualScheduler::new(),
                metrics: IkeMetrics::new(),
                config,
                sa: IkeSaParams::established(Cookies::new([1; 8], [2; 8]), local, remote, keys)
                    .unwrap(),
            }
        }

        fn ctx(&self) -> ExchangeContext<'_> {
            ExchangeContext {
                crypto: &self.crypto,
                policy: &self.policy,
                codec: &self.codec,
                transport: &self.transport,
                scheduler: &self.scheduler,
                metrics: &self.metrics,
                config: &self.config,
                sa: &self.sa,
            }
        }

        fn take_sent(&self) -> Vec<u8> {
            self.transport.pop().unwrap().1
        }
    }

    fn esp() -> SecurityProtocol {
        SecurityProtocol::esp(
            EncryptionAlgorithm::Aes128,
            AuthAlgorithm::HmacSha1,
            EncapsulationMode::Transport,
        )
    }

    fn pair(config: EngineConfig) -> (Peer, Peer) {
        (
            Peer::new("192.0.2.1:500", "198.51.100.7:500", 0x1000, config.clone()),
            Peer::new("198.51.100.7:500", "192.0.2.1:500", 0x2000, config),
        )
    }

    fn start(initiator: &Peer) -> Phase2Handle {
        let request = Phase2Request::new(vec![esp()]).with_lifetime(3600);
        let mut handle = Phase2Handle::initiator(MSG_ID, None, request.lifetime);
        initiate(&initiator.ctx(), &mut handle, &request).unwrap();
        handle
    }

    #[test]
    fn test_exchange_without_commit() {
        let (a, b) = pair(EngineConfig::default());

        let mut ha = start(&a);
        assert_eq!(ha.state, Phase2State::State3);
        assert!(!ha.ids_sent);
        assert!(a.scheduler.is_pending(&TimerKey::resend(a.sa.cookies, MSG_ID)));

        let mut hb = Phase2Handle::responder(MSG_ID);
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        assert_eq!(hb.state, Phase2State::State4);
        assert!(hb.is_registered());

        process(&a.ctx(), &mut ha, &b.take_sent()).unwrap();
        assert_eq!(ha.state, Phase2State::Complete);
        assert!(!a.scheduler.is_pending(&TimerKey::resend(a.sa.cookies, MSG_ID)));
        assert_eq!(a.policy.pair_count(), 1);

        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        assert_eq!(hb.state, Phase2State::Complete);
        assert!(b.transport.is_empty());

        let ia = &a.policy.installed()[0];
        let ib = &b.policy.installed()[0];
        assert_eq!(ia.inbound_spi, ib.outbound_spi);
        assert_eq!(ia.outbound_spi, ib.inbound_spi);
        assert_eq!(ia.inbound_keymat, ib.outbound_keymat);
        assert_eq!(ia.outbound_keymat, ib.inbound_keymat);
        assert_ne!(ia.inbound_keymat, ia.outbound_keymat);
        assert_eq!(ia.inbound_keymat.len(), esp().keymat_len());
        assert_eq!(ia.lifetime.hard, std::time::Duration::from_secs(3600));
    }

    #[test]
    fn test_exchange_with_commit() {
        let config = EngineConfig::default();
        let mut a = Peer::new("192.0.2.1:500", "198.51.100.7:500", 0x1000, config.clone());
        a.config.commit_bit = true;
        let b = Peer::new("198.51.100.7:500", "192.0.2.1:500", 0x2000, config);

        let mut ha = start(&a);
        let mut hb = Phase2Handle::responder(MSG_ID);
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        assert!(hb.is_commit());

        process(&a.ctx(), &mut ha, &b.take_sent()).unwrap();
        assert_eq!(ha.state, Phase2State::State5);
        assert_eq!(a.policy.pair_count(), 0);

        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        assert_eq!(hb.state, Phase2State::Complete);
        assert_eq!(b.policy.pair_count(), 1);

        process(&a.ctx(), &mut ha, &b.take_sent()).unwrap();
        assert_eq!(ha.state, Phase2State::Complete);
        assert_eq!(a.policy.pair_count(), 1);
    }

    #[test]
    fn test_exchange_with_pfs() {
        let (mut a, mut b) = pair(EngineConfig::default());
        for peer in [&mut a, &mut b] {
            let policy = MemoryPolicyStore::with_first_spi(0x3000);
            policy.add_policy(Policy {
                local: TrafficSelector::host(peer.sa.local_addr.ip()),
                remote: TrafficSelector::host(peer.sa.peer_ip()),
                security: vec![esp()],
                pfs_group: Some(DhGroup::Modp1024),
                lifetime: Lifetime::Unspecified,
            });
            peer.policy = policy;
        }

        let request = Phase2Request::new(vec![esp()]).with_pfs(DhGroup::Modp1024);
        let mut ha = Phase2Handle::initiator(MSG_ID, request.pfs_group, request.lifetime);
        initiate(&a.ctx(), &mut ha, &request).unwrap();

        let mut hb = Phase2Handle::responder(MSG_ID);
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        process(&a.ctx(), &mut ha, &b.take_sent()).unwrap();
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();

        assert_eq!(
            a.policy.installed()[0].inbound_keymat,
            b.policy.installed()[0].outbound_keymat
        );
    }

    #[test]
    fn test_pfs_mismatch_not_negotiable() {
        let (a, b) = pair(EngineConfig::default());
        let request = Phase2Request::new(vec![esp()]).with_pfs(DhGroup::Modp1024);
        let mut ha = Phase2Handle::initiator(MSG_ID, request.pfs_group, request.lifetime);
        initiate(&a.ctx(), &mut ha, &request).unwrap();

        let mut hb = Phase2Handle::responder(MSG_ID);
        assert_eq!(
            process(&b.ctx(), &mut hb, &a.take_sent()),
            Err(Error::NotNegotiable)
        );
    }

    #[test]
    fn test_failed_hash_keeps_iv() {
        let (mut a, b) = pair(EngineConfig::default());
        let mut ha = start(&a);
        let mut hb = Phase2Handle::responder(MSG_ID);
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        let reply = b.take_sent();

        // Decrypts fine but HASH(2) is computed under another SKEYID_a
        a.sa.keys.as_mut().unwrap().skeyid_a = Zeroizing::new(vec![0x99; 20]);

        let dec_iv = ha.dec_iv.clone();
        let enc_iv = ha.enc_iv.clone();
        assert_eq!(process(&a.ctx(), &mut ha, &reply), Err(Error::VerifyFailed));
        assert_eq!(a.metrics.snapshot().authentication_failed, 1);
        assert_eq!(ha.dec_iv, dec_iv);
        assert_eq!(ha.enc_iv, enc_iv);
        assert_eq!(ha.state, Phase2State::State3);
    }

    #[test]
    fn test_selectors_sent_as_ids() {
        let (a, b) = pair(EngineConfig::default());
        b.policy.add_policy(Policy {
            local: TrafficSelector::subnet("10.2.0.0".parse().unwrap(), 16),
            remote: TrafficSelector::subnet("10.1.0.0".parse().unwrap(), 16),
            security: vec![esp()],
            pfs_group: None,
            lifetime: Lifetime::Unspecified,
        });

        let request = Phase2Request::new(vec![esp()]).with_selectors(
            TrafficSelector::subnet("10.1.0.0".parse().unwrap(), 16),
            TrafficSelector::subnet("10.2.0.0".parse().unwrap(), 16),
        );
        let mut ha = Phase2Handle::initiator(MSG_ID, None, request.lifetime);
        initiate(&a.ctx(), &mut ha, &request).unwrap();
        assert!(ha.ids_sent);

        let mut hb = Phase2Handle::responder(MSG_ID);
        process(&b.ctx(), &mut hb, &a.take_sent()).unwrap();
        assert_eq!(
            hb.local_ts,
            Some(TrafficSelector::subnet("10.2.0.0".parse().unwrap(), 16))
        );
        assert!(hb.ids_sent);
        assert_eq!(hb.sa2.first().unwrap().lifetime, Lifetime::Seconds(28800));
    }

    #[test]
    fn test_no_policy_is_invalid_id() {
        let (a, b) = pair(EngineConfig::default());
        let request = Phase2Request::new(vec![esp()]).with_selectors(
            TrafficSelector::subnet("10.9.0.0".parse().unwrap(), 16),
            TrafficSelector::subnet("10.8.0.0".parse().unwrap(), 16),
        );
        let mut ha = Phase2Handle::initiator(MSG_ID, None, request.lifetime);
        initiate(&a.ctx(), &mut ha, &request).unwrap();

        let mut hb = Phase2Handle::responder(MSG_ID);
        assert!(matches!(
            process(&b.ctx(), &mut hb, &a.take_sent()),
            Err(Error::InvalidId(_))
        ));
    }

    #[test]
    fn test_empty_request_rejected() {
        let (a, _) = pair(EngineConfig::default());
        let mut handle = Phase2Handle::initiator(MSG_ID, None, Lifetime::Unspecified);
        assert!(matches!(
            initiate(&a.ctx(), &mut handle, &Phase2Request::new(Vec::new())),
            Err(Error::InvalidParameter(_))
        ));
        assert!(a.transport.is_empty());
    }

    #[test]
    fn test_send_timeout_defers_iv() {
        let (a, _) = pair(EngineConfig::default());
        a.transport.set_blocked(true);

        let request = Phase2Request::new(vec![esp()]);
        let mut handle = Phase2Handle::initiator(MSG_ID, None, request.lifetime);
        initiate(&a.ctx(), &mut handle, &request).unwrap();
        let initial_iv = handle.enc_iv.clone();
        assert!(handle.pending_iv.is_some());
        assert!(a.transport.is_empty());

        a.transport.set_blocked(false);
        handle_resend(&a.ctx(), &mut handle).unwrap();
        assert_eq!(a.transport.len(), 1);
        assert!(handle.pending_iv.is_none());
        assert_ne!(handle.enc_iv, initial_iv);
    }

    #[test]
    fn test_resend_exhaustion() {
        let mut config = EngineConfig::default();
        config.resend_count = 2;
        let (a, _) = pair(config);
        let mut handle = start(&a);
        a.take_sent();

        let key = TimerKey::resend(a.sa.cookies, MSG_ID);
        handle_resend(&a.ctx(), &mut handle).unwrap();
        assert_eq!(a.scheduler.delay(&key), Some(a.config.resend_delay(1)));
        handle_resend(&a.ctx(), &mut handle).unwrap();
        assert_eq!(a.transport.len(), 2);
        assert_eq!(handle_resend(&a.ctx(), &mut handle), Err(Error::Timeout));
        assert_eq!(a.metrics.snapshot().retransmissions, 2);
    }

    #[test]
    fn test_message_in_wrong_state() {
        let (a, _) = pair(EngineConfig::default());
        let mut handle = Phase2Handle::initiator(MSG_ID, None, Lifetime::Unspecified);
        assert_eq!(
            process(&a.ctx(), &mut handle, &[0u8; 28]),
            Err(Error::UnexpectedMessage)
        );
    }

    #[test]
    fn test_request_from_policy() {
        let policy = Policy {
            local: TrafficSelector::subnet("10.1.0.0".parse().unwrap(), 16),
            remote: TrafficSelector::subnet("10.2.0.0".parse().unwrap(), 16),
            security: vec![esp()],
            pfs_group: Some(DhGroup::Modp2048),
            lifetime: Lifetime::Seconds(600),
        };
        let request = Phase2Request::from_policy(&policy);
        assert_eq!(request.security, vec![esp()]);
        assert_eq!(request.pfs_group, Some(DhGroup::Modp2048));
        assert_eq!(request.local, Some(policy.local));
    }
}
