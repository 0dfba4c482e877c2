//! Informational exchange (RFC 2408 Section 4.8, RFC 2409 Section 5.7)
//!
//! Carries error notifications, Delete payloads and INITIAL-CONTACT. Once
//! the IKE SA has keying material every Informational message is protected
//! and authenticated with HASH(1) under its own message ID:
//!
//! ```text
//! HDR*, HASH(1), N/D
//! ```
//!
//! Before that, only bare notifications can be sent or accepted.
//!
//! Processing never mutates the IKE SA table directly. Effects on other IKE
//! SAs are returned as [`InfoAction`]s for the engine to apply once the
//! current dispatch has finished.

use super::codec::PayloadRequirements;
use super::constants::{
    ExchangeType, IsakmpFlags, NotifyType, PayloadType, ProtocolId, IPSEC_SPI_SIZE,
    ISAKMP_SPI_SIZE,
};
use super::context::ExchangeContext;
use super::envelope;
use super::hash;
use super::message::{Cookies, IsakmpHeader};
use super::payload::{DeletePayload, IsakmpPayload, NotifyPayload};
use super::security::IpsecProtocol;
use crate::ipsec::logging;
use crate::ipsec::{Error, Result};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Effect of an Informational message on IKE SAs other than its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoAction {
    /// Expire and remove the IKE SA with these cookies
    DeleteIkeSa(Cookies),
    /// Peer restarted: drop every other IKE SA with it
    InitialContact {
        /// Peer address
        peer: IpAddr,
        /// IPsec SA pairs already purged
        ipsec_sas: usize,
    },
}

/// Notification type reported to the peer for an internal error
///
/// Returns `None` for errors that are never reported.
pub fn notify_type_for(err: &Error) -> Option<NotifyType> {
    let notify = match err {
        Error::InvalidPayload(_)
        | Error::DuplicatePayload(_)
        | Error::TooManyTransforms
        | Error::TooManyProposals
        | Error::ProposalTampered => NotifyType::PayloadMalformed,
        Error::InvalidCookie | Error::SaNotFound(_) => NotifyType::InvalidCookie,
        Error::UnsupportedVersion(_) => NotifyType::InvalidMajorVersion,
        Error::UnsupportedExchangeType(_) => NotifyType::InvalidExchangeType,
        Error::InvalidFlags(_) => NotifyType::InvalidFlags,
        Error::InvalidMsgId(_) => NotifyType::InvalidMessageId,
        Error::InvalidProtocol(_) => NotifyType::InvalidProtocolId,
        Error::InvalidSpi(_) => NotifyType::InvalidSpi,
        Error::InvalidTransform(_) => NotifyType::InvalidTransformId,
        Error::UnsupportedAttribute(_) | Error::AttributeTooLong(_) => {
            NotifyType::AttributesNotSupported
        }
        Error::NotNegotiable | Error::TransformMismatch | Error::InvalidKeyLength { .. } => {
            NotifyType::NoProposalChosen
        }
        Error::UnsupportedDoi(_) => NotifyType::DoiNotSupported,
        Error::UnsupportedSituation(_) => NotifyType::SituationNotSupported,
        Error::MissingPayload(_) | Error::UnexpectedPayload(_) => NotifyType::InvalidPayloadType,
        Error::VerifyFailed | Error::AuthenticationFailed(_) => NotifyType::AuthenticationFailed,
        Error::InvalidId(_) => NotifyType::InvalidIdInformation,
        _ => return None,
    };
    Some(notify)
}

fn send_protected(ctx: &ExchangeContext<'_>, payload: IsakmpPayload) -> Result<()> {
    let keys = ctx.sa.keys()?;
    let msg_id = loop {
        let mut buf = [0u8; 4];
        ctx.crypto.random_bytes(&mut buf)?;
        let id = u32::from_be_bytes(buf);
        if id != 0 {
            break id;
        }
    };
    let iv = hash::phase2_iv(ctx.crypto, keys, msg_id)?;

    let sealed = ctx.seal(
        ExchangeType::Informational,
        msg_id,
        false,
        vec![payload],
        &iv,
        |rest| hash::hash1(ctx.crypto, keys, msg_id, rest),
    )?;
    ctx.transport.send(ctx.sa.peer_addr, &sealed.datagram)?;
    logging::log_message_send("informational", msg_id, sealed.datagram.len());
    Ok(())
}

fn send_cleartext(ctx: &ExchangeContext<'_>, notify: NotifyPayload) -> Result<()> {
    let (first, chain) = ctx.codec.encode(&[IsakmpPayload::Notify(notify)])?;
    let header = IsakmpHeader::new(
        ctx.sa.cookies,
        first,
        ExchangeType::Informational,
        IsakmpFlags::new(0),
        0,
    );
    let datagram = envelope::cleartext(header, &chain)?;
    ctx.transport.send(ctx.sa.peer_addr, &datagram)?;
    logging::log_message_send("informational", 0, datagram.len());
    Ok(())
}

/// Send a notification, protected when the IKE SA has keying material
pub fn send_notify(ctx: &ExchangeContext<'_>, notify: NotifyPayload) -> Result<()> {
    let notify_type = notify.notify_type;
    let encrypted = ctx.sa.keys.is_some();
    if encrypted {
        send_protected(ctx, IsakmpPayload::Notify(notify))?;
    } else {
        send_cleartext(ctx, notify)?;
    }
    ctx.metrics.record_notify_sent();
    logging::log_notify_sent(&ctx.peer(), notify_type, encrypted);
    Ok(())
}

/// Report `err` to the peer
///
/// Errors without a notification type are not sent and yield
/// `Error::Internal`.
pub fn send_error(ctx: &ExchangeContext<'_>, err: &Error) -> Result<()> {
    let notify_type = notify_type_for(err)
        .ok_or_else(|| Error::Internal(format!("No notification for: {}", err)))?;
    debug!(error = %err, notify_type = notify_type.to_u16(), "Sending error notification");
    send_notify(
        ctx,
        NotifyPayload::new(ProtocolId::Isakmp.to_u8(), notify_type, Vec::new()),
    )
}

/// Ask the peer to delete SAs
///
/// For ISAKMP the SPI is the cookie pair of the IKE SA; for AH and ESP
/// each SPI is four octets.
pub fn send_delete(
    ctx: &ExchangeContext<'_>,
    protocol: ProtocolId,
    spis: Vec<Vec<u8>>,
) -> Result<()> {
    let spi_size = match protocol {
        ProtocolId::Isakmp => ISAKMP_SPI_SIZE,
        ProtocolId::Ah | ProtocolId::Esp => IPSEC_SPI_SIZE,
    };
    if spis.is_empty() || spis.iter().any(|spi| spi.len() != spi_size) {
        return Err(Error::InvalidParameter(format!(
            "Delete needs {}-byte SPIs",
            spi_size
        )));
    }
    if spis.len() > ctx.config.max_delete_spis {
        return Err(Error::InvalidParameter(format!(
            "At most {} SPIs per Delete",
            ctx.config.max_delete_spis
        )));
    }
    send_protected(
        ctx,
        IsakmpPayload::Delete(DeletePayload::new(
            protocol.to_u8(),
            spi_size as u8,
            spis,
        )),
    )
}

/// Send INITIAL-CONTACT for the IKE SA
pub fn send_initial_contact(ctx: &ExchangeContext<'_>) -> Result<()> {
    send_notify(
        ctx,
        NotifyPayload::new(
            ProtocolId::Isakmp.to_u8(),
            NotifyType::InitialContact,
            ctx.sa.cookies.to_bytes().to_vec(),
        ),
    )
}

/// Send INITIAL-CONTACT if no IPsec SA exists with the peer yet
///
/// Returns whether the notification was sent.
pub fn check_initial_contact(ctx: &ExchangeContext<'_>) -> Result<bool> {
    if !ctx.config.initial_contact || ctx.sa.initial_contact_sent {
        return Ok(false);
    }
    if ctx.policy.has_peer(ctx.sa.peer_ip()) {
        return Ok(false);
    }
    send_initial_contact(ctx)?;
    Ok(true)
}

/// Process a received Informational message
///
/// # Errors
///
/// - `InvalidFlags` for a cleartext message on an SA with keying material,
///   or for a cleartext Delete
/// - `InvalidMsgId` for a protected message with a zero message ID
/// - `VerifyFailed` when HASH(1) does not verify
/// - Errors from Delete and INITIAL-CONTACT processing
pub fn process(ctx: &ExchangeContext<'_>, datagram: &[u8]) -> Result<Vec<InfoAction>> {
    let header = IsakmpHeader::from_bytes(datagram)?;
    logging::log_message_recv("informational", header.message_id, datagram.len());

    if !header.flags.is_encrypted() {
        return process_cleartext(ctx, datagram);
    }

    let keys = ctx.sa.keys()?;
    if header.message_id == 0 {
        return Err(Error::InvalidMsgId(0));
    }

    let iv = hash::phase2_iv(ctx.crypto, keys, header.message_id)?;
    let requirements = PayloadRequirements::new()
        .require(PayloadType::HASH)
        .allow(PayloadType::N)
        .allow(PayloadType::D);
    let received = ctx.open(datagram, &iv, &requirements)?;
    if received.decoded.first_type() != Some(PayloadType::HASH) {
        return Err(Error::MissingPayload(PayloadType::HASH.to_u8()));
    }

    let expected = hash::hash1(ctx.crypto, keys, header.message_id, received.rest()?)?;
    if let Err(e) = hash::verify(&expected, received.hash()?) {
        ctx.metrics.record_authentication_failed();
        return Err(e);
    }

    let mut actions = Vec::new();
    if let Some(notify) = received.decoded.notify() {
        match process_notify(ctx, notify, &mut actions) {
            Ok(()) => {}
            Err(Error::UnsupportedNotify(t)) => {
                debug!(notify_type = t, "Notification not handled");
            }
            Err(e) => return Err(e),
        }
    }
    if let Some(delete) = received.decoded.delete() {
        process_delete(ctx, delete, &mut actions)?;
    }
    if received.decoded.notify().is_none() && received.decoded.delete().is_none() {
        return Err(Error::MissingPayload(PayloadType::N.to_u8()));
    }

    Ok(actions)
}

fn process_cleartext(ctx: &ExchangeContext<'_>, datagram: &[u8]) -> Result<Vec<InfoAction>> {
    let (header, body) = envelope::cleartext_body(datagram)?;
    if ctx.sa.keys.is_some() {
        return Err(Error::InvalidFlags(header.flags.value()));
    }

    let requirements = PayloadRequirements::new()
        .allow(PayloadType::N)
        .allow(PayloadType::D);
    let decoded = ctx.codec.decode(header.next_payload, body, &requirements)?;
    if decoded.delete().is_some() {
        return Err(Error::InvalidFlags(header.flags.value()));
    }
    let notify = decoded
        .notify()
        .ok_or(Error::MissingPayload(PayloadType::N.to_u8()))?;

    ctx.metrics.record_notify_received();
    logging::log_notify_received(&ctx.peer(), notify.notify_type, notify.protocol_id);
    Ok(Vec::new())
}

/// Handle a notification from an authenticated Informational message
///
/// Only INITIAL-CONTACT has an effect; other types yield
/// `UnsupportedNotify`, which callers treat as non-fatal.
pub fn process_notify(
    ctx: &ExchangeContext<'_>,
    notify: &NotifyPayload,
    actions: &mut Vec<InfoAction>,
) -> Result<()> {
    ctx.metrics.record_notify_received();
    logging::log_notify_received(&ctx.peer(), notify.notify_type, notify.protocol_id);

    match NotifyType::from_u16(notify.notify_type) {
        Some(NotifyType::InitialContact) => process_initial_contact(ctx, notify, actions),
        Some(t) if t.is_error() => {
            warn!(
                peer = %ctx.sa.peer_addr,
                notify_type = notify.notify_type,
                "Peer reported an error"
            );
            Ok(())
        }
        _ => Err(Error::UnsupportedNotify(notify.notify_type)),
    }
}

/// Purge SAs with a peer that announced a fresh start
pub fn process_initial_contact(
    ctx: &ExchangeContext<'_>,
    notify: &NotifyPayload,
    actions: &mut Vec<InfoAction>,
) -> Result<()> {
    if !ctx.sa.is_established() {
        return Err(Error::InvalidState(
            "INITIAL-CONTACT before Phase 1 completed".into(),
        ));
    }
    if notify.protocol_id != ProtocolId::Isakmp.to_u8() {
        return Err(Error::InvalidProtocol(notify.protocol_id));
    }
    if notify.spi.len() != ISAKMP_SPI_SIZE {
        return Err(Error::InvalidSpi(0));
    }
    if notify.spi[..] != ctx.sa.cookies.to_bytes()[..] {
        return Err(Error::InvalidCookie);
    }

    let peer = ctx.sa.peer_ip();
    let removed = ctx.policy.purge_peer(peer);
    ctx.metrics.record_sa_pairs_removed(removed);
    actions.push(InfoAction::InitialContact {
        peer,
        ipsec_sas: removed,
    });
    Ok(())
}

/// Handle a Delete payload from an authenticated Informational message
///
/// IKE SAs are named by cookies and returned as actions. AH and ESP SAs
/// are named by their outbound SPI; removing one removes its inbound
/// partner as well. An SPI with no installed SA is only logged.
pub fn process_delete(
    ctx: &ExchangeContext<'_>,
    delete: &DeletePayload,
    actions: &mut Vec<InfoAction>,
) -> Result<()> {
    ctx.metrics.record_delete_processed();
    logging::log_delete_received(&ctx.peer(), delete.protocol_id, &delete.spis);

    match ProtocolId::from_u8(delete.protocol_id) {
        Some(ProtocolId::Isakmp) => {
            if delete.spi_size as usize != ISAKMP_SPI_SIZE {
                return Err(Error::InvalidSpi(0));
            }
            for spi in &delete.spis {
                let cookies = Cookies::from_slice(spi).ok_or(Error::InvalidSpi(0))?;
                actions.push(InfoAction::DeleteIkeSa(cookies));
            }
            Ok(())
        }
        Some(ProtocolId::Ah) | Some(ProtocolId::Esp) => {
            if delete.spi_size as usize != IPSEC_SPI_SIZE {
                return Err(Error::InvalidSpi(0));
            }
            let protocol = IpsecProtocol::from_protocol_id(delete.protocol_id)
                .ok_or(Error::InvalidProtocol(delete.protocol_id))?;
            let peer = ctx.sa.peer_ip();
            for spi in &delete.spis {
                let bytes: [u8; IPSEC_SPI_SIZE] =
                    spi.as_slice().try_into().map_err(|_| Error::InvalidSpi(0))?;
                let spi = u32::from_be_bytes(bytes);
                match ctx.policy.remove_pair(protocol, spi, peer) {
                    Ok(()) => {
                        ctx.metrics.record_sa_pairs_removed(1);
                        logging::log_sa_pair_removed(&peer.to_string(), Some(spi), 1);
                    }
                    Err(e) => debug!(
                        spi = %format_args!("{:08x}", spi),
                        error = %e,
                        "Delete for unknown SA"
                    ),
                }
            }
            Ok(())
        }
        None => Err(Error::InvalidProtocol(delete.protocol_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::config::EngineConfig;
    use crate::ipsec::crypto::{CipherAlgorithm, HashAlgorithm, PrfAlgorithm, SoftCrypto};
    use crate::ipsec::ikev1::codec::IsakmpCodec;
    use crate::ipsec::ikev1::ike_sa::{IkeSaParams, Phase1Keys};
    use crate::ipsec::ikev1::policy::{MemoryPolicyStore, PolicyStore, SaLifetime, SaPair};
    use crate::ipsec::ikev1::security::{
        AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm, SecurityProtocol,
    };
    use crate::ipsec::ikev1::selector::TrafficSelector;
    use crate::ipsec::ikev1::timer::ManualScheduler;
    use crate::ipsec::ikev1::transport::MemoryTransport;
    use crate::ipsec::metrics::IkeMetrics;
    use std::time::Duration;
    use zeroize::Zeroizing;

    struct Fixture {
        crypto: SoftCrypto,
        policy: MemoryPolicyStore,
        codec: IsakmpCodec,
        transport: MemoryTransport,
        scheduler: ManualScheduler,
        metrics: IkeMetrics,
        config: EngineConfig,
        sa: IkeSaParams,
    }

    impl Fixture {
        fn new() -> Self {
            let keys = Phase1Keys {
                hash: HashAlgorithm::Sha1,
                prf: PrfAlgorithm::HmacSha1,
                cipher: CipherAlgorithm::Aes128Cbc,
                skeyid_d: Zeroizing::new(vec![1; 20]),
                skeyid_a: Zeroizing::new(vec![2; 20]),
                enc_key: Zeroizing::new(vec![3; 16]),
                last_iv: vec![4; 16],
            };
            Fixture {
                crypto: SoftCrypto::new(),
                policy: MemoryPolicyStore::new(),
                codec: IsakmpCodec::default(),
                transport: MemoryTransport::new(),
                scheduler: ManualScheduler::new(),
                metrics: IkeMetrics::new(),
                config: EngineConfig::default(),
                sa: IkeSaParams::established(
                    Cookies::new([1; 8], [2; 8]),
                    "192.0.2.1:500".parse().unwrap(),
                    "198.51.100.7:500".parse().unwrap(),
                    keys,
                )
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

        fn install(&self, inbound: u32, outbound: u32) {
            self.policy
                .install_pair(SaPair {
                    security: SecurityProtocol::esp(
                        EncryptionAlgorithm::Aes128,
                        AuthAlgorithm::HmacSha1,
                        EncapsulationMode::Transport,
                    ),
                    peer: self.sa.peer_ip(),
                    inbound_spi: inbound,
                    outbound_spi: outbound,
                    inbound_keymat: Zeroizing::new(vec![0; 36]),
                    outbound_keymat: Zeroizing::new(vec![0; 36]),
                    lifetime: SaLifetime::from_secs(3600, Duration::from_secs(10)),
                    local_ts: TrafficSelector::host(self.sa.local_addr.ip()),
                    remote_ts: TrafficSelector::host(self.sa.peer_ip()),
                })
                .unwrap();
        }
    }

    #[test]
    fn test_notify_table() {
        assert_eq!(
            notify_type_for(&Error::NotNegotiable),
            Some(NotifyType::NoProposalChosen)
        );
        assert_eq!(
            notify_type_for(&Error::ProposalTampered),
            Some(NotifyType::PayloadMalformed)
        );
        assert_eq!(
            notify_type_for(&Error::VerifyFailed),
            Some(NotifyType::AuthenticationFailed)
        );
        assert_eq!(
            notify_type_for(&Error::InvalidId("x".into())),
            Some(NotifyType::InvalidIdInformation)
        );
        assert_eq!(notify_type_for(&Error::NoKeymat), None);
        assert_eq!(notify_type_for(&Error::Timeout), None);
    }

    #[test]
    fn test_delete_roundtrip_removes_pair() {
        let local = Fixture::new();
        let remote = Fixture::new();
        remote.install(0x100, 0x200);

        send_delete(
            &local.ctx(),
            ProtocolId::Esp,
            vec![0x200u32.to_be_bytes().to_vec()],
        )
        .unwrap();
        let (_, datagram) = local.transport.pop().unwrap();

        let actions = process(&remote.ctx(), &datagram).unwrap();
        assert!(actions.is_empty());
        assert_eq!(remote.policy.pair_count(), 0);
        assert_eq!(remote.metrics.snapshot().sa_pairs_removed, 1);
    }

    #[test]
    fn test_delete_unknown_spi_is_not_an_error() {
        let local = Fixture::new();
        let remote = Fixture::new();
        send_delete(&local.ctx(), ProtocolId::Ah, vec![vec![0, 0, 9, 9]]).unwrap();
        let (_, datagram) = local.transport.pop().unwrap();
        assert_eq!(process(&remote.ctx(), &datagram), Ok(Vec::new()));
    }

    #[test]
    fn test_delete_ike_sa_action() {
        let local = Fixture::new();
        let remote = Fixture::new();
        let cookies = Cookies::new([7; 8], [8; 8]);
        send_delete(&local.ctx(), ProtocolId::Isakmp, vec![cookies.to_bytes().to_vec()]).unwrap();
        let (_, datagram) = local.transport.pop().unwrap();
        assert_eq!(
            process(&remote.ctx(), &datagram),
            Ok(vec![InfoAction::DeleteIkeSa(cookies)])
        );
    }

    #[test]
    fn test_send_delete_validates_spis() {
        let fx = Fixture::new();
        assert!(send_delete(&fx.ctx(), ProtocolId::Esp, vec![vec![1, 2, 3]]).is_err());
        assert!(send_delete(&fx.ctx(), ProtocolId::Esp, Vec::new()).is_err());
        let too_many = vec![vec![0, 0, 1, 0]; fx.config.max_delete_spis + 1];
        assert!(send_delete(&fx.ctx(), ProtocolId::Esp, too_many).is_err());
        assert!(fx.transport.is_empty());
    }

    #[test]
    fn test_wrong_hash_rejected() {
        let local = Fixture::new();
        let mut remote = Fixture::new();
        remote.sa.keys.as_mut().unwrap().skeyid_a = Zeroizing::new(vec![9; 20]);
        send_error(&local.ctx(), &Error::NotNegotiable).unwrap();
        let (_, datagram) = local.transport.pop().unwrap();
        assert_eq!(process(&remote.ctx(), &datagram), Err(Error::VerifyFailed));
        assert_eq!(remote.metrics.snapshot().authentication_failed, 1);
    }

    #[test]
    fn test_error_notify_received() {
        let local = Fixture::new();
        let remote = Fixture::new();
        send_error(&local.ctx(), &Error::InvalidSpi(0)).unwrap();
        let (_, datagram) = local.transport.pop().unwrap();
        assert_eq!(process(&remote.ctx(), &datagram), Ok(Vec::new()));
        assert_eq!(remote.metrics.snapshot().notifies_received, 1);
        assert_eq!(local.metrics.snapshot().notifies_sent, 1);
    }

    #[test]
    fn test_unmapped_error_not_sent() {
        let fx = Fixture::new();
        assert!(matches!(
            send_error(&fx.ctx(), &Error::CryptoError("dh".into())),
            Err(Error::Internal(_))
        ));
        assert!(fx.transport.is_empty());
    }

    #[test]
    fn test_initial_contact() {
        let local = Fixture::new();
        let remote = Fixture::new();
        remote.install(0x100, 0x200);
        remote.install(0x101, 0x201);

        assert_eq!(check_initial_contact(&local.ctx()), Ok(true));
        let (_, datagram) = local.transport.pop().unwrap();
        let actions = process(&remote.ctx(), &datagram).unwrap();
        assert_eq!(
            actions,
            vec![InfoAction::InitialContact {
                peer: remote.sa.peer_ip(),
                ipsec_sas: 2
            }]
        );
        assert_eq!(remote.policy.pair_count(), 0);
    }

    #[test]
    fn test_initial_contact_skipped_with_existing_sas() {
        let fx = Fixture::new();
        fx.install(0x100, 0x200);
        assert_eq!(check_initial_contact(&fx.ctx()), Ok(false));
        assert!(fx.transport.is_empty());
    }

    #[test]
    fn test_initial_contact_wrong_cookies() {
        let fx = Fixture::new();
        let notify = NotifyPayload::new(
            ProtocolId::Isakmp.to_u8(),
            NotifyType::InitialContact,
            vec![9; 16],
        );
        let mut actions = Vec::new();
        assert_eq!(
            process_notify(&fx.ctx(), &notify, &mut actions),
            Err(Error::InvalidCookie)
        );
        let notify = NotifyPayload::new(
            ProtocolId::Esp.to_u8(),
            NotifyType::InitialContact,
            vec![9; 16],
        );
        assert_eq!(
            process_notify(&fx.ctx(), &notify, &mut actions),
            Err(Error::InvalidProtocol(ProtocolId::Esp.to_u8()))
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_cleartext_notify() {
        let mut local = Fixture::new();
        local.sa.keys = None;
        let mut remote = Fixture::new();

        send_error(&local.ctx(), &Error::InvalidCookie).unwrap();
        let (_, datagram) = local.transport.pop().unwrap();

        // An SA with keys refuses unprotected messages
        assert!(matches!(
            process(&remote.ctx(), &datagram),
            Err(Error::InvalidFlags(_))
        ));

        remote.sa.keys = None;
        assert_eq!(process(&remote.ctx(), &datagram), Ok(Vec::new()));
        assert_eq!(remote.metrics.snapshot().notifies_received, 1);
    }
}
