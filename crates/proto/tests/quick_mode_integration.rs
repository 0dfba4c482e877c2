//! Quick Mode Integration Tests
//!
//! Two engines exchanging datagrams through in-memory transports, with
//! timers driven by hand.

#![cfg(feature = "ipsec")]

use isakmp_proto::ipsec::{
    config::EngineConfig,
    crypto::{CipherAlgorithm, HashAlgorithm, PrfAlgorithm},
    ikev1::{
        policy::SaLifetime,
        security::{AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm},
        Cookies, IkeSaParams, Lifetime, ManualScheduler, MemoryPolicyStore, MemoryTransport,
        Outcome, Phase1Keys, Phase2Request, Phase2State, Policy, PolicyStore, ProtocolId,
        QuickModeEngine, SaPair, SecurityProtocol, TimerKey, TrafficSelector,
    },
    Error,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

const A_ADDR: &str = "192.0.2.1:500";
const B_ADDR: &str = "198.51.100.7:500";

struct Node {
    engine: QuickModeEngine,
    policy: Arc<MemoryPolicyStore>,
    transport: Arc<MemoryTransport>,
    scheduler: Arc<ManualScheduler>,
}

impl Node {
    fn new(local: &str, remote: &str, first_spi: u32, config: EngineConfig) -> Self {
        Self::with_security(local, remote, first_spi, config, vec![esp()])
    }

    fn with_security(
        local: &str,
        remote: &str,
        first_spi: u32,
        config: EngineConfig,
        security: Vec<SecurityProtocol>,
    ) -> Self {
        let local: SocketAddr = local.parse().unwrap();
        let remote: SocketAddr = remote.parse().unwrap();

        let policy = Arc::new(MemoryPolicyStore::with_first_spi(first_spi));
        policy.add_policy(Policy {
            local: TrafficSelector::host(local.ip()),
            remote: TrafficSelector::host(remote.ip()),
            security,
            pfs_group: None,
            lifetime: Lifetime::Seconds(3600),
        });
        let transport = Arc::new(MemoryTransport::new());
        let scheduler = Arc::new(ManualScheduler::new());

        let mut engine =
            QuickModeEngine::new(config, policy.clone(), transport.clone(), scheduler.clone())
                .unwrap();
        engine.add_sa(ike_sa(cookies(), local, remote));

        Node {
            engine,
            policy,
            transport,
            scheduler,
        }
    }
}

fn cookies() -> Cookies {
    Cookies::new([0xa1; 8], [0xb2; 8])
}

fn keys() -> Phase1Keys {
    Phase1Keys {
        hash: HashAlgorithm::Sha1,
        prf: PrfAlgorithm::HmacSha1,
        cipher: CipherAlgorithm::Aes128Cbc,
        skeyid_d: Zeroizing::new(vec![0x5a; 20]),
        skeyid_a: Zeroizing::new(vec![0x6b; 20]),
        enc_key: Zeroizing::new(vec![0x7c; 16]),
        last_iv: vec![0x8d; 16],
    }
}

fn ike_sa(cookies: Cookies, local: SocketAddr, remote: SocketAddr) -> IkeSaParams {
    IkeSaParams::established(cookies, local, remote, keys()).unwrap()
}

fn esp() -> SecurityProtocol {
    SecurityProtocol::esp(
        EncryptionAlgorithm::Aes128,
        AuthAlgorithm::HmacSha1,
        EncapsulationMode::Transport,
    )
}

fn ah() -> SecurityProtocol {
    SecurityProtocol::ah(AuthAlgorithm::HmacSha1, EncapsulationMode::Transport)
}

fn quiet() -> EngineConfig {
    EngineConfig::builder()
        .with_initial_contact(false)
        .build()
        .unwrap()
}

fn nodes(config: EngineConfig) -> (Node, Node) {
    (
        Node::new(A_ADDR, B_ADDR, 0x1000, config.clone()),
        Node::new(B_ADDR, A_ADDR, 0x2000, config),
    )
}

/// Move datagrams between the nodes until both are quiet
///
/// Returns the number of datagrams delivered.
fn pump(a: &mut Node, b: &mut Node) -> usize {
    let mut delivered = 0;
    loop {
        let mut moved = false;
        while let Some((_, datagram)) = a.transport.pop() {
            let _ = b.engine.handle_incoming(&datagram);
            delivered += 1;
            moved = true;
        }
        while let Some((_, datagram)) = b.transport.pop() {
            let _ = a.engine.handle_incoming(&datagram);
            delivered += 1;
            moved = true;
        }
        if !moved {
            return delivered;
        }
    }
}

fn completed(outcomes: &[Outcome]) -> Vec<usize> {
    outcomes
        .iter()
        .filter_map(|o| match o {
            Outcome::Completed { sa_count, .. } => Some(*sa_count),
            Outcome::Failed { .. } => None,
        })
        .collect()
}

//
// Test Cases - Exchange Flow
//

#[test]
fn test_quick_mode_without_commit() {
    let (mut a, mut b) = nodes(quiet());
    let request = Phase2Request::new(vec![esp()]).with_lifetime(3600);
    let msg_id = a.engine.initiate_quick_mode(&cookies(), &request).unwrap();

    assert_eq!(pump(&mut a, &mut b), 3);
    assert_eq!(completed(&a.engine.take_outcomes()), vec![1]);
    assert_eq!(completed(&b.engine.take_outcomes()), vec![1]);

    let ia = &a.policy.installed()[0];
    let ib = &b.policy.installed()[0];
    assert_eq!(ia.inbound_spi, ib.outbound_spi);
    assert_eq!(ia.outbound_spi, ib.inbound_spi);
    assert_eq!(ia.inbound_keymat, ib.outbound_keymat);

    // Completed handles stay around to answer retransmissions
    let handle = a.engine.sa(&cookies()).unwrap().phase2.get(msg_id).unwrap();
    assert_eq!(handle.state, Phase2State::Complete);
    assert!(!a.scheduler.is_pending(&TimerKey::resend(cookies(), msg_id)));

    let stats = a.engine.metrics().snapshot();
    assert_eq!(stats.quick_mode_started, 1);
    assert_eq!(stats.quick_mode_completed, 1);
    assert_eq!(stats.sa_pairs_installed, 1);
}

#[test]
fn test_quick_mode_with_commit() {
    let config = quiet();
    let mut a = Node::new(
        A_ADDR,
        B_ADDR,
        0x1000,
        EngineConfig {
            commit_bit: true,
            ..config.clone()
        },
    );
    let mut b = Node::new(B_ADDR, A_ADDR, 0x2000, config);

    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();

    assert_eq!(pump(&mut a, &mut b), 4);
    assert_eq!(completed(&a.engine.take_outcomes()), vec![1]);
    assert_eq!(completed(&b.engine.take_outcomes()), vec![1]);
    assert_eq!(a.policy.pair_count(), 1);
    assert_eq!(b.policy.pair_count(), 1);
}

#[test]
fn test_esp_and_ah_bundle() {
    let security = vec![esp(), ah()];
    let mut a = Node::with_security(A_ADDR, B_ADDR, 0x1000, quiet(), security.clone());
    let mut b = Node::with_security(B_ADDR, A_ADDR, 0x2000, quiet(), security.clone());

    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(security))
        .unwrap();
    pump(&mut a, &mut b);

    assert_eq!(completed(&a.engine.take_outcomes()), vec![2]);
    assert_eq!(completed(&b.engine.take_outcomes()), vec![2]);

    let pairs = b.policy.installed();
    assert_eq!(pairs.len(), 2);
    assert_ne!(pairs[0].inbound_spi, pairs[1].inbound_spi);
    assert_ne!(pairs[0].security.protocol, pairs[1].security.protocol);
}

#[test]
fn test_bundle_install_is_all_or_nothing() {
    let security = vec![esp(), ah()];
    let mut a = Node::with_security(A_ADDR, B_ADDR, 0x1000, quiet(), security.clone());
    let mut b = Node::with_security(B_ADDR, A_ADDR, 0x2000, quiet(), security.clone());

    // The AH SPI the responder hands out next is already taken
    let (a_ip, b_ip) = (
        A_ADDR.parse::<SocketAddr>().unwrap().ip(),
        B_ADDR.parse::<SocketAddr>().unwrap().ip(),
    );
    let taken = SaPair {
        security: ah(),
        inbound_spi: 0x2001,
        ..stale_pair(b_ip, a_ip)
    };
    b.policy.install_pair(taken).unwrap();

    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(security))
        .unwrap();
    pump(&mut a, &mut b);

    assert!(matches!(
        b.engine.take_outcomes().as_slice(),
        [Outcome::Failed {
            error: Error::InvalidSpi(0x2001),
            ..
        }]
    ));
    let left = b.policy.installed();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].outbound_spi, 0x0bad_0002);
    assert_eq!(b.engine.metrics().snapshot().sa_pairs_removed, 1);
}

//
// Test Cases - Retransmission
//

#[test]
fn test_duplicate_answered_without_reinstall() {
    let (mut a, mut b) = nodes(quiet());
    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();

    let (_, first) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&first).unwrap();
    b.engine.handle_incoming(&first).unwrap();

    // The stored reply goes out again, unchanged
    let (_, reply) = b.transport.pop().unwrap();
    let (_, again) = b.transport.pop().unwrap();
    assert_eq!(reply, again);
    assert_eq!(b.engine.metrics().snapshot().retransmissions, 1);

    a.engine.handle_incoming(&reply).unwrap();
    let (_, third) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&third).unwrap();
    assert_eq!(b.policy.pair_count(), 1);

    // HASH(3) got no reply, so a repeat of it is not answered
    assert_eq!(
        b.engine.handle_incoming(&third),
        Err(Error::UnexpectedMessage)
    );
    assert!(b.transport.is_empty());
    assert_eq!(b.policy.pair_count(), 1);
    assert_eq!(b.engine.metrics().snapshot().sa_pairs_installed, 1);
    assert_eq!(b.engine.metrics().snapshot().retransmissions, 1);
}

#[test]
fn test_duplicate_connected_not_answered() {
    let config = quiet();
    let mut a = Node::new(
        A_ADDR,
        B_ADDR,
        0x1000,
        EngineConfig {
            commit_bit: true,
            ..config.clone()
        },
    );
    let mut b = Node::new(B_ADDR, A_ADDR, 0x2000, config);
    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();

    let (_, first) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&first).unwrap();
    let (_, second) = b.transport.pop().unwrap();
    a.engine.handle_incoming(&second).unwrap();
    let (_, third) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&third).unwrap();
    let (_, connected) = b.transport.pop().unwrap();
    a.engine.handle_incoming(&connected).unwrap();
    assert_eq!(completed(&a.engine.take_outcomes()), vec![1]);

    assert_eq!(
        a.engine.handle_incoming(&connected),
        Err(Error::UnexpectedMessage)
    );
    assert!(a.transport.is_empty());
    assert_eq!(a.engine.metrics().snapshot().retransmissions, 0);

    // A repeated HASH(3) still gets CONNECTED back
    b.engine.handle_incoming(&third).unwrap();
    let (_, again) = b.transport.pop().unwrap();
    assert_eq!(again, connected);
    assert_eq!(
        a.engine.handle_incoming(&again),
        Err(Error::UnexpectedMessage)
    );
    assert!(a.transport.is_empty());
    assert_eq!(a.policy.pair_count(), 1);
    assert_eq!(b.policy.pair_count(), 1);
}

#[test]
fn test_duplicate_reply_to_completed_initiator() {
    let (mut a, mut b) = nodes(quiet());
    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();

    let (_, first) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&first).unwrap();
    let (_, second) = b.transport.pop().unwrap();
    a.engine.handle_incoming(&second).unwrap();
    let (_, third) = a.transport.pop().unwrap();
    b.engine.handle_incoming(&third).unwrap();
    assert!(b.transport.is_empty());

    // The initiator resends HASH(3) once and the exchange settles
    a.engine.handle_incoming(&second).unwrap();
    let (_, resent) = a.transport.pop().unwrap();
    assert_eq!(resent, third);
    assert_eq!(
        b.engine.handle_incoming(&resent),
        Err(Error::UnexpectedMessage)
    );
    assert!(b.transport.is_empty());
    assert_eq!(pump(&mut a, &mut b), 0);

    assert_eq!(a.engine.metrics().snapshot().retransmissions, 1);
    assert_eq!(b.engine.metrics().snapshot().retransmissions, 0);
    assert_eq!(a.policy.pair_count(), 1);
    assert_eq!(b.policy.pair_count(), 1);
}

#[test]
fn test_resend_timer_retransmits() {
    let (mut a, _) = nodes(quiet());
    let msg_id = a
        .engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();
    let (_, original) = a.transport.pop().unwrap();

    let key = a
        .scheduler
        .fire(&TimerKey::resend(cookies(), msg_id))
        .unwrap();
    a.engine.handle_timer(key).unwrap();

    let (_, resent) = a.transport.pop().unwrap();
    assert_eq!(original, resent);
    assert!(a.scheduler.is_pending(&TimerKey::resend(cookies(), msg_id)));
    assert_eq!(a.engine.metrics().snapshot().retransmissions, 1);
}

#[test]
fn test_exchange_times_out() {
    let (mut a, _) = nodes(quiet());
    let msg_id = a
        .engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();

    let key = a
        .scheduler
        .fire(&TimerKey::phase2_timeout(cookies(), msg_id))
        .unwrap();
    assert_eq!(a.engine.handle_timer(key), Err(Error::Timeout));

    let outcomes = a.engine.take_outcomes();
    assert!(matches!(
        outcomes.as_slice(),
        [Outcome::Failed { error: Error::Timeout, .. }]
    ));

    a.engine.drain_deferred();
    assert!(a.engine.sa(&cookies()).unwrap().phase2.get(msg_id).is_none());
    assert_eq!(a.engine.metrics().snapshot().phase2_active, 0);
}

//
// Test Cases - Failures
//

#[test]
fn test_failed_authentication() {
    let (mut a, mut b) = nodes(quiet());
    let mut bad = ike_sa(cookies(), B_ADDR.parse().unwrap(), A_ADDR.parse().unwrap());
    if let Some(keys) = bad.keys.as_mut() {
        keys.skeyid_a = Zeroizing::new(vec![0xee; 20]);
    }
    b.engine.add_sa(bad);

    let msg_id = a
        .engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();
    let (_, first) = a.transport.pop().unwrap();
    assert_eq!(b.engine.handle_incoming(&first), Err(Error::VerifyFailed));

    assert!(matches!(
        b.engine.take_outcomes().as_slice(),
        [Outcome::Failed { error: Error::VerifyFailed, .. }]
    ));
    assert_eq!(b.policy.pair_count(), 0);
    assert_eq!(b.engine.metrics().snapshot().authentication_failed, 1);

    // The notification b sends is keyed wrong too, so a keeps waiting
    pump(&mut a, &mut b);
    let handle = a.engine.sa(&cookies()).unwrap().phase2.get(msg_id).unwrap();
    assert_eq!(handle.state, Phase2State::State3);
}

#[test]
fn test_no_matching_policy() {
    let (mut a, mut b) = nodes(quiet());
    let request = Phase2Request::new(vec![esp()]).with_selectors(
        TrafficSelector::subnet("10.1.0.0".parse().unwrap(), 16),
        TrafficSelector::subnet("10.2.0.0".parse().unwrap(), 16),
    );
    a.engine.initiate_quick_mode(&cookies(), &request).unwrap();
    pump(&mut a, &mut b);

    assert!(matches!(
        b.engine.take_outcomes().as_slice(),
        [Outcome::Failed { error: Error::InvalidId(_), .. }]
    ));
    assert_eq!(a.engine.metrics().snapshot().notifies_received, 1);
}

//
// Test Cases - Informational
//

#[test]
fn test_delete_removes_pair() {
    let (mut a, mut b) = nodes(quiet());
    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();
    pump(&mut a, &mut b);
    assert_eq!(b.policy.pair_count(), 1);

    let spi = a.policy.installed()[0].inbound_spi;
    a.engine
        .send_delete(&cookies(), ProtocolId::Esp, vec![spi.to_be_bytes().to_vec()])
        .unwrap();
    pump(&mut a, &mut b);

    assert_eq!(b.policy.pair_count(), 0);
    let stats = b.engine.metrics().snapshot();
    assert_eq!(stats.deletes_processed, 1);
    assert_eq!(stats.sa_pairs_removed, 1);
}

#[test]
fn test_initial_contact_purges_stale_state() {
    let mut a = Node::new(A_ADDR, B_ADDR, 0x1000, EngineConfig::default());
    let mut b = Node::new(B_ADDR, A_ADDR, 0x2000, EngineConfig::default());

    // Left over from before a restarted
    let stale = Cookies::new([0x01; 8], [0x02; 8]);
    b.engine
        .add_sa(ike_sa(stale, B_ADDR.parse().unwrap(), A_ADDR.parse().unwrap()));
    let a_ip = A_ADDR.parse::<SocketAddr>().unwrap().ip();
    let b_ip = B_ADDR.parse::<SocketAddr>().unwrap().ip();
    b.policy.install_pair(stale_pair(b_ip, a_ip)).unwrap();

    a.engine
        .initiate_quick_mode(&cookies(), &Phase2Request::new(vec![esp()]))
        .unwrap();
    assert!(a.engine.sa(&cookies()).unwrap().params.initial_contact_sent);

    // INITIAL-CONTACT, then the three Quick Mode messages
    assert_eq!(pump(&mut a, &mut b), 4);
    assert!(b.engine.sa(&stale).is_none());
    assert_eq!(b.policy.pair_count(), 1);
    assert_eq!(b.policy.installed()[0].outbound_spi, 0x1000);
    assert_eq!(completed(&b.engine.take_outcomes()), vec![1]);
}

fn stale_pair(local: IpAddr, peer: IpAddr) -> SaPair {
    SaPair {
        security: esp(),
        peer,
        inbound_spi: 0x0bad_0001,
        outbound_spi: 0x0bad_0002,
        inbound_keymat: Zeroizing::new(vec![0; 36]),
        outbound_keymat: Zeroizing::new(vec![0; 36]),
        lifetime: SaLifetime::from_secs(3600, Duration::from_secs(60)),
        local_ts: TrafficSelector::host(local),
        remote_ts: TrafficSelector::host(peer),
    }
}
