//! Structured logging for IKE negotiation
//!
//! Provides structured, contextual logging using the `tracing` framework.
//! Cookies and SPIs are always rendered as hex.
//!
//! # Log Levels
//!
//! - **TRACE**: Message sizes and proposal matching details
//! - **DEBUG**: Phase 2 state transitions, retransmissions
//! - **INFO**: Exchange start / completion, SA installation, deletes
//! - **WARN**: Exchange failures, unsupported notifications
//! - **ERROR**: Unexpected internal failures
//!
//! # Example
//!
//! ```no_run
//! use isakmp_proto::ipsec::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("isakmp_proto::ipsec=debug")
//!     .init();
//!
//! logging::log_quick_mode_transition(
//!     &[0x01; 8],
//!     &[0x02; 8],
//!     0x1234_5678,
//!     "STATE_1",
//!     "STATE_3",
//! );
//! ```

use tracing::{debug, error, info, trace, warn};

/// Log a Phase 2 state transition
///
/// # Arguments
///
/// * `icookie` - Initiator cookie
/// * `rcookie` - Responder cookie
/// * `msg_id` - Quick Mode message ID
/// * `old_state` - Previous exchange state
/// * `new_state` - New exchange state
pub fn log_quick_mode_transition(
    icookie: &[u8],
    rcookie: &[u8],
    msg_id: u32,
    old_state: &str,
    new_state: &str,
) {
    debug!(
        icookie = %hex::encode(icookie),
        rcookie = %hex::encode(rcookie),
        msg_id = %format_args!("{:08x}", msg_id),
        state_from = old_state,
        state_to = new_state,
        "Quick Mode state transition"
    );
}

/// Log the start of a Quick Mode exchange
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `msg_id` - Quick Mode message ID
/// * `role` - "initiator" or "responder"
pub fn log_quick_mode_started(peer_addr: &str, msg_id: u32, role: &str) {
    info!(
        peer = peer_addr,
        msg_id = %format_args!("{:08x}", msg_id),
        role = role,
        "Quick Mode started"
    );
}

/// Log Quick Mode completion
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `msg_id` - Quick Mode message ID
/// * `sa_count` - Number of IPsec SA pairs negotiated
pub fn log_quick_mode_complete(peer_addr: &str, msg_id: u32, sa_count: usize) {
    info!(
        peer = peer_addr,
        msg_id = %format_args!("{:08x}", msg_id),
        sa_count = sa_count,
        "Quick Mode completed"
    );
}

/// Log Quick Mode failure
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `msg_id` - Quick Mode message ID
/// * `error` - Error message
pub fn log_quick_mode_failed(peer_addr: &str, msg_id: u32, error: &str) {
    warn!(
        peer = peer_addr,
        msg_id = %format_args!("{:08x}", msg_id),
        error = error,
        "Quick Mode failed"
    );
}

/// Log an IPsec SA pair installed
///
/// # Arguments
///
/// * `protocol` - "AH" or "ESP"
/// * `inbound_spi` - Locally chosen SPI
/// * `outbound_spi` - Peer chosen SPI
/// * `lifetime_secs` - Hard lifetime
pub fn log_sa_pair_installed(
    protocol: &str,
    inbound_spi: u32,
    outbound_spi: u32,
    lifetime_secs: u32,
) {
    info!(
        protocol = protocol,
        spi_in = %hex::encode(inbound_spi.to_be_bytes()),
        spi_out = %hex::encode(outbound_spi.to_be_bytes()),
        lifetime_secs = lifetime_secs,
        "IPsec SA pair installed"
    );
}

/// Log IPsec SA pairs removed
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `outbound_spi` - Outbound SPI of the pair, if removed by SPI
/// * `count` - Number of pairs removed
pub fn log_sa_pair_removed(peer_addr: &str, outbound_spi: Option<u32>, count: usize) {
    info!(
        peer = peer_addr,
        spi_out = %outbound_spi.map(|s| hex::encode(s.to_be_bytes())).unwrap_or_default(),
        count = count,
        "IPsec SA pairs removed"
    );
}

/// Log a proposal selection result
///
/// # Arguments
///
/// * `msg_id` - Quick Mode message ID
/// * `proposal_number` - Selected proposal number
/// * `payloads` - Proposal payloads in the selection
pub fn log_proposal_selection(msg_id: u32, proposal_number: u8, payloads: usize) {
    debug!(
        msg_id = %format_args!("{:08x}", msg_id),
        proposal = proposal_number,
        payloads = payloads,
        "Proposal selected"
    );
}

/// Log a retransmission
///
/// # Arguments
///
/// * `msg_id` - Message ID of the exchange
/// * `attempt` - Resend attempt, starting at 1
/// * `reason` - "timer" or "duplicate"
pub fn log_retransmission(msg_id: u32, attempt: u32, reason: &str) {
    debug!(
        msg_id = %format_args!("{:08x}", msg_id),
        attempt = attempt,
        reason = reason,
        "Message retransmitted"
    );
}

/// Log a notification sent
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `notify_type` - Notification type
/// * `encrypted` - Whether the message was protected
pub fn log_notify_sent(peer_addr: &str, notify_type: u16, encrypted: bool) {
    info!(
        peer = peer_addr,
        notify_type = notify_type,
        encrypted = encrypted,
        "Notification sent"
    );
}

/// Log a notification received
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `notify_type` - Notification type
/// * `protocol_id` - Protocol of the notification
pub fn log_notify_received(peer_addr: &str, notify_type: u16, protocol_id: u8) {
    info!(
        peer = peer_addr,
        notify_type = notify_type,
        protocol_id = protocol_id,
        "Notification received"
    );
}

/// Log a Delete payload received
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `protocol_id` - Protocol of the SAs
/// * `spis` - SPIs to delete
pub fn log_delete_received(peer_addr: &str, protocol_id: u8, spis: &[Vec<u8>]) {
    info!(
        peer = peer_addr,
        protocol_id = protocol_id,
        spis = ?spis.iter().map(hex::encode).collect::<Vec<_>>(),
        "Delete received"
    );
}

/// Log INITIAL-CONTACT handling
///
/// # Arguments
///
/// * `peer_addr` - Peer address
/// * `ike_sas` - IKE SAs purged
/// * `ipsec_sas` - IPsec SA pairs purged
pub fn log_initial_contact(peer_addr: &str, ike_sas: usize, ipsec_sas: usize) {
    info!(
        peer = peer_addr,
        ike_sas = ike_sas,
        ipsec_sas = ipsec_sas,
        "Initial contact, stale SAs purged"
    );
}

/// Log message send
///
/// # Arguments
///
/// * `exchange` - Exchange name
/// * `msg_id` - Message ID
/// * `size` - Datagram size in bytes
pub fn log_message_send(exchange: &str, msg_id: u32, size: usize) {
    trace!(
        exchange = exchange,
        msg_id = %format_args!("{:08x}", msg_id),
        size = size,
        "Sending ISAKMP message"
    );
}

/// Log message receive
///
/// # Arguments
///
/// * `exchange` - Exchange name
/// * `msg_id` - Message ID
/// * `size` - Datagram size in bytes
pub fn log_message_recv(exchange: &str, msg_id: u32, size: usize) {
    trace!(
        exchange = exchange,
        msg_id = %format_args!("{:08x}", msg_id),
        size = size,
        "Received ISAKMP message"
    );
}

/// Log an error with context
///
/// # Arguments
///
/// * `context` - What was being done
/// * `error` - Error message
pub fn log_error(context: &str, error: &str) {
    error!(context = context, error = error, "IKE error");
}
