//! Phase 2 handles and their per-SA database
//!
//! A [`Phase2Handle`] carries everything one Quick Mode exchange needs
//! between messages. Owned buffers (nonces, DH keys, keying material) are
//! released when the handle is dropped, whichever path drops it.

use super::sa2::Sa2List;
use super::security::Lifetime;
use super::selector::TrafficSelector;
use crate::ipsec::crypto::{CryptoProvider, DhGroup, DhKeyPair};
use crate::ipsec::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

/// Quick Mode exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase2State {
    /// Initiator: build and send the first message
    State1,
    /// Responder: process the first message, reply
    State2,
    /// Initiator: process the reply, send HASH(3)
    State3,
    /// Responder: process HASH(3)
    State4,
    /// Initiator: wait for CONNECTED (commit bit only)
    State5,
    /// Exchange finished
    Complete,
}

impl fmt::Display for Phase2State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase2State::State1 => "STATE_1",
            Phase2State::State2 => "STATE_2",
            Phase2State::State3 => "STATE_3",
            Phase2State::State4 => "STATE_4",
            Phase2State::State5 => "STATE_5",
            Phase2State::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Phase 2 handle flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Phase2Flags(u8);

impl Phase2Flags {
    /// Local node started the exchange
    pub const INITIATOR: u8 = 0x01;
    /// Peer started the exchange
    pub const RESPONDER: u8 = 0x02;
    /// Handle is marked for deletion
    pub const DELETED: u8 = 0x04;
    /// Handle is stored in the Phase 2 database
    pub const REGISTERED: u8 = 0x08;
    /// Commit bit negotiated for the exchange
    pub const COMMIT: u8 = 0x10;

    /// Create flags from raw bits
    pub fn new(bits: u8) -> Self {
        Phase2Flags(bits)
    }

    /// Whether all bits in `bits` are set
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    /// Set bits
    pub fn insert(&mut self, bits: u8) {
        self.0 |= bits;
    }

    /// Clear bits
    pub fn remove(&mut self, bits: u8) {
        self.0 &= !bits;
    }

    /// Raw value
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Per-exchange Quick Mode state
pub struct Phase2Handle {
    /// Message ID of the exchange
    pub msg_id: u32,
    /// Current state
    pub state: Phase2State,
    /// Role and lifecycle flags
    pub flags: Phase2Flags,
    /// PFS group, `None` without PFS
    pub group: Option<DhGroup>,
    /// Initiator nonce body
    pub nonce_i: Zeroizing<Vec<u8>>,
    /// Responder nonce body
    pub nonce_r: Zeroizing<Vec<u8>>,
    /// Local DH key pair when PFS is used
    pub dh_key: Option<DhKeyPair>,
    /// Peer DH public value when PFS is used
    pub dh_remote: Option<Vec<u8>>,
    /// IV for the next encryption
    pub enc_iv: Vec<u8>,
    /// IV for the next decryption
    pub dec_iv: Vec<u8>,
    /// SA2 working set
    pub sa2: Sa2List,
    /// Requested lifetime, used when checking the responder's choice
    pub lifetime: Lifetime,
    /// Local traffic selector
    pub local_ts: Option<TrafficSelector>,
    /// Remote traffic selector
    pub remote_ts: Option<TrafficSelector>,
    /// Whether IDci / IDcr travel in the exchange
    pub ids_sent: bool,
    /// Digest of the last message that was answered with `last_message`
    pub last_msg_hash: Option<Vec<u8>>,
    /// Last datagram sent, for retransmission
    pub last_message: Option<Vec<u8>>,
    /// IV that becomes current once `last_message` is actually transmitted
    pub pending_iv: Option<Vec<u8>>,
    /// Resends of `last_message` so far
    pub resend_attempts: u32,
    /// Distinct messages stored for sending, resends excluded
    pub messages_sent: u32,
}

impl Phase2Handle {
    /// Handle for an exchange started locally
    pub fn initiator(msg_id: u32, group: Option<DhGroup>, lifetime: Lifetime) -> Self {
        Self::new(msg_id, Phase2State::State1, Phase2Flags::INITIATOR, group, lifetime)
    }

    /// Handle for an exchange started by the peer
    pub fn responder(msg_id: u32) -> Self {
        Self::new(
            msg_id,
            Phase2State::State2,
            Phase2Flags::RESPONDER,
            None,
            Lifetime::Unspecified,
        )
    }

    fn new(
        msg_id: u32,
        state: Phase2State,
        role: u8,
        group: Option<DhGroup>,
        lifetime: Lifetime,
    ) -> Self {
        Phase2Handle {
            msg_id,
            state,
            flags: Phase2Flags::new(role),
            group,
            nonce_i: Zeroizing::new(Vec::new()),
            nonce_r: Zeroizing::new(Vec::new()),
            dh_key: None,
            dh_remote: None,
            enc_iv: Vec::new(),
            dec_iv: Vec::new(),
            sa2: Sa2List::new(),
            lifetime,
            local_ts: None,
            remote_ts: None,
            ids_sent: false,
            last_msg_hash: None,
            last_message: None,
            pending_iv: None,
            resend_attempts: 0,
            messages_sent: 0,
        }
    }

    /// Whether the local node initiated the exchange
    pub fn is_initiator(&self) -> bool {
        self.flags.contains(Phase2Flags::INITIATOR)
    }

    /// Whether the commit bit is in effect
    pub fn is_commit(&self) -> bool {
        self.flags.contains(Phase2Flags::COMMIT)
    }

    /// Whether the handle is marked for deletion
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(Phase2Flags::DELETED)
    }

    /// Whether the handle has been stored in the database
    pub fn is_registered(&self) -> bool {
        self.flags.contains(Phase2Flags::REGISTERED)
    }

    /// Role name for logs
    pub fn role(&self) -> &'static str {
        if self.is_initiator() {
            "initiator"
        } else {
            "responder"
        }
    }

    /// Set both IVs after a message was sent or authenticated
    pub fn sync_iv(&mut self, iv: Vec<u8>) {
        self.enc_iv.clone_from(&iv);
        self.dec_iv = iv;
    }
}

impl fmt::Debug for Phase2Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase2Handle")
            .field("msg_id", &format_args!("{:08x}", self.msg_id))
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("group", &self.group)
            .field("sa2", &self.sa2.len())
            .finish_non_exhaustive()
    }
}

/// Phase 2 handles of one IKE SA
#[derive(Debug, Default)]
pub struct Phase2Db {
    handles: HashMap<u32, Phase2Handle>,
}

impl Phase2Db {
    /// Empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle, replacing any handle with the same message ID
    pub fn insert(&mut self, mut handle: Phase2Handle) {
        handle.flags.insert(Phase2Flags::REGISTERED);
        self.handles.insert(handle.msg_id, handle);
    }

    /// Take a handle out for processing
    pub fn take(&mut self, msg_id: u32) -> Option<Phase2Handle> {
        self.handles.remove(&msg_id)
    }

    /// Look up a handle
    pub fn get(&self, msg_id: u32) -> Option<&Phase2Handle> {
        self.handles.get(&msg_id)
    }

    /// Look up a handle mutably
    pub fn get_mut(&mut self, msg_id: u32) -> Option<&mut Phase2Handle> {
        self.handles.get_mut(&msg_id)
    }

    /// Whether a message ID is in use
    pub fn contains(&self, msg_id: u32) -> bool {
        self.handles.contains_key(&msg_id)
    }

    /// Remove a handle
    pub fn remove(&mut self, msg_id: u32) -> Option<Phase2Handle> {
        self.handles.remove(&msg_id)
    }

    /// Number of handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Message IDs of all handles
    pub fn msg_ids(&self) -> Vec<u32> {
        self.handles.keys().copied().collect()
    }

    /// Generate a random message ID not in use
    pub fn new_msg_id(&self, crypto: &dyn CryptoProvider) -> Result<u32> {
        for _ in 0..16 {
            let mut buf = [0u8; 4];
            crypto.random_bytes(&mut buf)?;
            let msg_id = u32::from_be_bytes(buf);
            if msg_id != 0 && !self.contains(msg_id) {
                return Ok(msg_id);
            }
        }
        Err(Error::Internal("Unable to allocate message ID".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::crypto::SoftCrypto;

    #[test]
    fn test_flags() {
        let mut flags = Phase2Flags::new(Phase2Flags::INITIATOR);
        assert!(flags.contains(Phase2Flags::INITIATOR));
        assert!(!flags.contains(Phase2Flags::DELETED));
        flags.insert(Phase2Flags::DELETED | Phase2Flags::COMMIT);
        assert!(flags.contains(Phase2Flags::DELETED | Phase2Flags::COMMIT));
        flags.remove(Phase2Flags::COMMIT);
        assert_eq!(flags.bits(), Phase2Flags::INITIATOR | Phase2Flags::DELETED);
    }

    #[test]
    fn test_handle_roles() {
        let handle = Phase2Handle::initiator(7, Some(DhGroup::Modp1024), Lifetime::Seconds(60));
        assert!(handle.is_initiator());
        assert_eq!(handle.state, Phase2State::State1);
        assert_eq!(handle.role(), "initiator");

        let handle = Phase2Handle::responder(9);
        assert!(!handle.is_initiator());
        assert_eq!(handle.state, Phase2State::State2);
        assert!(!handle.is_registered());
    }

    #[test]
    fn test_sync_iv() {
        let mut handle = Phase2Handle::responder(9);
        handle.sync_iv(vec![1, 2, 3]);
        assert_eq!(handle.enc_iv, vec![1, 2, 3]);
        assert_eq!(handle.dec_iv, vec![1, 2, 3]);
    }

    #[test]
    fn test_db_insert_take() {
        let mut db = Phase2Db::new();
        db.insert(Phase2Handle::responder(9));
        assert!(db.contains(9));
        assert!(db.get(9).unwrap().is_registered());

        let handle = db.take(9).unwrap();
        assert!(db.is_empty());
        db.insert(handle);
        assert_eq!(db.msg_ids(), vec![9]);
    }

    #[test]
    fn test_new_msg_id() {
        let db = Phase2Db::new();
        let crypto = SoftCrypto::new();
        let a = db.new_msg_id(&crypto).unwrap();
        assert_ne!(a, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(Phase2State::State3.to_string(), "STATE_3");
        assert_eq!(Phase2State::Complete.to_string(), "COMPLETE");
    }
}
