//! IKE SA records consumed by Phase 2
//!
//! Phase 1 is negotiated elsewhere; what Quick Mode and Informational need
//! from it is captured in [`IkeSaParams`]: cookies, peer addresses and the
//! derived keying material. Each IKE SA owns the Phase 2 handles running
//! under it.

use super::message::Cookies;
use super::phase2::Phase2Db;
use crate::ipsec::crypto::{CipherAlgorithm, HashAlgorithm, PrfAlgorithm};
use crate::ipsec::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use zeroize::Zeroizing;

/// IKE SA lifecycle as seen by Phase 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkeSaState {
    /// Phase 1 still running
    Negotiating,
    /// Phase 1 complete, Phase 2 may run
    Established,
    /// Expired or deleted, waiting for removal
    Expired,
}

/// Keying material produced by Phase 1
#[derive(Clone)]
pub struct Phase1Keys {
    /// Negotiated hash, also used for IV derivation
    pub hash: HashAlgorithm,
    /// Negotiated PRF
    pub prf: PrfAlgorithm,
    /// Negotiated cipher
    pub cipher: CipherAlgorithm,
    /// SKEYID_d, for KEYMAT
    pub skeyid_d: Zeroizing<Vec<u8>>,
    /// SKEYID_a, for message authentication
    pub skeyid_a: Zeroizing<Vec<u8>>,
    /// Encryption key derived from SKEYID_e
    pub enc_key: Zeroizing<Vec<u8>>,
    /// Last CBC block of Phase 1, seed of every Phase 2 IV
    pub last_iv: Vec<u8>,
}

impl Phase1Keys {
    /// Check that key lengths fit the negotiated algorithms
    pub fn validate(&self) -> Result<()> {
        if self.enc_key.len() != self.cipher.key_len() {
            return Err(Error::InvalidParameter(format!(
                "Encryption key must be {} bytes",
                self.cipher.key_len()
            )));
        }
        if self.last_iv.len() < self.cipher.block_size() {
            return Err(Error::InvalidParameter("Phase 1 IV too short".into()));
        }
        if self.skeyid_a.is_empty() || self.skeyid_d.is_empty() {
            return Err(Error::InvalidParameter("SKEYID material missing".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Phase1Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase1Keys")
            .field("hash", &self.hash)
            .field("prf", &self.prf)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

/// Phase 1 parameters Phase 2 reads
#[derive(Debug, Clone)]
pub struct IkeSaParams {
    /// Cookie pair naming the SA
    pub cookies: Cookies,
    /// Local IKE endpoint
    pub local_addr: SocketAddr,
    /// Peer IKE endpoint
    pub peer_addr: SocketAddr,
    /// Lifecycle state
    pub state: IkeSaState,
    /// Keying material, absent until Phase 1 derives it
    pub keys: Option<Phase1Keys>,
    /// INITIAL-CONTACT already sent on this SA
    pub initial_contact_sent: bool,
}

impl IkeSaParams {
    /// Established SA with the given keys
    pub fn established(
        cookies: Cookies,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        keys: Phase1Keys,
    ) -> Result<Self> {
        keys.validate()?;
        Ok(IkeSaParams {
            cookies,
            local_addr,
            peer_addr,
            state: IkeSaState::Established,
            keys: Some(keys),
            initial_contact_sent: false,
        })
    }

    /// Whether Phase 2 may run
    pub fn is_established(&self) -> bool {
        self.state == IkeSaState::Established && self.keys.is_some()
    }

    /// Keying material or `NoKeymat`
    pub fn keys(&self) -> Result<&Phase1Keys> {
        self.keys.as_ref().ok_or(Error::NoKeymat)
    }

    /// Peer IP address
    pub fn peer_ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }
}

/// IKE SA with its Phase 2 exchanges
#[derive(Debug)]
pub struct IkeSa {
    /// Phase 1 parameters
    pub params: IkeSaParams,
    /// Phase 2 handles keyed by message ID
    pub phase2: Phase2Db,
}

impl IkeSa {
    /// Wrap Phase 1 parameters
    pub fn new(params: IkeSaParams) -> Self {
        IkeSa {
            params,
            phase2: Phase2Db::new(),
        }
    }
}

/// IKE SAs known to the engine
#[derive(Debug, Default)]
pub struct SaTable {
    sas: HashMap<Cookies, IkeSa>,
}

impl SaTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an IKE SA
    pub fn insert(&mut self, sa: IkeSa) -> Option<IkeSa> {
        self.sas.insert(sa.params.cookies, sa)
    }

    /// Look up an IKE SA
    pub fn get(&self, cookies: &Cookies) -> Option<&IkeSa> {
        self.sas.get(cookies)
    }

    /// Look up an IKE SA mutably
    pub fn get_mut(&mut self, cookies: &Cookies) -> Option<&mut IkeSa> {
        self.sas.get_mut(cookies)
    }

    /// Remove an IKE SA
    pub fn remove(&mut self, cookies: &Cookies) -> Option<IkeSa> {
        self.sas.remove(cookies)
    }

    /// Mark an IKE SA expired, returning whether it existed
    pub fn expire(&mut self, cookies: &Cookies) -> bool {
        match self.sas.get_mut(cookies) {
            Some(sa) => {
                sa.params.state = IkeSaState::Expired;
                true
            }
            None => false,
        }
    }

    /// Cookies of every SA with `peer`, except `keep`
    pub fn with_peer(&self, peer: IpAddr, keep: Option<&Cookies>) -> Vec<Cookies> {
        self.sas
            .values()
            .filter(|sa| sa.params.peer_ip() == peer && Some(&sa.params.cookies) != keep)
            .map(|sa| sa.params.cookies)
            .collect()
    }

    /// Number of IKE SAs
    pub fn len(&self) -> usize {
        self.sas.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.sas.is_empty()
    }

    /// Iterate over IKE SAs
    pub fn iter(&self) -> impl Iterator<Item = &IkeSa> {
        self.sas.values()
    }
}
