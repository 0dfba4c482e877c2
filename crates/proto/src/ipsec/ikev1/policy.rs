//! IPsec policy and SA database collaborator
//!
//! Quick Mode looks up the policy covering a pair of traffic selectors,
//! allocates local SPIs from it and hands finished SA pairs back for
//! installation. The database is shared with the data path, so every access
//! goes through a lock that is never held across a network send.

use super::sa2::SpiAllocator;
use super::security::{IpsecProtocol, Lifetime, SecurityProtocol};
use super::selector::TrafficSelector;
use crate::ipsec::crypto::DhGroup;
use crate::ipsec::{Error, Result};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// IPsec policy applied to traffic between two selectors
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Policy {
    /// Local side of the protected traffic
    pub local: TrafficSelector,
    /// Remote side of the protected traffic
    pub remote: TrafficSelector,
    /// Acceptable security protocols, in preference order; a tunnel-mode
    /// entry closes a bundle span
    pub security: Vec<SecurityProtocol>,
    /// PFS group, `None` without PFS
    pub pfs_group: Option<DhGroup>,
    /// Requested SA lifetime
    pub lifetime: Lifetime,
}

impl Policy {
    /// Whether the policy covers traffic between `local` and `remote`
    pub fn covers(&self, local: &TrafficSelector, remote: &TrafficSelector) -> bool {
        self.local.covers(local) && self.remote.covers(remote)
    }
}

/// Hard and soft lifetime of an installed SA pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaLifetime {
    /// Expiry
    pub hard: Duration,
    /// Rekey point, unset when the hard lifetime is not above the offset
    pub soft: Option<Duration>,
}

impl SaLifetime {
    /// Derive from the negotiated seconds and the soft offset
    pub fn from_secs(secs: u32, soft_offset: Duration) -> Self {
        let hard = Duration::from_secs(u64::from(secs));
        let soft = if hard > soft_offset {
            Some(hard - soft_offset)
        } else {
            None
        };
        SaLifetime { hard, soft }
    }
}

/// Inbound / outbound IPsec SA pair produced by Quick Mode
#[derive(Clone, PartialEq, Eq)]
pub struct SaPair {
    /// Negotiated security descriptor
    pub security: SecurityProtocol,
    /// Peer address
    pub peer: IpAddr,
    /// SPI of the inbound SA, chosen locally
    pub inbound_spi: u32,
    /// SPI of the outbound SA, chosen by the peer
    pub outbound_spi: u32,
    /// Inbound keying material
    pub inbound_keymat: Zeroizing<Vec<u8>>,
    /// Outbound keying material
    pub outbound_keymat: Zeroizing<Vec<u8>>,
    /// Lifetimes
    pub lifetime: SaLifetime,
    /// Local traffic selector
    pub local_ts: TrafficSelector,
    /// Remote traffic selector
    pub remote_ts: TrafficSelector,
}

impl std::fmt::Debug for SaPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaPair")
            .field("security", &self.security)
            .field("peer", &self.peer)
            .field("inbound_spi", &format_args!("{:08x}", self.inbound_spi))
            .field("outbound_spi", &format_args!("{:08x}", self.outbound_spi))
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Policy and SA database consumed by the negotiation engine
pub trait PolicyStore: Send + Sync {
    /// Policy covering traffic between two selectors
    fn find_policy(&self, local: &TrafficSelector, remote: &TrafficSelector) -> Option<Policy>;

    /// Policy covering traffic between two hosts
    fn find_by_addresses(&self, local: IpAddr, remote: IpAddr) -> Option<Policy> {
        self.find_policy(&TrafficSelector::host(local), &TrafficSelector::host(remote))
    }

    /// Allocate a local SPI
    fn allocate_spi(&self, protocol: IpsecProtocol) -> u32;

    /// Install an SA pair
    fn install_pair(&self, pair: SaPair) -> Result<()>;

    /// Remove the pair whose outbound SA has `outbound_spi`; the inbound SA
    /// goes with it
    ///
    /// # Errors
    ///
    /// `SaNotFound` if no such pair exists for `peer`
    fn remove_pair(&self, protocol: IpsecProtocol, outbound_spi: u32, peer: IpAddr) -> Result<()>;

    /// Remove every pair with `peer`, returning how many were removed
    fn purge_peer(&self, peer: IpAddr) -> usize;

    /// Whether any pair with `peer` is installed
    fn has_peer(&self, peer: IpAddr) -> bool;
}

#[derive(Debug, Default)]
struct Database {
    policies: Vec<Policy>,
    pairs: Vec<SaPair>,
}

/// In-memory [`PolicyStore`]
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    db: Mutex<Database>,
    spis: SpiAllocator,
}

impl MemoryPolicyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose SPI allocator starts at `first_spi`
    pub fn with_first_spi(first_spi: u32) -> Self {
        MemoryPolicyStore {
            db: Mutex::new(Database::default()),
            spis: SpiAllocator::starting_at(first_spi),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        // A panic while holding the lock leaves plain data behind
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a policy; earlier policies take precedence
    pub fn add_policy(&self, policy: Policy) {
        self.lock().policies.push(policy);
    }

    /// Copy of the installed SA pairs
    pub fn installed(&self) -> Vec<SaPair> {
        self.lock().pairs.clone()
    }

    /// Number of installed SA pairs
    pub fn pair_count(&self) -> usize {
        self.lock().pairs.len()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn find_policy(&self, local: &TrafficSelector, remote: &TrafficSelector) -> Option<Policy> {
        self.lock()
            .policies
            .iter()
            .find(|p| p.covers(local, remote))
            .cloned()
    }

    fn allocate_spi(&self, _protocol: IpsecProtocol) -> u32 {
        self.spis.allocate()
    }

    fn install_pair(&self, pair: SaPair) -> Result<()> {
        let mut db = self.lock();
        if db.pairs.iter().any(|p| {
            p.security.protocol == pair.security.protocol && p.inbound_spi == pair.inbound_spi
        }) {
            return Err(Error::InvalidSpi(pair.inbound_spi));
        }
        debug!(
            spi_in = %hex::encode(pair.inbound_spi.to_be_bytes()),
            spi_out = %hex::encode(pair.outbound_spi.to_be_bytes()),
            "SA pair added to database"
        );
        db.pairs.push(pair);
        Ok(())
    }

    fn remove_pair(&self, protocol: IpsecProtocol, outbound_spi: u32, peer: IpAddr) -> Result<()> {
        let mut db = self.lock();
        let index = db
            .pairs
            .iter()
            .position(|p| {
                p.security.protocol == protocol && p.outbound_spi == outbound_spi && p.peer == peer
            })
            .ok_or_else(|| Error::SaNotFound(format!("{:08x}", outbound_spi)))?;
        db.pairs.remove(index);
        Ok(())
    }

    fn purge_peer(&self, peer: IpAddr) -> usize {
        let mut db = self.lock();
        let before = db.pairs.len();
        db.pairs.retain(|p| p.peer != peer);
        before - db.pairs.len()
    }

    fn has_peer(&self, peer: IpAddr) -> bool {
        self.lock().pairs.iter().any(|p| p.peer == peer)
    }
}
