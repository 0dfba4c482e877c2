//! Traffic selectors carried in Quick Mode identification payloads
//!
//! IDci / IDcr name the traffic an IPsec SA protects (RFC 2409 Section 5.5).
//! Only address and subnet identities are supported.

use super::constants::id_type;
use super::payload::IdPayload;
use crate::ipsec::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address range plus upper-layer protocol and port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrafficSelector {
    /// Network address
    pub addr: IpAddr,
    /// Prefix length; a full-length prefix names a single host
    pub prefix_len: u8,
    /// IP protocol, zero for any
    pub protocol: u8,
    /// Port, zero for any
    pub port: u16,
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn prefix_from_mask(mask: &[u8]) -> Result<u8> {
    let mut prefix = 0u8;
    let mut seen_zero = false;
    for byte in mask {
        for bit in (0..8).rev() {
            if byte & (1 << bit) != 0 {
                if seen_zero {
                    return Err(Error::InvalidId("Non-contiguous subnet mask".into()));
                }
                prefix += 1;
            } else {
                seen_zero = true;
            }
        }
    }
    Ok(prefix)
}

fn mask_bytes(prefix_len: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let bits = (prefix_len as usize).saturating_sub(i * 8).min(8);
            if bits == 0 {
                0
            } else {
                0xffu8 << (8 - bits)
            }
        })
        .collect()
}

impl TrafficSelector {
    /// Selector for a single host, any protocol and port
    pub fn host(addr: IpAddr) -> Self {
        TrafficSelector {
            addr,
            prefix_len: max_prefix(&addr),
            protocol: 0,
            port: 0,
        }
    }

    /// Selector for a subnet, any protocol and port
    pub fn subnet(addr: IpAddr, prefix_len: u8) -> Self {
        TrafficSelector {
            addr,
            prefix_len: prefix_len.min(max_prefix(&addr)),
            protocol: 0,
            port: 0,
        }
    }

    /// Restrict to an upper-layer protocol and port
    pub fn with_port(mut self, protocol: u8, port: u16) -> Self {
        self.protocol = protocol;
        self.port = port;
        self
    }

    /// Whether this selector names a single host
    pub fn is_host(&self) -> bool {
        self.prefix_len == max_prefix(&self.addr)
    }

    /// Whether `addr` lies within the selector's address range
    pub fn contains(&self, addr: &IpAddr) -> bool {
        let (net, ip): (Vec<u8>, Vec<u8>) = match (&self.addr, addr) {
            (IpAddr::V4(n), IpAddr::V4(a)) => (n.octets().to_vec(), a.octets().to_vec()),
            (IpAddr::V6(n), IpAddr::V6(a)) => (n.octets().to_vec(), a.octets().to_vec()),
            _ => return false,
        };
        let mask = mask_bytes(self.prefix_len, net.len());
        net.iter()
            .zip(ip.iter())
            .zip(mask.iter())
            .all(|((n, a), m)| n & m == a & m)
    }

    /// Whether `other` is fully covered by this selector
    pub fn covers(&self, other: &TrafficSelector) -> bool {
        self.prefix_len <= other.prefix_len
            && self.contains(&other.addr)
            && (self.protocol == 0 || self.protocol == other.protocol)
            && (self.port == 0 || self.port == other.port)
    }

    /// Encode as an identification payload
    pub fn to_id_payload(&self) -> IdPayload {
        let (id_type, data) = match self.addr {
            IpAddr::V4(v4) if self.is_host() => (id_type::IPV4_ADDR, v4.octets().to_vec()),
            IpAddr::V4(v4) => {
                let mut data = v4.octets().to_vec();
                data.extend_from_slice(&mask_bytes(self.prefix_len, 4));
                (id_type::IPV4_ADDR_SUBNET, data)
            }
            IpAddr::V6(v6) if self.is_host() => (id_type::IPV6_ADDR, v6.octets().to_vec()),
            IpAddr::V6(v6) => {
                let mut data = v6.octets().to_vec();
                data.extend_from_slice(&mask_bytes(self.prefix_len, 16));
                (id_type::IPV6_ADDR_SUBNET, data)
            }
        };
        IdPayload {
            id_type,
            protocol: self.protocol,
            port: self.port,
            data,
        }
    }

    /// Decode an identification payload
    pub fn from_id_payload(id: &IdPayload) -> Result<Self> {
        let bad_len = || {
            Error::InvalidId(format!(
                "Bad length {} for ID type {}",
                id.data.len(),
                id.id_type
            ))
        };
        let (addr, prefix_len) = match id.id_type {
            id_type::IPV4_ADDR => {
                let octets: [u8; 4] = id.data.as_slice().try_into().map_err(|_| bad_len())?;
                (IpAddr::V4(Ipv4Addr::from(octets)), 32)
            }
            id_type::IPV4_ADDR_SUBNET => {
                if id.data.len() != 8 {
                    return Err(bad_len());
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&id.data[..4]);
                (IpAddr::V4(Ipv4Addr::from(octets)), prefix_from_mask(&id.data[4..])?)
            }
            id_type::IPV6_ADDR => {
                let octets: [u8; 16] = id.data.as_slice().try_into().map_err(|_| bad_len())?;
                (IpAddr::V6(Ipv6Addr::from(octets)), 128)
            }
            id_type::IPV6_ADDR_SUBNET => {
                if id.data.len() != 32 {
                    return Err(bad_len());
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&id.data[..16]);
                (IpAddr::V6(Ipv6Addr::from(octets)), prefix_from_mask(&id.data[16..])?)
            }
            other => {
                return Err(Error::InvalidId(format!("Unsupported ID type {}", other)));
            }
        };
        Ok(TrafficSelector {
            addr,
            prefix_len,
            protocol: id.protocol,
            port: id.port,
        })
    }
}
