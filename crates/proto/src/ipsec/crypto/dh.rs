//! Diffie-Hellman over the Oakley / RFC 3526 MODP groups
//!
//! Used for Perfect Forward Secrecy in Quick Mode. Public values and shared
//! secrets are always encoded with the full length of the group prime, as
//! required for the KE payload and for g(qm)^xy in KEYMAT.

use crate::ipsec::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use zeroize::{Zeroize, Zeroizing};

const MODP_768: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A63A3620FFFFFFFFFFFFFFFF";

const MODP_1024: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
    FFFFFFFFFFFFFFFF";

const MODP_1536: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF";

const MODP_2048: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
    E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
    DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
    15728E5A8AACAA68FFFFFFFFFFFFFFFF";

fn parse_prime(hex_str: &str) -> BigUint {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    BigUint::parse_bytes(cleaned.as_bytes(), 16).unwrap_or_default()
}

static P768: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_768));
static P1024: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_1024));
static P1536: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_1536));
static P2048: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_2048));

/// Oakley group description (RFC 2409 Section 6, RFC 3526)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DhGroup {
    /// 768-bit MODP group (1)
    Modp768,
    /// 1024-bit MODP group (2)
    Modp1024,
    /// 1536-bit MODP group (5)
    Modp1536,
    /// 2048-bit MODP group (14)
    Modp2048,
}

impl DhGroup {
    /// Group description value used in GROUP_DESC attributes
    pub fn to_u16(self) -> u16 {
        match self {
            DhGroup::Modp768 => 1,
            DhGroup::Modp1024 => 2,
            DhGroup::Modp1536 => 5,
            DhGroup::Modp2048 => 14,
        }
    }

    /// Convert from a group description value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(DhGroup::Modp768),
            2 => Some(DhGroup::Modp1024),
            5 => Some(DhGroup::Modp1536),
            14 => Some(DhGroup::Modp2048),
            _ => None,
        }
    }

    /// Group prime
    pub fn prime(self) -> &'static BigUint {
        match self {
            DhGroup::Modp768 => &P768,
            DhGroup::Modp1024 => &P1024,
            DhGroup::Modp1536 => &P1536,
            DhGroup::Modp2048 => &P2048,
        }
    }

    /// Group generator
    pub fn generator(self) -> BigUint {
        BigUint::from(2u32)
    }

    /// Length of the prime, and so of every public value, in bytes
    pub fn prime_len(self) -> usize {
        match self {
            DhGroup::Modp768 => 96,
            DhGroup::Modp1024 => 128,
            DhGroup::Modp1536 => 192,
            DhGroup::Modp2048 => 256,
        }
    }
}

fn to_fixed_len(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// Local Diffie-Hellman key pair
///
/// The private value is wiped when the pair is dropped.
pub struct DhKeyPair {
    group: DhGroup,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl DhKeyPair {
    /// Generate a fresh key pair in `group`
    pub fn generate(group: DhGroup) -> Result<Self> {
        let p = group.prime();
        if p.bits() == 0 {
            return Err(Error::CryptoError("DH group prime unavailable".into()));
        }

        let mut rng = rand::thread_rng();
        let p_minus_one = p.clone() - 1u32;
        // Generate random private key x (1 < x < p-1)
        let x = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);
        let y = group.generator().modpow(&x, p);

        Ok(DhKeyPair {
            group,
            private_key: x.to_bytes_be(),
            public_key: to_fixed_len(&y, group.prime_len()),
        })
    }

    /// Group of this key pair
    pub fn group(&self) -> DhGroup {
        self.group
    }

    /// Public value g^x mod p
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute g^xy mod p from the peer's public value
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let p = self.group.prime();
        let y_peer = BigUint::from_bytes_be(peer_public);

        // Validate peer's public key: 1 < y < p-1
        if y_peer <= BigUint::from(1u32) || y_peer >= p.clone() - 1u32 {
            return Err(Error::CryptoError(
                "Invalid peer public key: out of range".into(),
            ));
        }

        let x = BigUint::from_bytes_be(&self.private_key);
        let k = y_peer.modpow(&x, p);
        Ok(Zeroizing::new(to_fixed_len(&k, self.group.prime_len())))
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("group", &self.group)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl Drop for DhKeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prime_lengths() {
        for group in [
            DhGroup::Modp768,
            DhGroup::Modp1024,
            DhGroup::Modp1536,
            DhGroup::Modp2048,
        ] {
            assert_eq!(group.prime().bits() as usize, group.prime_len() * 8);
        }
    }

    #[test]
    fn test_group_ids() {
        assert_eq!(DhGroup::from_u16(2), Some(DhGroup::Modp1024));
        assert_eq!(DhGroup::Modp2048.to_u16(), 14);
        assert_eq!(DhGroup::from_u16(3), None);
    }

    #[test]
    fn test_key_exchange() {
        let a = DhKeyPair::generate(DhGroup::Modp1024).unwrap();
        let b = DhKeyPair::generate(DhGroup::Modp1024).unwrap();
        assert_eq!(a.public_key().len(), 128);

        let s1 = a.compute_shared_secret(b.public_key()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key()).unwrap();
        assert_eq!(*s1, *s2);
        assert_eq!(s1.len(), 128);
    }

    #[test]
    fn test_invalid_peer_key() {
        let a = DhKeyPair::generate(DhGroup::Modp768).unwrap();
        assert!(a.compute_shared_secret(&[0x01]).is_err());
        assert!(a.compute_shared_secret(&[0xff; 96]).is_err());
    }
}
