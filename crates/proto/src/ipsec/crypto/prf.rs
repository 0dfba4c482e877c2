//! Pseudo-Random Function (PRF) and hash implementations
//!
//! IKEv1 uses the negotiated hash algorithm in HMAC form as its PRF
//! (RFC 2409 Section 4). AES-XCBC-PRF-128 (RFC 4434) is supported as an
//! alternative PRF. Both are exposed through the streaming [`PrfContext`],
//! whose variants are selected explicitly by algorithm.

use crate::ipsec::{Error, Result};
use aes::Aes128;
use ::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// AES block size, which is also the XCBC output size
const XCBC_BLOCK_SIZE: usize = 16;

/// Hash algorithm negotiated in Phase 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HashAlgorithm {
    /// SHA-1
    Sha1,
    /// SHA2-256
    Sha256,
    /// SHA2-384
    Sha384,
    /// SHA2-512
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Start a streaming hash
    pub fn context(self) -> HashContext {
        match self {
            HashAlgorithm::Sha1 => HashContext::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HashContext::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HashContext::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HashContext::Sha512(Sha512::new()),
        }
    }

    /// One-shot digest
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut ctx = self.context();
        ctx.update(data);
        ctx.finalize()
    }
}

/// Streaming hash context
#[derive(Clone)]
pub enum HashContext {
    /// SHA-1 state
    Sha1(Sha1),
    /// SHA2-256 state
    Sha256(Sha256),
    /// SHA2-384 state
    Sha384(Sha384),
    /// SHA2-512 state
    Sha512(Sha512),
}

impl HashContext {
    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashContext::Sha1(h) => h.update(data),
            HashContext::Sha256(h) => h.update(data),
            HashContext::Sha384(h) => h.update(data),
            HashContext::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Vec<u8> {
        match self {
            HashContext::Sha1(h) => h.finalize().to_vec(),
            HashContext::Sha256(h) => h.finalize().to_vec(),
            HashContext::Sha384(h) => h.finalize().to_vec(),
            HashContext::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrfAlgorithm {
    /// HMAC-SHA1
    HmacSha1,
    /// HMAC-SHA2-256
    HmacSha256,
    /// HMAC-SHA2-384
    HmacSha384,
    /// HMAC-SHA2-512
    HmacSha512,
    /// AES-XCBC-PRF-128
    AesXcbc,
}

impl PrfAlgorithm {
    /// HMAC PRF built on a Phase 1 hash algorithm
    pub fn hmac(hash: HashAlgorithm) -> Self {
        match hash {
            HashAlgorithm::Sha1 => PrfAlgorithm::HmacSha1,
            HashAlgorithm::Sha256 => PrfAlgorithm::HmacSha256,
            HashAlgorithm::Sha384 => PrfAlgorithm::HmacSha384,
            HashAlgorithm::Sha512 => PrfAlgorithm::HmacSha512,
        }
    }

    /// Get PRF output length in bytes
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha1 => 20,
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha384 => 48,
            PrfAlgorithm::HmacSha512 => 64,
            PrfAlgorithm::AesXcbc => XCBC_BLOCK_SIZE,
        }
    }

    /// Start a streaming PRF keyed with `key`
    pub fn init(self, key: &[u8]) -> Result<PrfContext> {
        let invalid = |_| Error::CryptoError("Invalid PRF key".into());
        Ok(match self {
            PrfAlgorithm::HmacSha1 => {
                let mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(invalid)?;
                PrfContext::HmacSha1(mac)
            }
            PrfAlgorithm::HmacSha256 => {
                let mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid)?;
                PrfContext::HmacSha256(mac)
            }
            PrfAlgorithm::HmacSha384 => {
                let mac = <Hmac<Sha384> as Mac>::new_from_slice(key).map_err(invalid)?;
                PrfContext::HmacSha384(mac)
            }
            PrfAlgorithm::HmacSha512 => {
                let mac = <Hmac<Sha512> as Mac>::new_from_slice(key).map_err(invalid)?;
                PrfContext::HmacSha512(mac)
            }
            PrfAlgorithm::AesXcbc => PrfContext::AesXcbc(XcbcMac::for_prf(key)),
        })
    }

    /// Compute PRF
    ///
    /// # Arguments
    ///
    /// * `key` - PRF key
    /// * `data` - Input data
    pub fn compute(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut ctx = self.init(key)?;
        ctx.update(data);
        Ok(ctx.finalize())
    }
}

/// Streaming PRF context
pub enum PrfContext {
    /// HMAC-SHA1 state
    HmacSha1(Hmac<Sha1>),
    /// HMAC-SHA2-256 state
    HmacSha256(Hmac<Sha256>),
    /// HMAC-SHA2-384 state
    HmacSha384(Hmac<Sha384>),
    /// HMAC-SHA2-512 state
    HmacSha512(Hmac<Sha512>),
    /// AES-XCBC state
    AesXcbc(XcbcMac),
}

impl PrfContext {
    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            PrfContext::HmacSha1(m) => m.update(data),
            PrfContext::HmacSha256(m) => m.update(data),
            PrfContext::HmacSha384(m) => m.update(data),
            PrfContext::HmacSha512(m) => m.update(data),
            PrfContext::AesXcbc(m) => m.update(data),
        }
    }

    /// Output length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            PrfContext::HmacSha1(_) => 20,
            PrfContext::HmacSha256(_) => 32,
            PrfContext::HmacSha384(_) => 48,
            PrfContext::HmacSha512(_) => 64,
            PrfContext::AesXcbc(_) => XCBC_BLOCK_SIZE,
        }
    }

    /// Finish and return the PRF output
    pub fn finalize(self) -> Vec<u8> {
        match self {
            PrfContext::HmacSha1(m) => m.finalize().into_bytes().to_vec(),
            PrfContext::HmacSha256(m) => m.finalize().into_bytes().to_vec(),
            PrfContext::HmacSha384(m) => m.finalize().into_bytes().to_vec(),
            PrfContext::HmacSha512(m) => m.finalize().into_bytes().to_vec(),
            PrfContext::AesXcbc(m) => m.finalize().to_vec(),
        }
    }
}

/// AES-XCBC-MAC (RFC 3566)
#[derive(Clone)]
pub struct XcbcMac {
    k1: Aes128,
    k2: [u8; XCBC_BLOCK_SIZE],
    k3: [u8; XCBC_BLOCK_SIZE],
    state: [u8; XCBC_BLOCK_SIZE],
    pending: Vec<u8>,
}

impl XcbcMac {
    /// Create a MAC keyed with a 128-bit key
    pub fn new(key: &[u8; XCBC_BLOCK_SIZE]) -> Self {
        let base = Aes128::new(GenericArray::from_slice(key));
        let derive = |fill: u8| {
            let mut block = GenericArray::clone_from_slice(&[fill; XCBC_BLOCK_SIZE]);
            base.encrypt_block(&mut block);
            let mut out = [0u8; XCBC_BLOCK_SIZE];
            out.copy_from_slice(&block);
            out
        };
        let k1 = derive(0x01);
        XcbcMac {
            k1: Aes128::new(GenericArray::from_slice(&k1)),
            k2: derive(0x02),
            k3: derive(0x03),
            state: [0u8; XCBC_BLOCK_SIZE],
            pending: Vec::with_capacity(XCBC_BLOCK_SIZE * 2),
        }
    }

    /// Create a MAC with the PRF key adjustment of RFC 4434
    ///
    /// Short keys are zero padded, long keys are first reduced with a zero key.
    pub fn for_prf(key: &[u8]) -> Self {
        let mut k = [0u8; XCBC_BLOCK_SIZE];
        if key.len() <= XCBC_BLOCK_SIZE {
            k[..key.len()].copy_from_slice(key);
        } else {
            let mut reducer = XcbcMac::new(&[0u8; XCBC_BLOCK_SIZE]);
            reducer.update(key);
            k = reducer.finalize();
        }
        XcbcMac::new(&k)
    }

    fn process_block(&mut self, block: &[u8]) {
        for (s, b) in self.state.iter_mut().zip(block) {
            *s ^= *b;
        }
        let mut ga = GenericArray::clone_from_slice(&self.state);
        self.k1.encrypt_block(&mut ga);
        self.state.copy_from_slice(&ga);
    }

    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        // The final block is always held back for the K2/K3 step
        while self.pending.len() > XCBC_BLOCK_SIZE {
            let block: Vec<u8> = self.pending.drain(..XCBC_BLOCK_SIZE).collect();
            self.process_block(&block);
        }
    }

    /// Finish and return the 128-bit MAC
    pub fn finalize(mut self) -> [u8; XCBC_BLOCK_SIZE] {
        let mut last = [0u8; XCBC_BLOCK_SIZE];
        let subkey = if self.pending.len() == XCBC_BLOCK_SIZE {
            last.copy_from_slice(&self.pending);
            self.k2
        } else {
            last[..self.pending.len()].copy_from_slice(&self.pending);
            last[self.pending.len()] = 0x80;
            self.k3
        };
        for (l, k) in last.iter_mut().zip(subkey.iter()) {
            *l ^= *k;
        }
        self.process_block(&last);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_output_len() {
        assert_eq!(HashAlgorithm::Sha1.digest(b"abc").len(), 20);
        assert_eq!(HashAlgorithm::Sha256.digest(b"abc").len(), 32);
        assert_eq!(HashAlgorithm::Sha512.output_len(), 64);
    }

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_hmac_sha256_rfc4231() {
        // RFC 4231 test case 2
        let out = PrfAlgorithm::HmacSha256
            .compute(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(
            hex::encode(out),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut ctx = PrfAlgorithm::HmacSha1.init(b"key").unwrap();
        ctx.update(b"hello ");
        ctx.update(b"world");
        let streamed = ctx.finalize();
        let one_shot = PrfAlgorithm::HmacSha1.compute(b"key", b"hello world").unwrap();
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn test_xcbc_rfc3566_vectors() {
        let key: [u8; 16] = core::array::from_fn(|i| i as u8);

        // Test case 1: empty message
        let mac = XcbcMac::new(&key);
        assert_eq!(hex::encode(mac.finalize()), "75f0251d528ac01c4573dfd584d79f29");

        // Test case 2: 3-byte message
        let mut mac = XcbcMac::new(&key);
        mac.update(&[0x00, 0x01, 0x02]);
        assert_eq!(hex::encode(mac.finalize()), "5b376580ae2f19afe7219ceef172756f");

        // Test case 3: 16-byte message
        let msg: Vec<u8> = (0u8..16).collect();
        let mut mac = XcbcMac::new(&key);
        mac.update(&msg);
        assert_eq!(hex::encode(mac.finalize()), "d2a246fa349b68a79998a4394ff7a263");

        // Test case 4: 20-byte message fed in pieces
        let msg: Vec<u8> = (0u8..20).collect();
        let mut mac = XcbcMac::new(&key);
        mac.update(&msg[..7]);
        mac.update(&msg[7..]);
        assert_eq!(hex::encode(mac.finalize()), "47f51b4564966215b8985c63055ed308");
    }

    #[test]
    fn test_xcbc_prf_key_lengths() {
        // Short and long keys are accepted
        assert_eq!(PrfAlgorithm::AesXcbc.compute(b"short", b"data").unwrap().len(), 16);
        assert_eq!(
            PrfAlgorithm::AesXcbc.compute(&[7u8; 40], b"data").unwrap().len(),
            16
        );
    }

    #[test]
    fn test_prf_output_len() {
        assert_eq!(PrfAlgorithm::hmac(HashAlgorithm::Sha1), PrfAlgorithm::HmacSha1);
        assert_eq!(PrfAlgorithm::AesXcbc.output_len(), 16);
        let ctx = PrfAlgorithm::HmacSha384.init(b"k").unwrap();
        assert_eq!(ctx.output_len(), 48);
    }
}
