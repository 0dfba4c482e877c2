//! Cipher implementations for ISAKMP message encryption
//!
//! Phase 2 and Informational messages are encrypted with the CBC cipher
//! negotiated in Phase 1 (RFC 2409 Appendix B). The IV chains across
//! messages, so callers keep the last ciphertext block as the next IV.

use crate::ipsec::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::{Decryptor, Encryptor};
use ::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;
type Aes192CbcEnc = Encryptor<Aes192>;
type Aes192CbcDec = Decryptor<Aes192>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Phase 1 encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CipherAlgorithm {
    /// AES-CBC with 128-bit key
    Aes128Cbc,
    /// AES-CBC with 192-bit key
    Aes192Cbc,
    /// AES-CBC with 256-bit key
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Get key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes192Cbc => 24,
            CipherAlgorithm::Aes256Cbc => 32,
        }
    }

    /// Block size in bytes, which is also the IV length
    pub fn block_size(self) -> usize {
        16
    }

    /// Pad `data` with zero octets up to a multiple of the block size
    ///
    /// RFC 2408 Section 3.1 leaves the padding content open; the ISAKMP
    /// header length tells the receiver where the payload chain ends.
    pub fn pad(self, data: &mut Vec<u8>) {
        let bs = self.block_size();
        let rem = data.len() % bs;
        if rem != 0 {
            data.resize(data.len() + bs - rem, 0);
        }
    }

    fn check(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::CryptoError(format!(
                "Invalid key length: expected {}, got {}",
                self.key_len(),
                key.len()
            )));
        }
        if iv.len() != self.block_size() {
            return Err(Error::CryptoError(format!(
                "Invalid IV length: expected {}, got {}",
                self.block_size(),
                iv.len()
            )));
        }
        if data.is_empty() || data.len() % self.block_size() != 0 {
            return Err(Error::CryptoError(
                "Data is not a multiple of the block size".into(),
            ));
        }
        Ok(())
    }

    /// Encrypt block-aligned data
    ///
    /// # Arguments
    ///
    /// * `key` - Encryption key (derived from SKEYID_e)
    /// * `iv` - Current IV of the exchange
    /// * `plaintext` - Padded plaintext
    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check(key, iv, plaintext)?;
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        let init = |_| Error::CryptoError("Failed to create CBC encryptor".into());
        let pad = |_| Error::CryptoError("CBC encryption failed".into());

        match self {
            CipherAlgorithm::Aes128Cbc => {
                Aes128CbcEnc::new_from_slices(key, iv)
                    .map_err(init)?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(pad)?;
            }
            CipherAlgorithm::Aes192Cbc => {
                Aes192CbcEnc::new_from_slices(key, iv)
                    .map_err(init)?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(pad)?;
            }
            CipherAlgorithm::Aes256Cbc => {
                Aes256CbcEnc::new_from_slices(key, iv)
                    .map_err(init)?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(pad)?;
            }
        }
        Ok(buf)
    }

    /// Decrypt block-aligned data
    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check(key, iv, ciphertext)?;
        let mut buf = ciphertext.to_vec();
        let init = |_| Error::CryptoError("Failed to create CBC decryptor".into());
        let unpad = |_| Error::CryptoError("CBC decryption failed".into());

        match self {
            CipherAlgorithm::Aes128Cbc => {
                Aes128CbcDec::new_from_slices(key, iv)
                    .map_err(init)?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(unpad)?;
            }
            CipherAlgorithm::Aes192Cbc => {
                Aes192CbcDec::new_from_slices(key, iv)
                    .map_err(init)?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(unpad)?;
            }
            CipherAlgorithm::Aes256Cbc => {
                Aes256CbcDec::new_from_slices(key, iv)
                    .map_err(init)?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(unpad)?;
            }
        }
        Ok(buf)
    }

    /// Last ciphertext block, the IV of the next message in the chain
    pub fn next_iv(self, ciphertext: &[u8]) -> Vec<u8> {
        let bs = self.block_size();
        if ciphertext.len() < bs {
            return Vec::new();
        }
        ciphertext[ciphertext.len() - bs..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_len() {
        assert_eq!(CipherAlgorithm::Aes128Cbc.key_len(), 16);
        assert_eq!(CipherAlgorithm::Aes256Cbc.key_len(), 32);
        assert_eq!(CipherAlgorithm::Aes192Cbc.block_size(), 16);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let alg = CipherAlgorithm::Aes256Cbc;
        let key = [0x42u8; 32];
        let iv = [0x07u8; 16];
        let mut plaintext = b"quick mode payload chain".to_vec();
        alg.pad(&mut plaintext);
        assert_eq!(plaintext.len(), 32);

        let ct = alg.encrypt(&key, &iv, &plaintext).unwrap();
        assert_ne!(ct, plaintext);
        assert_eq!(alg.decrypt(&key, &iv, &ct).unwrap(), plaintext);
        assert_eq!(alg.next_iv(&ct), ct[16..].to_vec());
    }

    #[test]
    fn test_nist_sp800_38a_cbc_aes128() {
        // NIST SP 800-38A F.2.1, first block
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let ct = CipherAlgorithm::Aes128Cbc.encrypt(&key, &iv, &pt).unwrap();
        assert_eq!(hex::encode(ct), "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn test_rejects_unaligned_data() {
        let alg = CipherAlgorithm::Aes128Cbc;
        assert!(alg.encrypt(&[0u8; 16], &[0u8; 16], &[1, 2, 3]).is_err());
        assert!(alg.encrypt(&[0u8; 8], &[0u8; 16], &[0u8; 16]).is_err());
        assert!(alg.decrypt(&[0u8; 16], &[0u8; 8], &[0u8; 16]).is_err());
    }
}
