//! AES-128 block operations used by the software gateway.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hdcp_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

const BLOCK: usize = 16;

/// AES-128 in single-block mode over block-aligned buffers.
#[derive(ZeroizeOnDrop)]
pub struct BlockCipher {
    key: [u8; 16],
}

impl BlockCipher {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes128, CryptoError> {
        Aes128::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 16,
            actual: self.key.len(),
        })
    }

    /// Encrypt each 16-byte block independently.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() % BLOCK != 0 {
            return Err(CryptoError::Wrap(
                "Plaintext must be a multiple of 16 bytes".to_string(),
            ));
        }
        let cipher = self.cipher()?;
        let mut out = plaintext.to_vec();
        for chunk in out.chunks_mut(BLOCK) {
            cipher.encrypt_block(aes::Block::from_mut_slice(chunk));
        }
        Ok(out)
    }

    /// Decrypt each 16-byte block independently.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % BLOCK != 0 {
            return Err(CryptoError::Wrap(
                "Ciphertext must be a multiple of 16 bytes".to_string(),
            ));
        }
        let cipher = self.cipher()?;
        let mut out = ciphertext.to_vec();
        for chunk in out.chunks_mut(BLOCK) {
            cipher.decrypt_block(aes::Block::from_mut_slice(chunk));
        }
        Ok(out)
    }

    /// Encrypt exactly one block.
    pub fn encrypt_block(&self, block: [u8; 16]) -> Result<[u8; 16], CryptoError> {
        let cipher = self.cipher()?;
        let mut out = block;
        cipher.encrypt_block(aes::Block::from_mut_slice(&mut out));
        Ok(out)
    }

    /// Decrypt exactly one block.
    pub fn decrypt_block(&self, block: [u8; 16]) -> Result<[u8; 16], CryptoError> {
        let cipher = self.cipher()?;
        let mut out = block;
        cipher.decrypt_block(aes::Block::from_mut_slice(&mut out));
        Ok(out)
    }
}

/// PKCS#7 pad to a whole number of blocks.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let fill = BLOCK - data.len() % BLOCK;
    let mut out = Vec::with_capacity(data.len() + fill);
    out.extend_from_slice(data);
    out.resize(data.len() + fill, fill as u8);
    out
}

/// Strip PKCS#7 padding.
pub fn unpad(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let fill = *data
        .last()
        .ok_or_else(|| CryptoError::Wrap("Empty padded buffer".to_string()))? as usize;
    if fill == 0 || fill > BLOCK || fill > data.len() {
        return Err(CryptoError::Wrap("Invalid padding".to_string()));
    }
    let (body, tail) = data.split_at(data.len() - fill);
    if tail.iter().any(|&b| b as usize != fill) {
        return Err(CryptoError::Wrap("Invalid padding".to_string()));
    }
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_block_aligned_input() {
        let cipher = BlockCipher::new([0u8; 16]);

        assert!(cipher.encrypt(&[0u8; 16]).is_ok());
        assert!(cipher.encrypt(&[0u8; 32]).is_ok());
        assert!(cipher.encrypt(&[0u8; 15]).is_err());
        assert!(cipher.decrypt(&[0u8; 17]).is_err());
    }

    #[test]
    fn decrypt_reverses_encrypt() {
        let cipher = BlockCipher::new([0x42u8; 16]);
        let plaintext = [0xABu8; 48];
        let ciphertext = cipher.encrypt(&plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);

        let block = cipher.encrypt_block([7u8; 16]).unwrap();
        assert_eq!(cipher.decrypt_block(block).unwrap(), [7u8; 16]);
    }

    #[test]
    fn known_answer_fips197() {
        // FIPS-197 appendix C.1
        let key: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
            .unwrap()
            .try_into()
            .unwrap();
        let pt: [u8; 16] = hex::decode("00112233445566778899aabbccddeeff")
            .unwrap()
            .try_into()
            .unwrap();
        let ct = BlockCipher::new(key).encrypt_block(pt).unwrap();
        assert_eq!(hex::encode(ct), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }

    #[test]
    fn padding_always_adds_bytes() {
        assert_eq!(pad(&[]).len(), 16);
        assert_eq!(pad(&[1u8; 16]).len(), 32);
        assert_eq!(unpad(&pad(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
        assert!(unpad(&[0u8; 16]).is_err());
        assert!(unpad(&[]).is_err());
    }
}
