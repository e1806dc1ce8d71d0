//! Triple-DES CBC engine
//!
//! Ultralight C authenticates with two-key Triple-DES (EDE2) in CBC mode.
//! The engine also accepts three-key material (EDE3), which the MIFARE key
//! diversification scheme uses.
//!
//! Data is never padded: callers hand in whole 8-byte blocks. CBC chaining
//! across separate invocations is done by passing the last ciphertext
//! block of one call as the IV of the next (see [`chain_iv`]).

use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::{TdesEde2, TdesEde3};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// DES block size in bytes
pub const BLOCK_SIZE: usize = 8;

/// An all-zero initialization vector
pub const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid key length: expected 16 or 24 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Invalid data length: {0} bytes is not a positive multiple of 8")]
    InvalidDataLength(usize),
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
}

/// Triple-DES key material (16 or 24 bytes) that zeroizes on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TdesKey(Vec<u8>);

impl TdesKey {
    /// Create a key from 16 (two-key) or 24 (three-key) bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        match bytes.len() {
            16 | 24 => Ok(TdesKey(bytes.to_vec())),
            other => Err(CipherError::InvalidKeyLength(other)),
        }
    }

    /// Parse a key from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| CipherError::InvalidKeyEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for two-key (EDE2) material
    pub fn is_two_key(&self) -> bool {
        self.0.len() == 16
    }

    /// The key with each 8-byte half byte-reversed.
    ///
    /// Ultralight C stores its key in pages 0x2C..0x2F with each half in
    /// reversed byte order, so keys read back from a magic tag need this.
    pub fn swap_halves_endianness(&self) -> Self {
        let mut swapped = self.0.clone();
        for half in swapped.chunks_mut(BLOCK_SIZE) {
            half.reverse();
        }
        TdesKey(swapped)
    }
}

impl std::fmt::Debug for TdesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TdesKey(<{} bytes>)", self.0.len())
    }
}

fn check_data_length(len: usize) -> Result<(), CipherError> {
    if len == 0 || len % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidDataLength(len));
    }
    Ok(())
}

/// CBC-encrypt whole blocks
pub fn encrypt(
    key: &TdesKey,
    iv: &[u8; BLOCK_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    check_data_length(plaintext.len())?;
    let key_len = key.len();
    let ciphertext = if key.is_two_key() {
        cbc::Encryptor::<TdesEde2>::new_from_slices(key.as_slice(), iv)
            .map_err(|_| CipherError::InvalidKeyLength(key_len))?
            .encrypt_padded_vec_mut::<NoPadding>(plaintext)
    } else {
        cbc::Encryptor::<TdesEde3>::new_from_slices(key.as_slice(), iv)
            .map_err(|_| CipherError::InvalidKeyLength(key_len))?
            .encrypt_padded_vec_mut::<NoPadding>(plaintext)
    };
    Ok(ciphertext)
}

/// CBC-decrypt whole blocks
pub fn decrypt(
    key: &TdesKey,
    iv: &[u8; BLOCK_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    check_data_length(ciphertext.len())?;
    let key_len = key.len();
    let plaintext = if key.is_two_key() {
        cbc::Decryptor::<TdesEde2>::new_from_slices(key.as_slice(), iv)
            .map_err(|_| CipherError::InvalidKeyLength(key_len))?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
    } else {
        cbc::Decryptor::<TdesEde3>::new_from_slices(key.as_slice(), iv)
            .map_err(|_| CipherError::InvalidKeyLength(key_len))?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
    };
    plaintext.map_err(|_| CipherError::InvalidDataLength(ciphertext.len()))
}

/// The IV that continues a CBC chain after `ciphertext`: its last block
pub fn chain_iv(ciphertext: &[u8]) -> Result<[u8; BLOCK_SIZE], CipherError> {
    check_data_length(ciphertext.len())?;
    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&ciphertext[ciphertext.len() - BLOCK_SIZE..]);
    Ok(iv)
}

/// Rotate a block left by one byte
pub fn rotate_left(block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut rotated = *block;
    rotated.rotate_left(1);
    rotated
}

/// Diversify a 6-byte MIFARE Classic key for one sector of a tag.
///
/// The message is the first four key bytes, the last two key bytes XORed
/// with UID bytes 0 and 1, the sector XORed with UID byte 2, then UID byte
/// 3. It is encrypted under `master_key` with a zero IV and bytes 1..7 of
/// the result form the diversified key.
pub fn diversify_mifare_key(
    master_key: &TdesKey,
    uid: &[u8; 4],
    sector: u8,
    mifare_key: &[u8; 6],
) -> Result<[u8; 6], CipherError> {
    let mix = [
        mifare_key[0],
        mifare_key[1],
        mifare_key[2],
        mifare_key[3],
        mifare_key[4] ^ uid[0],
        mifare_key[5] ^ uid[1],
        sector ^ uid[2],
        uid[3],
    ];
    let encrypted = encrypt(master_key, &ZERO_IV, &mix)?;
    let mut diversified = [0u8; 6];
    diversified.copy_from_slice(&encrypted[1..7]);
    Ok(diversified)
}

/// Expand a 6-byte MIFARE key A into an 8-byte DES key.
///
/// Each key byte is shifted left by one; the dropped MSBs are collected
/// into byte 6.
pub fn des_key_from_key_a(key_a: &[u8; 6]) -> [u8; BLOCK_SIZE] {
    let mut des_key = [0u8; BLOCK_SIZE];
    for (i, byte) in key_a.iter().enumerate() {
        des_key[i] = byte << 1;
        des_key[6] |= ((byte >> 7) & 1) << (i + 1);
    }
    des_key
}

/// Expand a 6-byte MIFARE key B into an 8-byte DES key.
///
/// Mirror image of [`des_key_from_key_a`]: the MSBs go into byte 1 and the
/// shifted key bytes occupy bytes 2..8.
pub fn des_key_from_key_b(key_b: &[u8; 6]) -> [u8; BLOCK_SIZE] {
    let mut des_key = [0u8; BLOCK_SIZE];
    for (i, byte) in key_b.iter().enumerate() {
        des_key[1] |= ((byte >> 7) & 1) << (i + 1);
        des_key[2 + i] = byte << 1;
    }
    des_key
}

/// Derive an 8-byte password from a MIFARE key pair.
///
/// Builds the three-key material A‖B‖A from the expanded DES keys and
/// encrypts a zero block with a zero IV.
pub fn password_from_key_pair(
    key_a: &[u8; 6],
    key_b: &[u8; 6],
) -> Result<[u8; BLOCK_SIZE], CipherError> {
    let des_a = des_key_from_key_a(key_a);
    let des_b = des_key_from_key_b(key_b);
    let mut material = Vec::with_capacity(24);
    material.extend_from_slice(&des_a);
    material.extend_from_slice(&des_b);
    material.extend_from_slice(&des_a);
    let key = TdesKey::from_slice(&material)?;
    material.zeroize();

    let encrypted = encrypt(&key, &ZERO_IV, &[0u8; BLOCK_SIZE])?;
    let mut password = [0u8; BLOCK_SIZE];
    password.copy_from_slice(&encrypted);
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_str: &str) -> TdesKey {
        TdesKey::from_hex(hex_str).unwrap()
    }

    #[test]
    fn test_zero_key_known_answer() {
        let ciphertext = encrypt(&key(&"00".repeat(16)), &ZERO_IV, &[0u8; 8]).unwrap();
        assert_eq!(hex::encode(ciphertext), "8ca64de9c1b123a7");
    }

    #[test]
    fn test_two_key_known_answer() {
        let ciphertext = encrypt(
            &key("0123456789abcdeffedcba9876543210"),
            &ZERO_IV,
            &[0u8; 8],
        )
        .unwrap();
        assert_eq!(hex::encode(ciphertext), "08d7b4fb629d0885");
    }

    #[test]
    fn test_three_key_known_answer() {
        let k = key("0123456789abcdef23456789abcdef01456789abcdef0123");
        let iv = [1, 2, 3, 4, 5, 6, 7, 8];
        let plaintext = hex::decode("112233445566778899aabbccddeeff00").unwrap();
        let ciphertext = encrypt(&k, &iv, &plaintext).unwrap();
        assert_eq!(hex::encode(&ciphertext), "2c912178ed989d9ccdda0fbb9bfb54b5");
        assert_eq!(decrypt(&k, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_rejects_partial_blocks() {
        let k = key(&"11".repeat(16));
        assert_eq!(
            encrypt(&k, &ZERO_IV, &[0u8; 7]),
            Err(CipherError::InvalidDataLength(7))
        );
        assert_eq!(
            decrypt(&k, &ZERO_IV, &[0u8; 12]),
            Err(CipherError::InvalidDataLength(12))
        );
        assert_eq!(
            encrypt(&k, &ZERO_IV, &[]),
            Err(CipherError::InvalidDataLength(0))
        );
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert_eq!(
            TdesKey::from_slice(&[0u8; 8]),
            Err(CipherError::InvalidKeyLength(8))
        );
        assert!(TdesKey::from_slice(&[0u8; 24]).is_ok());
    }

    #[test]
    fn test_chaining_across_invocations() {
        let k = key("425245414b4d454946594f5543414e21");
        let plaintext = [0x42u8; 16];
        let whole = encrypt(&k, &ZERO_IV, &plaintext).unwrap();

        let first = encrypt(&k, &ZERO_IV, &plaintext[..8]).unwrap();
        let second = encrypt(&k, &chain_iv(&first).unwrap(), &plaintext[8..]).unwrap();
        assert_eq!(&whole[..8], first.as_slice());
        assert_eq!(&whole[8..], second.as_slice());
    }

    #[test]
    fn test_rotate_left() {
        let block = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(rotate_left(&block), [2, 3, 4, 5, 6, 7, 8, 1]);
    }

    #[test]
    fn test_swap_halves() {
        let k = key("000102030405060708090a0b0c0d0e0f");
        assert_eq!(
            hex::encode(k.swap_halves_endianness().as_slice()),
            "07060504030201000f0e0d0c0b0a0908"
        );
    }

    #[test]
    fn test_debug_hides_key_material() {
        let k = key("425245414b4d454946594f5543414e21");
        assert_eq!(format!("{:?}", k), "TdesKey(<16 bytes>)");
    }

    #[test]
    fn test_diversify_mifare_key() {
        let master = key("00112233445566778899aabbccddeeff");
        let uid = [0xF4, 0xEA, 0x54, 0x8E];
        let key_a = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
        let diversified = diversify_mifare_key(&master, &uid, 0x07, &key_a).unwrap();
        assert_eq!(hex::encode(diversified), "a4bf76237109");
    }

    #[test]
    fn test_des_key_expansion() {
        let key_a = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
        let key_b = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5];
        assert_eq!(hex::encode(des_key_from_key_a(&key_a)), "40424446484a7e00");
        assert_eq!(hex::encode(des_key_from_key_b(&key_b)), "007e60626466686a");
        assert_eq!(
            hex::encode(password_from_key_pair(&key_a, &key_b).unwrap()),
            "5f238beb7d8969aa"
        );
    }
}
