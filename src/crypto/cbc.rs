//! AES-256-CBC stream states with chained IVs.
//!
//! Each direction of a session owns one state. CBC chaining carries across
//! calls, so the IV for any record is the last ciphertext block of the
//! previous record in the same direction. The bootstrap IVs come from
//! handshake material both sides already hold.

use aes::{
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes256, Block,
};

/// Cipher block length. Every encrypted record is a whole number of blocks.
pub const BLOCK_LENGTH: usize = 16;

/// Encrypting half of a session cipher.
pub struct Encryptor {
    inner: cbc::Encryptor<Aes256>,
}

impl Encryptor {
    /// Create a keyed state with a bootstrap IV.
    ///
    /// Panics if `key` is not 32 bytes or `iv` is not 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Self {
        Self {
            inner: cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .expect("key is 32 bytes and iv is 16 bytes"),
        }
    }

    /// Encrypt whole blocks in place.
    ///
    /// Panics if `data` is not block-aligned.
    pub fn process(&mut self, data: &mut [u8]) {
        assert!(
            data.len() % BLOCK_LENGTH == 0,
            "ciphertext must be block-aligned"
        );
        for block in data.chunks_exact_mut(BLOCK_LENGTH) {
            self.inner.encrypt_block_mut(Block::from_mut_slice(block));
        }
    }
}

/// Decrypting half of a session cipher.
pub struct Decryptor {
    inner: cbc::Decryptor<Aes256>,
}

impl Decryptor {
    /// Create a keyed state with a bootstrap IV.
    ///
    /// Panics if `key` is not 32 bytes or `iv` is not 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Self {
        Self {
            inner: cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .expect("key is 32 bytes and iv is 16 bytes"),
        }
    }

    /// Decrypt whole blocks in place.
    ///
    /// Panics if `data` is not block-aligned.
    pub fn process(&mut self, data: &mut [u8]) {
        assert!(
            data.len() % BLOCK_LENGTH == 0,
            "ciphertext must be block-aligned"
        );
        for block in data.chunks_exact_mut(BLOCK_LENGTH) {
            self.inner.decrypt_block_mut(Block::from_mut_slice(block));
        }
    }
}
