//! Repeating-key XOR payload cipher
//!
//! Encryption and decryption are the same transform: each payload byte is
//! XORed with the key byte at `i % key.len()`. The cipher is deterministic
//! and carries no IV; both ends of a deployment must hold the same key, and
//! the on-wire bytes for a given frame never vary. Changing this transform
//! changes wire compatibility with every deployed device.

use thiserror::Error;

/// Errors raised by the cipher
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    /// The configured key is empty; refusing to pass data through unencrypted
    #[error("encryption key is empty")]
    EmptyKey,
}

/// Apply the repeating-key XOR transform
///
/// An empty key is a configuration fault, not a no-op: silently returning
/// the input would broadcast plaintext coordinates.
pub fn xor_cipher(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }

    Ok(data
        .iter()
        .enumerate()
        .map(|(i, byte)| byte ^ key[i % key.len()])
        .collect())
}

/// Encrypt a serialized frame for transmission
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    xor_cipher(plaintext, key)
}

/// Decrypt a received payload
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    xor_cipher(ciphertext, key)
}
