use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch)")]
    AeadDecrypt,

    #[error("Ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("Decrypted field is not valid UTF-8")]
    InvalidUtf8,
}
