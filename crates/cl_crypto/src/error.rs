use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed (authentication tag mismatch — possible tampering)")]
    Decrypt,

    #[error("Malformed nonce: expected 24 bytes, got {0}")]
    InvalidNonce(usize),

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidPlaintext,

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
