//! NaCl box encryption — X25519 key agreement + XSalsa20-Poly1305 AEAD.
//!
//! One shared secret per (local secret, peer public) pair; the derivation is
//! symmetric, so either side of a conversation derives the same box. Every
//! encryption uses a fresh random 24-byte nonce. Nonce and ciphertext travel
//! separately on the wire (base64 fields of the `e2ee` payload object).
//!
//! `decrypt` is strict and returns errors; `decrypt_or_empty` is the UI-facing
//! boundary where any failure (tag mismatch, bad lengths, bad UTF-8) becomes
//! an empty string so a tampered message can never crash the message list.

use crypto_box::{
    aead::{Aead, AeadCore, OsRng},
    Nonce, SalsaBox,
};

use crate::{error::CryptoError, identity::IdentityKeyPair, identity::PublicKeyBytes};

/// Version tag carried in the `alg` field of every encrypted payload.
pub const ALGORITHM_ID: &str = "x25519-xsalsa20-poly1305";

/// Nonce size for XSalsa20-Poly1305.
pub const NONCE_LEN: usize = 24;

/// Output of one encryption: fresh nonce + ciphertext (tag appended).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Derive the shared box for a (my secret, peer public) pair.
///
/// Deterministic and symmetric: `shared_box(a, B_pub)` and
/// `shared_box(b, A_pub)` encrypt/decrypt interchangeably.
pub fn shared_box(mine: &IdentityKeyPair, peer: &PublicKeyBytes) -> Result<SalsaBox, CryptoError> {
    let peer_pk = peer.to_public_key()?;
    Ok(SalsaBox::new(&peer_pk, &mine.secret_key()))
}

/// Authenticated-encrypt `plaintext` for the peer. Generates a fresh random
/// nonce per call; nonces are never reused.
pub fn encrypt(
    mine: &IdentityKeyPair,
    peer: &PublicKeyBytes,
    plaintext: &str,
) -> Result<SealedMessage, CryptoError> {
    let cipher = shared_box(mine, peer)?;
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;
    Ok(SealedMessage {
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Strict decryption. Fails on bad nonce length, authentication mismatch, or
/// non-UTF-8 plaintext.
pub fn decrypt(
    mine: &IdentityKeyPair,
    peer: &PublicKeyBytes,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonce(nonce.len()));
    }
    let cipher = shared_box(mine, peer)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidPlaintext)
}

/// UI-facing decryption: any failure degrades to an empty string with a
/// warning, never an error up the stack.
pub fn decrypt_or_empty(
    mine: &IdentityKeyPair,
    peer: &PublicKeyBytes,
    nonce: &[u8],
    ciphertext: &[u8],
) -> String {
    match decrypt(mine, peer, nonce, ciphertext) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                target: "cl_crypto",
                event = "decrypt_failed",
                peer_fingerprint = %peer.fingerprint(),
                error = %e
            );
            String::new()
        }
    }
}
