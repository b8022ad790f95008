//! Identity key management
//!
//! Each local user has exactly one long-term X25519 keypair, generated
//! lazily on first chat use and persisted for the lifetime of the app
//! installation. Only the public half is ever uploaded (to the directory
//! service, keyed by user id); the secret key never leaves the device.
//!
//! The peer's public key is resolved per session and held in memory only —
//! a peer may rotate keys between sessions, so it is never persisted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use crypto_box::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

// ── Newtype wrappers ──────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Public key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Log-safe fingerprint: BLAKE3 of the public key, truncated to 8 bytes,
    /// hex-encoded in groups of 4.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890"
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..8]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        let arr: [u8; 32] = self.0.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Public key must be 32 bytes, got {}", self.0.len()))
        })?;
        Ok(PublicKey::from(arr))
    }
}

// ── Identity keypair ──────────────────────────────────────────────────────────

/// Long-term per-user X25519 keypair. Drop clears the secret via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl Clone for IdentityKeyPair {
    fn clone(&self) -> Self {
        Self {
            public: self.public.clone(),
            secret_bytes: self.secret_bytes,
        }
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public.fingerprint())
            .finish()
    }
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut crypto_box::aead::OsRng);
        let public = PublicKeyBytes(secret.public_key().as_bytes().to_vec());
        Self {
            public,
            secret_bytes: secret.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Identity key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        let secret = SecretKey::from(arr);
        let public = PublicKeyBytes(secret.public_key().as_bytes().to_vec());
        Ok(Self {
            public,
            secret_bytes: arr,
        })
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    pub(crate) fn secret_key(&self) -> SecretKey {
        SecretKey::from(self.secret_bytes)
    }

    /// Export the public key in base64 format for directory upload.
    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_roundtrips_through_bytes() {
        let kp = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(kp.secret_bytes()).expect("from_bytes");
        assert_eq!(kp.public, restored.public);
    }

    #[test]
    fn public_key_b64_roundtrip() {
        let kp = IdentityKeyPair::generate();
        let decoded = PublicKeyBytes::from_b64(&kp.public_b64()).expect("decode");
        assert_eq!(decoded, kp.public);
    }

    #[test]
    fn rejects_short_key_material() {
        assert!(IdentityKeyPair::from_bytes(&[0u8; 16]).is_err());
        assert!(PublicKeyBytes::from_b64("AAAA").is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_grouped() {
        let kp = IdentityKeyPair::generate();
        let fp = kp.public.fingerprint();
        assert_eq!(fp, kp.public.fingerprint());
        assert_eq!(fp.split(' ').count(), 4);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = IdentityKeyPair::generate();
        let dbg = format!("{kp:?}");
        assert!(!dbg.contains(&hex::encode(kp.secret_bytes())));
    }
}
