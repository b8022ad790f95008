//! cl_crypto — CareLink Secure Chat cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Decryption failure degrades to a safe default at this boundary; the
//!   message list must never crash on a bad ciphertext.
//!
//! # Module layout
//! - `identity` — per-user long-term X25519 keypair
//! - `cipher`   — NaCl box (X25519 + XSalsa20-Poly1305) encrypt/decrypt
//! - `error`    — unified error type

pub mod cipher;
pub mod error;
pub mod identity;

pub use error::CryptoError;
