//! Cryptographic primitives for the tunnel protocols
//!
//! - Curve25519 key generation and derivation (x25519)
//! - NaCl box precompute/seal/open (nacl_box)

pub mod nacl_box;
pub mod x25519;

pub use nacl_box::SharedKey;
pub use x25519::KeyPair;
