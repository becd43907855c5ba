//! NaCl box (curve25519-xsalsa20-poly1305)
//!
//! Thin wrapper over `crypto_box::SalsaBox` exposing the three operations the
//! tunnel protocols need: precompute a shared key from a public/private pair,
//! seal under a 24-byte nonce, and open. Sealed output is laid out the way
//! NaCl lays out `crypto_box_afternm` output minus its 16 zero bytes:
//! `tag(16) | ciphertext`.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::AeadInPlace;
use crypto_box::{PublicKey, SalsaBox, SecretKey};

use crate::crypto::x25519::KEY_LEN;
use crate::error::CryptoError;

/// Poly1305 authentication tag length
pub const TAG_LEN: usize = 16;

/// XSalsa20 nonce length
pub const NONCE_LEN: usize = 24;

/// A precomputed shared key (the result of `crypto_box_beforenm`)
pub struct SharedKey {
    inner: SalsaBox,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Precompute the shared key between `public_key` and `private_key`
pub fn precompute(public_key: &[u8; KEY_LEN], private_key: &[u8; KEY_LEN]) -> SharedKey {
    let public = PublicKey::from(*public_key);
    let secret = SecretKey::from(*private_key);
    SharedKey {
        inner: SalsaBox::new(&public, &secret),
    }
}

/// Seal `plaintext`, returning `tag | ciphertext`
pub fn seal(
    key: &SharedKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut sealed = vec![0u8; TAG_LEN + plaintext.len()];
    sealed[TAG_LEN..].copy_from_slice(plaintext);

    let tag = key
        .inner
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), &[], &mut sealed[TAG_LEN..])
        .map_err(|_| CryptoError::Encryption)?;
    sealed[..TAG_LEN].copy_from_slice(tag.as_slice());

    Ok(sealed)
}

/// Open `tag | ciphertext`
///
/// Nothing is returned unless the tag verifies.
pub fn open(
    key: &SharedKey,
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let (tag, ciphertext) = sealed.split_at(TAG_LEN);
    let mut plaintext = ciphertext.to_vec();

    key.inner
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            &[],
            &mut plaintext,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::Decryption)?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519::generate_keypair;
    use crypto_box::aead::Aead;

    #[test]
    fn test_seal_open_roundtrip() {
        let alice = generate_keypair().unwrap();
        let bob = generate_keypair().unwrap();

        let alice_shared = precompute(&bob.public_key, &alice.private_key);
        let bob_shared = precompute(&alice.public_key, &bob.private_key);

        let nonce = [3u8; NONCE_LEN];
        let sealed = seal(&alice_shared, &nonce, b"Hello, tunnel!").unwrap();
        assert_eq!(sealed.len(), TAG_LEN + 14);

        let opened = open(&bob_shared, &nonce, &sealed).unwrap();
        assert_eq!(opened, b"Hello, tunnel!");
    }

    #[test]
    fn test_layout_matches_nacl_box() {
        let alice = generate_keypair().unwrap();
        let bob = generate_keypair().unwrap();
        let nonce = [9u8; NONCE_LEN];

        let shared = precompute(&bob.public_key, &alice.private_key);
        let ours = seal(&shared, &nonce, b"layout").unwrap();

        let reference = SalsaBox::new(
            &PublicKey::from(bob.public_key),
            &SecretKey::from(alice.private_key),
        );
        let theirs = reference
            .encrypt(GenericArray::from_slice(&nonce), &b"layout"[..])
            .unwrap();

        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_open_rejects_tampered_tag() {
        let pair = generate_keypair().unwrap();
        let shared = precompute(&pair.public_key, &pair.private_key);
        let nonce = [0u8; NONCE_LEN];

        let mut sealed = seal(&shared, &nonce, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(open(&shared, &nonce, &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_wrong_nonce() {
        let pair = generate_keypair().unwrap();
        let shared = precompute(&pair.public_key, &pair.private_key);

        let sealed = seal(&shared, &[1u8; NONCE_LEN], b"payload").unwrap();
        assert!(open(&shared, &[2u8; NONCE_LEN], &sealed).is_err());
    }

    #[test]
    fn test_open_short_input() {
        let pair = generate_keypair().unwrap();
        let shared = precompute(&pair.public_key, &pair.private_key);
        assert!(open(&shared, &[0u8; NONCE_LEN], &[0u8; 10]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let pair = generate_keypair().unwrap();
        let shared = precompute(&pair.public_key, &pair.private_key);
        let nonce = [5u8; NONCE_LEN];

        let sealed = seal(&shared, &nonce, &[]).unwrap();
        assert_eq!(sealed.len(), TAG_LEN);
        assert!(open(&shared, &nonce, &sealed).unwrap().is_empty());
    }
}
