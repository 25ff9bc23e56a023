use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

use crate::error::CryptoError;
use crate::keys::FieldKey;

const NONCE_LEN: usize = 12;

/// Known plaintext sealed once per store and used to check a candidate key.
pub const KEY_CHECK_PLAINTEXT: &[u8] = b"burrow_store_key_check_v1";

/// AES-256-GCM cipher for individual columns.
///
/// Wire format of every sealed value: `nonce (12 bytes) || ciphertext + tag`.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &FieldKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::AeadEncrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::AeadDecrypt)
    }

    /// Encrypt an optional text column. `None` stays `None`.
    pub fn encrypt(&self, value: Option<&str>) -> Result<Option<Vec<u8>>, CryptoError> {
        value.map(|text| self.seal(text.as_bytes())).transpose()
    }

    /// Exact inverse of [`FieldCipher::encrypt`].
    pub fn decrypt(&self, sealed: Option<&[u8]>) -> Result<Option<String>, CryptoError> {
        sealed
            .map(|bytes| {
                let plain = self.open(bytes)?;
                String::from_utf8(plain).map_err(|_| CryptoError::InvalidUtf8)
            })
            .transpose()
    }

    /// Seal the key-check canary for a new store.
    pub fn seal_key_check(&self) -> Result<Vec<u8>, CryptoError> {
        self.seal(KEY_CHECK_PLAINTEXT)
    }

    /// True only when `sealed` opens under this key and holds the canary.
    pub fn verify_key_check(&self, sealed: &[u8]) -> bool {
        matches!(self.open(sealed), Ok(plain) if plain == KEY_CHECK_PLAINTEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{derive_field_key, generate_salt};

    fn cipher(passphrase: &str, salt: &[u8]) -> FieldCipher {
        FieldCipher::new(&derive_field_key(passphrase, salt, 1_000).unwrap())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let salt = generate_salt();
        let c = cipher("correct horse", &salt);

        let sealed = c.encrypt(Some("Hello from Burrow!")).unwrap().unwrap();
        assert!(!sealed.windows(5).any(|w| w == b"Hello"));
        assert_eq!(
            c.decrypt(Some(&sealed)).unwrap().as_deref(),
            Some("Hello from Burrow!")
        );
    }

    #[test]
    fn none_passes_through() {
        let c = cipher("k", &generate_salt());
        assert!(c.encrypt(None).unwrap().is_none());
        assert!(c.decrypt(None).unwrap().is_none());
    }

    #[test]
    fn wrong_key_fails() {
        let salt = generate_salt();
        let sealed = cipher("key one", &salt).encrypt(Some("secret")).unwrap().unwrap();
        assert!(cipher("key two", &salt).decrypt(Some(&sealed)).is_err());
    }

    #[test]
    fn key_check_only_accepts_the_sealing_key() {
        let salt = generate_salt();
        let right = cipher("right", &salt);
        let check = right.seal_key_check().unwrap();

        assert!(right.verify_key_check(&check));
        assert!(!cipher("wrong", &salt).verify_key_check(&check));
        assert!(!right.verify_key_check(&check[..4]));
    }

    #[test]
    fn sealing_twice_uses_fresh_nonces() {
        let c = cipher("k", &generate_salt());
        assert_ne!(c.seal(b"same").unwrap(), c.seal(b"same").unwrap());
    }
}
