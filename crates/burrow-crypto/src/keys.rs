use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// PBKDF2 rounds used for every new store. Stored per store, so raising this
/// later does not lock anyone out of an existing file.
pub const KDF_ITERATIONS: u32 = 390_000;

pub const SALT_LEN: usize = 16;

/// 32-byte AES key derived from the store passphrase. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct FieldKey(pub(crate) [u8; 32]);

/// Derive the field key from a passphrase and the store's salt.
pub fn derive_field_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<FieldKey, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count must be positive".into()));
    }
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    Ok(FieldKey(key))
}

/// Generate a fresh random salt (call once when a store is created; persist it).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
