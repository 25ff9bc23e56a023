/// Burrow Crypto Library
///
/// Field-level encryption for stores that cannot encrypt the whole file:
/// a PBKDF2-HMAC-SHA256 key derived from the user's passphrase and a stored
/// salt, and AES-256-GCM for each sensitive column.

pub mod encrypt;
pub mod error;
pub mod keys;

pub use encrypt::{FieldCipher, KEY_CHECK_PLAINTEXT};
pub use error::CryptoError;
pub use keys::{FieldKey, KDF_ITERATIONS, SALT_LEN, derive_field_key, generate_salt};
