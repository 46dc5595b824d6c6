use secrecy::{ExposeSecret, SecretString};

/// Symmetric decryption of stored service passwords.
pub trait Decrypt: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<SecretString, DecryptError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("no decryption key material is configured")]
    NoKey,

    #[error("ciphertext could not be decrypted: {0}")]
    Invalid(String),
}

/// Decrypt `ciphertext`. A blank plaintext or the cipher's "unable to
/// decrypt" sentinel is a failure, never a usable credential.
pub fn decrypt_password(
    decryptor: &dyn Decrypt,
    ciphertext: &str,
) -> Result<SecretString, DecryptError> {
    let plaintext = decryptor.decrypt(ciphertext)?;
    let exposed = plaintext.expose_secret().trim();
    if exposed.is_empty() {
        return Err(DecryptError::Invalid("decrypted password is blank".into()));
    }
    if exposed.to_ascii_lowercase().starts_with("unable") {
        return Err(DecryptError::Invalid("cipher reported it was unable to decrypt".into()));
    }
    Ok(plaintext)
}

pub struct UnavailableDecryptor;

impl Decrypt for UnavailableDecryptor {
    fn decrypt(&self, _ciphertext: &str) -> Result<SecretString, DecryptError> {
        Err(DecryptError::NoKey)
    }
}
