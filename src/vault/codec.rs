use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::errors::PoolError;

/// Static salt for passphrase key derivation. Changing it orphans every
/// stored ciphertext.
const KDF_SALT: &[u8] = b"keypool.api-keys.v1";

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const NONCE_LEN: usize = 12;
const IV_DELIMITER: char = ':';

const MASK_CHAR: char = '*';
const MASK_RUN: usize = 8;
const MASK_PREFIX: usize = 10;
const MASK_SUFFIX: usize = 3;

/// Google AI Studio keys: `AIza` followed by 35 URL-safe characters.
pub const GEMINI_KEY_PATTERN: &str = r"^AIza[0-9A-Za-z_-]{35}$";

static GEMINI_KEY_RE: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(GEMINI_KEY_PATTERN).expect("static regex"));

/// Symmetric codec for credentials at rest.
///
/// Stored format is `hex(nonce) ":" hex(ciphertext)` under AES-256-GCM with a
/// key derived from a passphrase. Records written before the nonce was
/// embedded are bare `hex(ciphertext)` under an all-zero nonce and are still
/// decrypted transparently.
///
/// Key rotation means constructing a second codec and re-encrypting records
/// with [`SecretCodec::reencrypt_from`]; a codec's key never changes.
pub struct SecretCodec {
    key: [u8; 32],
    format: Option<Regex>,
}

impl SecretCodec {
    pub fn new(passphrase: &str) -> anyhow::Result<Self> {
        Self::with_iterations(passphrase, DEFAULT_KDF_ITERATIONS)
    }

    pub fn with_iterations(passphrase: &str, iterations: u32) -> anyhow::Result<Self> {
        if passphrase.is_empty() {
            anyhow::bail!("encryption passphrase must not be empty");
        }
        if iterations == 0 {
            anyhow::bail!("KDF iteration count must be positive");
        }
        let key = derive_key(passphrase, iterations);
        Ok(Self { key, format: None })
    }

    /// Override the provider key pattern used by [`SecretCodec::validate_format`].
    pub fn with_format(mut self, pattern: &str) -> anyhow::Result<Self> {
        self.format = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, PoolError> {
        let nonce = generate_nonce();
        let ciphertext = self.seal(&nonce, plaintext)?;
        Ok(format!("{}{}{}", hex::encode(nonce), IV_DELIMITER, hex::encode(ciphertext)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, PoolError> {
        let stored = stored.trim();
        let (nonce, cipher_hex) = match stored.split_once(IV_DELIMITER) {
            Some((iv_hex, cipher_hex)) => {
                let iv = hex::decode(iv_hex)
                    .map_err(|e| PoolError::decryption(None, format!("malformed IV: {}", e)))?;
                let nonce: [u8; NONCE_LEN] = iv.try_into().map_err(|iv: Vec<u8>| {
                    PoolError::decryption(
                        None,
                        format!("IV must be {} bytes, got {}", NONCE_LEN, iv.len()),
                    )
                })?;
                (nonce, cipher_hex)
            }
            None => ([0u8; NONCE_LEN], stored),
        };

        let ciphertext = hex::decode(cipher_hex)
            .map_err(|e| PoolError::decryption(None, format!("malformed ciphertext: {}", e)))?;
        if ciphertext.is_empty() {
            return Err(PoolError::decryption(None, "empty ciphertext"));
        }

        let cipher = self.cipher();
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| PoolError::decryption(None, "authentication failed (wrong key or tampered data)"))?;

        let result = String::from_utf8(plaintext.clone())
            .map_err(|_| PoolError::decryption(None, "plaintext is not valid UTF-8"));
        plaintext.zeroize();
        result
    }

    /// True when the stored value predates nonce embedding.
    pub fn is_legacy(stored: &str) -> bool {
        !stored.contains(IV_DELIMITER)
    }

    /// Decrypt with `previous` (any format) and re-encrypt under this codec's
    /// key in the current format.
    pub fn reencrypt_from(&self, previous: &SecretCodec, stored: &str) -> Result<String, PoolError> {
        let mut plaintext = previous.decrypt(stored)?;
        let result = self.encrypt(&plaintext);
        plaintext.zeroize();
        result
    }

    /// Check a plaintext key against the provider pattern before it is stored
    /// or used.
    pub fn validate_format(&self, plaintext: &str) -> bool {
        match &self.format {
            Some(re) => re.is_match(plaintext),
            None => GEMINI_KEY_RE.is_match(plaintext),
        }
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &str) -> Result<Vec<u8>, PoolError> {
        self.cipher()
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|e| PoolError::Internal(anyhow::anyhow!("encryption failed: {}", e)))
    }

    /// Pre-nonce record format, for exercising the migration path.
    #[cfg(test)]
    pub(crate) fn encrypt_legacy(&self, plaintext: &str) -> String {
        hex::encode(self.seal(&[0u8; NONCE_LEN], plaintext).unwrap())
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl Drop for SecretCodec {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Log-safe rendering of a secret: first 10 and last 3 characters around a
/// fixed run of `*`. Secrets of 13 characters or fewer are fully masked.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= MASK_PREFIX + MASK_SUFFIX {
        return MASK_CHAR.to_string().repeat(chars.len());
    }
    let head: String = chars[..MASK_PREFIX].iter().collect();
    let tail: String = chars[chars.len() - MASK_SUFFIX..].iter().collect();
    format!("{}{}{}", head, MASK_CHAR.to_string().repeat(MASK_RUN), tail)
}

fn derive_key(passphrase: &str, iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, iterations, &mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
