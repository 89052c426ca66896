//! Secure settings decoding.
//!
//! Secure settings arrive as strings and are decoded into raw bytes before
//! any vendor sees them. Decryption belongs to the host: it supplies a
//! [`GetDecryptedValueFn`] that turns the decoded bytes of one key into the
//! plaintext value, or returns the fallback when the key is absent.

use base64::Engine as _;
use std::collections::HashMap;

use crate::error::ConfigError;

/// Decoded secure settings, keyed by setting name.
pub type SecureSettings = HashMap<String, Vec<u8>>;

/// Turns the raw secure settings map into decoded bytes.
pub type DecodeSecretsFn = fn(&HashMap<String, String>) -> Result<SecureSettings, ConfigError>;

/// Host supplied decryption: `(secure_settings, key, fallback) -> value`.
pub type GetDecryptedValueFn = dyn Fn(&SecureSettings, &str, &str) -> String + Send + Sync;

/// Decodes every value as standard base64. The first invalid value aborts.
pub fn decode_secrets_from_base64(
    secrets: &HashMap<String, String>,
) -> Result<SecureSettings, ConfigError> {
    let mut decoded = SecureSettings::with_capacity(secrets.len());
    for (key, value) in secrets {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value.as_bytes())
            .map_err(|source| ConfigError::SecretDecode {
                key: key.clone(),
                source,
            })?;
        decoded.insert(key.clone(), bytes);
    }
    Ok(decoded)
}

/// For callers that already hold plaintext secrets.
pub fn noop_decode(secrets: &HashMap<String, String>) -> Result<SecureSettings, ConfigError> {
    Ok(secrets
        .iter()
        .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
        .collect())
}

/// Treats the decoded bytes as the plaintext secret.
pub fn plaintext_decrypt(secure: &SecureSettings, key: &str, fallback: &str) -> String {
    match secure.get(key) {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => fallback.to_string(),
    }
}

/// Per-integration view used by vendor parsers: `(key, fallback) -> value`.
pub struct Decrypter<'a> {
    secure: &'a SecureSettings,
    decrypt: &'a GetDecryptedValueFn,
}

impl<'a> Decrypter<'a> {
    pub fn new(secure: &'a SecureSettings, decrypt: &'a GetDecryptedValueFn) -> Self {
        Self { secure, decrypt }
    }

    /// The decrypted secret for `key` when present, otherwise `fallback`.
    pub fn get(&self, key: &str, fallback: &str) -> String {
        if self.secure.contains_key(key) {
            (self.decrypt)(self.secure, key, fallback)
        } else {
            fallback.to_string()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secure.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64() {
        let mut secrets = HashMap::new();
        secrets.insert("token".to_string(), "c2VjcmV0".to_string());
        let decoded = decode_secrets_from_base64(&secrets).unwrap();
        assert_eq!(decoded["token"], b"secret");
    }

    #[test]
    fn test_decode_empty_is_empty_map() {
        let decoded = decode_secrets_from_base64(&HashMap::new()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_names_offending_key() {
        let mut secrets = HashMap::new();
        secrets.insert("url".to_string(), "not base64!!".to_string());
        let err = decode_secrets_from_base64(&secrets).unwrap_err();
        assert!(err.to_string().contains("failed to decode secure settings key url"));
    }

    #[test]
    fn test_noop_decode_keeps_bytes() {
        let mut secrets = HashMap::new();
        secrets.insert("password".to_string(), "hunter2".to_string());
        let decoded = noop_decode(&secrets).unwrap();
        assert_eq!(decoded["password"], b"hunter2");
    }

    #[test]
    fn test_decrypter_prefers_secret() {
        let mut secure = SecureSettings::new();
        secure.insert("url".to_string(), b"https://secret".to_vec());
        let d = Decrypter::new(&secure, &plaintext_decrypt);
        assert_eq!(d.get("url", "https://plain"), "https://secret");
        assert_eq!(d.get("token", "plain-token"), "plain-token");
        assert!(d.contains("url"));
    }
}
