//! Symmetric encryption of secret parameter values.
//!
//! Secrets published in TXT records are AES-256-CBC encrypted with a key
//! derived from a pass-phrase ("pepper") that never leaves the hosts, and
//! the service domain. The SHA-384 digest of `pepper@domain` supplies the
//! key (first 32 bytes) and IV (next 16 bytes).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha384};

use crate::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC keyed by a pepper and service domain.
#[derive(Clone)]
pub struct AesCrypto {
    key: [u8; 32],
    iv: [u8; 16],
}

impl std::fmt::Debug for AesCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCrypto").finish_non_exhaustive()
    }
}

impl AesCrypto {
    /// Derives key material from `pepper` and `domain`.
    pub fn new(pepper: &str, domain: &str) -> Self {
        let digest = Sha384::digest(format!("{pepper}@{domain}").as_bytes());
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&digest[..32]);
        iv.copy_from_slice(&digest[32..48]);
        Self { key, iv }
    }

    /// Encrypts `clear_text`, returning base64.
    pub fn encrypt(&self, clear_text: &str) -> String {
        let cipher = Aes256CbcEnc::new(&self.key.into(), &self.iv.into());
        let bytes = cipher.encrypt_padded_vec_mut::<Pkcs7>(clear_text.as_bytes());
        STANDARD.encode(bytes)
    }

    /// Decrypts base64 `cipher_text`.
    pub fn decrypt(&self, cipher_text: &str) -> Result<String, Error> {
        let bytes = STANDARD
            .decode(cipher_text)
            .map_err(|e| Error::Decryption(format!("invalid base64: {e}")))?;
        let cipher = Aes256CbcDec::new(&self.key.into(), &self.iv.into());
        let clear = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| Error::Decryption("bad key or corrupt payload".into()))?;
        String::from_utf8(clear).map_err(|_| Error::Decryption("payload is not UTF-8".into()))
    }
}
