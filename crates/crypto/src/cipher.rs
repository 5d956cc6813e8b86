//! AES-256-GCM field cipher with on-disk sentinels
//!
//! Blob layout is `gcm:` ‖ base64(IV ‖ tag ‖ ciphertext) with a fresh
//! 96-bit IV per encryption and a 128-bit tag. Decryption dispatches on the
//! prefix: `gcm:` goes through AES-256-GCM, anything else through the
//! legacy AES-256-CBC path (base64(IV ‖ ciphertext), PKCS7), which is
//! decrypt-only.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Prefix of a raw AES-256-GCM blob.
pub const GCM_PREFIX: &str = "gcm:";

/// Prefix of an encrypted field value.
pub const ENC_PREFIX: &str = "enc:";

/// IV size in bytes (96 bits)
pub const IV_SIZE: usize = 12;

/// Authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Legacy CBC IV size in bytes
const CBC_IV_SIZE: usize = 16;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A zeroizing wrapper for the 256-bit master key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; 32],
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(bytes);
        Ok(Self { bytes: array })
    }

    /// Generates a new random key from OS-provided randomness.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// Field cipher bound to one master key
///
/// Cheap to clone; cloning shares no mutable state.
#[derive(Clone)]
pub struct FieldCipher {
    key: MasterKey,
}

impl FieldCipher {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    /// Encrypts plaintext into a `gcm:` blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        let cipher = Aes256Gcm::new(self.key.as_bytes().into());

        // The aead crate appends the tag to the ciphertext; the blob layout
        // wants IV ‖ tag ‖ ciphertext, so the tag is moved up front.
        let ct_and_tag = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: b"",
                },
            )
            .map_err(|_| CryptoError::TagMismatch)?;
        let split = ct_and_tag.len() - TAG_SIZE;

        let mut blob = Vec::with_capacity(IV_SIZE + ct_and_tag.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ct_and_tag[split..]);
        blob.extend_from_slice(&ct_and_tag[..split]);

        Ok(format!("{}{}", GCM_PREFIX, BASE64.encode(blob)))
    }

    /// Decrypts a blob, dispatching on the `gcm:` prefix; blobs without it
    /// go through the legacy CBC path.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>> {
        match ciphertext.strip_prefix(GCM_PREFIX) {
            Some(b64) => self.decrypt_gcm(b64),
            None => self.decrypt_legacy_cbc(ciphertext),
        }
    }

    fn decrypt_gcm(&self, b64: &str) -> Result<Vec<u8>> {
        let blob = BASE64
            .decode(b64)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        if blob.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "gcm blob of {} bytes is too short",
                blob.len()
            )));
        }
        let (iv, rest) = blob.split_at(IV_SIZE);
        let (tag, ct) = rest.split_at(TAG_SIZE);

        let mut ct_and_tag = Vec::with_capacity(rest.len());
        ct_and_tag.extend_from_slice(ct);
        ct_and_tag.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(self.key.as_bytes().into());
        cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: &ct_and_tag,
                    aad: b"",
                },
            )
            .map_err(|_| CryptoError::TagMismatch)
    }

    fn decrypt_legacy_cbc(&self, blob: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(blob)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        if raw.len() <= CBC_IV_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "cbc blob of {} bytes is too short",
                raw.len()
            )));
        }
        let (iv, ct) = raw.split_at(CBC_IV_SIZE);
        let decryptor = Aes256CbcDec::new_from_slices(self.key.as_bytes(), iv)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|_| CryptoError::TagMismatch)
    }

    /// Encrypts a field value, prefixing the result with `enc:`.
    ///
    /// A value that already carries the sentinel is returned unchanged, so
    /// writers can re-save a row without double-encrypting.
    pub fn encrypt_field(&self, value: &str) -> Result<String> {
        if value.starts_with(ENC_PREFIX) {
            return Ok(value.to_string());
        }
        Ok(format!("{}{}", ENC_PREFIX, self.encrypt(value.as_bytes())?))
    }

    /// Decrypts a field value written by [`encrypt_field`].
    ///
    /// Values without the sentinel are returned as-is: rows written before
    /// the encryption migration are plaintext and must keep reading.
    ///
    /// [`encrypt_field`]: FieldCipher::encrypt_field
    pub fn decrypt_field(&self, value: &str) -> Result<String> {
        let Some(blob) = value.strip_prefix(ENC_PREFIX) else {
            return Ok(value.to_string());
        };
        let plain = self.decrypt(blob)?;
        String::from_utf8(plain).map_err(|_| CryptoError::NotUtf8)
    }

    /// True when the value carries the field sentinel.
    pub fn is_encrypted_field(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::{block_padding::Pkcs7 as EncPkcs7, BlockEncryptMut};

    fn cipher() -> FieldCipher {
        FieldCipher::new(MasterKey::from_bytes(&[7u8; 32]).unwrap())
    }

    #[test]
    fn test_encrypt_produces_gcm_prefix() {
        let blob = cipher().encrypt(b"s3cret").unwrap();
        assert!(blob.starts_with(GCM_PREFIX));
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        let blob = c.encrypt(b"s3cret").unwrap();
        assert_eq!(c.decrypt(&blob).unwrap(), b"s3cret");
    }

    #[test]
    fn test_tampered_body_rejected() {
        let c = cipher();
        let blob = c.encrypt(b"s3cret").unwrap();
        let mut raw = BASE64.decode(blob.strip_prefix(GCM_PREFIX).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = format!("{}{}", GCM_PREFIX, BASE64.encode(raw));
        assert!(matches!(
            c.decrypt(&tampered),
            Err(CryptoError::TagMismatch)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = cipher().encrypt(b"s3cret").unwrap();
        let other = FieldCipher::new(MasterKey::from_bytes(&[8u8; 32]).unwrap());
        assert!(matches!(other.decrypt(&blob), Err(CryptoError::TagMismatch)));
    }

    #[test]
    fn test_field_sentinel_idempotent() {
        let c = cipher();
        let once = c.encrypt_field("hunter2").unwrap();
        assert!(once.starts_with(ENC_PREFIX));
        let twice = c.encrypt_field(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(c.decrypt_field(&twice).unwrap(), "hunter2");
    }

    #[test]
    fn test_plaintext_field_passes_through() {
        assert_eq!(cipher().decrypt_field("legacy-plain").unwrap(), "legacy-plain");
    }

    #[test]
    fn test_iv_fresh_per_encryption() {
        let c = cipher();
        assert_ne!(c.encrypt(b"same").unwrap(), c.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_legacy_cbc_decrypts() {
        type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let ct = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<EncPkcs7>(b"old secret");
        let mut raw = iv.to_vec();
        raw.extend_from_slice(&ct);
        let blob = BASE64.encode(raw);

        assert_eq!(cipher().decrypt(&blob).unwrap(), b"old secret");
    }

    #[test]
    fn test_malformed_blob_distinct_from_tamper() {
        let c = cipher();
        assert!(matches!(
            c.decrypt("gcm:@@@not-base64@@@"),
            Err(CryptoError::MalformedCiphertext(_))
        ));
        assert!(matches!(
            c.decrypt("gcm:AAAA"),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }
}
