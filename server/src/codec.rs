/// Message body encryption at rest.
/// AES-256-CBC with PKCS#7 padding under one process-wide key; every
/// message gets its own random 16-byte iv.
use crate::error::{ChatError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Ciphertext plus the iv it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

pub struct MessageCodec {
    key: [u8; KEY_LEN],
}

impl MessageCodec {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        MessageCodec { key }
    }

    /// Build a codec from configured key material: either 64 hex characters
    /// or exactly 32 raw bytes.
    pub fn from_key_material(material: &str) -> Result<Self> {
        let bytes = if material.len() == KEY_LEN * 2
            && material.bytes().all(|b| b.is_ascii_hexdigit())
        {
            hex::decode(material).map_err(|e| ChatError::Config(e.to_string()))?
        } else {
            material.as_bytes().to_vec()
        };

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            ChatError::Config(format!(
                "encryption key must be {} bytes (or {} hex characters), got {} bytes",
                KEY_LEN,
                KEY_LEN * 2,
                bytes.len()
            ))
        })?;

        Ok(Self::new(key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Sealed {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Sealed { ciphertext, iv }
    }

    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<String> {
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| ChatError::Decode(format!("iv must be {} bytes", IV_LEN)))?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(ChatError::Decode(
                "ciphertext is not a whole number of blocks".to_string(),
            ));
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| ChatError::Decode("bad padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| ChatError::Decode("plaintext is not valid UTF-8".to_string()))
    }
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec").finish_non_exhaustive()
    }
}
