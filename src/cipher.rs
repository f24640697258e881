//! Decoding of the portal's encrypted response bodies.
//!
//! Bodies are base64 text of DES-ECB ciphertext with PKCS#5/7 padding. Decoding is a two-step
//! affair: [`Codec::decrypt`] either yields the plaintext or tells the caller to parse the raw
//! body as plain JSON, and [`Codec::decode_json`] performs both steps.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use des::{
    cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit},
    Des,
};
use serde_json::Value;

use crate::{Error, Result};

pub const BLOCK_SIZE: usize = 8;
/// Historical key shipped with the portal's web client.
const DEFAULT_KEY: [u8; BLOCK_SIZE] = *b"IFROMC86";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DesKey([u8; BLOCK_SIZE]);

impl DesKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let key: [u8; BLOCK_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl Default for DesKey {
    fn default() -> Self {
        Self(DEFAULT_KEY)
    }
}

// Never print the key itself.
impl std::fmt::Debug for DesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DesKey(..)")
    }
}

/// Result of the decryption attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Plaintext(String),
    /// The body is not something we can decrypt, treat it as plain JSON.
    NeedsPlainParse,
}

#[derive(Debug, Clone)]
pub struct Codec {
    key: DesKey,
}

impl Codec {
    pub fn new(key: DesKey) -> Self {
        Self { key }
    }

    pub fn decrypt(&self, body: &str) -> Decoded {
        let Ok(mut data) = STANDARD.decode(body.trim()) else {
            return Decoded::NeedsPlainParse;
        };
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Decoded::NeedsPlainParse;
        }
        let cipher = Des::new(GenericArray::from_slice(self.key.as_bytes()));
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        let Some(len) = unpad(&data) else {
            return Decoded::NeedsPlainParse;
        };
        data.truncate(len);
        match String::from_utf8(data) {
            Ok(text) => Decoded::Plaintext(text),
            Err(_) => Decoded::NeedsPlainParse,
        }
    }

    /// Decrypts `body` and parses the plaintext, or parses `body` itself when it isn't ciphertext.
    pub fn decode_json(&self, body: &str) -> Result<Value> {
        let value = match self.decrypt(body) {
            Decoded::Plaintext(text) => serde_json::from_str(&text)?,
            Decoded::NeedsPlainParse => serde_json::from_str(body)?,
        };
        Ok(value)
    }
}

/// Returns the unpadded length, or `None` when the trailing bytes are not valid PKCS#5/7 padding.
fn unpad(data: &[u8]) -> Option<usize> {
    let pad = *data.last()? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return None;
    }
    let (rest, padding) = data.split_at(data.len() - pad);
    padding
        .iter()
        .all(|&b| b as usize == pad)
        .then_some(rest.len())
}
