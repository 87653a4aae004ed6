// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Authenticated symmetric encryption producing self-describing sealed data.
//!
//! A [`SealedData`] carries the algorithm it was sealed with, so a decryptor
//! can reject data sealed under an algorithm it does not support without
//! attempting a doomed decryption. The opaque string form
//! `<algorithm>$<hex nonce>$<hex ciphertext>` is what storage collaborators
//! persist.

use crate::errors::{InternalError, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};
use tracing::{error, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tag of the only algorithm this crate seals with.
pub const XCHACHA20_POLY1305: &str = "XChaCha20Poly1305";

/// XChaCha20 nonce length. Large enough for random generation per call.
pub const NONCE_LEN: usize = 24;

/// Symmetric key length.
pub const KEY_LEN: usize = 32;

const SEPARATOR: char = '$';

/// A 256-bit symmetric key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Wraps raw key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Samples a fresh key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_LEN];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// Parses a key from a slice, which must be exactly [`KEY_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_LEN {
            return Err(InternalError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                KEY_LEN,
                slice.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Debug for SymmetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Ciphertext together with the algorithm and nonce needed to open it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedData {
    algorithm: String,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SealedData {
    /// Assembles sealed data from its parts, e.g. after reading a legacy
    /// storage format. No validation happens until [`decrypt`].
    pub fn from_parts(algorithm: impl Into<String>, nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            algorithm: algorithm.into(),
            nonce,
            ciphertext,
        }
    }

    /// The declared algorithm tag.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The nonce used to seal.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Ciphertext including the authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The opaque single-string encoding handed to storage collaborators.
    pub fn to_opaque_string(&self) -> String {
        self.to_string()
    }

    #[cfg(test)]
    pub(crate) fn ciphertext_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext
    }
}

impl Debug for SealedData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedData")
            .field("algorithm", &self.algorithm)
            .field("nonce", &hex::encode(&self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl Display for SealedData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.algorithm,
            SEPARATOR,
            hex::encode(&self.nonce),
            SEPARATOR,
            hex::encode(&self.ciphertext)
        )
    }
}

impl FromStr for SealedData {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(SEPARATOR);
        let (algorithm, nonce, ciphertext) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(n), Some(c)) if !a.is_empty() => (a, n, c),
            _ => return Err(InternalError::MalformedSealedData),
        };
        if parts.next().is_some() {
            return Err(InternalError::MalformedSealedData);
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            nonce: hex::decode(nonce).map_err(|_| InternalError::MalformedSealedData)?,
            ciphertext: hex::decode(ciphertext).map_err(|_| InternalError::MalformedSealedData)?,
        })
    }
}

/// Seals `plaintext` under `key` with a fresh random nonce.
///
/// `associated_data` is authenticated but not encrypted; the same value must
/// be presented to [`decrypt`].
pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &SymmetricKey,
    plaintext: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<SealedData> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| InternalError::InternalInvariantFailed)?;
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: associated_data.unwrap_or_default(),
            },
        )
        .map_err(|_| {
            error!("AEAD encryption failed");
            InternalError::InternalInvariantFailed
        })?;

    trace!(len = plaintext.len(), "Sealed data.");
    Ok(SealedData {
        algorithm: XCHACHA20_POLY1305.to_string(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Opens `sealed` under `key`.
///
/// Fails with [`InternalError::AlgorithmMismatch`] before touching the
/// ciphertext if the algorithm tag or nonce shape is not what this decryptor
/// expects, and with [`InternalError::AuthenticationFailed`] for a wrong key,
/// wrong associated data or tampered ciphertext.
pub fn decrypt(
    key: &SymmetricKey,
    sealed: &SealedData,
    associated_data: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if sealed.algorithm != XCHACHA20_POLY1305 || sealed.nonce.len() != NONCE_LEN {
        error!(
            "Sealed data declares algorithm {:?} with a {} byte nonce",
            sealed.algorithm,
            sealed.nonce.len()
        );
        return Err(InternalError::AlgorithmMismatch);
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| InternalError::InternalInvariantFailed)?;
    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: associated_data.unwrap_or_default(),
            },
        )
        .map_err(|_| InternalError::AuthenticationFailed)
}
