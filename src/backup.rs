// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Encrypts wallet key material under a fresh Private Key Encryption Key.

use crate::{
    errors::{InternalError, Result},
    parameters::PRIVATE_KEY_MATERIAL_AD,
    sealed::{self, SealedData, SymmetricKey},
};
use rand::{CryptoRng, RngCore};
use std::fmt::{Debug, Formatter};
use tracing::{error, instrument, trace};

/// The symmetric key protecting one backup's private key material.
///
/// A new one is generated for every backup. It is never serialized in the
/// clear: the only ways out of memory are the per-contact wraps produced by
/// [`crate::wrapping`]. Dropping it zeroizes the key.
pub struct PrivateKeyEncryptionKey(SymmetricKey);

impl PrivateKeyEncryptionKey {
    pub(crate) fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(SymmetricKey::generate(rng))
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        SymmetricKey::from_slice(bytes).map(Self)
    }

    pub(crate) fn as_symmetric_key(&self) -> &SymmetricKey {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Debug for PrivateKeyEncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKeyEncryptionKey([REDACTED])")
    }
}

/// Output of [`encrypt_private_key_material`].
#[derive(Debug)]
pub struct EncryptPrivateKeyMaterialOutput {
    /// The fresh key, to be wrapped for each Trusted Contact and then dropped.
    pub private_key_encryption_key: PrivateKeyEncryptionKey,
    /// The sealed key material, destined for durable backup storage.
    pub sealed_private_key_material: SealedData,
}

/// Seals `private_key_material` under a freshly generated PKEK.
///
/// Two calls with the same input yield different keys and different
/// ciphertexts.
#[instrument(skip_all)]
pub fn encrypt_private_key_material<R: RngCore + CryptoRng>(
    rng: &mut R,
    private_key_material: &[u8],
) -> Result<EncryptPrivateKeyMaterialOutput> {
    let private_key_encryption_key = PrivateKeyEncryptionKey::generate(rng);
    let sealed_private_key_material = sealed::encrypt(
        rng,
        private_key_encryption_key.as_symmetric_key(),
        private_key_material,
        Some(PRIVATE_KEY_MATERIAL_AD),
    )
    .map_err(|e| {
        error!("Sealing private key material failed unexpectedly: {e}");
        InternalError::InternalInvariantFailed
    })?;
    trace!("Encrypted private key material.");
    Ok(EncryptPrivateKeyMaterialOutput {
        private_key_encryption_key,
        sealed_private_key_material,
    })
}

/// Inverse of [`encrypt_private_key_material`].
pub fn decrypt_private_key_material_with(
    private_key_encryption_key: &PrivateKeyEncryptionKey,
    sealed_private_key_material: &SealedData,
) -> Result<Vec<u8>> {
    sealed::decrypt(
        private_key_encryption_key.as_symmetric_key(),
        sealed_private_key_material,
        Some(PRIVATE_KEY_MATERIAL_AD),
    )
}
