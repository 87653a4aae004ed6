// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Wraps a backup's PKEK for each Trusted Contact.
//!
//! The wrap key is derived from ECDH between the Protected Customer's
//! identity key and the contact's identity key. Either side can compute it:
//! the Protected Customer while creating the backup, the contact's device
//! while answering a recovery. Every contact gets an independent wrap, so a
//! compromised wrap exposes nothing about the others.

use crate::{
    backup::PrivateKeyEncryptionKey,
    errors::{InternalError, Result},
    keys::{
        diffie_hellman, DelegatedDecryptionKey, Keypair, ProtectedCustomerIdentityKey, PublicKey,
        TrustedContactIdentityKey,
    },
    parameters::PKEK_WRAP_INFO,
    protocol::RecoveryRelationshipId,
    sealed::{self, SealedData, SymmetricKey},
    utils::hkdf_sha256,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, instrument, trace};

/// Derives the PKEK wrap key from a raw ECDH shared secret.
pub(crate) fn wrap_key_from_shared_secret(shared_secret: &[u8]) -> Result<SymmetricKey> {
    hkdf_sha256(shared_secret, None, &[PKEK_WRAP_INFO])
}

/// Opens a PKEK wrap given the wrap key directly.
pub(crate) fn unwrap_with_key(
    wrap_key: &SymmetricKey,
    sealed_private_key_encryption_key: &SealedData,
) -> Result<PrivateKeyEncryptionKey> {
    let bytes = zeroize::Zeroizing::new(sealed::decrypt(
        wrap_key,
        sealed_private_key_encryption_key,
        Some(PKEK_WRAP_INFO),
    )?);
    PrivateKeyEncryptionKey::from_slice(&bytes).map_err(|_| {
        error!("A PKEK wrap authenticated but did not contain a key");
        InternalError::InternalInvariantFailed
    })
}

/// Wraps `private_key_encryption_key` for one Trusted Contact.
#[instrument(skip_all)]
pub fn encrypt_private_key_encryption_key<R: RngCore + CryptoRng>(
    rng: &mut R,
    trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
    protected_customer_identity_key: &Keypair<ProtectedCustomerIdentityKey>,
    private_key_encryption_key: &PrivateKeyEncryptionKey,
) -> Result<SealedData> {
    let shared_secret = diffie_hellman(
        protected_customer_identity_key.private_key(),
        trusted_contact_identity_key,
    );
    let wrap_key = wrap_key_from_shared_secret(shared_secret.as_slice())?;
    let sealed = sealed::encrypt(
        rng,
        &wrap_key,
        private_key_encryption_key.as_symmetric_key().as_bytes(),
        Some(PKEK_WRAP_INFO),
    )?;
    trace!("Wrapped PKEK for a Trusted Contact.");
    Ok(sealed)
}

/// Opens a PKEK wrap on the Trusted Contact's device.
///
/// Fails with [`InternalError::AuthenticationFailed`] if the wrap was made
/// for a different contact or a different Protected Customer.
#[instrument(skip_all)]
pub fn decrypt_private_key_encryption_key(
    protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
    delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
    sealed_private_key_encryption_key: &SealedData,
) -> Result<PrivateKeyEncryptionKey> {
    let shared_secret = diffie_hellman(
        delegated_decryption_key.private_key(),
        protected_customer_identity_key,
    );
    let wrap_key = wrap_key_from_shared_secret(shared_secret.as_slice())?;
    unwrap_with_key(&wrap_key, sealed_private_key_encryption_key)
}

/// One wrapped PKEK per active recovery relationship.
///
/// Entries for relationships that are no longer active must be removed
/// with [`SealedPkekMap::retain_active`]; a revoked contact keeps no
/// ciphertext in the backup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPkekMap(BTreeMap<RecoveryRelationshipId, SealedData>);

impl SealedPkekMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `private_key_encryption_key` once for every listed contact.
    /// A relationship listed twice keeps only its last wrap.
    pub fn build<'a, R, I>(
        rng: &mut R,
        protected_customer_identity_key: &Keypair<ProtectedCustomerIdentityKey>,
        private_key_encryption_key: &PrivateKeyEncryptionKey,
        trusted_contacts: I,
    ) -> Result<Self>
    where
        R: RngCore + CryptoRng,
        I: IntoIterator<
            Item = (
                &'a RecoveryRelationshipId,
                &'a PublicKey<TrustedContactIdentityKey>,
            ),
        >,
    {
        let mut map = Self::new();
        for (relationship_id, identity_key) in trusted_contacts {
            let sealed = encrypt_private_key_encryption_key(
                rng,
                identity_key,
                protected_customer_identity_key,
                private_key_encryption_key,
            )?;
            let _ = map.0.insert(relationship_id.clone(), sealed);
        }
        Ok(map)
    }

    /// Inserts or replaces the wrap for `relationship_id`.
    pub fn insert(&mut self, relationship_id: RecoveryRelationshipId, sealed: SealedData) {
        let _ = self.0.insert(relationship_id, sealed);
    }

    /// The wrap held for `relationship_id`, if any.
    pub fn get(&self, relationship_id: &RecoveryRelationshipId) -> Option<&SealedData> {
        self.0.get(relationship_id)
    }

    /// Removes every entry whose relationship is not in `active`, returning
    /// the removed ids.
    pub fn retain_active(
        &mut self,
        active: &[RecoveryRelationshipId],
    ) -> Vec<RecoveryRelationshipId> {
        let stale: Vec<RecoveryRelationshipId> = self
            .0
            .keys()
            .filter(|id| !active.contains(id))
            .cloned()
            .collect();
        for id in &stale {
            let _ = self.0.remove(id);
        }
        if !stale.is_empty() {
            trace!(removed = stale.len(), "Removed stale PKEK wraps.");
        }
        stale
    }

    /// Relationship ids with a wrap, in sorted order.
    pub fn relationship_ids(&self) -> impl Iterator<Item = &RecoveryRelationshipId> {
        self.0.keys()
    }

    /// Number of wraps.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no wraps.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes the map for a storage collaborator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(&self)
    }

    /// Inverse of [`SealedPkekMap::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}
