// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    backup::{
        encrypt_private_key_material, EncryptPrivateKeyMaterialOutput, PrivateKeyEncryptionKey,
    },
    certificate::{
        generate_key_certificate, verify_key_certificate, EndorsedTrustedContact, KeyCertificate,
    },
    errors::{InternalError, Result},
    keys::{
        AppGlobalAuthKey, DelegatedDecryptionKey, HwAuthKey, Keypair,
        ProtectedCustomerEnrollmentKey, ProtectedCustomerEphemeralKey,
        ProtectedCustomerIdentityKey, ProtectedCustomerRecoveryKey, PublicKey, Signature,
        TrustedContactIdentityKey,
    },
    pake::{
        decrypt_trusted_contact_identity_key, encrypt_trusted_contact_identity_key,
        generate_protected_customer_enrollment_key, EncryptTrustedContactIdentityKeyOutput,
        PakeKeypair, PakePublicKey,
    },
    parameters::KdfParams,
    recovery::{
        decrypt_private_key_encryption_key_v2, decrypt_private_key_material,
        derive_and_encrypt_shared_secret, generate_protected_customer_ephemeral_key,
        generate_protected_customer_recovery_key, transfer_private_key_encryption_key_encryption,
        DecryptPrivateKeyMaterialParams, EncryptPrivateKeyEncryptionKeyOutput, SealedSharedSecret,
    },
    sealed::SealedData,
    wrapping::{
        decrypt_private_key_encryption_key, encrypt_private_key_encryption_key, SealedPkekMap,
    },
};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::{instrument, trace, warn};

/// Identifies one recovery relationship between a Protected Customer and a
/// Trusted Contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecoveryRelationshipId(String);

impl RecoveryRelationshipId {
    /// Wraps an id assigned by the server.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return arg_err!("recovery relationship id must not be empty");
        }
        Ok(Self(id))
    }

    /// A fresh random id.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        // Sample random 32 bytes and convert to hex
        let random_bytes = rng.gen::<[u8; 32]>();
        Self(hex::encode(random_bytes))
    }
}

impl Display for RecoveryRelationshipId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecoveryRelationshipId {
    type Err = InternalError;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// What the Protected Customer uploads after a backup: the sealed key
/// material and one PKEK wrap per endorsed Trusted Contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialRecoveryBackup {
    /// The sealed private key material.
    pub sealed_private_key_material: SealedData,
    /// The PKEK, wrapped for each Trusted Contact.
    pub sealed_pkek_map: SealedPkekMap,
}

impl SocialRecoveryBackup {
    /// Serializes the backup for a storage collaborator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(&self)
    }

    /// Inverse of [`SocialRecoveryBackup::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

/// Entry point for applications.
///
/// Holds the password-stretching configuration and exposes every protocol
/// operation as a method. Each method forwards to the free function of the
/// same name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocialRecoveryCrypto {
    kdf: KdfParams,
}

impl SocialRecoveryCrypto {
    /// Validates `kdf` and builds the entry point.
    pub fn new(kdf: KdfParams) -> Result<Self> {
        let kdf = KdfParams::new(kdf.memory_kib, kdf.iterations, kdf.parallelism)?;
        Ok(Self { kdf })
    }

    /// The configured password-stretching parameters.
    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    ////////////
    // Backup //
    ////////////

    /// See [`encrypt_private_key_material`].
    pub fn encrypt_private_key_material<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        private_key_material: &[u8],
    ) -> Result<EncryptPrivateKeyMaterialOutput> {
        encrypt_private_key_material(rng, private_key_material)
    }

    /// See [`encrypt_private_key_encryption_key`].
    pub fn encrypt_private_key_encryption_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
        protected_customer_identity_key: &Keypair<ProtectedCustomerIdentityKey>,
        private_key_encryption_key: &PrivateKeyEncryptionKey,
    ) -> Result<SealedData> {
        encrypt_private_key_encryption_key(
            rng,
            trusted_contact_identity_key,
            protected_customer_identity_key,
            private_key_encryption_key,
        )
    }

    /// See [`decrypt_private_key_encryption_key`].
    pub fn decrypt_private_key_encryption_key(
        &self,
        protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
        delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
        sealed_private_key_encryption_key: &SealedData,
    ) -> Result<PrivateKeyEncryptionKey> {
        decrypt_private_key_encryption_key(
            protected_customer_identity_key,
            delegated_decryption_key,
            sealed_private_key_encryption_key,
        )
    }

    /// Seals `private_key_material` and wraps its PKEK for every Trusted
    /// Contact whose certificate verifies against the current authentication
    /// keys.
    ///
    /// Contacts with a certificate that does not verify are left out of the
    /// backup. Fails if no contact is left, since the backup could then never
    /// be recovered.
    #[instrument(skip_all)]
    pub fn create_backup<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        private_key_material: &[u8],
        protected_customer_identity_key: &Keypair<ProtectedCustomerIdentityKey>,
        trusted_contacts: &[EndorsedTrustedContact],
        hw_auth_public_key: Option<&PublicKey<HwAuthKey>>,
        app_global_auth_public_key: Option<&PublicKey<AppGlobalAuthKey>>,
    ) -> Result<SocialRecoveryBackup> {
        let mut verified = Vec::with_capacity(trusted_contacts.len());
        for contact in trusted_contacts {
            match contact.verified_identity_key(hw_auth_public_key, app_global_auth_public_key) {
                Ok(identity_key) => verified.push((&contact.relationship_id, identity_key)),
                Err(e) => warn!(
                    "Leaving relationship {} out of the backup: {e}",
                    contact.relationship_id
                ),
            }
        }
        if verified.is_empty() {
            return arg_err!("no trusted contact has a verifiable key certificate");
        }

        let output = encrypt_private_key_material(rng, private_key_material)?;
        let sealed_pkek_map = SealedPkekMap::build(
            rng,
            protected_customer_identity_key,
            &output.private_key_encryption_key,
            verified.iter().map(|(id, key)| (*id, key)),
        )?;
        trace!(contacts = sealed_pkek_map.len(), "Created social recovery backup.");
        Ok(SocialRecoveryBackup {
            sealed_private_key_material: output.sealed_private_key_material,
            sealed_pkek_map,
        })
    }

    ////////////////
    // Enrollment //
    ////////////////

    /// See [`generate_protected_customer_enrollment_key`].
    pub fn generate_protected_customer_enrollment_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        password: &[u8],
    ) -> Result<PakeKeypair<ProtectedCustomerEnrollmentKey>> {
        generate_protected_customer_enrollment_key(rng, password, &self.kdf)
    }

    /// See [`encrypt_trusted_contact_identity_key`].
    pub fn encrypt_trusted_contact_identity_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        password: &[u8],
        protected_customer_enrollment_key: &PakePublicKey<ProtectedCustomerEnrollmentKey>,
        trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
    ) -> Result<EncryptTrustedContactIdentityKeyOutput> {
        encrypt_trusted_contact_identity_key(
            rng,
            password,
            protected_customer_enrollment_key,
            trusted_contact_identity_key,
            &self.kdf,
        )
    }

    /// See [`decrypt_trusted_contact_identity_key`].
    pub fn decrypt_trusted_contact_identity_key(
        &self,
        password: &[u8],
        protected_customer_enrollment_key: &PakeKeypair<ProtectedCustomerEnrollmentKey>,
        output: &EncryptTrustedContactIdentityKeyOutput,
    ) -> Result<PublicKey<TrustedContactIdentityKey>> {
        decrypt_trusted_contact_identity_key(
            password,
            protected_customer_enrollment_key,
            output,
            &self.kdf,
        )
    }

    //////////////////
    // Certificates //
    //////////////////

    /// See [`generate_key_certificate`].
    pub fn generate_key_certificate(
        &self,
        trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
        hw_auth_public_key: &PublicKey<HwAuthKey>,
        app_global_auth_key: &Keypair<AppGlobalAuthKey>,
        hw_signature: Signature,
    ) -> Result<KeyCertificate> {
        generate_key_certificate(
            trusted_contact_identity_key,
            hw_auth_public_key,
            app_global_auth_key,
            hw_signature,
        )
    }

    /// See [`verify_key_certificate`].
    pub fn verify_key_certificate(
        &self,
        certificate: &KeyCertificate,
        hw_auth_public_key: Option<&PublicKey<HwAuthKey>>,
        app_global_auth_public_key: Option<&PublicKey<AppGlobalAuthKey>>,
    ) -> Result<PublicKey<TrustedContactIdentityKey>> {
        verify_key_certificate(certificate, hw_auth_public_key, app_global_auth_public_key)
    }

    //////////////
    // Recovery //
    //////////////

    /// See [`generate_protected_customer_ephemeral_key`].
    pub fn generate_protected_customer_ephemeral_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Keypair<ProtectedCustomerEphemeralKey> {
        generate_protected_customer_ephemeral_key(rng)
    }

    /// See [`derive_and_encrypt_shared_secret`].
    pub fn derive_and_encrypt_shared_secret<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
        protected_customer_ephemeral_key: &PublicKey<ProtectedCustomerEphemeralKey>,
        delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
    ) -> Result<SealedSharedSecret> {
        derive_and_encrypt_shared_secret(
            rng,
            protected_customer_identity_key,
            protected_customer_ephemeral_key,
            delegated_decryption_key,
        )
    }

    /// See [`generate_protected_customer_recovery_key`].
    pub fn generate_protected_customer_recovery_key<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        password: &[u8],
    ) -> Result<PakeKeypair<ProtectedCustomerRecoveryKey>> {
        generate_protected_customer_recovery_key(rng, password, &self.kdf)
    }

    /// See [`transfer_private_key_encryption_key_encryption`].
    pub fn transfer_private_key_encryption_key_encryption<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        password: &[u8],
        protected_customer_recovery_key: &PakePublicKey<ProtectedCustomerRecoveryKey>,
        delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
        protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
        sealed_private_key_encryption_key: &SealedData,
    ) -> Result<EncryptPrivateKeyEncryptionKeyOutput> {
        transfer_private_key_encryption_key_encryption(
            rng,
            password,
            protected_customer_recovery_key,
            delegated_decryption_key,
            protected_customer_identity_key,
            sealed_private_key_encryption_key,
            &self.kdf,
        )
    }

    /// See [`decrypt_private_key_encryption_key_v2`].
    pub fn decrypt_private_key_encryption_key_v2(
        &self,
        password: &[u8],
        protected_customer_recovery_key: &PakeKeypair<ProtectedCustomerRecoveryKey>,
        output: &EncryptPrivateKeyEncryptionKeyOutput,
    ) -> Result<PrivateKeyEncryptionKey> {
        decrypt_private_key_encryption_key_v2(
            password,
            protected_customer_recovery_key,
            output,
            &self.kdf,
        )
    }

    /// See [`decrypt_private_key_material`].
    pub fn decrypt_private_key_material(
        &self,
        params: DecryptPrivateKeyMaterialParams<'_>,
        sealed_private_key_material: &SealedData,
    ) -> Result<Vec<u8>> {
        decrypt_private_key_material(params, sealed_private_key_material, &self.kdf)
    }
}
