// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Cryptographic core of a social recovery scheme for wallet key material
//!
//! A Protected Customer seals their private key material under a fresh
//! Private Key Encryption Key (PKEK), and wraps that PKEK once for each
//! Trusted Contact they have enrolled. If the customer later loses their
//! device, any single Trusted Contact can help them recover the PKEK, and
//! hence the key material, without ever seeing it in the clear.
//!
//! The crate covers the whole lifecycle:
//!
//! - enrollment, where the Trusted Contact's identity key reaches the
//!   Protected Customer through an untrusted relay, authenticated by a short
//!   password shared out of band ([`generate_protected_customer_enrollment_key`]);
//! - endorsement, where the identity key is certified by the customer's
//!   hardware and app authentication keys ([`generate_key_certificate`],
//!   [`verify_key_certificate`]);
//! - backup, where the key material is sealed and the PKEK wrapped per contact
//!   ([`encrypt_private_key_material`], [`SealedPkekMap`]);
//! - recovery, either through the legacy ephemeral-key flow or the
//!   password-confirmed flow ([`decrypt_private_key_material`]).
//!
//! Everything here is synchronous and free of I/O: storage, the relay and the
//! hardware device are collaborators supplied by the application. Randomness
//! is always passed in explicitly. [`SocialRecoveryCrypto`] bundles the
//! configuration and exposes every operation as a method.
//!
//! All asymmetric keys are secp256k1, all symmetric seals are
//! XChaCha20-Poly1305, and passwords are stretched with Argon2id before they
//! enter SPAKE2 (over the Ed25519 group).

#![warn(missing_docs)]

#[macro_use]
pub mod errors;

mod backup;
mod certificate;
mod keys;
mod pake;
mod parameters;
mod protocol;
mod recovery;
mod sealed;
mod serialization;
mod utils;
mod wrapping;

pub use backup::{
    decrypt_private_key_material_with, encrypt_private_key_material,
    EncryptPrivateKeyMaterialOutput, PrivateKeyEncryptionKey,
};
pub use certificate::{
    endorse_app_key, generate_key_certificate, verify_key_certificate, EndorsedTrustedContact,
    HardwareAuthSigner, KeyCertificate,
};
pub use keys::{
    generate_keypair, sign, verify_sig, AppGlobalAuthKey, DelegatedDecryptionKey, HwAuthKey,
    KeyRole, Keypair, PrivateKey, ProtectedCustomerEnrollmentKey, ProtectedCustomerEphemeralKey,
    ProtectedCustomerIdentityKey, ProtectedCustomerRecoveryKey, PublicKey, Signature,
    TrustedContactIdentityKey, PUBLIC_KEY_LEN,
};
pub use pake::{
    decrypt_trusted_contact_identity_key, encrypt_trusted_contact_identity_key,
    generate_protected_customer_enrollment_key, EncryptTrustedContactIdentityKeyOutput,
    PakeKeyRole, PakeKeypair, PakePublicKey, PakeSealedOutput,
};
pub use parameters::{KdfParams, DEFAULT_ITERATIONS, DEFAULT_MEMORY_KIB, DEFAULT_PARALLELISM};
pub use protocol::{RecoveryRelationshipId, SocialRecoveryBackup, SocialRecoveryCrypto};
pub use recovery::{
    decrypt_private_key_encryption_key_v1, decrypt_private_key_encryption_key_v2,
    decrypt_private_key_material, derive_and_encrypt_shared_secret,
    generate_protected_customer_ephemeral_key, generate_protected_customer_recovery_key,
    transfer_private_key_encryption_key_encryption, DecryptPrivateKeyMaterialParams,
    EncryptPrivateKeyEncryptionKeyOutput, SealedSharedSecret,
};
pub use sealed::{SealedData, SymmetricKey, XCHACHA20_POLY1305};
pub use wrapping::{
    decrypt_private_key_encryption_key, encrypt_private_key_encryption_key, SealedPkekMap,
};

#[cfg(test)]
mod tests;
