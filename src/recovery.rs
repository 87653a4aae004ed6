// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Recovering private key material with a Trusted Contact's help.
//!
//! Two flows exist. In the legacy flow (V1) the contact hands the
//! Protected Customer the raw ECDH secret behind its PKEK wrap, sealed to a
//! one-shot ephemeral key. In the password-confirmed flow (V2) the contact
//! unwraps the PKEK itself and re-seals it through a password-authenticated
//! exchange, so a relay in the middle learns nothing and cannot substitute
//! keys. New deployments should only use V2.

use crate::{
    backup::{decrypt_private_key_material_with, PrivateKeyEncryptionKey},
    errors::{InternalError, Result},
    keys::{
        diffie_hellman, DelegatedDecryptionKey, Keypair, ProtectedCustomerEphemeralKey,
        ProtectedCustomerIdentityKey, ProtectedCustomerRecoveryKey, PublicKey,
        TrustedContactIdentityKey,
    },
    pake::{
        generate_pake_keypair, pake_open, pake_seal, PakeKeypair, PakePublicKey, PakeSealedOutput,
    },
    parameters::{KdfParams, SHARED_SECRET_SEAL_INFO},
    sealed::{self, SealedData, SymmetricKey},
    utils::hkdf_sha256,
    wrapping::{
        decrypt_private_key_encryption_key, unwrap_with_key, wrap_key_from_shared_secret,
    },
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, trace, warn};
use zeroize::Zeroizing;

/// Output of [`transfer_private_key_encryption_key_encryption`].
pub type EncryptPrivateKeyEncryptionKeyOutput = PakeSealedOutput<ProtectedCustomerRecoveryKey>;

//////////////////
// V1 (legacy)  //
//////////////////

/// A PKEK wrap's shared secret, sealed to the Protected Customer's ephemeral
/// key by the Trusted Contact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSharedSecret {
    trusted_contact_identity_key: PublicKey<TrustedContactIdentityKey>,
    sealed: SealedData,
}

impl SealedSharedSecret {
    /// The identity key of the contact that produced this value.
    pub fn trusted_contact_identity_key(&self) -> &PublicKey<TrustedContactIdentityKey> {
        &self.trusted_contact_identity_key
    }

    /// The sealed secret.
    pub fn sealed_data(&self) -> &SealedData {
        &self.sealed
    }
}

fn shared_secret_seal_key(
    ecdh: &[u8],
    ephemeral_key: &PublicKey<ProtectedCustomerEphemeralKey>,
    trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
) -> Result<SymmetricKey> {
    hkdf_sha256(
        ecdh,
        None,
        &[
            SHARED_SECRET_SEAL_INFO,
            &ephemeral_key.to_sec1_bytes(),
            &trusted_contact_identity_key.to_sec1_bytes(),
        ],
    )
}

/// Generates the one-shot key a legacy recovery request is sealed to.
pub fn generate_protected_customer_ephemeral_key<G: RngCore + CryptoRng>(
    rng: &mut G,
) -> Keypair<ProtectedCustomerEphemeralKey> {
    Keypair::generate(rng)
}

/// Answers a legacy recovery request (Trusted Contact side).
///
/// Recomputes the ECDH secret behind this contact's PKEK wrap and seals it
/// to `protected_customer_ephemeral_key`. Nothing authenticates the
/// ephemeral key, which is why this flow is legacy only.
#[instrument(skip_all)]
pub fn derive_and_encrypt_shared_secret<G: RngCore + CryptoRng>(
    rng: &mut G,
    protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
    protected_customer_ephemeral_key: &PublicKey<ProtectedCustomerEphemeralKey>,
    delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
) -> Result<SealedSharedSecret> {
    warn!("Answering a legacy (V1) recovery request");
    let trusted_contact_identity_key = delegated_decryption_key.trusted_contact_identity_key();
    let shared_secret = diffie_hellman(
        delegated_decryption_key.private_key(),
        protected_customer_identity_key,
    );
    let seal_key = shared_secret_seal_key(
        diffie_hellman(
            delegated_decryption_key.private_key(),
            protected_customer_ephemeral_key,
        )
        .as_slice(),
        protected_customer_ephemeral_key,
        &trusted_contact_identity_key,
    )?;
    let sealed = sealed::encrypt(
        rng,
        &seal_key,
        shared_secret.as_slice(),
        Some(SHARED_SECRET_SEAL_INFO),
    )?;
    Ok(SealedSharedSecret {
        trusted_contact_identity_key,
        sealed,
    })
}

/// Recovers the PKEK from a legacy answer (Protected Customer side).
#[instrument(skip_all)]
pub fn decrypt_private_key_encryption_key_v1(
    sealed_shared_secret: &SealedSharedSecret,
    protected_customer_ephemeral_key: &Keypair<ProtectedCustomerEphemeralKey>,
    sealed_private_key_encryption_key: &SealedData,
) -> Result<PrivateKeyEncryptionKey> {
    warn!("Opening a legacy (V1) recovery answer");
    let seal_key = shared_secret_seal_key(
        diffie_hellman(
            protected_customer_ephemeral_key.private_key(),
            &sealed_shared_secret.trusted_contact_identity_key,
        )
        .as_slice(),
        protected_customer_ephemeral_key.public_key(),
        &sealed_shared_secret.trusted_contact_identity_key,
    )?;
    let shared_secret = Zeroizing::new(sealed::decrypt(
        &seal_key,
        &sealed_shared_secret.sealed,
        Some(SHARED_SECRET_SEAL_INFO),
    )?);
    let wrap_key = wrap_key_from_shared_secret(&shared_secret)?;
    unwrap_with_key(&wrap_key, sealed_private_key_encryption_key)
}

//////////////////////////////
// V2 (password-confirmed)  //
//////////////////////////////

/// Generates the Protected Customer's recovery key, bound to the recovery
/// `password` shared with the Trusted Contact out of band.
#[instrument(skip_all)]
pub fn generate_protected_customer_recovery_key<G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    kdf: &KdfParams,
) -> Result<PakeKeypair<ProtectedCustomerRecoveryKey>> {
    generate_pake_keypair(rng, password, kdf)
}

/// Answers a password-confirmed recovery request (Trusted Contact side).
///
/// Unwraps this contact's PKEK wrap and re-seals the PKEK to
/// `protected_customer_recovery_key`. Fails with
/// [`InternalError::AuthenticationFailed`] if the wrap was not made for this
/// contact. Whether `password` matches the customer's only shows once the
/// customer opens the output.
#[instrument(skip_all)]
pub fn transfer_private_key_encryption_key_encryption<G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    protected_customer_recovery_key: &PakePublicKey<ProtectedCustomerRecoveryKey>,
    delegated_decryption_key: &Keypair<DelegatedDecryptionKey>,
    protected_customer_identity_key: &PublicKey<ProtectedCustomerIdentityKey>,
    sealed_private_key_encryption_key: &SealedData,
    kdf: &KdfParams,
) -> Result<EncryptPrivateKeyEncryptionKeyOutput> {
    let private_key_encryption_key = decrypt_private_key_encryption_key(
        protected_customer_identity_key,
        delegated_decryption_key,
        sealed_private_key_encryption_key,
    )?;
    let output = pake_seal(
        rng,
        password,
        protected_customer_recovery_key,
        private_key_encryption_key.as_symmetric_key().as_bytes(),
        kdf,
    )?;
    trace!("Transferred PKEK to the recovery key.");
    Ok(output)
}

/// Recovers the PKEK from a password-confirmed answer (Protected Customer
/// side).
///
/// Key confirmation is checked before the ciphertext is touched; a wrong
/// password fails with [`InternalError::KeyConfirmationFailed`] and leaves
/// everything in place for a retry.
#[instrument(skip_all)]
pub fn decrypt_private_key_encryption_key_v2(
    password: &[u8],
    protected_customer_recovery_key: &PakeKeypair<ProtectedCustomerRecoveryKey>,
    output: &EncryptPrivateKeyEncryptionKeyOutput,
    kdf: &KdfParams,
) -> Result<PrivateKeyEncryptionKey> {
    let bytes = pake_open(password, protected_customer_recovery_key, output, kdf)?;
    PrivateKeyEncryptionKey::from_slice(&bytes).map_err(|_| {
        error!("A confirmed recovery answer did not contain a key");
        InternalError::InternalInvariantFailed
    })
}

/// Everything the Protected Customer holds at the end of a recovery, by
/// flow.
#[derive(Debug)]
pub enum DecryptPrivateKeyMaterialParams<'a> {
    /// Legacy flow. Prefer [`DecryptPrivateKeyMaterialParams::V2`].
    V1 {
        /// The contact's answer.
        sealed_shared_secret: &'a SealedSharedSecret,
        /// The ephemeral keypair the request was made with.
        protected_customer_ephemeral_key: &'a Keypair<ProtectedCustomerEphemeralKey>,
        /// The contact's entry from the backup's [`crate::SealedPkekMap`].
        sealed_private_key_encryption_key: &'a SealedData,
    },
    /// Password-confirmed flow.
    V2 {
        /// The recovery password.
        password: &'a [u8],
        /// The recovery keypair the request was made with.
        protected_customer_recovery_key: &'a PakeKeypair<ProtectedCustomerRecoveryKey>,
        /// The contact's answer.
        encrypted_private_key_encryption_key_output: &'a EncryptPrivateKeyEncryptionKeyOutput,
    },
}

/// Recovers the PKEK through either flow and decrypts
/// `sealed_private_key_material` with it.
///
/// Nothing is retried: every failure is returned to the caller as is.
#[instrument(skip_all)]
pub fn decrypt_private_key_material(
    params: DecryptPrivateKeyMaterialParams<'_>,
    sealed_private_key_material: &SealedData,
    kdf: &KdfParams,
) -> Result<Vec<u8>> {
    let private_key_encryption_key = match params {
        DecryptPrivateKeyMaterialParams::V1 {
            sealed_shared_secret,
            protected_customer_ephemeral_key,
            sealed_private_key_encryption_key,
        } => decrypt_private_key_encryption_key_v1(
            sealed_shared_secret,
            protected_customer_ephemeral_key,
            sealed_private_key_encryption_key,
        )?,
        DecryptPrivateKeyMaterialParams::V2 {
            password,
            protected_customer_recovery_key,
            encrypted_private_key_encryption_key_output,
        } => decrypt_private_key_encryption_key_v2(
            password,
            protected_customer_recovery_key,
            encrypted_private_key_encryption_key_output,
            kdf,
        )?,
    };
    let material = decrypt_private_key_material_with(
        &private_key_encryption_key,
        sealed_private_key_material,
    )?;
    trace!("Recovered private key material.");
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backup::encrypt_private_key_material, keys::generate_keypair,
        wrapping::encrypt_private_key_encryption_key,
    };
    use rand::rngs::OsRng;

    struct Backup {
        protected_customer: Keypair<ProtectedCustomerIdentityKey>,
        trusted_contact: Keypair<DelegatedDecryptionKey>,
        sealed_private_key_material: SealedData,
        sealed_private_key_encryption_key: SealedData,
    }

    fn backup(material: &[u8]) -> Result<Backup> {
        let mut rng = OsRng;
        let protected_customer = generate_keypair(&mut rng);
        let trusted_contact: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
        let output = encrypt_private_key_material(&mut rng, material)?;
        let sealed_private_key_encryption_key = encrypt_private_key_encryption_key(
            &mut rng,
            &trusted_contact.trusted_contact_identity_key(),
            &protected_customer,
            &output.private_key_encryption_key,
        )?;
        Ok(Backup {
            protected_customer,
            trusted_contact,
            sealed_private_key_material: output.sealed_private_key_material,
            sealed_private_key_encryption_key,
        })
    }

    fn kdf() -> KdfParams {
        KdfParams::insecure_for_testing()
    }

    #[test]
    fn legacy_recovery_roundtrips() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"legacy material")?;
        let ephemeral = generate_protected_customer_ephemeral_key(&mut rng);
        let answer = derive_and_encrypt_shared_secret(
            &mut rng,
            b.protected_customer.public_key(),
            ephemeral.public_key(),
            &b.trusted_contact,
        )?;
        assert_eq!(
            answer.trusted_contact_identity_key(),
            &b.trusted_contact.trusted_contact_identity_key()
        );

        let material = decrypt_private_key_material(
            DecryptPrivateKeyMaterialParams::V1 {
                sealed_shared_secret: &answer,
                protected_customer_ephemeral_key: &ephemeral,
                sealed_private_key_encryption_key: &b.sealed_private_key_encryption_key,
            },
            &b.sealed_private_key_material,
            &kdf(),
        )?;
        assert_eq!(material, b"legacy material");
        Ok(())
    }

    #[test]
    fn legacy_answer_for_another_ephemeral_key_fails() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let ephemeral = generate_protected_customer_ephemeral_key(&mut rng);
        let other_ephemeral = generate_protected_customer_ephemeral_key(&mut rng);
        let answer = derive_and_encrypt_shared_secret(
            &mut rng,
            b.protected_customer.public_key(),
            ephemeral.public_key(),
            &b.trusted_contact,
        )?;
        assert_eq!(
            decrypt_private_key_encryption_key_v1(
                &answer,
                &other_ephemeral,
                &b.sealed_private_key_encryption_key
            )
            .unwrap_err(),
            InternalError::AuthenticationFailed
        );
        Ok(())
    }

    #[test]
    fn legacy_answer_with_unknown_algorithm_fails() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let ephemeral = generate_protected_customer_ephemeral_key(&mut rng);
        let mut answer = derive_and_encrypt_shared_secret(
            &mut rng,
            b.protected_customer.public_key(),
            ephemeral.public_key(),
            &b.trusted_contact,
        )?;
        answer.sealed = SealedData::from_parts(
            "AES256GCM",
            answer.sealed.nonce().to_vec(),
            answer.sealed.ciphertext().to_vec(),
        );
        assert_eq!(
            decrypt_private_key_encryption_key_v1(
                &answer,
                &ephemeral,
                &b.sealed_private_key_encryption_key
            )
            .unwrap_err(),
            InternalError::AlgorithmMismatch
        );
        Ok(())
    }

    #[test]
    fn confirmed_recovery_survives_a_wrong_password() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"confirmed material")?;
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        let output = transfer_private_key_encryption_key_encryption(
            &mut rng,
            b"p1",
            &recovery_key.public_key(),
            &b.trusted_contact,
            b.protected_customer.public_key(),
            &b.sealed_private_key_encryption_key,
            &kdf(),
        )?;

        let attempt = |password: &[u8]| {
            decrypt_private_key_material(
                DecryptPrivateKeyMaterialParams::V2 {
                    password,
                    protected_customer_recovery_key: &recovery_key,
                    encrypted_private_key_encryption_key_output: &output,
                },
                &b.sealed_private_key_material,
                &kdf(),
            )
        };
        assert_eq!(attempt(&b"p2"[..]), Err(InternalError::KeyConfirmationFailed));
        assert_eq!(attempt(&b"p1"[..])?, b"confirmed material");
        Ok(())
    }

    #[test]
    fn answer_made_with_another_password_fails_key_confirmation() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        let output = transfer_private_key_encryption_key_encryption(
            &mut rng,
            b"p2",
            &recovery_key.public_key(),
            &b.trusted_contact,
            b.protected_customer.public_key(),
            &b.sealed_private_key_encryption_key,
            &kdf(),
        )?;
        for password in [&b"p1"[..], b"p2"] {
            assert_eq!(
                decrypt_private_key_encryption_key_v2(password, &recovery_key, &output, &kdf())
                    .unwrap_err(),
                InternalError::KeyConfirmationFailed
            );
        }
        Ok(())
    }

    #[test]
    fn contact_cannot_transfer_another_contacts_wrap() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let stranger: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        assert_eq!(
            transfer_private_key_encryption_key_encryption(
                &mut rng,
                b"p1",
                &recovery_key.public_key(),
                &stranger,
                b.protected_customer.public_key(),
                &b.sealed_private_key_encryption_key,
                &kdf(),
            )
            .unwrap_err(),
            InternalError::AuthenticationFailed
        );
        Ok(())
    }

    #[test]
    fn tampered_recovery_answer_fails_key_confirmation() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        let mut output = transfer_private_key_encryption_key_encryption(
            &mut rng,
            b"p1",
            &recovery_key.public_key(),
            &b.trusted_contact,
            b.protected_customer.public_key(),
            &b.sealed_private_key_encryption_key,
            &kdf(),
        )?;
        output.sealed_data_mut().ciphertext_mut()[0] ^= 1;
        assert_eq!(
            decrypt_private_key_encryption_key_v2(b"p1", &recovery_key, &output, &kdf())
                .unwrap_err(),
            InternalError::KeyConfirmationFailed
        );
        Ok(())
    }

    fn confirmed_answer(
        rng: &mut OsRng,
        b: &Backup,
        recovery_key: &PakeKeypair<ProtectedCustomerRecoveryKey>,
    ) -> Result<EncryptPrivateKeyEncryptionKeyOutput> {
        transfer_private_key_encryption_key_encryption(
            rng,
            b"p1",
            &recovery_key.public_key(),
            &b.trusted_contact,
            b.protected_customer.public_key(),
            &b.sealed_private_key_encryption_key,
            &kdf(),
        )
    }

    #[test]
    fn tampered_private_key_material_fails_authentication() -> Result<()> {
        let mut rng = OsRng;
        let mut b = backup(b"material")?;
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        let output = confirmed_answer(&mut rng, &b, &recovery_key)?;
        let ephemeral = generate_protected_customer_ephemeral_key(&mut rng);
        let answer = derive_and_encrypt_shared_secret(
            &mut rng,
            b.protected_customer.public_key(),
            ephemeral.public_key(),
            &b.trusted_contact,
        )?;
        let last = b.sealed_private_key_material.ciphertext().len() - 1;
        b.sealed_private_key_material.ciphertext_mut()[last] ^= 0x80;

        // Both flows recover the PKEK, and then reject the material.
        let v1 = DecryptPrivateKeyMaterialParams::V1 {
            sealed_shared_secret: &answer,
            protected_customer_ephemeral_key: &ephemeral,
            sealed_private_key_encryption_key: &b.sealed_private_key_encryption_key,
        };
        let v2 = DecryptPrivateKeyMaterialParams::V2 {
            password: b"p1",
            protected_customer_recovery_key: &recovery_key,
            encrypted_private_key_encryption_key_output: &output,
        };
        for params in [v1, v2] {
            assert_eq!(
                decrypt_private_key_material(params, &b.sealed_private_key_material, &kdf()),
                Err(InternalError::AuthenticationFailed)
            );
        }
        Ok(())
    }

    #[test]
    fn relabeled_private_key_material_fails_with_algorithm_mismatch() -> Result<()> {
        let mut rng = OsRng;
        let b = backup(b"material")?;
        let recovery_key = generate_protected_customer_recovery_key(&mut rng, b"p1", &kdf())?;
        let output = confirmed_answer(&mut rng, &b, &recovery_key)?;
        let relabeled = SealedData::from_parts(
            "AES256GCM",
            b.sealed_private_key_material.nonce().to_vec(),
            b.sealed_private_key_material.ciphertext().to_vec(),
        );

        assert_eq!(
            decrypt_private_key_material(
                DecryptPrivateKeyMaterialParams::V2 {
                    password: b"p1",
                    protected_customer_recovery_key: &recovery_key,
                    encrypted_private_key_encryption_key_output: &output,
                },
                &relabeled,
                &kdf(),
            ),
            Err(InternalError::AlgorithmMismatch)
        );
        Ok(())
    }
}
