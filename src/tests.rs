// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::*;

use crate::certificate::SoftwareHardwareSigner;
use crate::errors::*;
use rand::rngs::OsRng;

const DESCRIPTOR: &[u8] = b"wsh(sortedmulti(2,...))";

/// Everything the Protected Customer's device holds after enrolling one or
/// more Trusted Contacts.
struct ProtectedCustomer {
    crypto: SocialRecoveryCrypto,
    identity_key: Keypair<ProtectedCustomerIdentityKey>,
    hardware: SoftwareHardwareSigner,
    app_key: Keypair<AppGlobalAuthKey>,
    contacts: Vec<EndorsedTrustedContact>,
}

impl ProtectedCustomer {
    fn new() -> Result<Self> {
        let mut rng = OsRng;
        Ok(Self {
            crypto: SocialRecoveryCrypto::new(KdfParams::insecure_for_testing())?,
            identity_key: generate_keypair(&mut rng),
            hardware: SoftwareHardwareSigner(generate_keypair(&mut rng)),
            app_key: generate_keypair(&mut rng),
            contacts: vec![],
        })
    }

    /// Runs enrollment with `trusted_contact` through the relay and endorses
    /// the delivered identity key.
    fn enroll(
        &mut self,
        trusted_contact: &Keypair<DelegatedDecryptionKey>,
        password: &[u8],
    ) -> Result<RecoveryRelationshipId> {
        let mut rng = OsRng;
        let enrollment_key = self
            .crypto
            .generate_protected_customer_enrollment_key(&mut rng, password)?;

        // Over the relay: the enrollment public key one way, the sealed
        // identity key the other.
        let output = self.crypto.encrypt_trusted_contact_identity_key(
            &mut rng,
            password,
            &enrollment_key.public_key(),
            &trusted_contact.trusted_contact_identity_key(),
        )?;
        let identity_key =
            self.crypto
                .decrypt_trusted_contact_identity_key(password, &enrollment_key, &output)?;

        let hw_signature = endorse_app_key(&self.hardware, self.app_key.public_key())?;
        let key_certificate = self.crypto.generate_key_certificate(
            &identity_key,
            &self.hardware.public_key(),
            &self.app_key,
            hw_signature,
        )?;
        let relationship_id = RecoveryRelationshipId::random(&mut rng);
        self.contacts.push(EndorsedTrustedContact {
            relationship_id: relationship_id.clone(),
            key_certificate,
        });
        Ok(relationship_id)
    }

    fn backup(&self, material: &[u8]) -> Result<SocialRecoveryBackup> {
        let backup = self.crypto.create_backup(
            &mut OsRng,
            material,
            &self.identity_key,
            &self.contacts,
            Some(&self.hardware.public_key()),
            Some(self.app_key.public_key()),
        )?;
        // What the storage collaborator hands back after the device is lost.
        SocialRecoveryBackup::from_bytes(&backup.to_bytes()?)
    }
}

fn wrap_for<'a>(
    backup: &'a SocialRecoveryBackup,
    relationship_id: &RecoveryRelationshipId,
) -> Result<&'a SealedData> {
    backup
        .sealed_pkek_map
        .get(relationship_id)
        .ok_or(InternalError::InternalInvariantFailed)
}

#[test]
fn legacy_recovery_end_to_end() -> Result<()> {
    let mut rng = OsRng;
    let trusted_contact: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let mut pc = ProtectedCustomer::new()?;
    let relationship_id = pc.enroll(&trusted_contact, b"1234")?;
    let backup = pc.backup(DESCRIPTOR)?;

    // The device is lost; only public data and the backup survive.
    let pc_identity_key = *pc.identity_key.public_key();
    let crypto = pc.crypto;
    drop(pc);

    let ephemeral_key = crypto.generate_protected_customer_ephemeral_key(&mut rng);
    let sealed_shared_secret = crypto.derive_and_encrypt_shared_secret(
        &mut rng,
        &pc_identity_key,
        ephemeral_key.public_key(),
        &trusted_contact,
    )?;

    let material = crypto.decrypt_private_key_material(
        DecryptPrivateKeyMaterialParams::V1 {
            sealed_shared_secret: &sealed_shared_secret,
            protected_customer_ephemeral_key: &ephemeral_key,
            sealed_private_key_encryption_key: wrap_for(&backup, &relationship_id)?,
        },
        &backup.sealed_private_key_material,
    )?;
    assert_eq!(material, DESCRIPTOR);
    Ok(())
}

#[test]
fn confirmed_recovery_end_to_end_with_retry() -> Result<()> {
    let mut rng = OsRng;
    let trusted_contact: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let mut pc = ProtectedCustomer::new()?;
    let relationship_id = pc.enroll(&trusted_contact, b"1234")?;
    let backup = pc.backup(DESCRIPTOR)?;
    let pc_identity_key = *pc.identity_key.public_key();
    let crypto = pc.crypto;

    let recovery_key = crypto.generate_protected_customer_recovery_key(&mut rng, b"p1")?;
    let output = crypto.transfer_private_key_encryption_key_encryption(
        &mut rng,
        b"p1",
        &recovery_key.public_key(),
        &trusted_contact,
        &pc_identity_key,
        wrap_for(&backup, &relationship_id)?,
    )?;

    // The customer mistypes the password first.
    let recover = |password: &[u8]| {
        crypto.decrypt_private_key_material(
            DecryptPrivateKeyMaterialParams::V2 {
                password,
                protected_customer_recovery_key: &recovery_key,
                encrypted_private_key_encryption_key_output: &output,
            },
            &backup.sealed_private_key_material,
        )
    };
    assert_eq!(recover(&b"p2"[..]), Err(InternalError::KeyConfirmationFailed));
    assert_eq!(recover(&b"p1"[..])?, DESCRIPTOR);
    Ok(())
}

#[test]
fn every_enrolled_contact_can_recover_independently() -> Result<()> {
    let mut rng = OsRng;
    let alice: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let bob: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let mut pc = ProtectedCustomer::new()?;
    let alice_id = pc.enroll(&alice, b"1111")?;
    let bob_id = pc.enroll(&bob, b"2222")?;
    let backup = pc.backup(DESCRIPTOR)?;
    assert_eq!(backup.sealed_pkek_map.len(), 2);

    for (contact, id) in [(&alice, &alice_id), (&bob, &bob_id)] {
        let recovery_key = pc
            .crypto
            .generate_protected_customer_recovery_key(&mut rng, b"p1")?;
        let output = pc.crypto.transfer_private_key_encryption_key_encryption(
            &mut rng,
            b"p1",
            &recovery_key.public_key(),
            contact,
            pc.identity_key.public_key(),
            wrap_for(&backup, id)?,
        )?;
        let pkek = pc
            .crypto
            .decrypt_private_key_encryption_key_v2(b"p1", &recovery_key, &output)?;
        assert_eq!(
            decrypt_private_key_material_with(&pkek, &backup.sealed_private_key_material)?,
            DESCRIPTOR
        );
    }

    // Bob cannot use Alice's wrap.
    assert_eq!(
        pc.crypto
            .decrypt_private_key_encryption_key(
                pc.identity_key.public_key(),
                &bob,
                wrap_for(&backup, &alice_id)?
            )
            .unwrap_err(),
        InternalError::AuthenticationFailed
    );
    Ok(())
}

#[test]
fn revoked_contact_is_dropped_from_the_next_backup() -> Result<()> {
    let mut rng = OsRng;
    let alice: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let bob: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let mut pc = ProtectedCustomer::new()?;
    let alice_id = pc.enroll(&alice, b"1111")?;
    let bob_id = pc.enroll(&bob, b"2222")?;

    let mut backup = pc.backup(DESCRIPTOR)?;
    let removed = backup.sealed_pkek_map.retain_active(&[alice_id.clone()]);
    assert_eq!(removed, vec![bob_id.clone()]);
    assert!(backup.sealed_pkek_map.get(&bob_id).is_none());

    // After the app key rotates, only re-endorsed contacts make it into a new
    // backup.
    pc.app_key = generate_keypair(&mut rng);
    pc.contacts.retain(|contact| contact.relationship_id == alice_id);
    assert!(matches!(
        pc.backup(DESCRIPTOR),
        Err(InternalError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn enrollment_with_mismatched_passwords_never_reaches_endorsement() -> Result<()> {
    let mut rng = OsRng;
    let trusted_contact: Keypair<DelegatedDecryptionKey> = generate_keypair(&mut rng);
    let mut pc = ProtectedCustomer::new()?;
    let enrollment_key = pc
        .crypto
        .generate_protected_customer_enrollment_key(&mut rng, b"1234")?;

    // The contact cannot tell the passwords differ; the customer can.
    let output = pc.crypto.encrypt_trusted_contact_identity_key(
        &mut rng,
        b"4321",
        &enrollment_key.public_key(),
        &trusted_contact.trusted_contact_identity_key(),
    )?;
    assert_eq!(
        pc.crypto
            .decrypt_trusted_contact_identity_key(b"1234", &enrollment_key, &output),
        Err(InternalError::KeyConfirmationFailed)
    );

    // Re-running enrollment with the agreed password goes through.
    pc.enroll(&trusted_contact, b"1234")?;
    assert_eq!(pc.contacts.len(), 1);
    Ok(())
}
