// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Key certificates endorsing a Trusted Contact's identity key.
//!
//! A certificate is a two-link chain: the hardware authentication key signs
//! the app's global authentication key, and the app key signs the Trusted
//! Contact's identity key. A verifier that trusts either end of the chain can
//! check the whole certificate, which matters because a Trusted Contact's
//! device may only know the app key.

use crate::{
    errors::{InternalError, Result},
    keys::{
        sign, verify_sig, AppGlobalAuthKey, HwAuthKey, Keypair, PublicKey, Signature,
        TrustedContactIdentityKey,
    },
    protocol::RecoveryRelationshipId,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, trace, warn};

/// The hardware-signing collaborator.
///
/// Implementations talk to the hardware device; this crate never sees the
/// hardware private key.
pub trait HardwareAuthSigner {
    /// The hardware authentication public key.
    fn public_key(&self) -> PublicKey<HwAuthKey>;

    /// Signs `message` with the hardware-held authentication key.
    fn sign(&self, message: &[u8]) -> Result<Signature>;
}

/// Asks the hardware to endorse `app_global_auth_public_key`, returning the
/// `hw_signature` consumed by [`generate_key_certificate`].
///
/// The returned signature is checked before it is handed out, so a
/// misbehaving device is caught here rather than at recovery time.
#[instrument(skip_all)]
pub fn endorse_app_key<S: HardwareAuthSigner + ?Sized>(
    signer: &S,
    app_global_auth_public_key: &PublicKey<AppGlobalAuthKey>,
) -> Result<Signature> {
    let message = app_global_auth_public_key.to_sec1_bytes();
    let signature = signer.sign(&message)?;
    if !verify_sig(&signature, &signer.public_key(), &message) {
        error!("Hardware returned a signature that does not verify");
        return Err(InternalError::HardwareSigningFailed(String::from(
            "signature does not verify under the hardware authentication key",
        )));
    }
    Ok(signature)
}

/// Binds a Trusted Contact's identity key to the Protected Customer's
/// hardware and app authentication keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCertificate {
    trusted_contact_identity_key: PublicKey<TrustedContactIdentityKey>,
    hw_auth_public_key: PublicKey<HwAuthKey>,
    app_global_auth_public_key: PublicKey<AppGlobalAuthKey>,
    /// Hardware signature over `app_global_auth_public_key`.
    hw_signature: Signature,
    /// App signature over `trusted_contact_identity_key`.
    app_signature: Signature,
}

impl KeyCertificate {
    /// The endorsed key. Only trust it after [`verify_key_certificate`].
    pub fn trusted_contact_identity_key(&self) -> &PublicKey<TrustedContactIdentityKey> {
        &self.trusted_contact_identity_key
    }

    /// The hardware key the certificate claims to be endorsed by.
    pub fn hw_auth_public_key(&self) -> &PublicKey<HwAuthKey> {
        &self.hw_auth_public_key
    }

    /// The app key the certificate claims to be endorsed by.
    pub fn app_global_auth_public_key(&self) -> &PublicKey<AppGlobalAuthKey> {
        &self.app_global_auth_public_key
    }

    /// Serializes the certificate for a storage collaborator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(&self)
    }

    /// Inverse of [`KeyCertificate::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }

    fn hw_signature_is_valid(&self, hw_auth_public_key: &PublicKey<HwAuthKey>) -> bool {
        verify_sig(
            &self.hw_signature,
            hw_auth_public_key,
            &self.app_global_auth_public_key.to_sec1_bytes(),
        )
    }

    fn app_signature_is_valid(
        &self,
        app_global_auth_public_key: &PublicKey<AppGlobalAuthKey>,
    ) -> bool {
        verify_sig(
            &self.app_signature,
            app_global_auth_public_key,
            &self.trusted_contact_identity_key.to_sec1_bytes(),
        )
    }

    #[cfg(test)]
    pub(crate) fn with_signatures(
        &self,
        hw_signature: Signature,
        app_signature: Signature,
    ) -> Self {
        Self {
            hw_signature,
            app_signature,
            ..self.clone()
        }
    }
}

/// Issues a certificate for `trusted_contact_identity_key`.
///
/// `hw_signature` is the hardware's signature over the app key, as returned by
/// [`endorse_app_key`]. It is checked here; the app signature is computed.
#[instrument(skip_all)]
pub fn generate_key_certificate(
    trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
    hw_auth_public_key: &PublicKey<HwAuthKey>,
    app_global_auth_key: &Keypair<AppGlobalAuthKey>,
    hw_signature: Signature,
) -> Result<KeyCertificate> {
    let app_signature = sign(
        app_global_auth_key.private_key(),
        app_global_auth_key.public_key(),
        &trusted_contact_identity_key.to_sec1_bytes(),
    )?;
    let certificate = KeyCertificate {
        trusted_contact_identity_key: *trusted_contact_identity_key,
        hw_auth_public_key: *hw_auth_public_key,
        app_global_auth_public_key: *app_global_auth_key.public_key(),
        hw_signature,
        app_signature,
    };
    if !certificate.hw_signature_is_valid(hw_auth_public_key) {
        error!("Refusing to issue a certificate with an invalid hardware signature");
        return Err(InternalError::KeyCertificateVerificationFailed);
    }
    trace!("Issued key certificate.");
    Ok(certificate)
}

/// Verifies `certificate` and returns the endorsed identity key.
///
/// At least one of `hw_auth_public_key` and `app_global_auth_public_key`
/// must be provided. Every provided key must be the one embedded in the
/// certificate, and both links of the chain must verify. Fails with
/// [`InternalError::KeyCertificateVerificationFailed`] otherwise.
#[instrument(skip_all)]
pub fn verify_key_certificate(
    certificate: &KeyCertificate,
    hw_auth_public_key: Option<&PublicKey<HwAuthKey>>,
    app_global_auth_public_key: Option<&PublicKey<AppGlobalAuthKey>>,
) -> Result<PublicKey<TrustedContactIdentityKey>> {
    if hw_auth_public_key.is_none() && app_global_auth_public_key.is_none() {
        warn!("Key certificate verification requested without any trusted key");
        return Err(InternalError::KeyCertificateVerificationFailed);
    }

    let hw_ok = hw_auth_public_key
        .map(|key| {
            *key == certificate.hw_auth_public_key && certificate.hw_signature_is_valid(key)
        })
        .unwrap_or(true);
    let app_ok = app_global_auth_public_key
        .map(|key| {
            *key == certificate.app_global_auth_public_key
                && certificate.app_signature_is_valid(key)
        })
        .unwrap_or(true);

    // The side that was not anchored by the caller is still checked against
    // the key embedded in the certificate, so both links always verify.
    let chain_ok = certificate.hw_signature_is_valid(&certificate.hw_auth_public_key)
        && certificate.app_signature_is_valid(&certificate.app_global_auth_public_key);

    if !(hw_ok && app_ok && chain_ok) {
        warn!(hw_ok, app_ok, chain_ok, "Key certificate failed verification");
        return Err(InternalError::KeyCertificateVerificationFailed);
    }
    Ok(certificate.trusted_contact_identity_key)
}

/// A Trusted Contact as recorded by the Protected Customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsedTrustedContact {
    /// The recovery relationship this contact belongs to.
    pub relationship_id: RecoveryRelationshipId,
    /// The certificate endorsing the contact's identity key.
    pub key_certificate: KeyCertificate,
}

impl EndorsedTrustedContact {
    /// The contact's identity key, if its certificate verifies against the
    /// current authentication keys.
    pub fn verified_identity_key(
        &self,
        hw_auth_public_key: Option<&PublicKey<HwAuthKey>>,
        app_global_auth_public_key: Option<&PublicKey<AppGlobalAuthKey>>,
    ) -> Result<PublicKey<TrustedContactIdentityKey>> {
        verify_key_certificate(
            &self.key_certificate,
            hw_auth_public_key,
            app_global_auth_public_key,
        )
    }
}

/// A [`HardwareAuthSigner`] backed by an in-memory key.
#[cfg(test)]
pub(crate) struct SoftwareHardwareSigner(pub(crate) Keypair<HwAuthKey>);

#[cfg(test)]
impl HardwareAuthSigner for SoftwareHardwareSigner {
    fn public_key(&self) -> PublicKey<HwAuthKey> {
        *self.0.public_key()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        sign(self.0.private_key(), self.0.public_key(), message)
    }
}
