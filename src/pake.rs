// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Password-authenticated key delivery.
//!
//! The relay that ferries messages between a Protected Customer and a Trusted
//! Contact is not trusted: it could substitute its own messages in either
//! direction. Both parties additionally share a short password out of band,
//! and run SPAKE2 over the relay with it:
//!
//! 1. The Protected Customer publishes a [`PakePublicKey`], which is its SPAKE2
//!    message. It reveals nothing about the password that could be checked
//!    offline.
//! 2. The contact answers with a [`PakeSealedOutput`]: its own SPAKE2
//!    message, data sealed under a key derived from the SPAKE2 session key,
//!    and an HMAC key-confirmation tag over the whole exchange. A substituted
//!    message, or a wrong password on either side, fails key confirmation on
//!    the Protected Customer's side before anything is decrypted.
//!
//! A relay can only test one password guess per exchange it takes part in,
//! and only by actively running the protocol with one of the parties.
//!
//! The same exchange delivers the contact's identity key during enrollment
//! and the PKEK during a password-confirmed recovery; the recipient role `R`
//! is the customer's SPAKE2 identity and is bound into every derivation, so
//! an output of one exchange can never be opened as the other.

use crate::{
    errors::{InternalError, Result},
    keys::{
        KeyRole, ProtectedCustomerEnrollmentKey, ProtectedCustomerRecoveryKey, PublicKey,
        TrustedContactIdentityKey,
    },
    parameters::{
        KdfParams, PAKE_CONFIRMATION_LABEL, PAKE_SESSION_INFO, PAKE_TRUSTED_CONTACT_IDENTITY,
    },
    sealed::{self, SealedData, SymmetricKey},
    serialization::transcript,
    utils::{derive_password_key, hkdf_sha256, mac, verify_mac, TAG_LEN},
};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use spake2::{Ed25519Group, Identity, Password, Spake2};
use std::{
    fmt::{Debug, Formatter},
    marker::PhantomData,
};
use tracing::{instrument, trace, warn};
use zeroize::Zeroizing;

/// Length of the secret seed behind a Protected Customer's SPAKE2 state.
const SEED_LEN: usize = 32;

/// Roles that can receive data through a password-authenticated exchange.
pub trait PakeKeyRole: KeyRole {}

impl PakeKeyRole for ProtectedCustomerEnrollmentKey {}
impl PakeKeyRole for ProtectedCustomerRecoveryKey {}

/// The Protected Customer's side of a password-authenticated exchange.
///
/// Holds the seed of its SPAKE2 state rather than the state itself, so that
/// the exchange can be finished again after a mistyped password.
pub struct PakeKeypair<R: PakeKeyRole> {
    seed: Zeroizing<[u8; SEED_LEN]>,
    message: Vec<u8>,
    role: PhantomData<R>,
}

impl<R: PakeKeyRole> PakeKeypair<R> {
    /// The half that is sent through the relay.
    pub fn public_key(&self) -> PakePublicKey<R> {
        PakePublicKey {
            message: self.message.clone(),
            role: PhantomData,
        }
    }
}

impl<R: PakeKeyRole> Debug for PakeKeypair<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakeKeypair")
            .field("role", &R::NAME)
            .field("message", &hex::encode(&self.message))
            .finish_non_exhaustive()
    }
}

/// The shareable half of a [`PakeKeypair`]: the customer's SPAKE2 message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PakePublicKey<R: PakeKeyRole> {
    message: Vec<u8>,
    #[serde(skip)]
    role: PhantomData<R>,
}

impl<R: PakeKeyRole> PakePublicKey<R> {
    /// The raw SPAKE2 message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.message
    }
}

/// Data sealed to a [`PakePublicKey<R>`] along with the contact's SPAKE2
/// message and the key-confirmation tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PakeSealedOutput<R: PakeKeyRole> {
    trusted_contact_message: Vec<u8>,
    key_confirmation: [u8; TAG_LEN],
    sealed_data: SealedData,
    #[serde(skip)]
    recipient: PhantomData<R>,
}

impl<R: PakeKeyRole> PakeSealedOutput<R> {
    /// The sealed payload.
    pub fn sealed_data(&self) -> &SealedData {
        &self.sealed_data
    }

    #[cfg(test)]
    pub(crate) fn sealed_data_mut(&mut self) -> &mut SealedData {
        &mut self.sealed_data
    }
}

/// Output of [`encrypt_trusted_contact_identity_key`].
pub type EncryptTrustedContactIdentityKeyOutput = PakeSealedOutput<ProtectedCustomerEnrollmentKey>;

fn check_password(password: &[u8]) -> Result<()> {
    if password.is_empty() {
        return arg_err!("password must not be empty");
    }
    Ok(())
}

/// Starts the customer's side of SPAKE2. Deterministic in `password_key` and
/// `seed`.
fn start_customer<R: PakeKeyRole>(
    password_key: &[u8],
    seed: &[u8; SEED_LEN],
) -> (Spake2<Ed25519Group>, Vec<u8>) {
    Spake2::<Ed25519Group>::start_a_with_rng(
        &Password::new(password_key),
        &Identity::new(R::NAME.as_bytes()),
        &Identity::new(PAKE_TRUSTED_CONTACT_IDENTITY),
        StdRng::from_seed(*seed),
    )
}

fn start_contact<R: PakeKeyRole, G: RngCore + CryptoRng>(
    rng: &mut G,
    password_key: &[u8],
) -> (Spake2<Ed25519Group>, Vec<u8>) {
    Spake2::<Ed25519Group>::start_b_with_rng(
        &Password::new(password_key),
        &Identity::new(R::NAME.as_bytes()),
        &Identity::new(PAKE_TRUSTED_CONTACT_IDENTITY),
        rng,
    )
}

/// Completes SPAKE2 with the other side's message. A message that is not a
/// valid SPAKE2 message for this side is a failed confirmation.
fn finish(state: Spake2<Ed25519Group>, message: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    state.finish(message).map(Zeroizing::new).map_err(|e| {
        warn!("Rejected a SPAKE2 message: {e:?}");
        InternalError::KeyConfirmationFailed
    })
}

struct SessionKeys {
    encryption_key: SymmetricKey,
    confirmation_key: SymmetricKey,
    transcript: Vec<u8>,
}

fn session_keys<R: PakeKeyRole>(
    spake_key: &[u8],
    protected_customer_message: &[u8],
    trusted_contact_message: &[u8],
) -> Result<SessionKeys> {
    let transcript = transcript(&[
        R::NAME.as_bytes(),
        protected_customer_message,
        trusted_contact_message,
    ])?;
    Ok(SessionKeys {
        encryption_key: hkdf_sha256(
            spake_key,
            None,
            &[PAKE_SESSION_INFO, b"encryption", &transcript],
        )?,
        confirmation_key: hkdf_sha256(
            spake_key,
            None,
            &[PAKE_SESSION_INFO, b"confirmation", &transcript],
        )?,
        transcript,
    })
}

fn confirmation_input(transcript: &[u8], sealed_data: &SealedData) -> Vec<u8> {
    [
        PAKE_CONFIRMATION_LABEL,
        transcript,
        sealed_data.to_opaque_string().as_bytes(),
    ]
    .concat()
}

fn is_confirmed<R: PakeKeyRole>(keys: &SessionKeys, output: &PakeSealedOutput<R>) -> Result<bool> {
    verify_mac(
        keys.confirmation_key.as_bytes(),
        &[&confirmation_input(&keys.transcript, &output.sealed_data)],
        &output.key_confirmation,
    )
}

/// Starts a fresh exchange bound to `password` (Protected Customer side).
pub(crate) fn generate_pake_keypair<R: PakeKeyRole, G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    kdf: &KdfParams,
) -> Result<PakeKeypair<R>> {
    check_password(password)?;
    let password_key = derive_password_key(password, kdf)?;
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    rng.fill_bytes(&mut seed[..]);
    let (_, message) = start_customer::<R>(password_key.as_slice(), &seed);
    Ok(PakeKeypair {
        seed,
        message,
        role: PhantomData,
    })
}

/// Seals `plaintext` to `recipient` (Trusted Contact side).
///
/// The contact cannot tell whether the customer used the same password; a
/// mismatch only shows when the customer opens the output.
pub(crate) fn pake_seal<R: PakeKeyRole, G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    recipient: &PakePublicKey<R>,
    plaintext: &[u8],
    kdf: &KdfParams,
) -> Result<PakeSealedOutput<R>> {
    check_password(password)?;
    let password_key = derive_password_key(password, kdf)?;
    let (state, trusted_contact_message) = start_contact::<R, G>(rng, password_key.as_slice());
    let spake_key = finish(state, &recipient.message)?;
    let keys = session_keys::<R>(&spake_key, &recipient.message, &trusted_contact_message)?;

    let sealed_data = sealed::encrypt(
        rng,
        &keys.encryption_key,
        plaintext,
        Some(&keys.transcript),
    )?;
    let key_confirmation = mac(
        keys.confirmation_key.as_bytes(),
        &[&confirmation_input(&keys.transcript, &sealed_data)],
    )?;
    trace!("Sealed data to {}.", R::NAME);
    Ok(PakeSealedOutput {
        trusted_contact_message,
        key_confirmation,
        sealed_data,
        recipient: PhantomData,
    })
}

/// Opens a [`PakeSealedOutput`] (Protected Customer side).
///
/// Key confirmation is checked first and independently of the AEAD: a wrong
/// password or a substituted output fails with
/// [`InternalError::KeyConfirmationFailed`] before the ciphertext is touched.
/// `keypair` is left untouched, so a failed attempt can be retried.
pub(crate) fn pake_open<R: PakeKeyRole>(
    password: &[u8],
    keypair: &PakeKeypair<R>,
    output: &PakeSealedOutput<R>,
    kdf: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>> {
    check_password(password)?;
    let password_key = derive_password_key(password, kdf)?;
    let (state, _) = start_customer::<R>(password_key.as_slice(), &keypair.seed);
    let spake_key = finish(state, &output.trusted_contact_message)?;
    let keys = session_keys::<R>(
        &spake_key,
        &keypair.message,
        &output.trusted_contact_message,
    )?;

    if !is_confirmed(&keys, output)? {
        warn!("Key confirmation failed for {}", R::NAME);
        return Err(InternalError::KeyConfirmationFailed);
    }

    sealed::decrypt(
        &keys.encryption_key,
        &output.sealed_data,
        Some(&keys.transcript),
    )
    .map(Zeroizing::new)
}

/// Generates the Protected Customer's enrollment key, bound to the
/// enrollment `password` that is shared with the Trusted Contact out of band.
#[instrument(skip_all)]
pub fn generate_protected_customer_enrollment_key<G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    kdf: &KdfParams,
) -> Result<PakeKeypair<ProtectedCustomerEnrollmentKey>> {
    generate_pake_keypair(rng, password, kdf)
}

/// Delivers the Trusted Contact's identity key to the Protected Customer
/// (Trusted Contact side).
///
/// Fails with [`InternalError::KeyConfirmationFailed`] only if
/// `protected_customer_enrollment_key` is not a SPAKE2 message at all. A
/// wrong password, or an enrollment key substituted by the relay, is caught
/// by the Protected Customer in [`decrypt_trusted_contact_identity_key`].
#[instrument(skip_all)]
pub fn encrypt_trusted_contact_identity_key<G: RngCore + CryptoRng>(
    rng: &mut G,
    password: &[u8],
    protected_customer_enrollment_key: &PakePublicKey<ProtectedCustomerEnrollmentKey>,
    trusted_contact_identity_key: &PublicKey<TrustedContactIdentityKey>,
    kdf: &KdfParams,
) -> Result<EncryptTrustedContactIdentityKeyOutput> {
    pake_seal(
        rng,
        password,
        protected_customer_enrollment_key,
        &trusted_contact_identity_key.to_sec1_bytes(),
        kdf,
    )
}

/// Recovers the Trusted Contact's identity key (Protected Customer side).
///
/// Every failure, whether a wrong password, a substituted output or a
/// corrupted ciphertext, is reported as
/// [`InternalError::KeyConfirmationFailed`] so that the result reveals
/// nothing about which check failed.
#[instrument(skip_all)]
pub fn decrypt_trusted_contact_identity_key(
    password: &[u8],
    protected_customer_enrollment_key: &PakeKeypair<ProtectedCustomerEnrollmentKey>,
    output: &EncryptTrustedContactIdentityKeyOutput,
    kdf: &KdfParams,
) -> Result<PublicKey<TrustedContactIdentityKey>> {
    let bytes = pake_open(password, protected_customer_enrollment_key, output, kdf)
        .map_err(|_| InternalError::KeyConfirmationFailed)?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|_| InternalError::KeyConfirmationFailed)
}
