// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Role-tagged secp256k1 keys.
//!
//! Every key in the protocol is tagged with the role it plays, so that a key
//! presented under the wrong role is rejected by the type checker rather than
//! at runtime. A [`PublicKey<R>`], [`PrivateKey<R>`] and [`Keypair<R>`] all
//! share the same underlying curve representation; only the zero-sized role
//! marker `R` differs.

use crate::errors::{InternalError, Result};
use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    marker::PhantomData,
};
use tracing::error;
use zeroize::Zeroizing;

/// Length of a SEC1 compressed public key.
pub const PUBLIC_KEY_LEN: usize = 33;

mod sealed {
    pub trait Sealed {}
}

/// The closed set of roles a key can play in the protocol.
pub trait KeyRole: sealed::Sealed + Copy + Debug + Eq + Send + Sync + 'static {
    /// Human readable role name, used in logs and debug output.
    const NAME: &'static str;
}

macro_rules! key_roles {
    ($($(#[$meta:meta])* $role:ident),+ $(,)?) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $role;

        impl sealed::Sealed for $role {}

        impl KeyRole for $role {
            const NAME: &'static str = stringify!($role);
        }
    )+};
}

key_roles! {
    /// The Protected Customer's long-lived identity key. Its private half is
    /// part of the material a recovery restores.
    ProtectedCustomerIdentityKey,
    /// A Trusted Contact's identity key, as endorsed by a key certificate.
    TrustedContactIdentityKey,
    /// A one-shot key the Protected Customer generates for a legacy recovery.
    ProtectedCustomerEphemeralKey,
    /// The Protected Customer's half of password-authenticated enrollment.
    ProtectedCustomerEnrollmentKey,
    /// The Protected Customer's half of password-authenticated recovery.
    ProtectedCustomerRecoveryKey,
    /// The keypair held on the Trusted Contact's device. Its public half is
    /// published as the [`TrustedContactIdentityKey`].
    DelegatedDecryptionKey,
    /// The hardware authentication key. Only its public half is seen here.
    HwAuthKey,
    /// The app's global authentication key.
    AppGlobalAuthKey,
}

/// A public key playing role `R`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>", bound = "")]
pub struct PublicKey<R: KeyRole> {
    key: k256::PublicKey,
    role: PhantomData<R>,
}

impl<R: KeyRole> PublicKey<R> {
    /// Parses a SEC1 encoded point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(InternalError::InvalidKey(format!(
                "empty {} public key",
                R::NAME
            )));
        }
        let key = k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| {
            error!("Could not parse a {} public key", R::NAME);
            InternalError::InvalidKey(format!("malformed {} public key", R::NAME))
        })?;
        Ok(Self::from_inner(key))
    }

    /// The 33-byte SEC1 compressed encoding of this key.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(true).as_bytes().to_vec()
    }

    pub(crate) fn from_inner(key: k256::PublicKey) -> Self {
        Self {
            key,
            role: PhantomData,
        }
    }

    pub(crate) fn inner(&self) -> &k256::PublicKey {
        &self.key
    }
}

impl<R: KeyRole> Debug for PublicKey<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey<{}>({})", R::NAME, hex::encode(self.to_sec1_bytes()))
    }
}

impl<R: KeyRole> TryFrom<Vec<u8>> for PublicKey<R> {
    type Error = InternalError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_sec1_bytes(&bytes)
    }
}

impl<R: KeyRole> From<PublicKey<R>> for Vec<u8> {
    fn from(key: PublicKey<R>) -> Self {
        key.to_sec1_bytes()
    }
}

/// A private key playing role `R`. The scalar is zeroized on drop.
pub struct PrivateKey<R: KeyRole> {
    key: k256::SecretKey,
    role: PhantomData<R>,
}

impl<R: KeyRole> PrivateKey<R> {
    /// Parses a big-endian 32-byte scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(InternalError::InvalidKey(format!(
                "empty {} private key",
                R::NAME
            )));
        }
        let key = k256::SecretKey::from_slice(bytes).map_err(|_| {
            InternalError::InvalidKey(format!("malformed {} private key", R::NAME))
        })?;
        Ok(Self {
            key,
            role: PhantomData,
        })
    }

    /// The big-endian scalar. Callers own the returned buffer's lifetime.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.to_bytes().to_vec())
    }

    /// The public key corresponding to this private key.
    pub fn public_key(&self) -> PublicKey<R> {
        PublicKey::from_inner(self.key.public_key())
    }
}

impl<R: KeyRole> Debug for PrivateKey<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey<{}>([REDACTED])", R::NAME)
    }
}

/// A private key together with its public key, both playing role `R`.
#[derive(Debug)]
pub struct Keypair<R: KeyRole> {
    private_key: PrivateKey<R>,
    public_key: PublicKey<R>,
}

impl<R: KeyRole> Keypair<R> {
    /// Generates a fresh keypair from a cryptographically secure source.
    pub fn generate<G: RngCore + CryptoRng>(rng: &mut G) -> Self {
        Self::from_private_key(PrivateKey {
            key: k256::SecretKey::random(rng),
            role: PhantomData,
        })
    }

    /// Rebuilds a keypair from its private half.
    pub fn from_private_key(private_key: PrivateKey<R>) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey<R> {
        &self.public_key
    }

    /// The private half.
    pub fn private_key(&self) -> &PrivateKey<R> {
        &self.private_key
    }
}

impl Keypair<DelegatedDecryptionKey> {
    /// The identity key under which this Trusted Contact is endorsed.
    pub fn trusted_contact_identity_key(&self) -> PublicKey<TrustedContactIdentityKey> {
        PublicKey::from_inner(self.public_key.key)
    }
}

/// Generates a fresh keypair for role `R`.
pub fn generate_keypair<R: KeyRole, G: RngCore + CryptoRng>(rng: &mut G) -> Keypair<R> {
    Keypair::generate(rng)
}

/// An ECDSA signature over secp256k1, serialized as 64 bytes `r || s`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Signature(k256::ecdsa::Signature);

impl Signature {
    /// Parses a 64-byte `r || s` signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        k256::ecdsa::Signature::from_slice(bytes)
            .map(Self)
            .map_err(|_| InternalError::InvalidArgument(String::from("malformed signature")))
    }

    /// The 64-byte `r || s` encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_bytes()))
    }
}

impl TryFrom<Vec<u8>> for Signature {
    type Error = InternalError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes(&bytes)
    }
}

impl From<Signature> for Vec<u8> {
    fn from(signature: Signature) -> Self {
        signature.to_bytes()
    }
}

/// Signs `message` (hashed with SHA-256) with `private_key`.
///
/// `public_key` must be the public half of `private_key`; a mismatched pair
/// is rejected instead of producing a signature nobody can verify.
pub fn sign<R: KeyRole>(
    private_key: &PrivateKey<R>,
    public_key: &PublicKey<R>,
    message: &[u8],
) -> Result<Signature> {
    if private_key.public_key() != *public_key {
        error!("Attempted to sign with a mismatched {} keypair", R::NAME);
        return Err(InternalError::InvalidKey(format!(
            "{} public key does not match private key",
            R::NAME
        )));
    }
    let signing_key = SigningKey::from(&private_key.key);
    let signature: k256::ecdsa::Signature = signing_key.sign(message);
    Ok(Signature(signature))
}

/// Checks `signature` over `message` against `public_key`.
pub fn verify_sig<R: KeyRole>(
    signature: &Signature,
    public_key: &PublicKey<R>,
    message: &[u8],
) -> bool {
    VerifyingKey::from(public_key.inner())
        .verify(message, &signature.0)
        .is_ok()
}

/// Raw ECDH between two keys of (possibly) different roles. Returns the
/// x-coordinate of the shared point; callers must run it through a KDF.
pub(crate) fn diffie_hellman<A: KeyRole, B: KeyRole>(
    private_key: &PrivateKey<A>,
    public_key: &PublicKey<B>,
) -> Zeroizing<[u8; 32]> {
    let shared = k256::ecdh::diffie_hellman(
        private_key.key.to_nonzero_scalar(),
        public_key.inner().as_affine(),
    );
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    out
}
