// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A list of error types which are produced by the social recovery protocol
use core::fmt::Debug;
use thiserror::Error;

/// The default Result type used in this crate
pub type Result<T> = std::result::Result<T, InternalError>;

/// Represents an error in the manipulation of social recovery key material.
///
/// The first four variants are the failure kinds callers are expected to
/// branch on: a UI re-prompts for a password on
/// [`InternalError::KeyConfirmationFailed`] and reports a corrupted backup on
/// [`InternalError::AuthenticationFailed`] or
/// [`InternalError::AlgorithmMismatch`].
#[derive(Clone, Eq, PartialEq, Error, Debug)]
#[allow(missing_docs)]
pub enum InternalError {
    #[error("Sealed data declares an algorithm this decryptor does not support")]
    AlgorithmMismatch,
    #[error("Sealed data failed authentication")]
    AuthenticationFailed,
    #[error("Password-based key confirmation failed")]
    KeyConfirmationFailed,
    #[error("Key certificate could not be verified against the provided keys")]
    KeyCertificateVerificationFailed,
    #[error("Invalid key material: `{0}`")]
    InvalidKey(String),
    #[error("Sealed data is not in the expected opaque format")]
    MalformedSealedData,
    #[error("Key derivation failed: `{0}`")]
    KeyDerivationFailed(String),
    #[error("Hardware signing failed: `{0}`")]
    HardwareSigningFailed(String),
    #[error("Serialization Error")]
    Serialization,
    #[error("Function call contained invalid arguments: `{0}`")]
    InvalidArgument(String),
    #[error("Represents some code assumption that was checked at runtime but failed to be true")]
    InternalInvariantFailed,
}

macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).or(Err(crate::errors::InternalError::Serialization))
    }};
}

macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).or(Err(crate::errors::InternalError::Serialization))
    }};
}

macro_rules! arg_err {
    ($x:expr) => {{
        Err(crate::errors::InternalError::InvalidArgument(String::from(
            $x,
        )))
    }};
}
