// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Protocol parameter definitions.
//!
//! This module defines the tunable password-stretching parameters and the
//! fixed domain-separation labels that every key derivation in the protocol
//! binds into its output. Changing any label makes previously sealed data
//! unreadable, so each one carries a version suffix.
//!
//! ## References
//! 1. Argon2 Memory-Hard Function for Password Hashing and Proof-of-Work
//!    Applications, RFC 9106, IRTF, 09/2021.
//! 2. OWASP Password Storage Cheat Sheet, minimum Argon2id configuration
//!    (19 MiB of memory, 2 iterations, 1 degree of parallelism).

use crate::errors::{InternalError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

/// Associated data for the seal over the private key material.
pub(crate) const PRIVATE_KEY_MATERIAL_AD: &[u8] = b"SocialRecovery/PrivateKeyMaterial/v1";

/// HKDF info for the key that wraps a PKEK for one Trusted Contact.
pub(crate) const PKEK_WRAP_INFO: &[u8] = b"SocialRecovery/PkekWrap/v1";

/// HKDF info for the key that seals a legacy shared secret to an ephemeral key.
pub(crate) const SHARED_SECRET_SEAL_INFO: &[u8] = b"SocialRecovery/SharedSecretSeal/v1";

/// Argon2id salt for password keys. Fixed, so both parties derive the same
/// key from the same password without exchanging anything else.
pub(crate) const PASSWORD_KEY_SALT: &[u8] = b"SocialRecovery/PasswordKey/v1";

/// SPAKE2 identity of the Trusted Contact. The Protected Customer's identity
/// is the name of the role its key plays.
pub(crate) const PAKE_TRUSTED_CONTACT_IDENTITY: &[u8] = b"SocialRecovery/TrustedContact/v1";

/// HKDF info for the encryption and confirmation keys of a PAKE exchange.
pub(crate) const PAKE_SESSION_INFO: &[u8] = b"SocialRecovery/PakeSession/v1";

/// HMAC label of the key-confirmation tag of a PAKE exchange.
pub(crate) const PAKE_CONFIRMATION_LABEL: &[u8] = b"SocialRecovery/PakeConfirmation/v1";

/// Default Argon2id memory cost, in KiB.
pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;

/// Default Argon2id iteration count.
pub const DEFAULT_ITERATIONS: u32 = 2;

/// Default Argon2id degree of parallelism.
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Argon2id cost parameters used to stretch enrollment and recovery
/// passwords.
///
/// Both parties of an exchange must use identical parameters; a mismatch is
/// indistinguishable from a wrong password.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Builds and validates a parameter set.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            memory_kib,
            iterations,
            parallelism,
        };
        let _ = params.argon2()?;
        Ok(params)
    }

    /// Very cheap parameters. Only for tests and benchmarks.
    pub fn insecure_for_testing() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    pub(crate) fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(32),
        )
        .map_err(|e| InternalError::KeyDerivationFailed(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}
