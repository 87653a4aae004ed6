// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Key derivation and MAC helpers shared by the protocol layers.

use crate::{
    errors::{InternalError, Result},
    parameters::{KdfParams, PASSWORD_KEY_SALT},
    sealed::{SymmetricKey, KEY_LEN},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag.
pub(crate) const TAG_LEN: usize = 32;

/// HKDF-SHA256 expanding `ikm` into a single symmetric key bound to `info`.
pub(crate) fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[&[u8]]) -> Result<SymmetricKey> {
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    Hkdf::<Sha256>::new(salt, ikm)
        .expand_multi_info(info, &mut okm[..])
        .map_err(|_| InternalError::InternalInvariantFailed)?;
    Ok(SymmetricKey::new(*okm))
}

/// Stretches a password with Argon2id under the fixed protocol salt.
///
/// Deterministic in `password` and `params`, so both parties of an exchange
/// derive the same key independently.
pub(crate) fn derive_password_key(
    password: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    params
        .argon2()?
        .hash_password_into(password, PASSWORD_KEY_SALT, &mut output[..])
        .map_err(|e| InternalError::KeyDerivationFailed(e.to_string()))?;
    Ok(output)
}

fn keyed_mac(key: &[u8], data: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| InternalError::InternalInvariantFailed)?;
    for d in data {
        mac.update(d);
    }
    Ok(mac)
}

/// Computes an HMAC-SHA256 tag over the concatenation of `data`.
pub(crate) fn mac(key: &[u8], data: &[&[u8]]) -> Result<[u8; TAG_LEN]> {
    Ok(keyed_mac(key, data)?.finalize().into_bytes().into())
}

/// Checks an HMAC-SHA256 tag in constant time.
pub(crate) fn verify_mac(key: &[u8], data: &[&[u8]], tag: &[u8]) -> Result<bool> {
    Ok(keyed_mac(key, data)?.verify_slice(tag).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_key_is_deterministic_in_the_password() -> Result<()> {
        let params = KdfParams::insecure_for_testing();
        let a = derive_password_key(b"correct horse", &params)?;
        let b = derive_password_key(b"correct horse", &params)?;
        let c = derive_password_key(b"battery staple", &params)?;
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        Ok(())
    }

    #[test]
    fn hkdf_separates_by_info() -> Result<()> {
        let a = hkdf_sha256(b"ikm", None, &[b"one"])?;
        let b = hkdf_sha256(b"ikm", None, &[b"two"])?;
        let c = hkdf_sha256(b"ikm", None, &[b"one"])?;
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes(), c.as_bytes());
        Ok(())
    }

    #[test]
    fn mac_verification() -> Result<()> {
        let tag = mac(b"key", &[b"a", b"b"])?;
        assert!(verify_mac(b"key", &[b"ab"], &tag)?);
        assert!(!verify_mac(b"other key", &[b"ab"], &tag)?);
        assert!(!verify_mac(b"key", &[b"ab"], &tag[..16])?);
        Ok(())
    }
}
