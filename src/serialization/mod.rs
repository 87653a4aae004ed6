// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::*;

/// Width of the length prefix of every transcript element.
const LENGTH_PREFIX_BYTES: usize = 4;

// Corresponds to the I2OSP() function from RFC8017
pub(crate) fn i2osp(input: usize, length: usize) -> Result<Vec<u8>> {
    let sizeof_usize = core::mem::size_of::<usize>();

    // Check if input >= 256^length
    if (sizeof_usize as u32 - input.leading_zeros() / 8) > length as u32 {
        return Err(InternalError::Serialization);
    }

    if length <= sizeof_usize {
        return Ok(input.to_be_bytes()[sizeof_usize - length..].to_vec());
    }

    let mut output = vec![0u8; length];
    output.splice(length - sizeof_usize..length, input.to_be_bytes());
    Ok(output)
}

/// Computes `I2OSP(len(x_1), 4) || x_1 || ... || I2OSP(len(x_n), 4) || x_n`.
///
/// Used wherever several byte strings are bound into one KDF or MAC input, so
/// that no two distinct lists of elements encode to the same bytes.
pub(crate) fn transcript(elements: &[&[u8]]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(
        elements
            .iter()
            .map(|e| e.len() + LENGTH_PREFIX_BYTES)
            .sum(),
    );
    for element in elements {
        output.extend_from_slice(&i2osp(element.len(), LENGTH_PREFIX_BYTES)?);
        output.extend_from_slice(element);
    }
    Ok(output)
}
