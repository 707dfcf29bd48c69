// =============================================================================
// TUMBLEMIX v0.4 - Index Lists
// =============================================================================
//
// Cut-and-choose disclosures reference positions in a previously submitted
// vector. Index lists travel as sequences of 16 bit little endian words and
// get committed to ahead of time as a salted BLAKE2s-256 hash.
//
// =============================================================================

use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::Blake2sMac256;

use crate::puzzle::PuzzleError;

/// Encodes a list of integer values representable by u16 into a series of
/// 16 bit little endian words. Negative or oversized values are rejected.
pub fn encode_index_list(index_list: &[i32]) -> Result<Vec<u8>, PuzzleError> {
    let mut buf = Vec::with_capacity(index_list.len() * 2);
    for &i in index_list {
        if !(0..=u16::MAX as i32).contains(&i) {
            return Err(PuzzleError::IndexOutOfBounds(i));
        }
        buf.extend_from_slice(&(i as u16).to_le_bytes());
    }
    Ok(buf)
}

/// Decodes a buffer of 16 bit little endian words back into indexes.
pub fn decode_index_list(index_list: &[u8]) -> Result<Vec<i32>, PuzzleError> {
    if index_list.len() % 2 != 0 {
        return Err(PuzzleError::BadListLength(index_list.len()));
    }
    let mut res = Vec::with_capacity(index_list.len() / 2);
    for pair in index_list.chunks_exact(2) {
        res.push(u16::from_le_bytes([pair[0], pair[1]]) as i32);
    }
    Ok(res)
}

/// Salted cryptographic commitment to a binary encoded index list:
/// BLAKE2s-256 keyed with the 32-byte salt.
pub fn hash_index_list(salt: &[u8], index_list: &[i32]) -> Result<Vec<u8>, PuzzleError> {
    let buf = encode_index_list(index_list)?;
    let mut mac = Blake2sMac256::new_from_slice(salt).map_err(|_| PuzzleError::BadSalt)?;
    mac.update(&buf);
    Ok(mac.finalize_fixed().to_vec())
}

// =============================================================================
// Tests
// =============================================================================
