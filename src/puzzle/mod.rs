// =============================================================================
// TUMBLEMIX v0.4 - Puzzle Primitives
// =============================================================================
//
// Cryptographic primitives for the fair-exchange protocol: RSA puzzles
// that conceal random secrets, OTP promises those secrets unlock, blinding
// for unlinkability, quotient chains as batch proofs and the index-list
// commitments used by cut-and-choose disclosures.
//
// =============================================================================

pub mod index_list;
pub mod key;
#[allow(clippy::module_inception)]
pub mod puzzle;

pub use index_list::{decode_index_list, encode_index_list, hash_index_list};
pub use key::{marshal_pub_key, parse_pub_key, PuzzleKey, PuzzlePubKey};
pub use puzzle::{
    blind_puzzle, new_puzzle_promise, new_solution_promise, quotients, reveal_solution,
    solve_puzzle, unblind_puzzle, validate_blinded_puzzle, validate_puzzle, verify_quotients,
    verify_quotients_with_secrets, SOLUTION_KEY_LEN,
};

use sha2::{Digest, Sha256};

/// Marker prepended to dummy transaction pads.
const FAKE_TX_TAG: &[u8] = b"fakefakefake";

/// Hash value of a transaction dummy with a known structure, verifiable
/// by anyone holding the random pad.
pub fn fake_tx_format(random_pad: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(FAKE_TX_TAG);
    hasher.update(random_pad);
    hasher.finalize().to_vec()
}

/// Commitment hash over a solution key, revealed alongside promises so
/// the client can verify disclosed keys later.
pub fn key_hash(key: &[u8]) -> Vec<u8> {
    Sha256::digest(key).to_vec()
}

// =============================================================================
// Errors
// =============================================================================

/// Puzzle arithmetic and codec errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PuzzleError {
    /// Payload exceeds the OTP keystream cap
    InputTooLong,
    /// Ciphertext larger than the modulus
    ValueTooLarge,
    /// CRT decryption produced a value that doesn't re-encrypt
    ArithmeticFault,
    /// Secret has no inverse in the puzzle group
    MalformedSecret,
    /// Key generation failed
    KeyGeneration,
    /// Index doesn't fit the wire encoding
    IndexOutOfBounds(i32),
    /// Encoded index list has an odd number of bytes
    BadListLength(usize),
    /// Commitment salt is too large for the keyed hash
    BadSalt,
    /// Marshalled public key didn't parse
    BadPublicKey,
}

impl std::fmt::Display for PuzzleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PuzzleError::InputTooLong => write!(f, "input too long"),
            PuzzleError::ValueTooLarge => write!(f, "value too large"),
            PuzzleError::ArithmeticFault => write!(f, "error in the CRT computation"),
            PuzzleError::MalformedSecret => write!(f, "malformed secret"),
            PuzzleError::KeyGeneration => write!(f, "failed to generate a puzzle key"),
            PuzzleError::IndexOutOfBounds(i) => write!(f, "index out of bounds: {}", i),
            PuzzleError::BadListLength(n) => write!(f, "bad list length: {}", n),
            PuzzleError::BadSalt => write!(f, "bad commitment salt"),
            PuzzleError::BadPublicKey => write!(f, "unknown public key type"),
        }
    }
}

impl std::error::Error for PuzzleError {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_tx_format() {
        let pad = [0x55u8; 32];
        let h = fake_tx_format(&pad);
        assert_eq!(h.len(), 32);
        assert_eq!(h, fake_tx_format(&pad));

        let other = [0x56u8; 32];
        assert_ne!(h, fake_tx_format(&other));
    }

    #[test]
    fn test_key_hash() {
        let h = key_hash(b"some key");
        assert_eq!(h.len(), 32);
        assert_ne!(h, key_hash(b"other key"));
    }
}
