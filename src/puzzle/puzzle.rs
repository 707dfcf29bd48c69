// =============================================================================
// TUMBLEMIX v0.4 - Puzzles & Promises
// =============================================================================
//
// An RSA puzzle z = s^e mod N conceals a random secret s. A promise is an
// OTP encryption of a payload keyed by that secret, so whoever solves the
// puzzle can open the promise. Blinding factors let a client re-randomize
// puzzles before handing them to the tumbler, and quotient chains prove
// that a batch of puzzles share a common preimage relation without
// revealing any preimage.
//
// =============================================================================

use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use subtle::ConstantTimeEq;

use crate::puzzle::key::{mod_inverse, new_blinding_factor, PuzzleKey, PuzzlePubKey};
use crate::puzzle::PuzzleError;

/// Longest payload the OTP keystream covers.
const MAX_PROMISE_LEN: usize = 65535;

/// Secret length for solution promises, matching the RIPEMD-160 preimage
/// size pushed into offer scripts.
pub const SOLUTION_KEY_LEN: usize = 20;

/// Creates a puzzle concealing a fresh random secret and a promise of
/// `payload` encrypted under that secret. Returns (puzzle, promise,
/// secret).
pub fn new_puzzle_promise(
    pk: &PuzzleKey,
    payload: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), PuzzleError> {
    let mut rng = OsRng;
    let secret = rng.gen_biguint_below(pk.modulus());

    let puzzle = create_puzzle(&pk.public_key(), &secret);
    let promise = crypt_xof(payload, &secret.to_bytes_be())?;
    Ok((puzzle, promise, secret.to_bytes_be()))
}

/// Solves the puzzle and promises the solution under a fresh random key.
/// Returns (solution, promise, key); the key is what the promise opens
/// with and H(key) is what gets committed to the client.
pub fn new_solution_promise(
    pk: &PuzzleKey,
    puzzle: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), PuzzleError> {
    let mut secret = vec![0u8; SOLUTION_KEY_LEN];
    OsRng.fill_bytes(&mut secret);

    let solution = solve_puzzle(pk, puzzle)?;
    let promise = crypt_xof(&solution, &secret)?;
    Ok((solution, promise, secret))
}

/// Puzzle z is computed as secret^e mod N.
fn create_puzzle(pk: &PuzzlePubKey, secret: &BigUint) -> Vec<u8> {
    pk.encrypt(secret).to_bytes_be()
}

/// Checks that the secret encrypts to the same value as the puzzle.
pub fn validate_puzzle(pk: &PuzzlePubKey, puzzle: &[u8], secret: &[u8]) -> bool {
    let secret = BigUint::from_bytes_be(secret);
    if secret >= pk.n {
        return false;
    }
    let check = create_puzzle(pk, &secret);
    bool::from(check.as_slice().ct_eq(puzzle))
}

/// Checks that `secret` is a correct blinding factor for the puzzle,
/// i.e. puzzle * secret^e == blinding.
pub fn validate_blinded_puzzle(
    pk: &PuzzlePubKey,
    blinding: &[u8],
    puzzle: &[u8],
    secret: &[u8],
) -> bool {
    let secret = BigUint::from_bytes_be(secret);
    if secret >= pk.n {
        return false;
    }
    let check = unblind_puzzle(pk, puzzle, &create_puzzle(pk, &secret));
    bool::from(check.as_slice().ct_eq(blinding))
}

/// Multiplies the puzzle by a fresh random factor raised to e. Returns the
/// blinded puzzle, the factor and the factor's multiplicative inverse
/// suitable for unblind_puzzle.
pub fn blind_puzzle(pk: &PuzzlePubKey, p: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let (r, ir) = new_blinding_factor(&pk.n);
    let rpowe = r.modpow(&pk.e, &pk.n);
    let z = (BigUint::from_bytes_be(p) * rpowe) % &pk.n;
    (z.to_bytes_be(), r.to_bytes_be(), ir.to_bytes_be())
}

/// Recovers the original puzzle value by multiplying with an inverse
/// obtained from blind_puzzle.
pub fn unblind_puzzle(pk: &PuzzlePubKey, p: &[u8], r: &[u8]) -> Vec<u8> {
    let p = BigUint::from_bytes_be(p);
    let r = BigUint::from_bytes_be(r);
    ((p * r) % &pk.n).to_bytes_be()
}

/// Decrypts the puzzle with the private key. The result is re-encrypted
/// and compared against the input in constant time to defend against
/// faults in the CRT computation.
pub fn solve_puzzle(pk: &PuzzleKey, p: &[u8]) -> Result<Vec<u8>, PuzzleError> {
    let m = pk.decrypt(&BigUint::from_bytes_be(p))?;

    let check = create_puzzle(&pk.public_key(), &m);
    if !bool::from(check.as_slice().ct_eq(p)) {
        return Err(PuzzleError::ArithmeticFault);
    }
    Ok(m.to_bytes_be())
}

/// Opens a promise with the secret its puzzle concealed.
pub fn reveal_solution(promise: &[u8], secret: &[u8]) -> Result<Vec<u8>, PuzzleError> {
    crypt_xof(promise, secret)
}

/// OTP encryption of `input` keyed by `secret`: a 256-bit XOF absorbs the
/// first 32 bytes of the secret as the key and the remainder afterwards,
/// then the keystream is XORed over the input. Encryption and decryption
/// are the same operation.
pub(crate) fn crypt_xof(input: &[u8], secret: &[u8]) -> Result<Vec<u8>, PuzzleError> {
    if input.len() > MAX_PROMISE_LEN {
        return Err(PuzzleError::InputTooLong);
    }
    let klen = secret.len().min(32);

    let mut xof = Shake256::default();
    xof.update(&secret[..klen]);
    xof.update(&secret[klen..]);

    let mut keystream = vec![0u8; input.len()];
    xof.finalize_xof().read(&mut keystream);

    for (k, b) in keystream.iter_mut().zip(input) {
        *k ^= b;
    }
    Ok(keystream)
}

// =============================================================================
// Quotient Chains
// =============================================================================

/// Quotient chain over a list of secrets: q[0] is the sentinel 1 and
/// q[i] = s[i] / s[i-1] mod N. Handing out the chain proves possession of
/// every secret in the batch while revealing none of them.
pub fn quotients(pk: &PuzzlePubKey, secrets: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, PuzzleError> {
    let mut qs = Vec::with_capacity(secrets.len());
    qs.push(vec![1u8]);
    for i in 1..secrets.len() {
        let a = BigUint::from_bytes_be(&secrets[i - 1]);
        let b = BigUint::from_bytes_be(&secrets[i]);
        let ai = mod_inverse(&a, &pk.n).ok_or(PuzzleError::MalformedSecret)?;
        let q = (b * ai) % &pk.n;
        qs.push(q.to_bytes_be());
    }
    Ok(qs)
}

/// Verifies a quotient chain against the secrets themselves: the i'th
/// secret must be recoverable as s[0] * q[0] * ... * q[i].
pub fn verify_quotients_with_secrets(
    pk: &PuzzlePubKey,
    qs: &[Vec<u8>],
    secrets: &[Vec<u8>],
) -> bool {
    if qs.len() != secrets.len() || secrets.is_empty() {
        return false;
    }
    let mut prod = BigUint::from_bytes_be(&secrets[0]);
    for (q, secret) in qs.iter().zip(secrets) {
        prod = (prod * BigUint::from_bytes_be(q)) % &pk.n;
        if !bool::from(secret.as_slice().ct_eq(&prod.to_bytes_be())) {
            return false;
        }
    }
    true
}

/// Verifies a quotient chain against the puzzles: each quotient raised to
/// the power of e acts as a blinding factor linking consecutive puzzles,
/// z[i] == z[i-1] * q[i]^e. The q[0] sentinel takes no part in this.
pub fn verify_quotients(pk: &PuzzlePubKey, qs: &[Vec<u8>], puzzles: &[Vec<u8>]) -> bool {
    if qs.len() != puzzles.len() || puzzles.is_empty() {
        return false;
    }
    for i in 1..qs.len() {
        let q = BigUint::from_bytes_be(&qs[i]).modpow(&pk.e, &pk.n);
        let z = (BigUint::from_bytes_be(&puzzles[i - 1]) * q) % &pk.n;
        if !bool::from(puzzles[i].as_slice().ct_eq(&z.to_bytes_be())) {
            return false;
        }
    }
    true
}

// =============================================================================
// Tests
// =============================================================================
