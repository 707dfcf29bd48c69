// =============================================================================
// TUMBLEMIX v0.4 - Puzzle Keys
// =============================================================================
//
// Multi-prime RSA keys for the puzzle group. Decryption runs over the
// precomputed CRT chain and is blinded with a per-key random factor so the
// timing of the exponentiations doesn't follow the input.
//
// =============================================================================

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

use crate::puzzle::PuzzleError;

/// Public RSA exponent used by every puzzle key.
const PUZZLE_EXPONENT: u32 = 65537;

/// Smallest supported modulus.
const MIN_DIFFICULTY: usize = 256;

/// Precomputed CRT data for primes beyond the first two.
#[derive(Clone, Debug)]
struct CrtValue {
    /// d mod (prime - 1)
    exp: BigUint,
    /// (product of preceding primes)^-1 mod prime
    coeff: BigUint,
    /// product of preceding primes
    r: BigUint,
}

/// Private puzzle key: a multi-prime RSA key plus a random blinding factor
/// and its inverse applied around every decryption.
#[derive(Clone, Debug)]
pub struct PuzzleKey {
    n: BigUint,
    e: BigUint,
    primes: Vec<BigUint>,
    dp: BigUint,
    dq: BigUint,
    qinv: BigUint,
    crt_values: Vec<CrtValue>,
    factor: BigUint,
    inverse: BigUint,
}

/// Public half of a puzzle key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PuzzlePubKey {
    pub e: BigUint,
    pub n: BigUint,
}

impl PuzzleKey {
    /// Generates a puzzle key with a modulus of `difficulty` bits. The
    /// number of primes scales with the modulus size following the safe
    /// multi-prime bands in Hinek's analysis (cacr2006-16).
    pub fn generate(difficulty: usize) -> Result<PuzzleKey, PuzzleError> {
        if difficulty < MIN_DIFFICULTY {
            return Err(PuzzleError::KeyGeneration);
        }
        let nprimes = if difficulty >= 8192 {
            5
        } else if difficulty >= 4096 {
            4
        } else if difficulty >= 1024 {
            3
        } else {
            2
        };

        let mut rng = OsRng;
        let e = BigUint::from(PUZZLE_EXPONENT);

        loop {
            let mut todo = difficulty;
            let mut primes: Vec<BigUint> = Vec::with_capacity(nprimes);
            for i in 0..nprimes {
                let p = gen_prime(&mut rng, todo / (nprimes - i));
                todo = todo.saturating_sub(p.bits() as usize);
                primes.push(p);
            }
            if has_duplicates(&primes) {
                continue;
            }

            let mut n = BigUint::one();
            let mut totient = BigUint::one();
            for p in &primes {
                n *= p;
                totient *= p - 1u32;
            }
            if n.bits() as usize != difficulty {
                // Resulting modulus came up short; retry with fresh primes.
                continue;
            }

            if let Some(d) = mod_inverse(&e, &totient) {
                return PuzzleKey::precompute(n, e, d, primes);
            }
        }
    }

    /// Fills in the CRT chain and the decryption blinding factor.
    fn precompute(
        n: BigUint,
        e: BigUint,
        d: BigUint,
        primes: Vec<BigUint>,
    ) -> Result<PuzzleKey, PuzzleError> {
        let p = &primes[0];
        let q = &primes[1];
        let dp = &d % (p - 1u32);
        let dq = &d % (q - 1u32);
        let qinv = mod_inverse(q, p).ok_or(PuzzleError::KeyGeneration)?;

        let mut r = p * q;
        let mut crt_values = Vec::with_capacity(primes.len().saturating_sub(2));
        for prime in primes.iter().skip(2) {
            let exp = &d % (prime - 1u32);
            let coeff = mod_inverse(&r, prime).ok_or(PuzzleError::KeyGeneration)?;
            crt_values.push(CrtValue {
                exp,
                coeff,
                r: r.clone(),
            });
            r *= prime;
        }

        let (factor, inverse) = new_blinding_factor(&n);

        Ok(PuzzleKey {
            n,
            e,
            primes,
            dp,
            dq,
            qinv,
            crt_values,
            factor,
            inverse,
        })
    }

    pub fn public_key(&self) -> PuzzlePubKey {
        PuzzlePubKey {
            e: self.e.clone(),
            n: self.n.clone(),
        }
    }

    pub(crate) fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// RSA decryption over the CRT chain. The ciphertext is multiplied by
    /// factor^e before and by factor^-1 after so the modular exponentiation
    /// never runs on attacker-chosen values directly.
    pub(crate) fn decrypt(&self, c: &BigUint) -> Result<BigUint, PuzzleError> {
        if c > &self.n {
            return Err(PuzzleError::ValueTooLarge);
        }

        let rpowe = self.factor.modpow(&self.e, &self.n);
        let c = (c * &rpowe) % &self.n;

        let p = &self.primes[0];
        let q = &self.primes[1];
        let p_signed = BigInt::from(p.clone());

        let m1 = c.modpow(&self.dp, p);
        let m2 = c.modpow(&self.dq, q);

        // Garner recombination, signed so intermediate differences are safe.
        let mut m = BigInt::from(m1) - BigInt::from(m2.clone());
        if m.sign() == Sign::Minus {
            m += &p_signed;
        }
        m = (m * BigInt::from(self.qinv.clone())) % &p_signed;
        if m.sign() == Sign::Minus {
            m += &p_signed;
        }
        m *= BigInt::from(q.clone());
        m += BigInt::from(m2);

        for (i, values) in self.crt_values.iter().enumerate() {
            let prime = &self.primes[2 + i];
            let prime_signed = BigInt::from(prime.clone());
            let mut m2 = BigInt::from(c.modpow(&values.exp, prime));
            m2 -= &m;
            m2 *= BigInt::from(values.coeff.clone());
            m2 %= &prime_signed;
            if m2.sign() == Sign::Minus {
                m2 += &prime_signed;
            }
            m2 *= BigInt::from(values.r.clone());
            m += m2;
        }

        let m = m.magnitude().clone();
        Ok((m * &self.inverse) % &self.n)
    }
}

impl PuzzlePubKey {
    pub(crate) fn encrypt(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.e, &self.n)
    }
}

/// Serializes a public puzzle key as length-prefixed big-endian (e, N).
pub fn marshal_pub_key(pk: &PuzzleKey) -> Vec<u8> {
    marshal_pub_key_parts(&pk.public_key())
}

fn marshal_pub_key_parts(pk: &PuzzlePubKey) -> Vec<u8> {
    let e = pk.e.to_bytes_be();
    let n = pk.n.to_bytes_be();
    let mut out = Vec::with_capacity(8 + e.len() + n.len());
    out.extend_from_slice(&(e.len() as u32).to_be_bytes());
    out.extend_from_slice(&e);
    out.extend_from_slice(&(n.len() as u32).to_be_bytes());
    out.extend_from_slice(&n);
    out
}

/// Parses a public key produced by marshal_pub_key.
pub fn parse_pub_key(data: &[u8]) -> Result<PuzzlePubKey, PuzzleError> {
    let (e, rest) = read_chunk(data).ok_or(PuzzleError::BadPublicKey)?;
    let (n, rest) = read_chunk(rest).ok_or(PuzzleError::BadPublicKey)?;
    if !rest.is_empty() || e.is_empty() || n.is_empty() {
        return Err(PuzzleError::BadPublicKey);
    }
    Ok(PuzzlePubKey {
        e: BigUint::from_bytes_be(e),
        n: BigUint::from_bytes_be(n),
    })
}

fn read_chunk(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let rest = &data[4..];
    if rest.len() < len {
        return None;
    }
    Some((&rest[..len], &rest[len..]))
}

// =============================================================================
// Modular Arithmetic Helpers
// =============================================================================

/// Non-zero random value less than the modulus together with its
/// multiplicative inverse in Z/nZ.
pub(crate) fn new_blinding_factor(n: &BigUint) -> (BigUint, BigUint) {
    let mut rng = OsRng;
    loop {
        let r = rng.gen_biguint_below(n);
        if r.is_zero() {
            continue;
        }
        if let Some(ir) = mod_inverse(&r, n) {
            return (r, ir);
        }
    }
}

/// Inverse of a in the multiplicative group mod n, or None when a and n
/// aren't coprime. The moduli in use are products of a few large primes
/// rather than true primes, so the non-coprime case exists but is rare.
pub(crate) fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let n = BigInt::from(n.clone());
    let gcd = a.extended_gcd(&n);
    if !gcd.gcd.is_one() {
        return None;
    }
    let mut x = gcd.x % &n;
    if x.sign() == Sign::Minus {
        x += &n;
    }
    Some(x.magnitude().clone())
}

fn has_duplicates(primes: &[BigUint]) -> bool {
    for i in 0..primes.len() {
        for j in 0..i {
            if primes[i] == primes[j] {
                return true;
            }
        }
    }
    false
}

// =============================================================================
// Prime Generation
// =============================================================================

/// Small primes used to cheaply reject composites before Miller-Rabin.
const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

/// Miller-Rabin rounds; matches the error bound used by the reference
/// RSA key generators.
const MILLER_RABIN_ROUNDS: usize = 20;

/// Returns a random probable prime of exactly `bits` bits. The top two
/// bits are set so products of generated primes reach their full width.
fn gen_prime(rng: &mut OsRng, bits: usize) -> BigUint {
    assert!(bits >= 16, "prime size too small");
    loop {
        let mut p = rng.gen_biguint(bits as u64);
        p.set_bit(bits as u64 - 1, true);
        p.set_bit(bits as u64 - 2, true);
        p.set_bit(0, true);
        if probably_prime(rng, &p) {
            return p;
        }
    }
}

/// Probabilistic primality test: trial division by small primes followed
/// by Miller-Rabin with random bases.
fn probably_prime(rng: &mut OsRng, n: &BigUint) -> bool {
    for sp in SMALL_PRIMES {
        let sp = BigUint::from(sp);
        if (n % &sp).is_zero() {
            return n == &sp;
        }
    }

    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let n_minus_one = n - &one;

    // n - 1 = d * 2^s with d odd
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prime_generation() {
        let mut rng = OsRng;
        let p = gen_prime(&mut rng, 128);
        assert_eq!(p.bits(), 128);
        assert!(probably_prime(&mut rng, &p));
        assert!(p.bit(0));
    }

    #[test]
    fn test_probably_prime_rejects_composites() {
        let mut rng = OsRng;
        assert!(probably_prime(&mut rng, &BigUint::from(65537u32)));
        assert!(!probably_prime(&mut rng, &BigUint::from(65537u32 * 3)));
        assert!(!probably_prime(&mut rng, &(BigUint::from(2u32).pow(100))));
    }

    #[test]
    fn test_mod_inverse() {
        let n = BigUint::from(2017u32); // prime
        for a in [2u32, 3, 1000, 2016] {
            let a = BigUint::from(a);
            let inv = mod_inverse(&a, &n).expect("inverse exists");
            assert!((a * inv % &n).is_one());
        }
        // 6 and 9 share a factor
        assert!(mod_inverse(&BigUint::from(6u32), &BigUint::from(9u32)).is_none());
    }

    #[test]
    fn test_generate_key_shape() {
        let pk = PuzzleKey::generate(512).expect("keygen");
        assert_eq!(pk.primes.len(), 2);
        assert_eq!(pk.n.bits(), 512);
        assert!(pk.crt_values.is_empty());

        // 1024 bits and up use three primes.
        let pk = PuzzleKey::generate(1024).expect("keygen");
        assert_eq!(pk.primes.len(), 3);
        assert_eq!(pk.n.bits(), 1024);
        assert_eq!(pk.crt_values.len(), 1);
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let key = PuzzleKey::generate(1024).expect("keygen");
        let public = key.public_key();
        let mut rng = OsRng;
        for _ in 0..4 {
            let m = rng.gen_biguint_below(key.modulus());
            let c = public.encrypt(&m);
            let out = key.decrypt(&c).expect("decrypt");
            assert_eq!(out, m);
        }
    }

    #[test]
    fn test_decrypt_rejects_oversized_input() {
        let key = PuzzleKey::generate(512).expect("keygen");
        let c = key.modulus() + 1u32;
        assert!(matches!(key.decrypt(&c), Err(PuzzleError::ValueTooLarge)));
    }

    #[test]
    fn test_pub_key_round_trip() {
        let key = PuzzleKey::generate(512).expect("keygen");
        let data = marshal_pub_key(&key);
        let parsed = parse_pub_key(&data).expect("parse");
        assert_eq!(parsed, key.public_key());

        assert!(parse_pub_key(&[]).is_err());
        assert!(parse_pub_key(&data[..data.len() - 1]).is_err());
    }
}
