// =============================================================================
// TUMBLEMIX v0.4 - Shuffle
// =============================================================================
//
// Fisher-Yates shuffle over a caller-supplied random source that also
// records the inverse permutation. Cut-and-choose mixing needs to answer
// "where did element i end up?" after the fact, so every swap updates an
// index -> position map that can be queried in O(1).
//
// =============================================================================

use rand::RngCore;

/// Largest number of elements a shuffle accepts.
const MAX_SHUFFLE_LEN: usize = (1 << 31) - 2;

/// Inverse permutation produced by a shuffle.
#[derive(Clone, Debug)]
pub struct ShuffleMap {
    perm: Vec<usize>,
}

impl ShuffleMap {
    /// Returns the shuffled position of the element originally at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.perm[index]
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }
}

/// Pseudo-randomizes the order of `n` elements. `swap` exchanges the
/// elements with indexes i and j. Panics if `n` is too large; passing a
/// negative count is impossible by construction and the upper bound keeps
/// the 32-bit uniform sampler exact.
pub fn shuffle<R, F>(random: &mut R, n: usize, mut swap: F) -> ShuffleMap
where
    R: RngCore + ?Sized,
    F: FnMut(usize, usize),
{
    if n > MAX_SHUFFLE_LEN {
        panic!("invalid argument to shuffle");
    }

    // idx[pos] tracks which original element currently sits at pos;
    // once position i is finalized, perm[idx[i]] records it. An element
    // that ends up at position 0 is never recorded explicitly and relies
    // on perm being zero-initialized.
    let mut idx: Vec<usize> = (0..n).collect();
    let mut perm = vec![0usize; n];

    for i in (1..n).rev() {
        let j = uniform_random_31(random, (i + 1) as u32) as usize;
        swap(i, j);
        idx.swap(i, j);
        perm[idx[i]] = i;
    }

    ShuffleMap { perm }
}

/// Uniform value in [0, n) from 32-bit words using Lemire's multiply-
/// and-reject method.
fn uniform_random_31<R: RngCore + ?Sized>(random: &mut R, n: u32) -> u32 {
    let mut v = random.next_u32();
    let mut prod = (v as u64) * (n as u64);
    let mut low = prod as u32;
    if low < n {
        let thresh = n.wrapping_neg() % n;
        while low < thresh {
            v = random.next_u32();
            prod = (v as u64) * (n as u64);
            low = prod as u32;
        }
    }
    (prod >> 32) as u32
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        let mut rng = rand::thread_rng();

        let mut swaps = 0;
        let sh = shuffle(&mut rng, 0, |_, _| swaps += 1);
        assert_eq!(swaps, 0);
        assert!(sh.is_empty());

        let sh = shuffle(&mut rng, 1, |_, _| swaps += 1);
        assert_eq!(swaps, 0);
        assert_eq!(sh.get(0), 0);
    }

    #[test]
    fn test_inverse_map_tracks_elements() {
        let mut rng = rand::thread_rng();
        let n = 257;

        let mut items: Vec<usize> = (0..n).collect();
        let sh = shuffle(&mut rng, n, |i, j| items.swap(i, j));

        // perm must be a permutation and point at the right elements.
        for original in 0..n {
            let pos = sh.get(original);
            assert_eq!(items[pos], original);
        }
    }

    #[test]
    fn test_shuffles_differ() {
        let mut rng = rand::thread_rng();
        let n = 64;

        let mut a: Vec<usize> = (0..n).collect();
        let mut b: Vec<usize> = (0..n).collect();
        shuffle(&mut rng, n, |i, j| a.swap(i, j));
        shuffle(&mut rng, n, |i, j| b.swap(i, j));

        // Astronomically unlikely to collide for 64 elements.
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "invalid argument")]
    fn test_rejects_oversized_count() {
        let mut rng = rand::thread_rng();
        shuffle(&mut rng, MAX_SHUFFLE_LEN + 1, |_, _| {});
    }

    #[test]
    fn test_uniform_random_bounds() {
        let mut rng = rand::thread_rng();
        for n in [1u32, 2, 3, 7, 100, 1 << 30] {
            for _ in 0..100 {
                assert!(uniform_random_31(&mut rng, n) < n);
            }
        }
    }
}
