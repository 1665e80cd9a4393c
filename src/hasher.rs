use core::hash::{BuildHasher, BuildHasherDefault, Hasher};
use siphasher::sip::SipHasher13;

/// The default hasher for every filter in this crate: 64-bit FNV-1a.
///
/// FNV is unkeyed, so two filters with the same configuration always map a key to
/// the same cells. Use [`RandomHasher`] (or `.seed(..)` on a builder) when keys may be
/// chosen by an adversary.
pub type DefaultHasher = BuildHasherDefault<fnv::FnvHasher>;

/// A keyed SipHash-1-3 hasher.
///
/// `RandomHasher::default()` draws its key from OS entropy.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomHasher(SipHasher13);

impl RandomHasher {
    #[inline]
    pub fn seeded(seed: &[u8; 16]) -> Self {
        Self(SipHasher13::new_with_key(seed))
    }
}

impl Default for RandomHasher {
    #[inline]
    fn default() -> Self {
        let mut seed = [0u8; 16];
        getrandom::fill(&mut seed).expect("Unable to obtain entropy from OS/Hardware sources");
        Self::seeded(&seed)
    }
}

impl BuildHasher for RandomHasher {
    type Hasher = SipHasher13;
    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.0.clone()
    }
}

/// The two base hashes of a key, from which every cell index is derived.
///
/// This is "enhanced double hashing" as in <https://www.eecs.harvard.edu/~michaelm/postscripts/rsa2008.pdf>:
/// one 64-bit hash is computed per key and split into two 32-bit halves,
/// `lower` and `upper`, and the `i`th index is `lower + upper * i`.
///
/// The hasher state is built fresh for every key, so a kernel never carries
/// anything over from a previous key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct HashKernel {
    lower: u32,
    upper: u32,
}

impl HashKernel {
    #[inline]
    pub(crate) fn new(hasher: &impl BuildHasher, key: &[u8]) -> Self {
        let mut state = hasher.build_hasher();
        state.write(key);
        let sum = state.finish().to_be_bytes();
        Self {
            lower: u32::from_be_bytes([sum[4], sum[5], sum[6], sum[7]]),
            upper: u32::from_be_bytes([sum[0], sum[1], sum[2], sum[3]]),
        }
    }

    /// The `i`th index into a table of `len` cells.
    #[inline]
    pub(crate) fn index(&self, i: usize, len: usize) -> usize {
        let h = (self.lower as u64).wrapping_add((self.upper as u64).wrapping_mul(i as u64));
        (h % len as u64) as usize
    }

    /// The 32-bit hash used by single-slot structures.
    #[inline]
    pub(crate) fn hash32(&self) -> u32 {
        self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphasher::sip::SipHasher13;

    #[test]
    fn seeded_hasher_is_siphash13() {
        let h = RandomHasher::seeded(&[7; 16]);
        let mut expected = SipHasher13::new_with_key(&[7; 16]);
        expected.write(b"stream");
        let kernel = HashKernel::new(&h, b"stream");
        let sum = expected.finish();
        assert_eq!(kernel.lower, sum as u32);
        assert_eq!(kernel.upper, (sum >> 32) as u32);
    }

    #[test]
    fn kernel_splits_fnv_digest() {
        // FNV-1a 64 of "a" is 0xaf63dc4c8601ec8c.
        let kernel = HashKernel::new(&DefaultHasher::default(), b"a");
        assert_eq!(kernel.upper, 0xaf63dc4c);
        assert_eq!(kernel.lower, 0x8601ec8c);
        assert_eq!(kernel.hash32(), 0x8601ec8c);
    }

    #[test]
    fn kernel_is_deterministic_across_keys() {
        let hasher = DefaultHasher::default();
        let first = HashKernel::new(&hasher, b"first");
        let _ = HashKernel::new(&hasher, b"second");
        assert_eq!(first, HashKernel::new(&hasher, b"first"));
    }

    #[test]
    fn index_wraps_into_range() {
        let kernel = HashKernel {
            lower: u32::MAX,
            upper: u32::MAX,
        };
        for i in 0..64 {
            assert!(kernel.index(i, 1000) < 1000);
        }
        assert_eq!(kernel.index(0, 10), (u32::MAX % 10) as usize);
        assert_eq!(
            kernel.index(3, 1000),
            ((u32::MAX as u64 + u32::MAX as u64 * 3) % 1000) as usize
        );
    }

    #[test]
    fn differently_seeded_hashers_differ() {
        let a = HashKernel::new(&RandomHasher::seeded(&[1; 16]), b"key");
        let b = HashKernel::new(&RandomHasher::seeded(&[2; 16]), b"key");
        assert_ne!(a, b);
        let c = HashKernel::new(&RandomHasher::seeded(&[1; 16]), b"key");
        assert_eq!(a, c);
    }
}
