use crate::{
    buckets::Buckets,
    builder::{BuilderWithBits, BuilderWithFalsePositiveRate},
    codec::{expect_field, log_rejected, packed_len, Family, FilterBytes, FilterSlice},
    error::DecodeError,
    hasher::HashKernel,
    math::exp,
    BuildHasher, DefaultHasher, Filter,
};
use alloc::vec::Vec;

/// A classic Bloom filter.
///
/// False positives from [`test`](Self::test) are possible, but false negatives
/// are not: every key that was added tests true until the filter is reset. With
/// enough keys the filter fills up and the false positive rate reaches 1; for
/// unbounded streams use a [`StableBloomFilter`](crate::StableBloomFilter) instead.
///
/// # Examples
/// Instantiate with a target false positive rate:
/// ```rust
/// use streambloom::BloomFilter;
///
/// let mut filter = BloomFilter::with_false_pos(0.01).expected_items(1000);
/// filter.add(b"42");
/// assert!(filter.test(b"42"));
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter<S = DefaultHasher> {
    bits: Buckets,
    num_hashes: usize,
    count: usize,
    hasher: S,
}

impl BloomFilter {
    /// Creates a new instance of [`BuilderWithFalsePositiveRate`] to construct a `BloomFilter`
    /// with a target false positive rate of `fp`.
    ///
    /// # Panics
    /// Panics if `fp` is not strictly between 0 and 1.
    pub fn with_false_pos(fp: f64) -> BuilderWithFalsePositiveRate {
        assert!(fp > 0.0 && fp < 1.0);
        BuilderWithFalsePositiveRate {
            desired_fp_rate: fp,
            hasher: Default::default(),
        }
    }

    /// Creates a new instance of [`BuilderWithBits`] to construct a `BloomFilter` with
    /// `num_bits` bits. The number of hashes is clamped to `1..=num_bits`.
    ///
    /// # Panics
    /// Panics if `num_bits` is 0.
    pub fn with_num_bits(num_bits: usize) -> BuilderWithBits {
        assert!(num_bits > 0);
        BuilderWithBits {
            num_bits,
            hasher: Default::default(),
        }
    }

    /// Decodes a filter written by [`to_bytes`](Self::to_bytes), hashing with FNV.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        log_rejected(Self::decode_new(bytes))
    }

    fn decode_new(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Classic)?;
        let m = reader.read_usize("num_bits")?;
        let k = reader.read_usize("num_hashes")?;
        let count = reader.read_usize("count")?;
        if m == 0 {
            return Err(DecodeError::InvalidConfig {
                field: "num_bits",
                value: 0,
            });
        }
        if k == 0 || k > m {
            return Err(DecodeError::InvalidConfig {
                field: "num_hashes",
                value: k as u64,
            });
        }
        let num_bytes = packed_len(m, 1).ok_or(DecodeError::InvalidConfig {
            field: "num_bits",
            value: m as u64,
        })?;
        let bits = reader.read_buffer("bits", num_bytes)?;
        reader.finish()?;
        let mut filter = Self::with_num_bits(m).hashes(k);
        filter.bits.load(bits);
        filter.count = count;
        Ok(filter)
    }
}

impl<S: BuildHasher> BloomFilter<S> {
    pub(crate) fn from_parts(num_bits: usize, num_hashes: usize, hasher: S) -> Self {
        let clamped = num_hashes.clamp(1, num_bits);
        if clamped != num_hashes {
            log::warn!("clamping classic filter hashes from {num_hashes} to {clamped}");
        }
        Self {
            bits: Buckets::new(num_bits, 1),
            num_hashes: clamped,
            count: 0,
            hasher,
        }
    }

    /// Returns the number of bits, `m`.
    #[inline]
    pub fn num_bits(&self) -> usize {
        self.bits.len()
    }

    /// Same as [`num_bits`](Self::num_bits).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_bits()
    }

    /// Returns the number of hashes per key, `k`.
    #[inline]
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Returns the number of keys added since construction or the last reset.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the fraction of bits that are set.
    pub fn fill_ratio(&self) -> f64 {
        self.bits.count_nonzero() as f64 / self.num_bits() as f64
    }

    /// Returns the expected fraction of set bits after [`count`](Self::count) insertions.
    pub fn estimated_fill_ratio(&self) -> f64 {
        1.0 - exp(-(self.count as f64) * self.num_hashes as f64 / self.num_bits() as f64)
    }

    /// Tests whether `key` is possibly in the filter. Never returns false for a key that
    /// was added.
    #[inline]
    pub fn test(&self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_bits();
        (0..self.num_hashes).all(|i| self.bits.get(kernel.index(i, m)) != 0)
    }

    /// Adds `key` to the filter. Returns the filter to allow chaining.
    pub fn add(&mut self, key: &[u8]) -> &mut Self {
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_bits();
        for i in 0..self.num_hashes {
            self.bits.set(kernel.index(i, m), 1);
        }
        self.count += 1;
        self
    }

    /// Equivalent to [`test`](Self::test) followed by [`add`](Self::add), hashing `key` once.
    pub fn test_and_add(&mut self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_bits();
        let mut member = true;
        for i in 0..self.num_hashes {
            let index = kernel.index(i, m);
            member &= self.bits.get(index) != 0;
            self.bits.set(index, 1);
        }
        self.count += 1;
        member
    }

    /// Clears every bit. Returns the filter to allow chaining.
    pub fn reset(&mut self) -> &mut Self {
        self.bits.reset();
        self.count = 0;
        self
    }

    /// Returns the underlying bits.
    #[inline]
    pub fn bits(&self) -> &Buckets {
        &self.bits
    }

    /// Encodes the configuration, count and bits.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bits = self.bits.as_bytes();
        let mut w = FilterBytes::new(Family::Classic, 32 + bits.len());
        w.write_u64(self.num_bits() as u64);
        w.write_u64(self.num_hashes as u64);
        w.write_u64(self.count as u64);
        w.write_buffer(bits);
        w.into_bytes()
    }

    /// Replaces this filter's bits and count with ones encoded by [`to_bytes`](Self::to_bytes).
    ///
    /// Fails without modifying the filter if the encoded configuration differs from
    /// this filter's.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        log_rejected(self.decode_inner(bytes))
    }

    fn decode_inner(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Classic)?;
        expect_field("num_bits", self.num_bits() as u64, reader.read_u64("num_bits")?)?;
        expect_field("num_hashes", self.num_hashes as u64, reader.read_u64("num_hashes")?)?;
        let count = reader.read_usize("count")?;
        let bits = reader.read_buffer("bits", self.bits.as_bytes().len())?;
        reader.finish()?;
        self.bits.load(bits);
        self.count = count;
        Ok(())
    }
}

impl<S: BuildHasher> Filter for BloomFilter<S> {
    fn add(&mut self, key: &[u8]) -> &mut Self {
        BloomFilter::add(self, key)
    }

    fn test(&self, key: &[u8]) -> bool {
        BloomFilter::test(self, key)
    }

    fn test_and_add(&mut self, key: &[u8]) -> bool {
        BloomFilter::test_and_add(self, key)
    }

    fn reset(&mut self) -> &mut Self {
        BloomFilter::reset(self)
    }
}

impl<T: AsRef<[u8]>, S: BuildHasher> Extend<T> for BloomFilter<S> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for key in iter {
            self.add(key.as_ref());
        }
    }
}

impl<S: BuildHasher> PartialEq for BloomFilter<S> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.num_hashes == other.num_hashes
    }
}
impl<S: BuildHasher> Eq for BloomFilter<S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const TRIALS: usize = 100_000;

    fn false_pos_rate<H: BuildHasher>(filter: &BloomFilter<H>) -> f64 {
        let false_positives = non_member_nums()
            .filter(|x| filter.test(&x.to_be_bytes()))
            .count();
        (false_positives as f64) / (TRIALS as f64)
    }

    fn member_nums(num: usize) -> impl Iterator<Item = u64> {
        random_numbers(num, 5)
    }

    fn non_member_nums() -> impl Iterator<Item = u64> {
        random_numbers(TRIALS, 7).map(|x| x + u32::MAX as u64)
    }

    fn random_numbers(num: usize, seed: u64) -> impl Iterator<Item = u64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..num).map(move |_| rng.random::<u32>() as u64)
    }

    #[test]
    fn capacity_and_hashes() {
        let f = BloomFilter::with_false_pos(0.1).expected_items(100);
        assert_eq!(f.capacity(), 480);
        assert_eq!(f.num_hashes(), 4);
    }

    #[test]
    fn counts_adds() {
        let mut f = BloomFilter::with_false_pos(0.1).expected_items(100);
        for i in 0..10u32 {
            f.add(&i.to_be_bytes());
        }
        assert_eq!(f.count(), 10);
        f.test_and_add(b"one more");
        assert_eq!(f.count(), 11);
    }

    #[test]
    fn estimated_fill_ratio() {
        let mut f = BloomFilter::with_false_pos(0.5).expected_items(100);
        for i in 0..100u32 {
            f.add(&i.to_be_bytes());
        }
        assert!(f.estimated_fill_ratio() <= 0.5, "{}", f.estimated_fill_ratio());
    }

    #[test]
    fn fill_ratio() {
        // The 12 indices of "a", "b" and "c" land on distinct bits.
        let mut f = BloomFilter::with_false_pos(0.1).expected_items(100);
        f.add(b"a").add(b"b").add(b"c");
        assert_eq!(f.fill_ratio(), 0.025);
    }

    #[test]
    fn test_and_add_sequence() {
        let mut f = BloomFilter::with_false_pos(0.01).expected_items(100);

        assert!(!f.test(b"a"));
        f.add(b"a");
        assert!(f.test(b"a"));
        assert!(f.test_and_add(b"a"));
        assert!(!f.test_and_add(b"b"));
        assert!(f.test(b"a"));
        assert!(f.test(b"b"));
        assert!(!f.test(b"c"));

        for i in 0..1_000_000u32 {
            f.test_and_add(&i.to_be_bytes());
        }
        // Saturated: everything is a false positive.
        assert!(f.test(b"x"));
    }

    #[test]
    fn nothing_after_reset() {
        let mut f = BloomFilter::with_false_pos(0.1).expected_items(100);
        for i in 0..1000u32 {
            f.add(&i.to_be_bytes());
        }
        f.reset();
        assert_eq!(f.count(), 0);
        assert_eq!(f.bits().count_nonzero(), 0);
        assert!((0..1000u32).all(|i| !f.test(&i.to_be_bytes())));
    }

    #[test]
    fn random_inserts_always_contained() {
        for mag in 1..5 {
            let size = 10usize.pow(mag);
            let mut filter = BloomFilter::with_num_bits(size * 8).expected_items(size);
            filter.extend(member_nums(size).map(|x| x.to_be_bytes()));
            assert!(member_nums(size).all(|x| filter.test(&x.to_be_bytes())));
            assert!(member_nums(size).all(|x| filter.test_and_add(&x.to_be_bytes())));
        }
    }

    #[test]
    fn target_fp_is_accurate() {
        let thresh = 3.0f64;
        for fp in [0.1, 0.01, 0.001] {
            for num_items in [1_000, 10_000] {
                let mut filter = BloomFilter::with_false_pos(fp).expected_items(num_items);
                filter.extend(member_nums(num_items).map(|x| x.to_be_bytes()));
                let sample_fp = false_pos_rate(&filter);
                let score = sample_fp / fp;
                assert!(
                    score <= thresh,
                    "{}",
                    format!("score {score}, size: {num_items}, fp: {fp}, sample fp: {sample_fp}")
                );
            }
        }
    }

    #[test]
    fn seeded_is_same() {
        let keys: Vec<[u8; 8]> = member_nums(1000).map(|x| x.to_be_bytes()).collect();
        for seed in 0u128..8 {
            let a = BloomFilter::with_num_bits(1 << 12).seed(&seed).items(keys.iter());
            let b = BloomFilter::with_num_bits(1 << 12).seed(&seed).items(keys.iter());
            let c = BloomFilter::with_num_bits(1 << 12)
                .seed(&(seed + 1))
                .items(keys.iter());
            assert_eq!(a, b);
            assert!(a != c);
        }
    }

    #[test]
    fn bytes_round_trip() {
        let mut f = BloomFilter::with_false_pos(0.01).expected_items(1000);
        f.add(b"test1").add(b"test2").add(b"test3");
        let bytes = f.to_bytes();

        let decoded = BloomFilter::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, f);
        assert_eq!(decoded.count(), 3);
        assert!(decoded.test(b"test1") && decoded.test(b"test2") && decoded.test(b"test3"));
        assert!(!decoded.test(b"test4"));

        let mut smaller = BloomFilter::with_false_pos(0.01).expected_items(10);
        assert!(matches!(
            smaller.decode(&bytes),
            Err(DecodeError::ConfigMismatch {
                field: "num_bits",
                ..
            })
        ));
        assert_eq!(smaller.count(), 0);
    }

    #[test]
    fn from_bytes_rejects_bad_hash_counts() {
        for k in [0u64, 9, 1 << 40] {
            let mut w = FilterBytes::new(Family::Classic, 32);
            w.write_u64(8);
            w.write_u64(k);
            w.write_u64(0);
            w.write_buffer(&[0]);
            assert_eq!(
                BloomFilter::from_bytes(&w.into_bytes()).err(),
                Some(DecodeError::InvalidConfig {
                    field: "num_hashes",
                    value: k
                })
            );
        }
    }

    #[test]
    fn clamps_hashes_to_bits() {
        assert_eq!(BloomFilter::with_num_bits(8).hashes(100).num_hashes(), 8);
        assert_eq!(BloomFilter::with_num_bits(8).hashes(0).num_hashes(), 1);
        let f = BloomFilter::with_num_bits(8).hashes(100);
        assert_eq!(BloomFilter::from_bytes(&f.to_bytes()).unwrap(), f);
    }

    #[test]
    fn test_debug_and_clone() {
        let filter = BloomFilter::with_num_bits(4).hashes(4);
        assert!(!format!("{:?}", filter).is_empty());
        let mut cloned = filter.clone();
        assert_eq!(filter, cloned);
        cloned.add(b"42");
        assert!(filter != cloned);
    }
}
