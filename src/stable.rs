use crate::{
    builder::StableBuilder,
    buckets::Buckets,
    codec::{expect_field, log_rejected, packed_len, Family, FilterBytes, FilterSlice},
    error::DecodeError,
    hasher::HashKernel,
    math::pow,
    BuildHasher, DefaultHasher, Filter,
};
use alloc::vec;
use alloc::vec::Vec;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A Stable Bloom Filter (SBF), as described by Deng and Rafiei in
/// "Approximately Detecting Duplicates for Streaming Data using Stable Bloom Filters":
/// <http://webdocs.cs.ualberta.ca/~drafiei/papers/DupDet06Sigmod.pdf>.
///
/// An SBF continuously evicts stale information so that it has room for more
/// recent keys. Every insertion first decrements `p` cells and then sets the
/// key's `k` cells to their maximum value. Like a classic Bloom filter it has a
/// non-zero false positive rate, but that rate converges to a fixed bound (see
/// [`false_positive_rate`](Self::false_positive_rate)) instead of climbing to 1,
/// at the price of occasional false negatives for keys that were evicted.
///
/// A classic Bloom filter is the special case `p = 0` with one bit per cell, see
/// [`unstable`](Self::unstable).
///
/// `StableBloomFilter` is not synchronized: all mutation goes through `&mut self`.
/// Wrap it in a `Mutex` to share it between threads.
///
/// # Examples
/// ```
/// use streambloom::StableBloomFilter;
///
/// let mut filter = StableBloomFilter::with_defaults(10_000);
/// assert!(!filter.test_and_add(b"event-1"));
/// assert!(filter.test(b"event-1"));
/// ```
#[derive(Debug, Clone)]
pub struct StableBloomFilter<S = DefaultHasher> {
    cells: Buckets,
    hasher: S,
    num_hashes: usize,
    num_evictions: usize,
    max: u8,
    index_buffer: Vec<usize>,
    rng: SmallRng,
}

impl StableBloomFilter {
    /// Creates a new instance of [`StableBuilder`] to construct a `StableBloomFilter`
    /// with `num_cells` cells.
    ///
    /// # Panics
    /// Panics if `num_cells` is 0.
    pub fn with_num_cells(num_cells: usize) -> StableBuilder {
        assert!(num_cells > 0);
        StableBuilder {
            num_cells,
            bits_per_cell: 1,
            num_evictions: 10,
            eviction_seed: None,
            hasher: Default::default(),
        }
    }

    /// Creates a filter with `m` cells of `d` bits, `k` hashes and `p` evictions per insertion.
    /// `k` and `p` are clamped to `m`.
    ///
    /// # Panics
    /// Panics if `m` is 0 or `d` is not in `1..=8`.
    pub fn new(m: usize, k: usize, p: usize, d: u8) -> Self {
        Self::with_num_cells(m).bits_per_cell(d).evictions(p).hashes(k)
    }

    /// Creates a filter for streams with no prior knowledge of the data:
    /// 3 hashes, 10 evictions and one bit per cell, for an upper bound on false
    /// positives of about 0.01.
    pub fn with_defaults(m: usize) -> Self {
        Self::new(m, 3, 10, 1)
    }

    /// Creates a classic Bloom filter with `m` bits and `k` hashes: no eviction and
    /// one bit per cell.
    pub fn unstable(m: usize, k: usize) -> Self {
        Self::new(m, k, 0, 1)
    }

    /// Decodes a filter written by [`to_bytes`](Self::to_bytes), hashing with FNV and a
    /// freshly seeded eviction RNG.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        log_rejected(Self::decode_new(bytes))
    }

    fn decode_new(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Stable)?;
        let m = reader.read_usize("num_cells")?;
        let k = reader.read_usize("num_hashes")?;
        let p = reader.read_usize("num_evictions")?;
        let d = reader.read_u8("bits_per_cell")?;
        if m == 0 {
            return Err(DecodeError::InvalidConfig {
                field: "num_cells",
                value: 0,
            });
        }
        if !(1..=8).contains(&d) {
            return Err(DecodeError::InvalidConfig {
                field: "bits_per_cell",
                value: d as u64,
            });
        }
        if k > m {
            return Err(DecodeError::InvalidConfig {
                field: "num_hashes",
                value: k as u64,
            });
        }
        if p > m {
            return Err(DecodeError::InvalidConfig {
                field: "num_evictions",
                value: p as u64,
            });
        }
        let num_bytes = packed_len(m, d).ok_or(DecodeError::InvalidConfig {
            field: "num_cells",
            value: m as u64,
        })?;
        let cells = reader.read_buffer("cells", num_bytes)?;
        reader.finish()?;
        let mut filter = Self::new(m, k, p, d);
        filter.cells.load(cells);
        Ok(filter)
    }
}

impl<S: BuildHasher> StableBloomFilter<S> {
    pub(crate) fn from_builder(builder: StableBuilder<S>, num_hashes: usize) -> Self {
        let m = builder.num_cells;
        if num_hashes > m {
            log::warn!("clamping stable filter hashes from {num_hashes} to {m} cells");
        }
        if builder.num_evictions > m {
            log::warn!(
                "clamping stable filter evictions from {} to {m} cells",
                builder.num_evictions
            );
        }
        let num_hashes = num_hashes.min(m);
        let cells = Buckets::new(m, builder.bits_per_cell);
        let rng = match builder.eviction_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => entropy_rng(),
        };
        Self {
            max: cells.max_value(),
            cells,
            hasher: builder.hasher,
            num_hashes,
            num_evictions: builder.num_evictions.min(m),
            index_buffer: vec![0; num_hashes],
            rng,
        }
    }

    /// Returns the number of cells, `m`.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Same as [`num_cells`](Self::num_cells).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_cells()
    }

    /// Returns the number of hashes per key, `k`.
    #[inline]
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Returns the number of cells decremented on each insertion, `p`.
    #[inline]
    pub fn num_evictions(&self) -> usize {
        self.num_evictions
    }

    /// Returns the value a cell is set to when a key is added, `2^bits_per_cell - 1`.
    #[inline]
    pub fn max_value(&self) -> u8 {
        self.max
    }

    /// Returns the underlying cells.
    #[inline]
    pub fn cells(&self) -> &Buckets {
        &self.cells
    }

    /// Returns the limit of the expected fraction of zero cells as the number of
    /// insertions goes to infinity. Once the filter reaches this point it is
    /// considered stable.
    ///
    /// Without eviction (`p = 0`) there is no stable point and this returns 0: the
    /// filter fills up monotonically.
    pub fn stable_point(&self) -> f64 {
        let sub_denom = self.num_evictions as f64
            * (1.0 / self.num_hashes as f64 - 1.0 / self.num_cells() as f64);
        let denom = 1.0 + 1.0 / sub_denom;
        let base = 1.0 / denom;
        pow(base, self.max as f64)
    }

    /// Returns the upper bound on the false positive rate once the filter is stable.
    /// For a filter without eviction this is 1.
    pub fn false_positive_rate(&self) -> f64 {
        pow(1.0 - self.stable_point(), self.num_hashes as f64)
    }

    /// Returns the fraction of cells that are not zero.
    pub fn fill_ratio(&self) -> f64 {
        self.cells.count_nonzero() as f64 / self.num_cells() as f64
    }

    /// Tests whether `key` is possibly in the filter.
    ///
    /// This is probabilistic: both false positives and, after eviction, false
    /// negatives are possible.
    #[inline]
    pub fn test(&self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_cells();
        (0..self.num_hashes).all(|i| self.cells.get(kernel.index(i, m)) != 0)
    }

    /// Adds `key` to the filter, first evicting by decrementing `p` cells.
    /// Returns the filter to allow chaining.
    pub fn add(&mut self, key: &[u8]) -> &mut Self {
        self.decrement();
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_cells();
        for i in 0..self.num_hashes {
            self.cells.set(kernel.index(i, m), self.max);
        }
        self
    }

    /// Equivalent to [`test`](Self::test) followed by [`add`](Self::add), hashing `key` once.
    /// Returns whether `key` was possibly in the filter before it was added.
    pub fn test_and_add(&mut self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let m = self.num_cells();
        let mut member = true;
        for (i, index) in self.index_buffer.iter_mut().enumerate() {
            *index = kernel.index(i, m);
            member &= self.cells.get(*index) != 0;
        }

        self.decrement();

        for &index in self.index_buffer.iter() {
            self.cells.set(index, self.max);
        }
        member
    }

    /// Restores the filter to its empty state. Returns the filter to allow chaining.
    pub fn reset(&mut self) -> &mut Self {
        self.cells.reset();
        self
    }

    /// Decrements a random cell and the `p - 1` cells after it, wrapping around.
    ///
    /// One random start is much cheaper than `p` random picks. The picks are not
    /// independent, but each cell is still chosen with probability `p / m` per
    /// insertion, which is all the stable point analysis relies on.
    fn decrement(&mut self) {
        if self.num_evictions == 0 {
            return;
        }
        let m = self.num_cells();
        let r = self.rng.random_range(0..m);
        for i in 0..self.num_evictions {
            self.cells.increment((r + i) % m, -1);
        }
    }

    /// Encodes the configuration and cells. See [`from_bytes`](StableBloomFilter::from_bytes)
    /// and [`decode`](Self::decode).
    pub fn to_bytes(&self) -> Vec<u8> {
        let cells = self.cells.as_bytes();
        let mut w = FilterBytes::new(Family::Stable, 33 + cells.len());
        w.write_u64(self.num_cells() as u64);
        w.write_u64(self.num_hashes as u64);
        w.write_u64(self.num_evictions as u64);
        w.write_u8(self.cells.bits_per_cell());
        w.write_buffer(cells);
        w.into_bytes()
    }

    /// Replaces this filter's cells with ones encoded by [`to_bytes`](Self::to_bytes).
    ///
    /// Fails without modifying the filter if the encoded configuration differs from
    /// this filter's.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        log_rejected(self.decode_inner(bytes))
    }

    fn decode_inner(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Stable)?;
        expect_field("num_cells", self.num_cells() as u64, reader.read_u64("num_cells")?)?;
        expect_field("num_hashes", self.num_hashes as u64, reader.read_u64("num_hashes")?)?;
        expect_field(
            "num_evictions",
            self.num_evictions as u64,
            reader.read_u64("num_evictions")?,
        )?;
        expect_field(
            "bits_per_cell",
            self.cells.bits_per_cell() as u64,
            reader.read_u8("bits_per_cell")? as u64,
        )?;
        let cells = reader.read_buffer("cells", self.cells.as_bytes().len())?;
        reader.finish()?;
        self.cells.load(cells);
        Ok(())
    }
}

/// An eviction RNG seeded from OS entropy.
fn entropy_rng() -> SmallRng {
    let mut seed = [0u8; 8];
    getrandom::fill(&mut seed).expect("Unable to obtain entropy from OS/Hardware sources");
    SmallRng::seed_from_u64(u64::from_le_bytes(seed))
}

impl<S: BuildHasher> Filter for StableBloomFilter<S> {
    fn add(&mut self, key: &[u8]) -> &mut Self {
        StableBloomFilter::add(self, key)
    }

    fn test(&self, key: &[u8]) -> bool {
        StableBloomFilter::test(self, key)
    }

    fn test_and_add(&mut self, key: &[u8]) -> bool {
        StableBloomFilter::test_and_add(self, key)
    }

    fn reset(&mut self) -> &mut Self {
        StableBloomFilter::reset(self)
    }
}

impl<T: AsRef<[u8]>, S: BuildHasher> Extend<T> for StableBloomFilter<S> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for key in iter {
            self.add(key.as_ref());
        }
    }
}
