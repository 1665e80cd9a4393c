use crate::{
    math::*, stable::StableBloomFilter, BloomFilter, BuildHasher, DefaultHasher,
    PartitionedBloomFilter, RandomHasher,
};
use core::{cmp::max, f64::consts::LN_2};

/// The fill ratio a filter sized by [`optimal_num_bits`] reaches at its expected item count.
const FILL_RATIO: f64 = 0.5;

/// A Stable Bloom filter builder with an immutable number of cells.
///
/// Defaults to one bit per cell and 10 evictions per insertion. The eviction RNG is
/// seeded from OS entropy unless [`eviction_seed`](Self::eviction_seed) is set.
///
/// # Examples
/// ```
/// use streambloom::StableBloomFilter;
///
/// let filter = StableBloomFilter::with_num_cells(10_000)
///     .bits_per_cell(2)
///     .evictions(20)
///     .hashes(3);
/// assert_eq!(filter.max_value(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct StableBuilder<S = DefaultHasher> {
    pub(crate) num_cells: usize,
    pub(crate) bits_per_cell: u8,
    pub(crate) num_evictions: usize,
    pub(crate) eviction_seed: Option<u64>,
    pub(crate) hasher: S,
}

impl<S: BuildHasher> StableBuilder<S> {
    /// Sets the width of each cell in bits, `1..=8`. Cells saturate at `2^bits - 1`.
    pub fn bits_per_cell(mut self, bits: u8) -> Self {
        self.bits_per_cell = bits;
        self
    }

    /// Sets how many cells are decremented on each insertion. `0` disables eviction.
    pub fn evictions(mut self, num_evictions: usize) -> Self {
        self.num_evictions = num_evictions;
        self
    }

    /// Seeds the eviction RNG, making the sequence of evicted cells reproducible.
    pub fn eviction_seed(mut self, seed: u64) -> Self {
        self.eviction_seed = Some(seed);
        self
    }

    /// Uses a SipHash-1-3 hasher keyed with `seed` instead of FNV.
    ///
    /// # Examples
    /// ```
    /// use streambloom::StableBloomFilter;
    ///
    /// let filter = StableBloomFilter::with_num_cells(1024).seed(&1).hashes(4);
    /// ```
    pub fn seed(self, seed: &u128) -> StableBuilder<RandomHasher> {
        self.hasher(RandomHasher::seeded(&seed.to_be_bytes()))
    }

    /// Sets the hasher for this builder. The later constructed filter will use
    /// this hasher when adding and testing keys.
    pub fn hasher<H: BuildHasher>(self, hasher: H) -> StableBuilder<H> {
        StableBuilder {
            num_cells: self.num_cells,
            bits_per_cell: self.bits_per_cell,
            num_evictions: self.num_evictions,
            eviction_seed: self.eviction_seed,
            hasher,
        }
    }

    /// "Consumes" this builder, using the provided `num_hashes` to return an
    /// empty [`StableBloomFilter`].
    ///
    /// `num_hashes` and the eviction count are clamped to the number of cells.
    ///
    /// # Panics
    /// Panics if the bits per cell are not in `1..=8`.
    pub fn hashes(self, num_hashes: usize) -> StableBloomFilter<S> {
        StableBloomFilter::from_builder(self, num_hashes)
    }
}

macro_rules! builder_with_bits {
    ($name:ident, $bloom:ident) => {
        /// A Bloom filter builder with an immutable number of bits.
        ///
        #[doc = concat!("This type can be used to construct an instance of [`", stringify!($bloom), "`] via the builder pattern.")]
        ///
        /// # Examples
        /// ```
        #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
        ///
        #[doc = concat!("let builder = ", stringify!($bloom), "::with_num_bits(1024);")]
        /// ```
        #[derive(Debug, Clone)]
        pub struct $name<S = DefaultHasher> {
            pub(crate) num_bits: usize,
            pub(crate) hasher: S,
        }

        impl<S: BuildHasher> $name<S> {
            /// Sets the seed for this builder. The later constructed Bloom filter
            /// will hash keys with SipHash-1-3 keyed by this seed.
            ///
            /// # Examples
            ///
            /// ```
            #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
            ///
            #[doc = concat!("let bloom = ", stringify!($bloom), "::with_num_bits(1024).seed(&1).hashes(4);")]
            /// ```
            pub fn seed(self, seed: &u128) -> $name<RandomHasher> {
                self.hasher(RandomHasher::seeded(&seed.to_be_bytes()))
            }

            /// Sets the hasher for this builder. The later constructed Bloom filter will use
            /// this hasher when adding and testing keys.
            pub fn hasher<H: BuildHasher>(self, hasher: H) -> $name<H> {
                $name::<H> {
                    num_bits: self.num_bits,
                    hasher,
                }
            }

            /// "Consumes" this builder, using the provided `num_hashes` to return an
            #[doc = concat!("empty [`", stringify!($bloom), "`].")]
            ///
            /// # Examples
            /// ```
            #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
            ///
            #[doc = concat!("let bloom = ", stringify!($bloom), "::with_num_bits(1024).hashes(4);")]
            /// ```
            pub fn hashes(self, num_hashes: usize) -> $bloom<S> {
                $bloom::from_parts(self.num_bits, num_hashes, self.hasher)
            }

            /// "Consumes" this builder, using the provided `expected_num_items` to return an
            #[doc = concat!("empty [`", stringify!($bloom), "`]. The number of hashes is optimized based on `expected_num_items`")]
            /// to minimize the false positive rate at that load.
            pub fn expected_items(self, expected_num_items: usize) -> $bloom<S> {
                let hashes = optimal_hashes_f(self.num_bits, expected_num_items);
                self.hashes(hashes)
            }

            #[doc = concat!("\"Consumes\" this builder and constructs a [`", stringify!($bloom), "`] containing")]
            /// all keys in `items`. The number of hashes per key is optimized based on `items.len()`.
            ///
            /// # Examples
            ///
            /// ```
            #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
            ///
            #[doc = concat!("let bloom = ", stringify!($bloom), "::with_num_bits(1024).items([\"a\", \"b\"]);")]
            /// assert!(bloom.test(b"a"));
            /// ```
            pub fn items<I: IntoIterator<IntoIter = impl ExactSizeIterator<Item = impl AsRef<[u8]>>>>(
                self,
                items: I,
            ) -> $bloom<S> {
                let into_iter = items.into_iter();
                let mut filter = self.expected_items(into_iter.len());
                filter.extend(into_iter);
                filter
            }
        }
    };
}

builder_with_bits!(BuilderWithBits, BloomFilter);
builder_with_bits!(PartitionedBuilderWithBits, PartitionedBloomFilter);

macro_rules! builder_with_fp {
    ($name:ident, $bloom:ident) => {
        /// A Bloom filter builder with an immutable false positive rate.
        ///
        #[doc = concat!("This type can be used to construct an instance of [`", stringify!($bloom), "`] via the builder pattern.")]
        ///
        /// # Examples
        ///
        /// ```
        #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
        ///
        #[doc = concat!("let builder = ", stringify!($bloom), "::with_false_pos(0.01);")]
        /// ```
        #[derive(Debug, Clone)]
        pub struct $name<S = DefaultHasher> {
            pub(crate) desired_fp_rate: f64,
            pub(crate) hasher: S,
        }

        impl<S: BuildHasher> $name<S> {
            /// Sets the seed for this builder. The later constructed Bloom filter
            /// will hash keys with SipHash-1-3 keyed by this seed.
            pub fn seed(self, seed: &u128) -> $name<RandomHasher> {
                self.hasher(RandomHasher::seeded(&seed.to_be_bytes()))
            }

            #[doc = concat!("Sets the hasher for this builder. The later constructed [`", stringify!($bloom), "`] will use")]
            /// this hasher when adding and testing keys.
            pub fn hasher<H: BuildHasher>(self, hasher: H) -> $name<H> {
                $name::<H> {
                    desired_fp_rate: self.desired_fp_rate,
                    hasher,
                }
            }

            /// "Consumes" this builder, using the provided `expected_num_items` to return an
            #[doc = concat!("empty [`", stringify!($bloom), "`] sized so that the false positive rate stays at the")]
            /// target while at most `expected_num_items` keys have been added.
            ///
            /// # Examples
            ///
            /// ```
            #[doc = concat!("use streambloom::", stringify!($bloom), ";")]
            ///
            #[doc = concat!("let bloom = ", stringify!($bloom), "::with_false_pos(0.001).expected_items(500);")]
            /// ```
            pub fn expected_items(self, expected_num_items: usize) -> $bloom<S> {
                let num_bits = optimal_num_bits(expected_num_items, self.desired_fp_rate);
                let num_hashes = optimal_num_hashes(self.desired_fp_rate);
                $bloom::from_parts(num_bits, num_hashes, self.hasher)
            }

            #[doc = concat!("\"Consumes\" this builder and constructs a [`", stringify!($bloom), "`] containing")]
            /// all keys in `items`, sized for `items.len()` keys at the target false positive rate.
            pub fn items<I: IntoIterator<IntoIter = impl ExactSizeIterator<Item = impl AsRef<[u8]>>>>(
                self,
                items: I,
            ) -> $bloom<S> {
                let into_iter = items.into_iter();
                let mut filter = self.expected_items(into_iter.len());
                filter.extend(into_iter);
                filter
            }
        }
    };
}

builder_with_fp!(BuilderWithFalsePositiveRate, BloomFilter);
builder_with_fp!(PartitionedBuilderWithFalsePositiveRate, PartitionedBloomFilter);

/// The optimal number of hashes for `num_items` keys in `num_bits` bits, between 1
/// and `num_bits`. An empty filter is sized as if it expected one key.
/// Proof: <https://gopiandcode.uk/logs/log-bloomfilters-debunked.html>.
#[inline]
fn optimal_hashes_f(num_bits: usize, num_items: usize) -> usize {
    let hashes = LN_2 * num_bits as f64 / max(num_items, 1) as f64;
    (hashes as usize).clamp(1, num_bits)
}

/// The number of bits needed to hold `num_items` keys at false positive rate `fp_rate`.
pub fn optimal_num_bits(num_items: usize, fp_rate: f64) -> usize {
    let bits_per_item = (ln(FILL_RATIO) * ln(1.0 - FILL_RATIO)) / -ln(fp_rate);
    max(ceil(num_items as f64 / bits_per_item) as usize, 1)
}

/// The number of hashes that reaches false positive rate `fp_rate`.
pub fn optimal_num_hashes(fp_rate: f64) -> usize {
    ceil(log2(1.0 / fp_rate)) as usize
}
