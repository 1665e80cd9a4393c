use crate::{
    buckets::Buckets,
    builder::{PartitionedBuilderWithBits, PartitionedBuilderWithFalsePositiveRate},
    codec::{expect_field, log_rejected, packed_len, Family, FilterBytes, FilterSlice},
    error::DecodeError,
    hasher::HashKernel,
    math::{ceil, exp},
    BuildHasher, DefaultHasher, Filter,
};
use alloc::vec::Vec;

/// A partitioned Bloom filter.
///
/// The bits are split into `k` partitions of `s = ceil(m / k)` bits and the `i`th
/// hash of a key only ever lands in partition `i`. Every key therefore sets exactly
/// `k` bits, one per partition, which makes the fill ratio of each partition
/// (and so the false positive rate) more predictable than a classic filter's.
///
/// # Examples
/// ```rust
/// use streambloom::PartitionedBloomFilter;
///
/// let mut filter = PartitionedBloomFilter::with_false_pos(0.001).expected_items(1000);
/// assert!(!filter.test_and_add(b"42"));
/// assert!(filter.test(b"42"));
/// ```
#[derive(Debug, Clone)]
pub struct PartitionedBloomFilter<S = DefaultHasher> {
    partitions: Vec<Buckets>,
    partition_size: usize,
    count: usize,
    hasher: S,
}

impl PartitionedBloomFilter {
    /// Creates a new instance of [`PartitionedBuilderWithFalsePositiveRate`] to construct a
    /// `PartitionedBloomFilter` with a target false positive rate of `fp`.
    ///
    /// # Panics
    /// Panics if `fp` is not strictly between 0 and 1.
    pub fn with_false_pos(fp: f64) -> PartitionedBuilderWithFalsePositiveRate {
        assert!(fp > 0.0 && fp < 1.0);
        PartitionedBuilderWithFalsePositiveRate {
            desired_fp_rate: fp,
            hasher: Default::default(),
        }
    }

    /// Creates a new instance of [`PartitionedBuilderWithBits`] to construct a
    /// `PartitionedBloomFilter` with about `num_bits` bits in total.
    ///
    /// # Panics
    /// Panics if `num_bits` is 0.
    pub fn with_num_bits(num_bits: usize) -> PartitionedBuilderWithBits {
        assert!(num_bits > 0);
        PartitionedBuilderWithBits {
            num_bits,
            hasher: Default::default(),
        }
    }

    /// Decodes a filter written by [`to_bytes`](Self::to_bytes), hashing with FNV.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        log_rejected(Self::decode_new(bytes))
    }

    fn decode_new(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Partitioned)?;
        let m = reader.read_usize("num_bits")?;
        let k = reader.read_usize("num_hashes")?;
        let s = reader.read_usize("partition_size")?;
        let count = reader.read_usize("count")?;
        if k == 0 || k > m {
            return Err(DecodeError::InvalidConfig {
                field: "num_hashes",
                value: k as u64,
            });
        }
        expect_field("partition_size", (m as u64).div_ceil(k as u64), s as u64)?;
        let num_bytes = packed_len(s, 1).ok_or(DecodeError::InvalidConfig {
            field: "partition_size",
            value: s as u64,
        })?;
        let mut buffers = Vec::new();
        for _ in 0..k {
            buffers.push(reader.read_buffer("partition", num_bytes)?);
        }
        reader.finish()?;
        let mut filter = Self::with_num_bits(m).hashes(k);
        for (partition, bits) in filter.partitions.iter_mut().zip(buffers) {
            partition.load(bits);
        }
        filter.count = count;
        Ok(filter)
    }
}

impl<S: BuildHasher> PartitionedBloomFilter<S> {
    /// # Panics
    /// Panics if `num_hashes` is 0.
    pub(crate) fn from_parts(num_bits: usize, num_hashes: usize, hasher: S) -> Self {
        assert!(num_hashes > 0, "a partitioned filter needs at least one hash");
        let partition_size = ceil(num_bits as f64 / num_hashes as f64) as usize;
        Self {
            partitions: (0..num_hashes)
                .map(|_| Buckets::new(partition_size, 1))
                .collect(),
            partition_size,
            count: 0,
            hasher,
        }
    }

    /// Returns the total number of bits, `k * s`. This can be slightly more than
    /// the number of bits requested.
    #[inline]
    pub fn num_bits(&self) -> usize {
        self.partition_size * self.partitions.len()
    }

    #[inline]
    pub fn num_hashes(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the number of bits in each partition, `s`.
    #[inline]
    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    /// Returns the number of keys added since construction or the last reset.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the average fraction of set bits over all partitions.
    pub fn fill_ratio(&self) -> f64 {
        let total: f64 = self
            .partitions
            .iter()
            .map(|p| p.count_nonzero() as f64 / self.partition_size as f64)
            .sum();
        total / self.partitions.len() as f64
    }

    /// Returns the expected fraction of set bits after [`count`](Self::count) insertions.
    pub fn estimated_fill_ratio(&self) -> f64 {
        1.0 - exp(-(self.count as f64) / self.partition_size as f64)
    }

    /// Tests whether `key` is possibly in the filter. Never returns false for a key that
    /// was added.
    #[inline]
    pub fn test(&self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let s = self.partition_size;
        self.partitions
            .iter()
            .enumerate()
            .all(|(i, p)| p.get(kernel.index(i, s)) != 0)
    }

    /// Adds `key` to the filter, setting one bit in each partition. Returns the filter
    /// to allow chaining.
    pub fn add(&mut self, key: &[u8]) -> &mut Self {
        let kernel = HashKernel::new(&self.hasher, key);
        let s = self.partition_size;
        for (i, p) in self.partitions.iter_mut().enumerate() {
            p.set(kernel.index(i, s), 1);
        }
        self.count += 1;
        self
    }

    /// Equivalent to [`test`](Self::test) followed by [`add`](Self::add), hashing `key` once.
    pub fn test_and_add(&mut self, key: &[u8]) -> bool {
        let kernel = HashKernel::new(&self.hasher, key);
        let s = self.partition_size;
        let mut member = true;
        for (i, p) in self.partitions.iter_mut().enumerate() {
            let index = kernel.index(i, s);
            member &= p.get(index) != 0;
            p.set(index, 1);
        }
        self.count += 1;
        member
    }

    /// Clears every partition. Returns the filter to allow chaining.
    pub fn reset(&mut self) -> &mut Self {
        self.partitions.iter_mut().for_each(Buckets::reset);
        self.count = 0;
        self
    }

    /// Returns the partitions, in hash order.
    #[inline]
    pub fn partitions(&self) -> &[Buckets] {
        &self.partitions
    }

    /// Encodes the configuration, count and every partition.
    pub fn to_bytes(&self) -> Vec<u8> {
        let per_partition = self.partitions.first().map_or(0, |p| p.as_bytes().len());
        let mut w = FilterBytes::new(
            Family::Partitioned,
            32 + self.partitions.len() * (8 + per_partition),
        );
        w.write_u64(self.num_bits() as u64);
        w.write_u64(self.num_hashes() as u64);
        w.write_u64(self.partition_size as u64);
        w.write_u64(self.count as u64);
        for p in self.partitions.iter() {
            w.write_buffer(p.as_bytes());
        }
        w.into_bytes()
    }

    /// Replaces this filter's partitions and count with ones encoded by
    /// [`to_bytes`](Self::to_bytes).
    ///
    /// Fails without modifying the filter if the encoded configuration differs from
    /// this filter's.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        log_rejected(self.decode_inner(bytes))
    }

    fn decode_inner(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Partitioned)?;
        expect_field("num_bits", self.num_bits() as u64, reader.read_u64("num_bits")?)?;
        expect_field("num_hashes", self.num_hashes() as u64, reader.read_u64("num_hashes")?)?;
        expect_field(
            "partition_size",
            self.partition_size as u64,
            reader.read_u64("partition_size")?,
        )?;
        let count = reader.read_usize("count")?;
        let mut buffers = Vec::with_capacity(self.partitions.len());
        for partition in self.partitions.iter() {
            buffers.push(reader.read_buffer("partition", partition.as_bytes().len())?);
        }
        reader.finish()?;
        for (partition, bits) in self.partitions.iter_mut().zip(buffers) {
            partition.load(bits);
        }
        self.count = count;
        Ok(())
    }
}

impl<S: BuildHasher> Filter for PartitionedBloomFilter<S> {
    fn add(&mut self, key: &[u8]) -> &mut Self {
        PartitionedBloomFilter::add(self, key)
    }

    fn test(&self, key: &[u8]) -> bool {
        PartitionedBloomFilter::test(self, key)
    }

    fn test_and_add(&mut self, key: &[u8]) -> bool {
        PartitionedBloomFilter::test_and_add(self, key)
    }

    fn reset(&mut self) -> &mut Self {
        PartitionedBloomFilter::reset(self)
    }
}

impl<T: AsRef<[u8]>, S: BuildHasher> Extend<T> for PartitionedBloomFilter<S> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for key in iter {
            self.add(key.as_ref());
        }
    }
}

impl<S: BuildHasher> PartialEq for PartitionedBloomFilter<S> {
    fn eq(&self, other: &Self) -> bool {
        self.partitions == other.partitions
    }
}
impl<S: BuildHasher> Eq for PartitionedBloomFilter<S> {}
