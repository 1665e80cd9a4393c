#![allow(rustdoc::bare_urls)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]
#![no_std]

extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

use core::hash::BuildHasher;

mod buckets;
pub use buckets::Buckets;
mod builder;
pub use builder::{
    optimal_num_bits, optimal_num_hashes, BuilderWithBits, BuilderWithFalsePositiveRate,
    PartitionedBuilderWithBits, PartitionedBuilderWithFalsePositiveRate, StableBuilder,
};
mod classic;
pub use classic::BloomFilter;
mod codec;
mod error;
pub use error::{DecodeError, SizeError, MAX_SIZE};
mod hasher;
pub use hasher::{DefaultHasher, RandomHasher};
#[cfg(feature = "std")]
mod inverse;
#[cfg(feature = "std")]
pub use inverse::InverseBloomFilter;
mod math;
mod partitioned;
pub use partitioned::PartitionedBloomFilter;
mod stable;
pub use stable::StableBloomFilter;

/// The operations shared by every filter in this crate.
///
/// Each filter also exposes these as inherent methods; the trait lets code such as
/// a deduplication stage be written once for any of them.
///
/// # Examples
/// ```
/// use streambloom::{BloomFilter, Filter, StableBloomFilter};
///
/// fn dedup<F: Filter>(filter: &mut F, events: &[&str]) -> usize {
///     events
///         .iter()
///         .filter(|e| !filter.test_and_add(e.as_bytes()))
///         .count()
/// }
///
/// let events = ["a", "b", "a", "c", "b"];
/// assert_eq!(dedup(&mut StableBloomFilter::with_defaults(100_000), &events), 3);
/// assert_eq!(dedup(&mut BloomFilter::with_false_pos(0.01).expected_items(100), &events), 3);
/// ```
pub trait Filter {
    /// Records `key`. Returns the filter to allow chaining.
    fn add(&mut self, key: &[u8]) -> &mut Self;

    /// Returns whether `key` is possibly a member, without modifying the filter.
    fn test(&self, key: &[u8]) -> bool;

    /// Returns whether `key` was possibly a member, then records it. Equivalent to
    /// [`test`](Filter::test) followed by [`add`](Filter::add) but hashes once.
    fn test_and_add(&mut self, key: &[u8]) -> bool;

    /// Forgets every key. Returns the filter to allow chaining.
    fn reset(&mut self) -> &mut Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: u32) -> impl Iterator<Item = [u8; 4]> {
        (0..n).map(|i| i.to_be_bytes())
    }

    /// Filters that never evict must never report a false negative.
    fn assert_no_false_negatives<F: Filter>(filter: &mut F) {
        for key in keys(2000) {
            filter.add(&key);
        }
        assert!(keys(2000).all(|key| filter.test(&key)));
        assert!(keys(2000).all(|key| filter.test_and_add(&key)));
    }

    fn assert_reset_forgets<F: Filter>(filter: &mut F) {
        for key in keys(500) {
            filter.add(&key);
        }
        let forgotten = filter.reset();
        assert!(keys(500).all(|key| !forgotten.test(&key)));
    }

    #[test]
    fn no_false_negatives_without_eviction() {
        assert_no_false_negatives(&mut StableBloomFilter::unstable(20_000, 4));
        assert_no_false_negatives(&mut BloomFilter::with_false_pos(0.01).expected_items(2000));
        assert_no_false_negatives(
            &mut PartitionedBloomFilter::with_false_pos(0.01).expected_items(2000),
        );
    }

    #[test]
    fn every_filter_resets() {
        assert_reset_forgets(&mut StableBloomFilter::with_defaults(10_000));
        assert_reset_forgets(&mut BloomFilter::with_num_bits(10_000).hashes(3));
        assert_reset_forgets(&mut PartitionedBloomFilter::with_num_bits(10_000).hashes(3));
        #[cfg(feature = "std")]
        assert_reset_forgets(&mut InverseBloomFilter::new(1024).unwrap());
    }

    #[test]
    fn chained_adds() {
        let mut filter = BloomFilter::with_num_bits(1024).hashes(3);
        Filter::add(&mut filter, b"a").add(b"b").add(b"c");
        assert_eq!(filter.count(), 3);
        assert!(Filter::test(&filter, b"b"));
    }
}
