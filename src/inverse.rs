use crate::{
    codec::{expect_field, log_rejected, Family, FilterBytes, FilterSlice},
    error::{DecodeError, SizeError, MAX_SIZE},
    hasher::HashKernel,
    BuildHasher, DefaultHasher, Filter,
};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use arc_swap::{ArcSwapOption, Guard};
use core::fmt;

type Key = Arc<Box<[u8]>>;
type Slot = ArcSwapOption<Box<[u8]>>;

/// An Inverse Bloom Filter, also known as the "Opposite of a Bloom filter":
/// <https://www.somethingsimilar.com/2012/05/21/the-opposite-of-a-bloom-filter/>.
///
/// Where a Bloom filter may report false positives but never false negatives, this
/// filter may report false negatives but never false positives. It is a fixed
/// array of slots, each remembering the last key hashed to it. A key is reported
/// as seen only if its slot still holds exactly that key, so a colliding key
/// makes the filter forget, but it never claims to have seen a key it has not.
///
/// Every operation takes `&self` and is lock-free: each slot holds a
/// reference-counted key that is replaced with an atomic compare-and-swap, so a
/// reader always sees a complete key and a replaced key is freed once its last
/// reader lets go of it. Share it between threads with an `Arc` or a scoped borrow.
///
/// # Examples
/// ```
/// use streambloom::InverseBloomFilter;
///
/// let filter = InverseBloomFilter::new(1000).unwrap();
/// assert_eq!(filter.size(), 1024);
/// assert!(!filter.observe(b"request-7"));
/// assert!(filter.observe(b"request-7"));
/// ```
pub struct InverseBloomFilter<S = DefaultHasher> {
    slots: Box<[Slot]>,
    size_mask: u32,
    hasher: S,
}

impl InverseBloomFilter {
    /// Creates a filter with `size` slots, rounded up to the next power of two.
    ///
    /// # Errors
    /// Fails if `size` is 0 or greater than [`MAX_SIZE`].
    pub fn new(size: usize) -> Result<Self, SizeError> {
        Self::with_hasher(size, DefaultHasher::default())
    }

    /// Decodes a filter written by [`to_bytes`](Self::to_bytes), hashing with FNV.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        log_rejected(Self::decode_new(bytes))
    }

    fn decode_new(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Inverse)?;
        let size = reader.read_usize("size")?;
        if size == 0 || size > MAX_SIZE || !size.is_power_of_two() {
            return Err(DecodeError::InvalidConfig {
                field: "size",
                value: size as u64,
            });
        }
        let keys = read_slots(&mut reader, size)?;
        reader.finish()?;
        let filter = Self::new(size).map_err(|_| DecodeError::InvalidConfig {
            field: "size",
            value: size as u64,
        })?;
        filter.load(keys);
        Ok(filter)
    }
}

impl<S: BuildHasher> InverseBloomFilter<S> {
    /// Creates a filter with `size` slots, rounded up to the next power of two, that
    /// hashes keys with `hasher`. Only the low 32 bits of each hash pick the slot.
    ///
    /// # Errors
    /// Fails if `size` is 0 or greater than [`MAX_SIZE`].
    pub fn with_hasher(size: usize, hasher: S) -> Result<Self, SizeError> {
        if size > MAX_SIZE {
            return Err(SizeError::TooLarge(size));
        }
        if size == 0 {
            return Err(SizeError::TooSmall);
        }
        let rounded = size.next_power_of_two();
        log::trace!("inverse filter with {rounded} slots ({size} requested)");
        Ok(Self {
            slots: (0..rounded).map(|_| ArcSwapOption::empty()).collect(),
            size_mask: (rounded - 1) as u32,
            hasher,
        })
    }

    /// Returns the number of slots, always a power of two.
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of distinct keys the filter can remember at once, which
    /// is its [`size`](Self::size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size()
    }

    #[inline]
    fn slot(&self, key: &[u8]) -> &Slot {
        let index = HashKernel::new(&self.hasher, key).hash32() & self.size_mask;
        &self.slots[index as usize]
    }

    /// Marks `key` as seen and returns whether it was seen before.
    ///
    /// False negatives are possible: a key is forgotten as soon as a colliding key
    /// is observed. False positives are not: a true result means the slot really
    /// held these exact bytes.
    pub fn observe(&self, key: &[u8]) -> bool {
        let previous = replace(self.slot(key), Some(Arc::new(Box::from(key))));
        previous.is_some_and(|prev| **prev == *key)
    }

    /// Tests whether `key` is the current occupant of its slot, without modifying
    /// the filter.
    pub fn test(&self, key: &[u8]) -> bool {
        self.slot(key)
            .load()
            .as_deref()
            .is_some_and(|cur| **cur == *key)
    }

    /// Marks `key` as seen. Returns the filter to allow chaining.
    pub fn add(&self, key: &[u8]) -> &Self {
        self.observe(key);
        self
    }

    /// Identical to [`observe`](Self::observe).
    pub fn test_and_add(&self, key: &[u8]) -> bool {
        self.observe(key)
    }

    /// Empties every slot. Each slot is cleared atomically, but concurrent
    /// observers may refill some slots before the reset finishes.
    pub fn reset(&self) -> &Self {
        for slot in self.slots.iter() {
            replace(slot, None);
        }
        self
    }

    /// Encodes the size and a snapshot of every slot.
    ///
    /// Slots are read one at a time, so the snapshot is only consistent if no other
    /// thread is observing keys.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = FilterBytes::new(Family::Inverse, 8 + self.size());
        w.write_u64(self.size() as u64);
        for slot in self.slots.iter() {
            match slot.load().as_deref() {
                Some(key) => {
                    w.write_u8(1);
                    w.write_buffer(key);
                }
                None => w.write_u8(0),
            }
        }
        w.into_bytes()
    }

    /// Replaces every slot with the keys encoded by [`to_bytes`](Self::to_bytes).
    ///
    /// Fails without modifying the filter if the encoded size differs from this
    /// filter's.
    pub fn decode(&self, bytes: &[u8]) -> Result<(), DecodeError> {
        log_rejected(self.decode_inner(bytes))
    }

    fn decode_inner(&self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = FilterSlice::new(bytes, Family::Inverse)?;
        expect_field("size", self.size() as u64, reader.read_u64("size")?)?;
        let keys = read_slots(&mut reader, self.size())?;
        reader.finish()?;
        self.load(keys);
        Ok(())
    }

    fn load(&self, keys: Vec<Option<&[u8]>>) {
        for (slot, key) in self.slots.iter().zip(keys) {
            replace(slot, key.map(|key| Arc::new(Box::from(key))));
        }
    }
}

/// Reads `size` optional keys.
fn read_slots<'a>(
    reader: &mut FilterSlice<'a>,
    size: usize,
) -> Result<Vec<Option<&'a [u8]>>, DecodeError> {
    let mut keys = Vec::new();
    for _ in 0..size {
        match reader.read_u8("slot")? {
            0 => keys.push(None),
            1 => keys.push(Some(reader.read_any_buffer("slot")?)),
            value => {
                return Err(DecodeError::InvalidConfig {
                    field: "slot",
                    value: value as u64,
                })
            }
        }
    }
    Ok(keys)
}

/// Installs `new` in `slot`, retrying the compare-and-swap until it lands, and
/// returns the previous occupant.
fn replace(slot: &Slot, new: Option<Key>) -> Option<Key> {
    let mut current = slot.load_full();
    loop {
        let previous = slot.compare_and_swap(&current, new.clone());
        if same_key(&*previous, &current) {
            return current;
        }
        current = Guard::into_inner(previous);
    }
}

/// Whether two slot readings point at the same allocation.
fn same_key(a: &Option<Key>, b: &Option<Key>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<S> fmt::Debug for InverseBloomFilter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InverseBloomFilter")
            .field("size", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl<S: BuildHasher> Filter for InverseBloomFilter<S> {
    fn add(&mut self, key: &[u8]) -> &mut Self {
        InverseBloomFilter::add(self, key);
        self
    }

    fn test(&self, key: &[u8]) -> bool {
        InverseBloomFilter::test(self, key)
    }

    fn test_and_add(&mut self, key: &[u8]) -> bool {
        InverseBloomFilter::observe(self, key)
    }

    fn reset(&mut self) -> &mut Self {
        InverseBloomFilter::reset(self);
        self
    }
}
