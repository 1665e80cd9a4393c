#[cfg(feature = "serde")]
use crate::codec::packed_len;
use alloc::vec;
use alloc::vec::Vec;

/// A packed array of fixed-width counters.
///
/// Each of the `len` counters is `bits_per_cell` bits wide (1 to 8), so a counter
/// holds values in `0..=2^bits_per_cell - 1`. Counters are laid out back to back,
/// least significant bit first, and may straddle a byte boundary when
/// `bits_per_cell` does not divide 8.
///
/// With one bit per cell this is a plain bit vector.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawBuckets"))]
pub struct Buckets {
    data: Vec<u8>,
    len: usize,
    bits_per_cell: u8,
    max: u8,
}

/// The unchecked shape of serialized [`Buckets`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawBuckets {
    data: Vec<u8>,
    len: usize,
    bits_per_cell: u8,
    max: u8,
}

#[cfg(feature = "serde")]
impl TryFrom<RawBuckets> for Buckets {
    type Error = &'static str;

    fn try_from(raw: RawBuckets) -> Result<Self, Self::Error> {
        if !(1..=8).contains(&raw.bits_per_cell) {
            return Err("bits per cell must be between 1 and 8");
        }
        if raw.max as u16 != (1u16 << raw.bits_per_cell) - 1 {
            return Err("max value does not match bits per cell");
        }
        if packed_len(raw.len, raw.bits_per_cell) != Some(raw.data.len()) {
            return Err("backing bytes do not match the number of cells");
        }
        Ok(Self {
            data: raw.data,
            len: raw.len,
            bits_per_cell: raw.bits_per_cell,
            max: raw.max,
        })
    }
}

impl Buckets {
    /// Returns `len` zeroed counters of `bits_per_cell` bits each.
    ///
    /// # Panics
    /// Panics if `bits_per_cell` is not in `1..=8`.
    pub fn new(len: usize, bits_per_cell: u8) -> Self {
        assert!(
            (1..=8).contains(&bits_per_cell),
            "bits per cell must be between 1 and 8, got {bits_per_cell}"
        );
        let num_bytes = (len * bits_per_cell as usize + 7) / 8;
        Self {
            data: vec![0; num_bytes],
            len,
            bits_per_cell,
            max: ((1u16 << bits_per_cell) - 1) as u8,
        }
    }

    /// The number of counters.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bits_per_cell(&self) -> u8 {
        self.bits_per_cell
    }

    /// The largest value a counter can hold, `2^bits_per_cell - 1`.
    #[inline]
    pub fn max_value(&self) -> u8 {
        self.max
    }

    /// Returns the counter at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        let width = self.bits_per_cell as usize;
        self.get_bits(index * width, width)
    }

    /// Stores `value` at `index`. Bits of `value` above the counter width are dropped.
    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        let width = self.bits_per_cell as usize;
        self.set_bits(index * width, width, value);
    }

    /// Adds `delta` to the counter at `index`, saturating at `0` and [`max_value`](Self::max_value).
    #[inline]
    pub fn increment(&mut self, index: usize, delta: i8) {
        let value = (self.get(index) as i16 + delta as i16).clamp(0, self.max as i16);
        self.set(index, value as u8);
    }

    /// Zeroes every counter.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// The number of counters that are not zero.
    pub fn count_nonzero(&self) -> usize {
        if self.bits_per_cell == 1 {
            return self.data.iter().map(|b| b.count_ones() as usize).sum();
        }
        (0..self.len).filter(|&i| self.get(i) != 0).count()
    }

    /// The raw backing bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites the backing bytes with `bytes`, which must come from
    /// [`as_bytes`](Self::as_bytes) of a store with the same shape.
    pub(crate) fn load(&mut self, bytes: &[u8]) {
        self.data.copy_from_slice(bytes);
    }

    /// Reads `length` bits starting at bit `offset`. `length` is at most 8.
    fn get_bits(&self, offset: usize, length: usize) -> u8 {
        let byte_index = offset / 8;
        let byte_offset = offset % 8;
        if byte_offset + length > 8 {
            let rem = 8 - byte_offset;
            return self.get_bits(offset, rem) | (self.get_bits(offset + rem, length - rem) << rem);
        }
        let mask = ((1u16 << length) - 1) as u8;
        (self.data[byte_index] >> byte_offset) & mask
    }

    /// Writes the low `length` bits of `bits` starting at bit `offset`.
    fn set_bits(&mut self, offset: usize, length: usize, bits: u8) {
        let byte_index = offset / 8;
        let byte_offset = offset % 8;
        if byte_offset + length > 8 {
            let rem = 8 - byte_offset;
            self.set_bits(offset, rem, bits);
            self.set_bits(offset + rem, length - rem, bits >> rem);
            return;
        }
        let mask = (((1u16 << length) - 1) as u8) << byte_offset;
        let byte = &mut self.data[byte_index];
        *byte = (*byte & !mask) | ((bits << byte_offset) & mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_build() {
        for bits in 1..=8u8 {
            let b = Buckets::new(10, bits);
            assert_eq!(b.len(), 10);
            assert_eq!(b.max_value() as u16, (1u16 << bits) - 1);
            assert_eq!(b.as_bytes().len(), (10 * bits as usize + 7) / 8);
            assert!((0..10).all(|i| b.get(i) == 0));
        }
        assert_eq!(Buckets::new(0, 4).as_bytes().len(), 0);
    }

    #[test]
    #[should_panic]
    fn zero_bits_per_cell() {
        Buckets::new(10, 0);
    }

    #[test]
    #[should_panic]
    fn nine_bits_per_cell() {
        Buckets::new(10, 9);
    }

    #[test]
    fn straddling_cells_are_independent() {
        // 3-bit cells: cell 2 covers bits 6..9, across the first byte boundary.
        let mut b = Buckets::new(8, 3);
        b.set(2, 0b101);
        assert_eq!(b.get(1), 0);
        assert_eq!(b.get(2), 0b101);
        assert_eq!(b.get(3), 0);
        assert_eq!(b.as_bytes()[0], 0b0100_0000);
        assert_eq!(b.as_bytes()[1], 0b0000_0001);

        b.set(1, 0b111);
        b.set(3, 0b111);
        b.set(2, 0b010);
        assert_eq!(b.get(1), 0b111);
        assert_eq!(b.get(2), 0b010);
        assert_eq!(b.get(3), 0b111);
    }

    #[test]
    fn set_masks_to_width() {
        let mut b = Buckets::new(4, 2);
        b.set(1, 0xff);
        assert_eq!(b.get(0), 0);
        assert_eq!(b.get(1), 3);
        assert_eq!(b.get(2), 0);
    }

    #[test]
    fn increment_clamps() {
        let mut b = Buckets::new(5, 3);
        b.increment(2, 100);
        assert_eq!(b.get(2), 7);
        b.increment(2, -1);
        assert_eq!(b.get(2), 6);
        b.increment(2, -100);
        assert_eq!(b.get(2), 0);
        b.increment(2, -1);
        assert_eq!(b.get(2), 0);
        assert!([0, 1, 3, 4].iter().all(|&i| b.get(i) == 0));
    }

    #[test]
    fn reset_zeroes_in_place() {
        let mut b = Buckets::new(100, 5);
        for i in 0..100 {
            b.set(i, (i % 32) as u8);
        }
        assert_eq!(b.count_nonzero(), 96);
        let ptr = b.as_bytes().as_ptr();
        b.reset();
        assert_eq!(b.count_nonzero(), 0);
        assert_eq!(ptr, b.as_bytes().as_ptr());
    }

    #[test]
    fn test_only_random_sets_are_stored() {
        let mut rng = StdRng::seed_from_u64(42);
        for bits in 1..=8u8 {
            let len = 1000;
            let mut b = Buckets::new(len, bits);
            let mut control = vec![0u8; len];
            for _ in 0..10_000 {
                let i = rng.random_range(0..len);
                let v = rng.random_range(0..=b.max_value());
                b.set(i, v);
                control[i] = v;
                assert_eq!(b.get(i), v);
            }
            assert!((0..len).all(|i| b.get(i) == control[i]));
            let nonzero = control.iter().filter(|&&v| v != 0).count();
            assert_eq!(b.count_nonzero(), nonzero);
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() {
        let mut before = Buckets::new(77, 3);
        before.set(5, 6);
        before.set(40, 5);
        let s = serde_cbor::to_vec(&before).unwrap();
        let after: Buckets = serde_cbor::from_slice(&s).unwrap();
        assert_eq!(before, after);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_rejects_bad_shapes() {
        #[derive(serde::Serialize)]
        struct Shape {
            data: Vec<u8>,
            len: usize,
            bits_per_cell: u8,
            max: u8,
        }
        let decode = |data: Vec<u8>, len, bits_per_cell, max| {
            let s = serde_cbor::to_vec(&Shape {
                data,
                len,
                bits_per_cell,
                max,
            })
            .unwrap();
            serde_cbor::from_slice::<Buckets>(&s)
        };
        assert!(decode(vec![0; 4], 10, 3, 7).is_ok());
        assert!(decode(vec![0; 3], 10, 3, 7).is_err());
        assert!(decode(vec![0; 4], 10, 3, 15).is_err());
        assert!(decode(vec![0; 0], 10, 0, 0).is_err());
        assert!(decode(vec![0; 12], 10, 9, 255).is_err());
    }

    proptest! {
        #[test]
        fn increments_match_model(
            bits in 1u8..=8,
            ops in proptest::collection::vec((0usize..64, -20i8..20), 0..200),
        ) {
            let mut b = Buckets::new(64, bits);
            let mut model = [0i16; 64];
            let max = b.max_value() as i16;
            for (i, delta) in ops {
                b.increment(i, delta);
                model[i] = (model[i] + delta as i16).clamp(0, max);
            }
            for (i, &expected) in model.iter().enumerate() {
                prop_assert_eq!(b.get(i) as i16, expected);
            }
        }
    }
}
