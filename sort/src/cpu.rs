//! Host reference for the device sort. Same digit order, same stability.

use crate::{BIN_COUNT, RADIX_BITS, passes_for_bits};

pub fn radix_argsort(keys: &[u64], values: &[u32], sort_bits: u32) -> (Vec<u64>, Vec<u32>) {
    assert_eq!(keys.len(), values.len());

    let mut src: Vec<(u64, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
    let mut dst = src.clone();

    for pass in 0..passes_for_bits(sort_bits) {
        let shift = pass * RADIX_BITS;
        let digit = |key: u64| ((key >> shift) & (BIN_COUNT as u64 - 1)) as usize;

        let mut offsets = [0usize; BIN_COUNT as usize + 1];
        for &(key, _) in &src {
            offsets[digit(key) + 1] += 1;
        }
        for bin in 0..BIN_COUNT as usize {
            offsets[bin + 1] += offsets[bin];
        }
        for &(key, value) in &src {
            let d = digit(key);
            dst[offsets[d]] = (key, value);
            offsets[d] += 1;
        }
        std::mem::swap(&mut src, &mut dst);
    }

    src.into_iter().unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn sorts_by_low_bits_only() {
        let keys = [0x1_0000_0002, 0x3, 0x2_0000_0001];
        let (sorted, values) = radix_argsort(&keys, &[0, 1, 2], 32);
        // The high word is beyond the sorted bits, so only the low word orders.
        assert_eq!(values, vec![2, 0, 1]);
        assert_eq!(sorted, vec![0x2_0000_0001, 0x1_0000_0002, 0x3]);
    }

    #[test]
    fn matches_stable_std_sort() {
        let mut rng = rand::rng();
        let keys: Vec<u64> = (0..5000)
            .map(|_| (rng.random_range(0..300u64) << 32) | rng.random_range(0..50u64))
            .collect();
        let values: Vec<u32> = (0..keys.len() as u32).collect();

        let (sorted_keys, sorted_values) = radix_argsort(&keys, &values, 32 + 9);

        let mut reference: Vec<(u64, u32)> = keys.iter().copied().zip(values).collect();
        reference.sort_by_key(|&(k, _)| k);
        let (ref_keys, ref_values): (Vec<u64>, Vec<u32>) = reference.into_iter().unzip();
        assert_eq!(sorted_keys, ref_keys);
        assert_eq!(sorted_values, ref_values);
    }

    #[test]
    fn zero_bits_is_identity() {
        let (keys, values) = radix_argsort(&[3, 1, 2], &[0, 1, 2], 0);
        assert_eq!(keys, vec![3, 1, 2]);
        assert_eq!(values, vec![0, 1, 2]);
    }
}
