//! Host mirror of the device scan: same blocking, same saturation.

use kernel::WORKGROUP_SIZE;

const BLOCK: usize = WORKGROUP_SIZE as usize;

/// In-place inclusive scan with saturating addition.
pub fn inclusive_scan(data: &mut [u32]) {
    if data.is_empty() {
        return;
    }

    let mut block_sums = Vec::with_capacity(data.len().div_ceil(BLOCK));
    for block in data.chunks_mut(BLOCK) {
        let mut acc = 0u32;
        for value in block.iter_mut() {
            acc = acc.saturating_add(*value);
            *value = acc;
        }
        block_sums.push(acc);
    }

    if block_sums.len() == 1 {
        return;
    }
    inclusive_scan(&mut block_sums);

    for (b, block) in data.chunks_mut(BLOCK).enumerate().skip(1) {
        let offset = block_sums[b - 1];
        for value in block.iter_mut() {
            *value = value.saturating_add(offset);
        }
    }
}

/// Exclusive offsets of `counts` plus their total, laid out like the device
/// buffer: `N + 1` elements where element `i` is the offset of entry `i` and
/// element `N` is the total.
pub fn offsets_and_total(counts: &[u32]) -> (Vec<u32>, u32) {
    let mut cum = Vec::with_capacity(counts.len() + 1);
    cum.push(0);
    cum.extend_from_slice(counts);
    inclusive_scan(&mut cum);
    let total = cum[counts.len()];
    (cum, total)
}
