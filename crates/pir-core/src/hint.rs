//! Hint records and parity arithmetic
//!
//! A hint's parity is the XOR of one database entry from roughly half of
//! the partitions plus one pinned "extra" entry. Entries and parities are
//! `words`-long slices of `u64`.

use crate::cutoff::INVALID_CUTOFF;
use serde::{Deserialize, Serialize};

/// One slot of client state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    /// PRF label, not a memory index
    pub hint_id: u32,
    /// Selection threshold; `INVALID_CUTOFF` marks the slot unusable
    pub cutoff: u32,
    /// Partition of the pinned extra entry
    pub extra_partition: u32,
    /// Offset of the pinned extra entry
    pub extra_offset: u32,
    /// XOR accumulator
    pub parity: Vec<u64>,
}

impl Hint {
    /// A hint whose cutoff selection failed
    pub fn invalid(hint_id: u32, words: usize) -> Self {
        Self {
            hint_id,
            cutoff: INVALID_CUTOFF,
            extra_partition: 0,
            extra_offset: 0,
            parity: vec![0; words],
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.cutoff != INVALID_CUTOFF
    }

    /// Whether this hint pins `(partition, offset)` as its extra entry
    #[inline]
    pub fn pins(&self, partition: u32, offset: u32) -> bool {
        self.extra_partition == partition && self.extra_offset == offset
    }
}

/// XOR src into dst in place
#[inline]
pub fn xor_into(dst: &mut [u64], src: &[u64]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// XOR of two parities
pub fn xor(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = a.to_vec();
    xor_into(&mut out, b);
    out
}

/// Recover the target entry from the live response half and the stored parity
///
/// Every entry other than the target appears in both and cancels.
pub fn recover_entry(response: &[u64], parity: &[u64]) -> Vec<u64> {
    xor(response, parity)
}
