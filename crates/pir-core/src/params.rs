//! Database geometry and hint-pool sizing
//!
//! A database of `N = 2^log_n` entries is split into `part_num = 2^floor(log_n/2)`
//! partitions of `part_size = 2^ceil(log_n/2)` entries. Because both are powers
//! of two, `part_num * part_size == N` for every `log_n`, and offsets inside a
//! partition are reduced with a bitmask rather than a modulo.

use crate::{Error, Result, DEFAULT_LAMBDA, WORD_BYTES};
use serde::{Deserialize, Serialize};

/// Largest supported `log_n` (exclusive upper bound is 32)
pub const MAX_LOG_N: u32 = 31;

/// Smallest supported `log_n`; below this there is only one partition
pub const MIN_LOG_N: u32 = 2;

/// Protocol parameters shared by client and servers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// log2 of the number of entries
    pub log_n: u32,
    /// Entry width in bytes
    pub entry_bytes: usize,
    /// Correctness parameter
    pub lambda: u32,
    /// Number of entries `N`
    pub num_entries: u64,
    /// Entry width in 64-bit words (`B`)
    pub words: usize,
    /// Number of partitions
    pub part_num: u32,
    /// Entries per partition
    pub part_size: u32,
    /// Primary hint count `M = lambda * part_size`
    pub num_hints: usize,
    /// Backup hint count (single-server variant), `M / 2`
    pub num_backup_hints: usize,
}

impl Params {
    /// Parameters with the default lambda.
    pub fn new(log_n: u32, entry_bytes: usize) -> Result<Self> {
        Self::with_lambda(log_n, entry_bytes, DEFAULT_LAMBDA)
    }

    pub fn with_lambda(log_n: u32, entry_bytes: usize, lambda: u32) -> Result<Self> {
        if !(MIN_LOG_N..=MAX_LOG_N).contains(&log_n) {
            return Err(Error::InvalidConfiguration(format!(
                "log_n must be in [{MIN_LOG_N}, {MAX_LOG_N}], got {log_n}"
            )));
        }
        if entry_bytes < WORD_BYTES || entry_bytes % WORD_BYTES != 0 {
            return Err(Error::InvalidConfiguration(format!(
                "entry_bytes must be a positive multiple of {WORD_BYTES}, got {entry_bytes}"
            )));
        }
        if lambda == 0 {
            return Err(Error::InvalidConfiguration("lambda must be > 0".into()));
        }

        let part_num = 1u32 << (log_n / 2);
        let part_size = 1u32 << (log_n / 2 + log_n % 2);
        let num_hints = (lambda as usize)
            .checked_mul(part_size as usize)
            .ok_or_else(|| Error::InvalidConfiguration("lambda * part_size overflow".into()))?;
        let total = num_hints + num_hints / 2;
        if total > u32::MAX as usize {
            return Err(Error::InvalidConfiguration(format!(
                "hint pool of {total} does not fit 32-bit hint IDs"
            )));
        }

        Ok(Self {
            log_n,
            entry_bytes,
            lambda,
            num_entries: 1u64 << log_n,
            words: entry_bytes / WORD_BYTES,
            part_num,
            part_size,
            num_hints,
            num_backup_hints: num_hints / 2,
        })
    }

    /// Mask reducing a PRF output to an offset in `[0, part_size)`
    #[inline]
    pub fn offset_mask(&self) -> u32 {
        self.part_size - 1
    }

    /// Partition containing `index`
    #[inline]
    pub fn partition_of(&self, index: u64) -> u32 {
        (index / self.part_size as u64) as u32
    }

    /// Offset of `index` inside its partition
    #[inline]
    pub fn offset_of(&self, index: u64) -> u32 {
        (index & self.offset_mask() as u64) as u32
    }

    /// Global index of `(partition, offset)`
    #[inline]
    pub fn index_of(&self, partition: u32, offset: u32) -> u64 {
        partition as u64 * self.part_size as u64 + offset as u64
    }
}
