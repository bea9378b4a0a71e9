//! Local hint storage
//!
//! The pool is a fixed arena of [`Hint`] values addressed by slot number.
//! Slots are never removed: a consumed hint is overwritten in place with its
//! replacement.

use crate::error::{ClientError, Result};
use pir_core::{Hint, INVALID_CUTOFF};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub(crate) fn read_bincode<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let data = std::fs::read(path)?;
    bincode::deserialize(&data).map_err(|e| ClientError::Serialization(e.to_string()))
}

pub(crate) fn write_bincode<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let data = bincode::serialize(value).map_err(|e| ClientError::Serialization(e.to_string()))?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Local hint store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintStore {
    hints: Vec<Hint>,
}

impl HintStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hints(hints: Vec<Hint>) -> Self {
        Self { hints }
    }

    /// Load a hint table written by [`HintStore::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_bincode(path)
    }

    /// Save the hint records alone.
    ///
    /// The file is for inspection: it lacks the per-slot indicator state and
    /// the replenishment cursor. Use the clients' `save_session` to resume.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_bincode(self, path)
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Hint> {
        self.hints.get(slot)
    }

    pub fn as_slice(&self) -> &[Hint] {
        &self.hints
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hint> {
        self.hints.iter()
    }

    /// Overwrite `slot`, returning the hint it held
    pub fn replace(&mut self, slot: usize, hint: Hint) -> Hint {
        std::mem::replace(&mut self.hints[slot], hint)
    }

    /// Invalidate `slot` so no later query can select it
    pub fn retire(&mut self, slot: usize) -> Hint {
        let old = &self.hints[slot];
        let invalid = Hint::invalid(old.hint_id, old.parity.len());
        self.replace(slot, invalid)
    }

    /// Number of usable hints
    pub fn valid_count(&self) -> usize {
        self.hints.iter().filter(|h| h.is_valid()).count()
    }

    /// Total storage size
    pub fn size_bytes(&self) -> usize {
        self.hints
            .iter()
            .map(|h| std::mem::size_of::<Hint>() + h.parity.len() * std::mem::size_of::<u64>())
            .sum()
    }
}

/// One indicator bit per slot, packed eight to a byte
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorBits {
    bits: Vec<u8>,
    len: usize,
}

impl IndicatorBits {
    pub fn new(len: usize, value: bool) -> Self {
        let fill = if value { u8::MAX } else { 0 };
        Self {
            bits: vec![fill; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, slot: usize) -> bool {
        assert!(slot < self.len, "indicator slot {slot} out of range {}", self.len);
        (self.bits[slot / 8] >> (slot % 8)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, slot: usize, value: bool) {
        assert!(slot < self.len, "indicator slot {slot} out of range {}", self.len);
        let mask = 1u8 << (slot % 8);
        if value {
            self.bits[slot / 8] |= mask;
        } else {
            self.bits[slot / 8] &= !mask;
        }
    }
}

/// Precomputed spare hint (single-server variant)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHint {
    pub hint_id: u32,
    pub cutoff: u32,
    /// `parities[b]` is the XOR over partitions whose selection outcome is `b`
    pub parities: [Vec<u64>; 2],
}

impl BackupHint {
    pub fn is_valid(&self) -> bool {
        self.cutoff != INVALID_CUTOFF
    }
}

/// Backup hints consumed in strict order, each at most once.
///
/// The last slot is never handed out: a pool of `capacity` slots serves at
/// most `capacity - 1` replenishments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPool {
    backups: Vec<BackupHint>,
    next: usize,
}

impl BackupPool {
    pub fn new(backups: Vec<BackupHint>) -> Self {
        Self { backups, next: 0 }
    }

    /// Provisioned slots
    pub fn capacity(&self) -> usize {
        self.backups.len()
    }

    /// Slots consumed or skipped so far
    pub fn consumed(&self) -> usize {
        self.next
    }

    /// Slot the next replenishment would use
    pub fn next_available(&self) -> Option<usize> {
        let slot = (self.next..self.backups.len()).find(|&q| self.backups[q].is_valid())?;
        (slot + 1 < self.backups.len()).then_some(slot)
    }

    /// Usable backups left
    pub fn remaining(&self) -> usize {
        let end = self.backups.len().saturating_sub(1);
        (self.next.min(end)..end)
            .filter(|&q| self.backups[q].is_valid())
            .count()
    }

    /// Consume the next valid backup
    pub fn take_next(&mut self) -> Option<BackupHint> {
        let slot = self.next_available()?;
        self.next = slot + 1;
        Some(std::mem::take(&mut self.backups[slot]))
    }
}
