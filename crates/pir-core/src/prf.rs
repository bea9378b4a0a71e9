//! PRF (Pseudorandom Function) for hint subsets
//!
//! Uses AES-128 on a fixed, public key as a deterministic oracle. A single
//! block evaluation yields either 4 selection values (`u32`) or 8 offsets /
//! dummy indices (`u16`), so the oracle is always evaluated in batches.
//!
//! # Orientation
//!
//! The same logical function of `(hint_id, part_id)` can be batched along two
//! axes, and the two choices produce *different* values:
//!
//! - [`Orientation::PartitionMajor`]: one block covers 4 (or 8) consecutive
//!   partitions of a single hint. Used by the two-server variant, whose hot
//!   loops walk all partitions of one hint.
//! - [`Orientation::HintMajor`]: one block covers 4 (or 8) consecutive hints
//!   of a single partition. Used by the single-server variant, which streams
//!   the database one partition at a time.
//!
//! Client and server of a variant must build their oracle with the same
//! orientation; mixing them silently breaks recovery.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use serde::{Deserialize, Serialize};

/// AES-128 key size
pub const KEY_SIZE: usize = 16;

/// Public protocol key
pub const DEFAULT_KEY: [u8; KEY_SIZE] = *b"1234567812345678";

/// Selection values per block
pub const SELECT_LANES: u32 = 4;

/// Offsets / dummy indices per block
pub const OFFSET_LANES: u32 = 8;

/// Domain-separation tag for an evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    DummyIndex = 0,
    Select = 1,
    Offset = 2,
}

/// Batching axis, fixed per variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    PartitionMajor,
    HintMajor,
}

/// Batched PRF oracle
#[derive(Clone)]
pub struct Prf {
    cipher: Aes128,
    orientation: Orientation,
}

impl std::fmt::Debug for Prf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prf")
            .field("orientation", &self.orientation)
            .finish_non_exhaustive()
    }
}

impl Prf {
    pub fn new(key: &[u8; KEY_SIZE], orientation: Orientation) -> Self {
        let cipher = Aes128::new(&GenericArray::from(*key));
        Self { cipher, orientation }
    }

    /// Oracle on the public protocol key
    pub fn with_default_key(orientation: Orientation) -> Self {
        Self::new(&DEFAULT_KEY, orientation)
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Raw block evaluation: `AES_k(word1 || word2 || mode || 0)`
    pub fn evaluate(&self, word1: u32, word2: u32, mode: Mode) -> [u8; 16] {
        let mut input = [0u8; 16];
        input[0..4].copy_from_slice(&word1.to_le_bytes());
        input[4..8].copy_from_slice(&word2.to_le_bytes());
        input[8..12].copy_from_slice(&(mode as u32).to_le_bytes());

        let mut block = GenericArray::from(input);
        self.cipher.encrypt_block(&mut block);

        let mut out = [0u8; 16];
        out.copy_from_slice(&block);
        out
    }

    /// Four `u32` lanes of one block
    pub fn evaluate_u32(&self, word1: u32, word2: u32, mode: Mode) -> [u32; 4] {
        let block = self.evaluate(word1, word2, mode);
        let mut lanes = [0u32; 4];
        for (lane, chunk) in lanes.iter_mut().zip(block.chunks_exact(4)) {
            *lane = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        lanes
    }

    /// Eight `u16` lanes of one block
    pub fn evaluate_u16(&self, word1: u32, word2: u32, mode: Mode) -> [u16; 8] {
        let block = self.evaluate(word1, word2, mode);
        let mut lanes = [0u16; 8];
        for (lane, chunk) in lanes.iter_mut().zip(block.chunks_exact(2)) {
            *lane = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        lanes
    }

    /// Block coordinates and lane of `(hint_id, part_id)` for a given batch width
    #[inline]
    fn locate(&self, hint_id: u32, part_id: u32, width: u32) -> (u32, u32, usize) {
        match self.orientation {
            Orientation::PartitionMajor => (hint_id, part_id / width, (part_id % width) as usize),
            Orientation::HintMajor => (hint_id / width, part_id, (hint_id % width) as usize),
        }
    }

    /// Pseudorandom selection value for `(hint_id, part_id)`
    pub fn select_value(&self, hint_id: u32, part_id: u32) -> u32 {
        let (w1, w2, lane) = self.locate(hint_id, part_id, SELECT_LANES);
        self.evaluate_u32(w1, w2, Mode::Select)[lane]
    }

    /// Whether `part_id` is selected for `hint_id` under `cutoff`
    #[inline]
    pub fn select(&self, hint_id: u32, part_id: u32, cutoff: u32) -> bool {
        self.select_value(hint_id, part_id) < cutoff
    }

    /// Raw (unmasked) offset for `(hint_id, part_id)`
    pub fn offset(&self, hint_id: u32, part_id: u32) -> u16 {
        let (w1, w2, lane) = self.locate(hint_id, part_id, OFFSET_LANES);
        self.evaluate_u16(w1, w2, Mode::Offset)[lane]
    }

    /// Selection values of `hint_id` for partitions `0..part_num`.
    ///
    /// Batched 4-wide under `PartitionMajor`.
    pub fn hint_select_values(&self, hint_id: u32, part_num: u32, out: &mut Vec<u32>) {
        out.clear();
        match self.orientation {
            Orientation::PartitionMajor => {
                for batch in 0..part_num.div_ceil(SELECT_LANES) {
                    out.extend_from_slice(&self.evaluate_u32(hint_id, batch, Mode::Select));
                }
                out.truncate(part_num as usize);
            }
            Orientation::HintMajor => {
                out.extend((0..part_num).map(|k| self.select_value(hint_id, k)));
            }
        }
    }

    /// Raw offsets of `hint_id` for partitions `0..part_num`.
    ///
    /// Batched 8-wide under `PartitionMajor`.
    pub fn hint_offsets(&self, hint_id: u32, part_num: u32, out: &mut Vec<u16>) {
        out.clear();
        match self.orientation {
            Orientation::PartitionMajor => {
                for batch in 0..part_num.div_ceil(OFFSET_LANES) {
                    out.extend_from_slice(&self.evaluate_u16(hint_id, batch, Mode::Offset));
                }
                out.truncate(part_num as usize);
            }
            Orientation::HintMajor => {
                out.extend((0..part_num).map(|k| self.offset(hint_id, k)));
            }
        }
    }

    /// Selection values of hints `0..num_hints` for `part_id`.
    ///
    /// Batched 4-wide under `HintMajor`.
    pub fn partition_select_values(&self, part_id: u32, num_hints: u32, out: &mut Vec<u32>) {
        out.clear();
        match self.orientation {
            Orientation::HintMajor => {
                for batch in 0..num_hints.div_ceil(SELECT_LANES) {
                    out.extend_from_slice(&self.evaluate_u32(batch, part_id, Mode::Select));
                }
                out.truncate(num_hints as usize);
            }
            Orientation::PartitionMajor => {
                out.extend((0..num_hints).map(|j| self.select_value(j, part_id)));
            }
        }
    }

    /// Raw offsets of hints `0..num_hints` for `part_id`.
    ///
    /// Batched 8-wide under `HintMajor`.
    pub fn partition_offsets(&self, part_id: u32, num_hints: u32, out: &mut Vec<u16>) {
        out.clear();
        match self.orientation {
            Orientation::HintMajor => {
                for batch in 0..num_hints.div_ceil(OFFSET_LANES) {
                    out.extend_from_slice(&self.evaluate_u16(batch, part_id, Mode::Offset));
                }
                out.truncate(num_hints as usize);
            }
            Orientation::PartitionMajor => {
                out.extend((0..num_hints).map(|j| self.offset(j, part_id)));
            }
        }
    }
}
