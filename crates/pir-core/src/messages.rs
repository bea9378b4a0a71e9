//! Request/response types and the server-side seams
//!
//! Transport is out of scope: servers are reached through the
//! [`OnlineServer`] and [`HintServer`] traits, which an in-process server
//! implements directly and a networked deployment would implement as RPC stubs.

use crate::hint::Hint;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Oblivious request: one `(selector bit, offset)` pair per partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObliviousRequest {
    pub selector_bits: Vec<bool>,
    pub offsets: Vec<u32>,
}

impl ObliviousRequest {
    pub fn with_capacity(part_num: usize) -> Self {
        Self {
            selector_bits: Vec::with_capacity(part_num),
            offsets: Vec::with_capacity(part_num),
        }
    }

    pub fn push(&mut self, selector: bool, offset: u32) {
        self.selector_bits.push(selector);
        self.offsets.push(offset);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Two XOR accumulators, indexed by selector bit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObliviousResponse {
    pub parity0: Vec<u64>,
    pub parity1: Vec<u64>,
}

impl ObliviousResponse {
    pub fn zeroed(words: usize) -> Self {
        Self {
            parity0: vec![0; words],
            parity1: vec![0; words],
        }
    }

    /// Accumulator for `selector`
    pub fn parity(&self, selector: bool) -> &[u64] {
        if selector {
            &self.parity1
        } else {
            &self.parity0
        }
    }

    pub fn parity_mut(&mut self, selector: bool) -> &mut [u64] {
        if selector {
            &mut self.parity1
        } else {
            &mut self.parity0
        }
    }
}

/// Freshly minted hint from the second server, before the client pins its extra entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishedHint {
    /// `parities[b]` is the XOR over partitions whose selection outcome is `b`
    pub parities: [Vec<u64>; 2],
    pub cutoff: u32,
}

/// Server answering oblivious requests
pub trait OnlineServer {
    fn answer(&self, request: &ObliviousRequest) -> Result<ObliviousResponse>;
}

/// Second, non-colluding server that generates hints (two-server variant)
pub trait HintServer {
    /// Generate hints with IDs `0..count`
    fn generate_offline_hints(&mut self, count: usize) -> Result<Vec<Hint>>;

    /// Mint both parity halves of a new hint
    fn replenish_hint(&self, hint_id: u32) -> Result<ReplenishedHint>;
}
