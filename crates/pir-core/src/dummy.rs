//! Stream of pseudorandom decoy values
//!
//! Every session (a client, or the hint-generating server) owns one cursor.
//! Values are drawn 8 at a time from the PRF in `DummyIndex` mode and are
//! never repeated within a session, since the block counter only moves forward.

use crate::prf::{Mode, Prf, OFFSET_LANES};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyStream {
    used: u64,
    buffer: [u16; OFFSET_LANES as usize],
}

impl DummyStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next raw 16-bit decoy value
    pub fn next(&mut self, prf: &Prf) -> u16 {
        let lane = (self.used % OFFSET_LANES as u64) as usize;
        if lane == 0 {
            let block = self.used / OFFSET_LANES as u64;
            self.buffer = prf.evaluate_u16((block >> 32) as u32, block as u32, Mode::DummyIndex);
        }
        self.used += 1;
        self.buffer[lane]
    }

    /// Next decoy reduced by a power-of-two mask
    #[inline]
    pub fn next_masked(&mut self, prf: &Prf, mask: u32) -> u32 {
        self.next(prf) as u32 & mask
    }

    /// Values drawn so far
    pub fn used(&self) -> u64 {
        self.used
    }
}
