//! Query construction and execution
//!
//! Shared by both variants. A query consumes one hint: the engine locates
//! an eligible slot, disguises the hint's subset as a request touching every
//! partition once, and recovers the entry from the matching response half.

use crate::error::{ClientError, Result};
use crate::hint_store::HintStore;
use pir_core::hint::recover_entry;
use pir_core::{DummyStream, Hint, ObliviousRequest, ObliviousResponse, OnlineServer, Params, Prf};
use rand::Rng;
use rand_chacha::ChaCha20Rng;

/// A query index split into partition and offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub index: u64,
    pub partition: u32,
    pub offset: u32,
}

impl Target {
    pub fn new(params: &Params, index: u64) -> Result<Self> {
        if index >= params.num_entries {
            return Err(ClientError::QueryOutOfRange {
                index,
                num_entries: params.num_entries,
            });
        }
        Ok(Self {
            index,
            partition: params.partition_of(index),
            offset: params.offset_of(index),
        })
    }
}

/// How a slot's PRF selection maps onto its stored parity.
///
/// Partition `k` belongs to the hint's subset when
/// `select(hint, k) ^ flip_cutoff == indicator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    pub indicator: bool,
    pub flip_cutoff: bool,
}

/// Client-side query engine: PRF, decoy stream and query randomness
pub struct QueryEngine {
    pub(crate) params: Params,
    pub(crate) prf: Prf,
    pub(crate) dummies: DummyStream,
    rng: ChaCha20Rng,
    selects: Vec<u32>,
    offsets: Vec<u16>,
}

impl QueryEngine {
    pub fn new(params: Params, prf: Prf, rng: ChaCha20Rng) -> Self {
        let part_num = params.part_num as usize;
        Self {
            params,
            prf,
            dummies: DummyStream::new(),
            rng,
            selects: Vec::with_capacity(part_num),
            offsets: Vec::with_capacity(part_num),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn prf(&self) -> &Prf {
        &self.prf
    }

    /// Whether `hint` can answer `target`
    pub fn is_eligible(&self, hint: &Hint, state: SlotState, target: Target) -> bool {
        if !hint.is_valid() {
            return false;
        }
        if hint.pins(target.partition, target.offset) {
            return true;
        }
        let mask = self.params.offset_mask();
        let offset = self.prf.offset(hint.hint_id, target.partition) as u32 & mask;
        offset == target.offset
            && self.prf.select(hint.hint_id, target.partition, hint.cutoff) ^ state.flip_cutoff
                == state.indicator
    }

    /// First eligible slot, scanning in order
    pub fn find<F>(&self, store: &HintStore, target: Target, state_of: F) -> Option<usize>
    where
        F: Fn(usize) -> SlotState,
    {
        store
            .iter()
            .enumerate()
            .position(|(slot, hint)| self.is_eligible(hint, state_of(slot), target))
    }

    /// Build the disguised request for `hint`.
    ///
    /// Selector bits are XORed with `query_flip`, so which response half
    /// carries the real subset changes from query to query.
    pub fn build_request(
        &mut self,
        hint: &Hint,
        state: SlotState,
        target: Target,
        query_flip: bool,
    ) -> ObliviousRequest {
        let part_num = self.params.part_num;
        let mask = self.params.offset_mask();
        self.prf.hint_select_values(hint.hint_id, part_num, &mut self.selects);
        self.prf.hint_offsets(hint.hint_id, part_num, &mut self.offsets);

        let mut request = ObliviousRequest::with_capacity(part_num as usize);
        for k in 0..part_num {
            if k == target.partition {
                let decoy = self.dummies.next_masked(&self.prf, mask);
                request.push(!state.indicator ^ query_flip, decoy);
            } else if k == hint.extra_partition {
                request.push(state.indicator ^ query_flip, hint.extra_offset);
            } else {
                let member = (self.selects[k as usize] < hint.cutoff) ^ state.flip_cutoff;
                let offset = if member == state.indicator {
                    self.offsets[k as usize] as u32 & mask
                } else {
                    self.dummies.next_masked(&self.prf, mask)
                };
                request.push(member ^ query_flip, offset);
            }
        }
        request
    }

    /// Recover the target entry from `response`
    pub fn recover(
        &self,
        response: &ObliviousResponse,
        hint: &Hint,
        state: SlotState,
        query_flip: bool,
    ) -> Result<Vec<u64>> {
        let words = self.params.words;
        if response.parity0.len() != words || response.parity1.len() != words {
            return Err(ClientError::InvalidResponse(format!(
                "expected parities of {} words, got {} and {}",
                words,
                response.parity0.len(),
                response.parity1.len()
            )));
        }
        Ok(recover_entry(
            response.parity(state.indicator ^ query_flip),
            &hint.parity,
        ))
    }

    /// First eligible slot, or [`ClientError::NoEligibleHint`]
    pub fn locate<F>(&self, store: &HintStore, target: Target, state_of: F) -> Result<usize>
    where
        F: Fn(usize) -> SlotState,
    {
        self.find(store, target, state_of).ok_or(ClientError::NoEligibleHint {
            index: target.index,
        })
    }

    /// Query `server` with `hint` and recover the entry.
    ///
    /// Once this is called the hint has been shown to the server, whether or
    /// not it succeeds; the caller must replace or retire its slot.
    pub fn execute<O>(
        &mut self,
        server: &O,
        hint: &Hint,
        state: SlotState,
        target: Target,
    ) -> Result<Vec<u64>>
    where
        O: OnlineServer + ?Sized,
    {
        tracing::debug!(index = target.index, hint_id = hint.hint_id, "Using hint");
        let query_flip: bool = self.rng.gen();
        let request = self.build_request(hint, state, target, query_flip);
        let response = server.answer(&request)?;
        self.recover(&response, hint, state, query_flip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pir_core::{Orientation, INVALID_CUTOFF};
    use rand::SeedableRng;

    fn engine() -> QueryEngine {
        let params = Params::with_lambda(8, 8, 2).unwrap();
        QueryEngine::new(
            params,
            Prf::with_default_key(Orientation::PartitionMajor),
            ChaCha20Rng::seed_from_u64(1),
        )
    }

    const FRESH: SlotState = SlotState {
        indicator: true,
        flip_cutoff: false,
    };

    #[test]
    fn test_target_bounds() {
        let params = Params::new(4, 8).unwrap();
        let t = Target::new(&params, 9).unwrap();
        assert_eq!((t.partition, t.offset), (2, 1));
        assert!(matches!(
            Target::new(&params, 16),
            Err(ClientError::QueryOutOfRange { index: 16, .. })
        ));
    }

    #[test]
    fn test_extra_entry_is_eligible() {
        let engine = engine();
        let hint = Hint {
            hint_id: 3,
            cutoff: 1,
            extra_partition: 5,
            extra_offset: 7,
            parity: vec![0],
        };
        let target = Target::new(&engine.params, engine.params.index_of(5, 7)).unwrap();
        assert!(engine.is_eligible(&hint, FRESH, target));
    }

    #[test]
    fn test_invalid_hint_never_eligible() {
        let engine = engine();
        let hint = Hint {
            hint_id: 3,
            cutoff: INVALID_CUTOFF,
            extra_partition: 5,
            extra_offset: 7,
            parity: vec![0],
        };
        let target = Target::new(&engine.params, engine.params.index_of(5, 7)).unwrap();
        assert!(!engine.is_eligible(&hint, FRESH, target));
        let store = HintStore::from_hints(vec![hint]);
        assert_eq!(engine.find(&store, target, |_| FRESH), None);
    }

    #[test]
    fn test_prf_member_is_eligible() {
        let engine = engine();
        let p = engine.params.clone();
        let hint_id = 17;
        let mut selects = Vec::new();
        engine.prf.hint_select_values(hint_id, p.part_num, &mut selects);
        let cutoff = pir_core::find_cutoff(&selects);
        assert_ne!(cutoff, INVALID_CUTOFF);

        let k = (0..p.part_num).find(|&k| selects[k as usize] < cutoff).unwrap();
        let off = engine.prf.offset(hint_id, k) as u32 & p.offset_mask();
        let hint = Hint {
            hint_id,
            cutoff,
            extra_partition: (0..p.part_num).find(|&k| selects[k as usize] >= cutoff).unwrap(),
            extra_offset: 0,
            parity: vec![0],
        };
        let target = Target::new(&p, p.index_of(k, off)).unwrap();
        assert!(engine.is_eligible(&hint, FRESH, target));
        // The complementary indicator describes the other half
        let flipped = SlotState {
            indicator: false,
            flip_cutoff: false,
        };
        assert!(!engine.is_eligible(&hint, flipped, target));
    }

    #[test]
    fn test_request_shape() {
        let mut engine = engine();
        let p = engine.params.clone();
        let hint = Hint {
            hint_id: 4,
            cutoff: u32::MAX / 2,
            extra_partition: 2,
            extra_offset: 9,
            parity: vec![0],
        };
        let target = Target::new(&p, p.index_of(6, 3)).unwrap();

        for query_flip in [false, true] {
            let req = engine.build_request(&hint, FRESH, target, query_flip);
            assert_eq!(req.len(), p.part_num as usize);
            assert!(req.offsets.iter().all(|&o| o < p.part_size));
            assert_eq!(req.selector_bits[6], !FRESH.indicator ^ query_flip);
            assert_eq!(req.selector_bits[2], FRESH.indicator ^ query_flip);
            assert_eq!(req.offsets[2], 9);
        }
    }

    #[test]
    fn test_recover_picks_flipped_half() {
        let engine = engine();
        let hint = Hint {
            hint_id: 0,
            cutoff: 1,
            extra_partition: 0,
            extra_offset: 0,
            parity: vec![0b0101],
        };
        let response = ObliviousResponse {
            parity0: vec![0b1111],
            parity1: vec![0b0110],
        };
        assert_eq!(engine.recover(&response, &hint, FRESH, false).unwrap(), vec![0b0011]);
        assert_eq!(engine.recover(&response, &hint, FRESH, true).unwrap(), vec![0b1010]);
    }

    #[test]
    fn test_recover_rejects_short_response() {
        let engine = engine();
        let hint = Hint::invalid(0, 1);
        let response = ObliviousResponse {
            parity0: vec![],
            parity1: vec![1],
        };
        assert!(matches!(
            engine.recover(&response, &hint, FRESH, false),
            Err(ClientError::InvalidResponse(_))
        ));
    }
}
