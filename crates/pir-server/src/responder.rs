//! Oblivious responder - splits one entry per partition into two XOR parities
//!
//! The request names one offset in every partition and a selector bit saying
//! which accumulator that entry goes into. The responder learns nothing about
//! which partition the client cares about: every partition is touched exactly
//! once regardless of the query.

use pir_core::hint::xor_into;
use pir_core::{Error, ObliviousRequest, ObliviousResponse, OnlineServer, Params, Result, Storage};
use rayon::prelude::*;

/// Database handle for answering oblivious requests
pub struct Responder<S> {
    storage: S,
    params: Params,
}

impl<S: Storage> Responder<S> {
    /// Create a responder over `storage`, which must match `params`
    pub fn new(storage: S, params: Params) -> Result<Self> {
        storage.check_params(&params)?;
        tracing::info!(
            "Responder ready: {} entries in {} partitions of {}",
            params.num_entries,
            params.part_num,
            params.part_size
        );
        Ok(Self { storage, params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Underlying database
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Entry count
    pub fn entry_count(&self) -> u64 {
        self.params.num_entries
    }

    /// Process a request and return both parities
    pub fn respond(&self, request: &ObliviousRequest) -> Result<ObliviousResponse> {
        self.validate(request)?;
        let words = self.params.words;

        (0..self.params.part_num)
            .into_par_iter()
            .try_fold(
                || (ObliviousResponse::zeroed(words), vec![0u64; words]),
                |(mut response, mut entry), k| {
                    let offset = request.offsets[k as usize];
                    let selector = request.selector_bits[k as usize];
                    self.storage
                        .read_entry(self.params.index_of(k, offset), &mut entry)?;
                    xor_into(response.parity_mut(selector), &entry);
                    Ok::<_, Error>((response, entry))
                },
            )
            .map(|partial| partial.map(|(response, _)| response))
            .try_reduce(
                || ObliviousResponse::zeroed(words),
                |mut a, b| {
                    xor_into(&mut a.parity0, &b.parity0);
                    xor_into(&mut a.parity1, &b.parity1);
                    Ok(a)
                },
            )
    }

    fn validate(&self, request: &ObliviousRequest) -> Result<()> {
        let part_num = self.params.part_num as usize;
        if request.offsets.len() != part_num || request.selector_bits.len() != part_num {
            return Err(Error::MalformedRequest(format!(
                "expected {} partitions, got {} offsets and {} selector bits",
                part_num,
                request.offsets.len(),
                request.selector_bits.len()
            )));
        }
        if let Some((k, &offset)) = request
            .offsets
            .iter()
            .enumerate()
            .find(|(_, &offset)| offset >= self.params.part_size)
        {
            return Err(Error::MalformedRequest(format!(
                "offset {offset} out of range for partition {k}"
            )));
        }
        Ok(())
    }
}

impl<S: Storage> OnlineServer for Responder<S> {
    fn answer(&self, request: &ObliviousRequest) -> Result<ObliviousResponse> {
        self.respond(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pir_core::InMemoryStorage;

    fn test_responder() -> Responder<InMemoryStorage> {
        // 16 entries, 4 partitions of 4, one word each: entry i == i
        let params = Params::new(4, 8).unwrap();
        let db = InMemoryStorage::from_fn(&params, |i, _| i);
        Responder::new(db, params).unwrap()
    }

    #[test]
    fn test_responder_basic() {
        let responder = test_responder();
        assert_eq!(responder.entry_count(), 16);
    }

    #[test]
    fn test_respond_splits_by_selector() {
        let responder = test_responder();
        let request = ObliviousRequest {
            selector_bits: vec![false, true, true, false],
            offsets: vec![1, 2, 3, 0],
        };
        let response = responder.respond(&request).unwrap();
        // partition k offset o -> entry 4k + o
        assert_eq!(response.parity0, vec![1 ^ 12]);
        assert_eq!(response.parity1, vec![6 ^ 11]);
    }

    #[test]
    fn test_all_on_one_side() {
        let responder = test_responder();
        let request = ObliviousRequest {
            selector_bits: vec![true; 4],
            offsets: vec![0, 0, 0, 0],
        };
        let response = responder.answer(&request).unwrap();
        assert_eq!(response.parity0, vec![0]);
        assert_eq!(response.parity1, vec![4 ^ 8 ^ 12]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let responder = test_responder();
        let request = ObliviousRequest {
            selector_bits: vec![false; 3],
            offsets: vec![0; 3],
        };
        assert!(matches!(
            responder.respond(&request),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_offset_out_of_range_rejected() {
        let responder = test_responder();
        let request = ObliviousRequest {
            selector_bits: vec![false; 4],
            offsets: vec![0, 4, 0, 0],
        };
        assert!(matches!(
            responder.respond(&request),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_storage_mismatch_rejected() {
        let params = Params::new(4, 8).unwrap();
        let db = InMemoryStorage::from_words(vec![0; 8], 1).unwrap();
        assert!(Responder::new(db, params).is_err());
    }
}
