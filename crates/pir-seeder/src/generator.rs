//! Hint generation on the second server (two-server variant)
//!
//! The seeder holds its own copy of the database and mints hints on demand:
//! a full pool during the client's offline phase, then one fresh hint per
//! online query. It never sees query indices.

use pir_core::hint::xor_into;
use pir_core::{
    find_cutoff, DummyStream, Hint, HintServer, Orientation, Params, Prf, ReplenishedHint, Result,
    Storage, INVALID_CUTOFF,
};

/// Hint-generating server over `storage`
pub struct HintGenerator<S> {
    storage: S,
    params: Params,
    prf: Prf,
    dummies: DummyStream,
}

impl<S: Storage> HintGenerator<S> {
    /// Generator on the public protocol key
    pub fn new(storage: S, params: Params) -> Result<Self> {
        Self::with_prf(
            storage,
            params,
            Prf::with_default_key(Orientation::PartitionMajor),
        )
    }

    /// Generator with an explicit oracle; it must be partition-major and keyed like the client's
    pub fn with_prf(storage: S, params: Params, prf: Prf) -> Result<Self> {
        storage.check_params(&params)?;
        if prf.orientation() != Orientation::PartitionMajor {
            return Err(pir_core::Error::InvalidConfiguration(
                "two-server hints require a partition-major PRF".into(),
            ));
        }
        Ok(Self {
            storage,
            params,
            prf,
            dummies: DummyStream::new(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Build hint `hint_id` with a freshly sampled extra entry
    fn generate_hint(
        &mut self,
        hint_id: u32,
        selects: &mut Vec<u32>,
        offsets: &mut Vec<u16>,
    ) -> Result<Hint> {
        let p = &self.params;
        self.prf.hint_select_values(hint_id, p.part_num, selects);
        let cutoff = find_cutoff(selects);
        if cutoff == INVALID_CUTOFF {
            return Ok(Hint::invalid(hint_id, p.words));
        }

        // Extra partition must lie outside the selected half
        let extra_partition = loop {
            let candidate = self.dummies.next(&self.prf) as u32 % p.part_num;
            if selects[candidate as usize] >= cutoff {
                break candidate;
            }
        };
        let extra_offset = self.dummies.next(&self.prf) as u32 % p.part_size;

        let mut parity = self
            .storage
            .get(p.index_of(extra_partition, extra_offset))?;

        self.prf.hint_offsets(hint_id, p.part_num, offsets);
        let mask = p.offset_mask();
        for k in 0..p.part_num {
            if selects[k as usize] < cutoff {
                let index = p.index_of(k, offsets[k as usize] as u32 & mask);
                self.storage.xor_entry_into(index, &mut parity)?;
            }
        }

        Ok(Hint {
            hint_id,
            cutoff,
            extra_partition,
            extra_offset,
            parity,
        })
    }
}

impl<S: Storage> HintServer for HintGenerator<S> {
    fn generate_offline_hints(&mut self, count: usize) -> Result<Vec<Hint>> {
        let mut selects = Vec::with_capacity(self.params.part_num as usize);
        let mut offsets = Vec::with_capacity(self.params.part_num as usize);
        let mut hints = Vec::with_capacity(count);
        let mut invalid = 0usize;

        for i in 0..count {
            let hint = self.generate_hint(i as u32, &mut selects, &mut offsets)?;
            invalid += usize::from(!hint.is_valid());
            hints.push(hint);

            if i > 0 && i % 100_000 == 0 {
                tracing::info!("Generated {}/{} hints", i, count);
            }
        }

        tracing::info!("Generated {} hints, {} invalid", count, invalid);
        Ok(hints)
    }

    fn replenish_hint(&self, hint_id: u32) -> Result<ReplenishedHint> {
        let p = &self.params;
        let mut selects = Vec::with_capacity(p.part_num as usize);
        let mut offsets = Vec::with_capacity(p.part_num as usize);
        self.prf.hint_select_values(hint_id, p.part_num, &mut selects);
        self.prf.hint_offsets(hint_id, p.part_num, &mut offsets);
        let cutoff = find_cutoff(&selects);

        let mut parities = [vec![0u64; p.words], vec![0u64; p.words]];
        let mut entry = vec![0u64; p.words];
        let mask = p.offset_mask();
        for k in 0..p.part_num {
            let selected = selects[k as usize] < cutoff;
            let index = p.index_of(k, offsets[k as usize] as u32 & mask);
            self.storage.read_entry(index, &mut entry)?;
            xor_into(&mut parities[usize::from(selected)], &entry);
        }

        tracing::debug!(hint_id, cutoff, "Replenished hint");
        Ok(ReplenishedHint { parities, cutoff })
    }
}
