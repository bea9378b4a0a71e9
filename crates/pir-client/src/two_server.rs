//! Two-server client
//!
//! Hints come from a second, non-colluding [`HintServer`]. After every query
//! the consumed slot is refilled with a brand-new hint minted under the next
//! unused hint ID, so the number of queries is bounded only by the 32-bit ID
//! space.

use crate::error::{ClientError, Result};
use crate::hint_store::{read_bincode, write_bincode, HintStore, IndicatorBits};
use crate::query::{QueryEngine, SlotState, Target};
use pir_core::hint::xor_into;
use pir_core::{DummyStream, Hint, HintServer, OnlineServer, Orientation, Params, Prf};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted client state; enough to resume querying without a new offline phase
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    params: Params,
    hints: HintStore,
    indicators: IndicatorBits,
    next_hint_id: u32,
    dummies: DummyStream,
}

/// Client for the two-server variant
pub struct TwoServerClient {
    engine: QueryEngine,
    hints: HintStore,
    indicators: IndicatorBits,
    next_hint_id: u32,
}

impl TwoServerClient {
    /// Client on the public protocol key, seeded from OS entropy
    pub fn new(params: Params) -> Self {
        Self::build(
            params,
            Prf::with_default_key(Orientation::PartitionMajor),
            ChaCha20Rng::from_entropy(),
        )
    }

    /// Client with deterministic query randomness
    pub fn with_seed(params: Params, seed: u64) -> Self {
        Self::build(
            params,
            Prf::with_default_key(Orientation::PartitionMajor),
            ChaCha20Rng::seed_from_u64(seed),
        )
    }

    /// Client with an explicit oracle; it must match the hint server's
    pub fn with_prf(params: Params, prf: Prf, seed: u64) -> Result<Self> {
        if prf.orientation() != Orientation::PartitionMajor {
            return Err(pir_core::Error::InvalidConfiguration(
                "two-server client requires a partition-major PRF".into(),
            )
            .into());
        }
        Ok(Self::build(params, prf, ChaCha20Rng::seed_from_u64(seed)))
    }

    /// Resume a session written by [`TwoServerClient::save_session`].
    ///
    /// `prf` must be keyed like the one the session was created with.
    pub fn resume<P: AsRef<Path>>(prf: Prf, seed: u64, path: P) -> Result<Self> {
        let session: Session = read_bincode(path)?;
        if session.hints.len() != session.params.num_hints
            || session.indicators.len() != session.hints.len()
        {
            return Err(ClientError::Serialization(format!(
                "session holds {} hints and {} indicator bits, expected {}",
                session.hints.len(),
                session.indicators.len(),
                session.params.num_hints
            )));
        }
        let mut client = Self::with_prf(session.params, prf, seed)?;
        client.hints = session.hints;
        client.indicators = session.indicators;
        client.next_hint_id = session.next_hint_id;
        client.engine.dummies = session.dummies;
        tracing::info!(next_hint_id = client.next_hint_id, "Resumed two-server session");
        Ok(client)
    }

    /// Write the full client state to `path`
    pub fn save_session<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.hints.is_empty() {
            return Err(ClientError::NotInitialized);
        }
        let session = Session {
            params: self.engine.params().clone(),
            hints: self.hints.clone(),
            indicators: self.indicators.clone(),
            next_hint_id: self.next_hint_id,
            dummies: self.engine.dummies.clone(),
        };
        write_bincode(&session, path)
    }

    fn build(params: Params, prf: Prf, rng: ChaCha20Rng) -> Self {
        Self {
            engine: QueryEngine::new(params, prf, rng),
            hints: HintStore::new(),
            indicators: IndicatorBits::default(),
            next_hint_id: 0,
        }
    }

    pub fn params(&self) -> &Params {
        self.engine.params()
    }

    pub fn hints(&self) -> &HintStore {
        &self.hints
    }

    pub fn indicators(&self) -> &IndicatorBits {
        &self.indicators
    }

    /// Next hint ID the replenisher will request
    pub fn next_hint_id(&self) -> u32 {
        self.next_hint_id
    }

    /// Fetch the initial pool of `M` hints from the hint server
    pub fn offline<H>(&mut self, hint_server: &mut H) -> Result<()>
    where
        H: HintServer + ?Sized,
    {
        let params = self.engine.params().clone();
        let count = params.num_hints;
        let hints = hint_server.generate_offline_hints(count)?;
        if hints.len() != count {
            return Err(ClientError::InvalidResponse(format!(
                "requested {} hints, received {}",
                count,
                hints.len()
            )));
        }
        if let Some(bad) = hints.iter().find(|h| h.parity.len() != params.words) {
            return Err(ClientError::InvalidResponse(format!(
                "hint {} has a parity of {} words",
                bad.hint_id,
                bad.parity.len()
            )));
        }
        // Hint IDs are PRF labels; slot i must carry ID i
        if let Some((slot, bad)) = hints
            .iter()
            .enumerate()
            .find(|(slot, h)| h.hint_id as usize != *slot)
        {
            return Err(ClientError::InvalidResponse(format!(
                "slot {} holds hint {}",
                slot, bad.hint_id
            )));
        }

        self.hints = HintStore::from_hints(hints);
        // Fresh hints store the parity of their selected half
        self.indicators = IndicatorBits::new(count, true);
        self.next_hint_id = count as u32;

        tracing::info!(
            "Offline phase complete: {} hints ({} valid)",
            count,
            self.hints.valid_count()
        );
        Ok(())
    }

    fn slot_state(&self, slot: usize) -> SlotState {
        SlotState {
            indicator: self.indicators.get(slot),
            flip_cutoff: false,
        }
    }

    /// Privately fetch entry `index`, then refill the consumed slot.
    ///
    /// If the query or the refill fails after the hint was sent, the slot is
    /// retired so the hint is never used twice.
    pub fn query<O, H>(&mut self, online: &O, hint_server: &H, index: u64) -> Result<Vec<u64>>
    where
        O: OnlineServer + ?Sized,
        H: HintServer + ?Sized,
    {
        if self.hints.is_empty() {
            return Err(ClientError::NotInitialized);
        }
        let target = Target::new(self.engine.params(), index)?;
        let slot = self
            .engine
            .locate(&self.hints, target, |slot| self.slot_state(slot))?;
        let state = self.slot_state(slot);

        let result = match self
            .engine
            .execute(online, &self.hints.as_slice()[slot], state, target)
        {
            Ok(entry) => self
                .replenish(hint_server, slot, target, &entry)
                .map(|()| entry),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            let retired = self.hints.retire(slot);
            tracing::warn!(slot, hint_id = retired.hint_id, %err, "Query failed, slot retired");
        }
        result
    }

    /// Overwrite `slot` with a new hint whose extra entry is the one just read
    fn replenish<H>(
        &mut self,
        hint_server: &H,
        slot: usize,
        target: Target,
        entry: &[u64],
    ) -> Result<()>
    where
        H: HintServer + ?Sized,
    {
        let words = self.engine.params().words;
        loop {
            let hint_id = self.next_hint_id;
            self.next_hint_id = hint_id
                .checked_add(1)
                .ok_or(ClientError::HintIdSpaceExhausted)?;

            let fresh = hint_server.replenish_hint(hint_id)?;
            if fresh.parities.iter().any(|p| p.len() != words) {
                return Err(ClientError::InvalidResponse(format!(
                    "replenished hint {hint_id} has mismatched parity width"
                )));
            }
            if fresh.cutoff == pir_core::INVALID_CUTOFF {
                tracing::warn!(hint_id, "Skipping replenished hint with no valid cutoff");
                continue;
            }

            // The query partition must fall outside the new subset
            let indicator = !self
                .engine
                .prf()
                .select(hint_id, target.partition, fresh.cutoff);
            let [unselected, selected] = fresh.parities;
            let mut parity = if indicator { selected } else { unselected };
            xor_into(&mut parity, entry);

            self.hints.replace(
                slot,
                Hint {
                    hint_id,
                    cutoff: fresh.cutoff,
                    extra_partition: target.partition,
                    extra_offset: target.offset,
                    parity,
                },
            );
            self.indicators.set(slot, indicator);
            tracing::debug!(slot, hint_id, indicator, "Replenished slot");
            return Ok(());
        }
    }
}
