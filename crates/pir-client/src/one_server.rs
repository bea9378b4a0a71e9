//! Single-server client
//!
//! The client streams the whole database once during the offline phase and
//! builds both its primary hints and a pool of `M/2` backup hints. Each query
//! consumes one primary slot and refills it from the next backup, so the
//! session serves a bounded number of queries before a new offline phase is
//! needed.

use crate::error::{ClientError, Result};
use crate::hint_store::{read_bincode, write_bincode, BackupHint, BackupPool, HintStore};
use crate::query::{QueryEngine, SlotState, Target};
use pir_core::hint::xor_into;
use pir_core::prf::{Mode, SELECT_LANES};
use pir_core::{
    find_cutoff, DummyStream, Hint, OnlineServer, Orientation, Params, Prf, Storage,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted client state, including the unspent backups
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    params: Params,
    hints: HintStore,
    flips: Vec<bool>,
    backups: BackupPool,
    queries: usize,
    replenished_uses: usize,
    dummies: DummyStream,
}

/// Client for the single-server variant
pub struct OneServerClient {
    engine: QueryEngine,
    hints: HintStore,
    flips: Vec<bool>,
    backups: BackupPool,
    queries: usize,
    replenished_uses: usize,
}

impl OneServerClient {
    /// Client on the public protocol key, seeded from OS entropy
    pub fn new(params: Params) -> Self {
        Self::build(
            params,
            Prf::with_default_key(Orientation::HintMajor),
            ChaCha20Rng::from_entropy(),
        )
    }

    /// Client with deterministic query randomness
    pub fn with_seed(params: Params, seed: u64) -> Self {
        Self::build(
            params,
            Prf::with_default_key(Orientation::HintMajor),
            ChaCha20Rng::seed_from_u64(seed),
        )
    }

    /// Client with an explicit oracle
    pub fn with_prf(params: Params, prf: Prf, seed: u64) -> Result<Self> {
        if prf.orientation() != Orientation::HintMajor {
            return Err(pir_core::Error::InvalidConfiguration(
                "single-server client requires a hint-major PRF".into(),
            )
            .into());
        }
        Ok(Self::build(params, prf, ChaCha20Rng::seed_from_u64(seed)))
    }

    /// Resume a session written by [`OneServerClient::save_session`]
    pub fn resume<P: AsRef<Path>>(prf: Prf, seed: u64, path: P) -> Result<Self> {
        let session: Session = read_bincode(path)?;
        if session.hints.len() != session.params.num_hints
            || session.flips.len() != session.hints.len()
            || session.backups.capacity() != session.params.num_backup_hints
        {
            return Err(ClientError::Serialization(
                "session tables do not match its parameters".into(),
            ));
        }
        let mut client = Self::with_prf(session.params, prf, seed)?;
        client.hints = session.hints;
        client.flips = session.flips;
        client.backups = session.backups;
        client.queries = session.queries;
        client.replenished_uses = session.replenished_uses;
        client.engine.dummies = session.dummies;
        tracing::info!(
            remaining = client.remaining_queries(),
            "Resumed single-server session"
        );
        Ok(client)
    }

    /// Write the full client state, backup pool included, to `path`
    pub fn save_session<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.hints.is_empty() {
            return Err(ClientError::NotInitialized);
        }
        let session = Session {
            params: self.engine.params().clone(),
            hints: self.hints.clone(),
            flips: self.flips.clone(),
            backups: self.backups.clone(),
            queries: self.queries,
            replenished_uses: self.replenished_uses,
            dummies: self.engine.dummies.clone(),
        };
        write_bincode(&session, path)
    }

    fn build(params: Params, prf: Prf, rng: ChaCha20Rng) -> Self {
        Self {
            engine: QueryEngine::new(params, prf, rng),
            hints: HintStore::new(),
            flips: Vec::new(),
            backups: BackupPool::default(),
            queries: 0,
            replenished_uses: 0,
        }
    }

    pub fn params(&self) -> &Params {
        self.engine.params()
    }

    pub fn hints(&self) -> &HintStore {
        &self.hints
    }

    /// Per-slot cutoff flips
    pub fn flips(&self) -> &[bool] {
        &self.flips
    }

    pub fn backups(&self) -> &BackupPool {
        &self.backups
    }

    /// Queries answered since the last offline phase
    pub fn queries_made(&self) -> usize {
        self.queries
    }

    /// Queries answered by a hint that came from the backup pool
    pub fn replenished_hint_uses(&self) -> usize {
        self.replenished_uses
    }

    /// Queries left before the backup pool runs dry
    pub fn remaining_queries(&self) -> usize {
        self.backups.remaining()
    }

    /// Build primary and backup hints by streaming `storage` once
    pub fn offline<S: Storage + ?Sized>(&mut self, storage: &S) -> Result<()> {
        let params = self.engine.params().clone();
        storage.check_params(&params)?;

        let num_hints = params.num_hints;
        let total = num_hints + params.num_backup_hints;
        let cutoffs = self.compute_cutoffs(total as u32);

        // Primary hints: extra pair outside the selected half
        let mut hints = Vec::with_capacity(num_hints);
        for (hint_id, &cutoff) in cutoffs[..num_hints].iter().enumerate() {
            let hint_id = hint_id as u32;
            if cutoff == pir_core::INVALID_CUTOFF {
                hints.push(Hint::invalid(hint_id, params.words));
                continue;
            }
            let (extra_partition, extra_offset) = self.sample_extra(hint_id, cutoff);
            hints.push(Hint {
                hint_id,
                cutoff,
                extra_partition,
                extra_offset,
                parity: vec![0u64; params.words],
            });
        }

        let mut backups: Vec<BackupHint> = cutoffs[num_hints..]
            .iter()
            .enumerate()
            .map(|(q, &cutoff)| BackupHint {
                hint_id: (num_hints + q) as u32,
                cutoff,
                parities: [vec![0u64; params.words], vec![0u64; params.words]],
            })
            .collect();

        self.stream_partitions(storage, &cutoffs, &mut hints, &mut backups)?;

        self.hints = HintStore::from_hints(hints);
        self.flips = vec![false; num_hints];
        self.backups = BackupPool::new(backups);
        self.queries = 0;
        self.replenished_uses = 0;

        tracing::info!(
            "Offline phase complete: {} hints ({} valid), {} backup queries available",
            num_hints,
            self.hints.valid_count(),
            self.backups.remaining()
        );
        Ok(())
    }

    /// Cutoffs for hint IDs `0..total`, four hints per PRF block
    fn compute_cutoffs(&self, total: u32) -> Vec<u32> {
        let prf = self.engine.prf();
        let part_num = self.engine.params().part_num;
        let lanes = SELECT_LANES as usize;

        let mut cutoffs: Vec<u32> = (0..total.div_ceil(SELECT_LANES))
            .into_par_iter()
            .map_init(
                || vec![Vec::with_capacity(part_num as usize); lanes],
                |rows, group| {
                    rows.iter_mut().for_each(Vec::clear);
                    for k in 0..part_num {
                        let values = prf.evaluate_u32(group, k, Mode::Select);
                        for (row, value) in rows.iter_mut().zip(values) {
                            row.push(value);
                        }
                    }
                    rows.iter().map(|row| find_cutoff(row)).collect::<Vec<_>>()
                },
            )
            .collect::<Vec<_>>()
            .concat();
        cutoffs.truncate(total as usize);
        cutoffs
    }

    /// Rejection-sample an extra partition outside the selected half
    fn sample_extra(&mut self, hint_id: u32, cutoff: u32) -> (u32, u32) {
        let engine = &mut self.engine;
        let p = &engine.params;
        let partition = loop {
            let candidate = engine.dummies.next(&engine.prf) as u32 % p.part_num;
            if !engine.prf.select(hint_id, candidate, cutoff) {
                break candidate;
            }
        };
        let offset = engine.dummies.next(&engine.prf) as u32 % p.part_size;
        (partition, offset)
    }

    /// Fold every partition of `storage` into the primary and backup parities
    fn stream_partitions<S: Storage + ?Sized>(
        &self,
        storage: &S,
        cutoffs: &[u32],
        hints: &mut [Hint],
        backups: &mut [BackupHint],
    ) -> Result<()> {
        let p = self.engine.params();
        let prf = self.engine.prf();
        let words = p.words;
        let mask = p.offset_mask();
        let num_hints = hints.len();

        let mut partition = vec![0u64; p.part_size as usize * words];
        let mut selects = Vec::with_capacity(cutoffs.len());
        let mut offsets = Vec::with_capacity(cutoffs.len());

        for k in 0..p.part_num {
            for (o, entry) in partition.chunks_exact_mut(words).enumerate() {
                storage.read_entry(p.index_of(k, o as u32), entry)?;
            }
            prf.partition_select_values(k, cutoffs.len() as u32, &mut selects);
            prf.partition_offsets(k, cutoffs.len() as u32, &mut offsets);
            let entry_at = |o: u32| &partition[o as usize * words..(o as usize + 1) * words];

            hints.par_iter_mut().enumerate().for_each(|(i, hint)| {
                if !hint.is_valid() {
                    return;
                }
                if selects[i] < hint.cutoff {
                    xor_into(&mut hint.parity, entry_at(offsets[i] as u32 & mask));
                } else if k == hint.extra_partition {
                    xor_into(&mut hint.parity, entry_at(hint.extra_offset));
                }
            });

            backups.par_iter_mut().enumerate().for_each(|(q, backup)| {
                if !backup.is_valid() {
                    return;
                }
                let i = num_hints + q;
                let selected = selects[i] < backup.cutoff;
                xor_into(
                    &mut backup.parities[usize::from(selected)],
                    entry_at(offsets[i] as u32 & mask),
                );
            });

            if k > 0 && k % 256 == 0 {
                tracing::debug!("Streamed {}/{} partitions", k, p.part_num);
            }
        }
        Ok(())
    }

    /// Privately fetch entry `index`, then refill the consumed slot from the backup pool
    pub fn query<O: OnlineServer + ?Sized>(&mut self, server: &O, index: u64) -> Result<Vec<u64>> {
        if self.hints.is_empty() {
            return Err(ClientError::NotInitialized);
        }
        let num_entries = self.engine.params().num_entries;
        let folded = if index >= num_entries { index - num_entries } else { index };
        if folded >= num_entries {
            return Err(ClientError::QueryOutOfRange { index, num_entries });
        }
        let target = Target::new(self.engine.params(), folded)?;

        if self.backups.next_available().is_none() {
            return Err(ClientError::BackupPoolExhausted {
                capacity: self.backups.capacity(),
            });
        }

        let slot = self
            .engine
            .locate(&self.hints, target, |slot| self.slot_state(slot))?;
        let state = self.slot_state(slot);
        let used_id = self.hints.as_slice()[slot].hint_id;

        let result = match self
            .engine
            .execute(server, &self.hints.as_slice()[slot], state, target)
        {
            Ok(entry) => self.replenish(slot, target, &entry).map(|()| entry),
            Err(err) => Err(err),
        };
        match &result {
            Ok(_) => {
                if used_id as usize >= self.engine.params().num_hints {
                    self.replenished_uses += 1;
                }
                self.queries += 1;
            }
            Err(err) => {
                // The hint was already sent; it must not answer again
                self.hints.retire(slot);
                tracing::warn!(slot, hint_id = used_id, %err, "Query failed, slot retired");
            }
        }
        result
    }

    fn slot_state(&self, slot: usize) -> SlotState {
        SlotState {
            indicator: true,
            flip_cutoff: self.flips[slot],
        }
    }

    fn replenish(&mut self, slot: usize, target: Target, entry: &[u64]) -> Result<()> {
        let backup = self
            .backups
            .take_next()
            .ok_or(ClientError::BackupPoolExhausted {
                capacity: self.backups.capacity(),
            })?;

        // Flip so the query partition lands outside the new subset
        let flip = self
            .engine
            .prf()
            .select(backup.hint_id, target.partition, backup.cutoff);
        let [unselected, selected] = backup.parities;
        let mut parity = if flip { unselected } else { selected };
        xor_into(&mut parity, entry);

        self.hints.replace(
            slot,
            Hint {
                hint_id: backup.hint_id,
                cutoff: backup.cutoff,
                extra_partition: target.partition,
                extra_offset: target.offset,
                parity,
            },
        );
        self.flips[slot] = flip;
        tracing::debug!(slot, hint_id = backup.hint_id, flip, "Replenished slot from backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pir_core::{InMemoryStorage, INVALID_CUTOFF};
    use pir_server::Responder;

    fn setup(log_n: u32, lambda: u32, seed: u64) -> (Responder<InMemoryStorage>, OneServerClient) {
        let params = Params::with_lambda(log_n, 16, lambda).unwrap();
        let db = InMemoryStorage::init(&params, &mut ChaCha20Rng::seed_from_u64(seed));
        let mut client = OneServerClient::with_seed(params.clone(), seed);
        client.offline(&db).unwrap();
        (Responder::new(db, params).unwrap(), client)
    }

    /// Parity recomputed from scratch using the membership rule
    fn expected_parity(client: &OneServerClient, storage: &InMemoryStorage, slot: usize) -> Vec<u64> {
        let p = client.params();
        let prf = client.engine.prf();
        let hint = client.hints().get(slot).unwrap();
        let flip = client.flips()[slot];
        let mut parity = storage
            .get(p.index_of(hint.extra_partition, hint.extra_offset))
            .unwrap();
        for k in 0..p.part_num {
            if k != hint.extra_partition && prf.select(hint.hint_id, k, hint.cutoff) ^ flip {
                let off = prf.offset(hint.hint_id, k) as u32 & p.offset_mask();
                xor_into(&mut parity, &storage.get(p.index_of(k, off)).unwrap());
            }
        }
        parity
    }

    #[test]
    fn test_cutoffs_match_point_evaluation() {
        let params = Params::with_lambda(6, 8, 2).unwrap();
        let client = OneServerClient::with_seed(params.clone(), 0);
        // Not a multiple of the lane width
        let cutoffs = client.compute_cutoffs(23);
        assert_eq!(cutoffs.len(), 23);
        let mut row = Vec::new();
        for (hint_id, &cutoff) in cutoffs.iter().enumerate() {
            client
                .engine
                .prf()
                .hint_select_values(hint_id as u32, params.part_num, &mut row);
            assert_eq!(cutoff, find_cutoff(&row));
        }
    }

    #[test]
    fn test_offline_parities() {
        let (responder, client) = setup(6, 4, 9);
        let p = client.params().clone();
        assert_eq!(client.hints().len(), p.num_hints);
        assert_eq!(client.backups().capacity(), p.num_backup_hints);

        for slot in 0..client.hints().len() {
            let hint = client.hints().get(slot).unwrap();
            assert_eq!(hint.hint_id as usize, slot);
            if hint.is_valid() {
                assert_eq!(hint.parity, expected_parity(&client, responder.storage(), slot));
            }
        }
    }

    #[test]
    fn test_offline_backup_halves() {
        let (responder, client) = setup(6, 4, 4);
        let p = client.params().clone();
        let prf = client.engine.prf();
        let mut pool = client.backups().clone();

        let backup = pool.take_next().unwrap();
        assert_eq!(backup.hint_id as usize, p.num_hints);
        let mut halves = [vec![0u64; p.words], vec![0u64; p.words]];
        for k in 0..p.part_num {
            let off = prf.offset(backup.hint_id, k) as u32 & p.offset_mask();
            let entry = responder.storage().get(p.index_of(k, off)).unwrap();
            xor_into(&mut halves[usize::from(prf.select(backup.hint_id, k, backup.cutoff))], &entry);
        }
        assert_eq!(backup.parities, halves);
    }

    #[test]
    fn test_queries_and_replenished_parities() {
        let (responder, mut client) = setup(6, 32, 1);
        let n = client.params().num_entries;

        for i in 0..40u64 {
            let index = (i * 7) % n;
            let entry = client.query(&responder, index).unwrap();
            assert_eq!(entry, responder.storage().get(index).unwrap(), "index {index}");
        }
        assert_eq!(client.queries_made(), 40);

        for slot in 0..client.hints().len() {
            if client.hints().get(slot).unwrap().hint_id as usize >= client.params().num_hints {
                assert_eq!(
                    client.hints().get(slot).unwrap().parity,
                    expected_parity(&client, responder.storage(), slot)
                );
            }
        }
    }

    #[test]
    fn test_repeated_query_hits_backup_hint() {
        let (responder, mut client) = setup(6, 32, 2);
        for _ in 0..5 {
            let entry = client.query(&responder, 13).unwrap();
            assert_eq!(entry, responder.storage().get(13).unwrap());
        }
        assert_eq!(client.replenished_hint_uses(), 4);
    }

    #[test]
    fn test_index_folding() {
        let (responder, mut client) = setup(6, 32, 3);
        let n = client.params().num_entries;
        let entry = client.query(&responder, n + 5).unwrap();
        assert_eq!(entry, responder.storage().get(5).unwrap());
        assert!(matches!(
            client.query(&responder, 2 * n),
            Err(ClientError::QueryOutOfRange { index, .. }) if index == 2 * n
        ));
    }

    #[test]
    fn test_pool_exhaustion_leaves_state_intact() {
        let (responder, mut client) = setup(4, 32, 5);
        let budget = client.remaining_queries();
        for i in 0..budget as u64 {
            client.query(&responder, i % 16).unwrap();
        }
        assert_eq!(client.remaining_queries(), 0);

        let hints = client.hints().clone();
        let flips = client.flips().to_vec();
        for _ in 0..2 {
            assert!(matches!(
                client.query(&responder, 0),
                Err(ClientError::BackupPoolExhausted { .. })
            ));
        }
        assert_eq!(client.hints(), &hints);
        assert_eq!(client.flips(), flips.as_slice());
        assert_eq!(client.queries_made(), budget);
    }

    #[test]
    fn test_query_before_offline() {
        let params = Params::with_lambda(6, 8, 2).unwrap();
        let db = InMemoryStorage::from_fn(&params, |i, _| i);
        let responder = Responder::new(db, params.clone()).unwrap();
        let mut client = OneServerClient::with_seed(params, 0);
        assert!(matches!(
            client.query(&responder, 0),
            Err(ClientError::NotInitialized)
        ));
    }

    #[test]
    fn test_offline_rejects_mismatched_storage() {
        let params = Params::with_lambda(6, 8, 2).unwrap();
        let other = Params::with_lambda(8, 8, 2).unwrap();
        let db = InMemoryStorage::from_fn(&other, |i, _| i);
        let mut client = OneServerClient::with_seed(params, 0);
        assert!(matches!(
            client.offline(&db),
            Err(ClientError::Core(pir_core::Error::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn test_rejects_partition_major_prf() {
        let params = Params::with_lambda(6, 8, 2).unwrap();
        let prf = Prf::with_default_key(Orientation::PartitionMajor);
        assert!(OneServerClient::with_prf(params, prf, 0).is_err());
    }

    #[test]
    fn test_invalid_cutoff_constant() {
        let (_, client) = setup(6, 2, 6);
        for hint in client.hints().iter().filter(|h| !h.is_valid()) {
            assert_eq!(hint.cutoff, INVALID_CUTOFF);
            assert!(hint.parity.iter().all(|&w| w == 0));
        }
    }

    #[test]
    fn test_sparse_pool_reports_no_eligible_hint() {
        // lambda = 1 leaves most indices without a covering hint
        let (responder, mut client) = setup(10, 1, 8);
        let (mut answered, mut uncovered) = (0, 0);
        for index in 0..client.params().num_entries {
            let hints = client.hints().clone();
            let flips = client.flips().to_vec();
            let consumed = client.backups().consumed();
            match client.query(&responder, index) {
                Ok(entry) => {
                    assert_eq!(entry, responder.storage().get(index).unwrap());
                    answered += 1;
                }
                Err(ClientError::NoEligibleHint { index: missed }) => {
                    assert_eq!(missed, index);
                    assert_eq!(client.hints(), &hints);
                    assert_eq!(client.flips(), flips.as_slice());
                    assert_eq!(client.backups().consumed(), consumed);
                    uncovered += 1;
                }
                Err(ClientError::BackupPoolExhausted { .. }) => break,
                Err(other) => panic!("unexpected error for index {index}: {other}"),
            }
        }
        assert!(uncovered > 0);
        assert_eq!(client.queries_made(), answered);
    }

    /// Online server that always fails
    struct DownServer;

    impl OnlineServer for DownServer {
        fn answer(
            &self,
            _request: &pir_core::ObliviousRequest,
        ) -> pir_core::Result<pir_core::ObliviousResponse> {
            Err(pir_core::Error::Transport("connection refused".into()))
        }
    }

    #[test]
    fn test_failed_query_retires_slot() {
        let (responder, mut client) = setup(6, 32, 10);
        let target = Target::new(client.params(), 11).unwrap();
        let slot = client
            .engine
            .locate(&client.hints, target, |s| client.slot_state(s))
            .unwrap();
        let hint_id = client.hints().get(slot).unwrap().hint_id;
        let consumed = client.backups().consumed();

        assert!(matches!(
            client.query(&DownServer, 11),
            Err(ClientError::Core(pir_core::Error::Transport(_)))
        ));
        assert!(!client.hints().get(slot).unwrap().is_valid());
        assert_eq!(client.backups().consumed(), consumed);
        assert_eq!(client.queries_made(), 0);
        if let Some(next) = client.engine.find(&client.hints, target, |s| client.slot_state(s)) {
            assert_ne!(next, slot);
            assert_ne!(client.hints().get(next).unwrap().hint_id, hint_id);
        }

        let entry = client.query(&responder, 11).unwrap();
        assert_eq!(entry, responder.storage().get(11).unwrap());
    }

    #[test]
    fn test_session_resume() {
        let (responder, mut client) = setup(6, 32, 12);
        for index in [3u64, 17, 3, 40] {
            client.query(&responder, index).unwrap();
        }
        let file = tempfile::NamedTempFile::new().unwrap();
        client.save_session(file.path()).unwrap();

        let prf = Prf::with_default_key(Orientation::HintMajor);
        let mut resumed = OneServerClient::resume(prf, 99, file.path()).unwrap();
        assert_eq!(resumed.hints(), client.hints());
        assert_eq!(resumed.flips(), client.flips());
        assert_eq!(resumed.backups(), client.backups());
        assert_eq!(resumed.queries_made(), 4);
        assert_eq!(resumed.engine.dummies, client.engine.dummies);

        for index in [3u64, 55, 17] {
            let entry = resumed.query(&responder, index).unwrap();
            assert_eq!(entry, responder.storage().get(index).unwrap());
        }
        assert_eq!(resumed.remaining_queries(), client.remaining_queries() - 3);
    }

    #[test]
    fn test_save_session_before_offline() {
        let params = Params::with_lambda(6, 8, 2).unwrap();
        let client = OneServerClient::with_seed(params, 0);
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            client.save_session(file.path()),
            Err(ClientError::NotInitialized)
        ));
    }
}
