//! Database storage collaborator
//!
//! The protocol only ever reads whole entries by global index. Entries are
//! `words` little-endian `u64`s; no partial reads and no mutation during a run.

use crate::hint::xor_into;
use crate::{Error, Params, Result, WORD_BYTES};
use memmap2::Mmap;
use rand::Rng;
use std::path::Path;

/// Read-only database of fixed-width entries
pub trait Storage: Sync {
    fn num_entries(&self) -> u64;

    /// Entry width in 64-bit words
    fn words(&self) -> usize;

    /// Copy entry `index` into `out` (`out.len() == words()`)
    fn read_entry(&self, index: u64, out: &mut [u64]) -> Result<()>;

    fn get(&self, index: u64) -> Result<Vec<u64>> {
        let mut entry = vec![0u64; self.words()];
        self.read_entry(index, &mut entry)?;
        Ok(entry)
    }

    /// XOR entry `index` into `acc`
    fn xor_entry_into(&self, index: u64, acc: &mut [u64]) -> Result<()> {
        let entry = self.get(index)?;
        xor_into(acc, &entry);
        Ok(())
    }

    /// Check that this storage has the geometry `params` describe
    fn check_params(&self, params: &Params) -> Result<()> {
        if self.num_entries() != params.num_entries || self.words() != params.words {
            return Err(Error::InvalidConfiguration(format!(
                "storage holds {} entries of {} words, params expect {} of {}",
                self.num_entries(),
                self.words(),
                params.num_entries,
                params.words
            )));
        }
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for &S {
    fn num_entries(&self) -> u64 {
        (**self).num_entries()
    }

    fn words(&self) -> usize {
        (**self).words()
    }

    fn read_entry(&self, index: u64, out: &mut [u64]) -> Result<()> {
        (**self).read_entry(index, out)
    }

    fn xor_entry_into(&self, index: u64, acc: &mut [u64]) -> Result<()> {
        (**self).xor_entry_into(index, acc)
    }
}

#[inline]
fn check_index(index: u64, num_entries: u64) -> Result<()> {
    if index >= num_entries {
        return Err(Error::IndexOutOfRange { index, num_entries });
    }
    Ok(())
}

/// Flat in-memory database
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    words: usize,
    data: Vec<u64>,
}

impl InMemoryStorage {
    /// Wrap a flat word vector of `data.len() / words` entries
    pub fn from_words(data: Vec<u64>, words: usize) -> Result<Self> {
        if words == 0 || data.len() % words != 0 {
            return Err(Error::InvalidConfiguration(format!(
                "{} words do not divide into entries of {words}",
                data.len()
            )));
        }
        Ok(Self { words, data })
    }

    /// Build a database for `params` where word `l` of entry `i` is `f(i, l)`
    pub fn from_fn<F>(params: &Params, f: F) -> Self
    where
        F: Fn(u64, usize) -> u64,
    {
        let words = params.words;
        let mut data = Vec::with_capacity(params.num_entries as usize * words);
        for index in 0..params.num_entries {
            data.extend((0..words).map(|l| f(index, l)));
        }
        Self { words, data }
    }

    /// Random database for `params`
    pub fn init<R: Rng + ?Sized>(params: &Params, rng: &mut R) -> Self {
        let len = params.num_entries as usize * params.words;
        let data = (0..len).map(|_| rng.gen()).collect();
        Self {
            words: params.words,
            data,
        }
    }

    fn entry(&self, index: u64) -> Result<&[u64]> {
        check_index(index, self.num_entries())?;
        let start = index as usize * self.words;
        Ok(&self.data[start..start + self.words])
    }
}

impl Storage for InMemoryStorage {
    fn num_entries(&self) -> u64 {
        (self.data.len() / self.words) as u64
    }

    fn words(&self) -> usize {
        self.words
    }

    fn read_entry(&self, index: u64, out: &mut [u64]) -> Result<()> {
        out.copy_from_slice(self.entry(index)?);
        Ok(())
    }

    fn xor_entry_into(&self, index: u64, acc: &mut [u64]) -> Result<()> {
        xor_into(acc, self.entry(index)?);
        Ok(())
    }
}

/// Memory-mapped database file of little-endian words
pub struct MmapStorage {
    mmap: Mmap,
    words: usize,
    num_entries: u64,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P, words: usize) -> Result<Self> {
        if words == 0 {
            return Err(Error::InvalidConfiguration("entry width must be > 0".into()));
        }
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let entry_bytes = words * WORD_BYTES;
        if mmap.len() % entry_bytes != 0 {
            return Err(Error::InvalidConfiguration(format!(
                "file of {} bytes is not a whole number of {entry_bytes}-byte entries",
                mmap.len()
            )));
        }
        let num_entries = (mmap.len() / entry_bytes) as u64;
        tracing::debug!(num_entries, entry_bytes, "Mapped database file");
        Ok(Self {
            mmap,
            words,
            num_entries,
        })
    }
}

impl Storage for MmapStorage {
    fn num_entries(&self) -> u64 {
        self.num_entries
    }

    fn words(&self) -> usize {
        self.words
    }

    fn read_entry(&self, index: u64, out: &mut [u64]) -> Result<()> {
        check_index(index, self.num_entries)?;
        let entry_bytes = self.words * WORD_BYTES;
        let start = index as usize * entry_bytes;
        let bytes = &self.mmap[start..start + entry_bytes];
        for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
            let mut buf = [0u8; WORD_BYTES];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        Ok(())
    }
}
