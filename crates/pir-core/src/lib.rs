//! PIR Core - Shared primitives for stateful sublinear PIR
//!
//! This crate provides:
//! - Database geometry (`Params`) and JSON configuration
//! - AES-based PRF oracle with partition-major / hint-major batching
//! - Cutoff selection for hint subsets
//! - Hint records and XOR parity helpers
//! - The `Storage` collaborator and the server-facing wire types

pub mod config;
pub mod cutoff;
pub mod dummy;
pub mod error;
pub mod hint;
pub mod messages;
pub mod params;
pub mod prf;
pub mod storage;

pub use config::PirConfig;
pub use cutoff::{find_cutoff, INVALID_CUTOFF};
pub use dummy::DummyStream;
pub use error::{Error, Result};
pub use hint::Hint;
pub use messages::{HintServer, ObliviousRequest, ObliviousResponse, OnlineServer, ReplenishedHint};
pub use params::Params;
pub use prf::{Orientation, Prf};
pub use storage::{InMemoryStorage, MmapStorage, Storage};

/// Size of one database word in bytes
pub const WORD_BYTES: usize = 8;

/// Default correctness parameter
pub const DEFAULT_LAMBDA: u32 = 80;
