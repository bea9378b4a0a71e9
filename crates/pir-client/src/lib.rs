//! PIR Client - hint storage, oblivious queries and replenishment for both variants
//!
//! - [`TwoServerClient`] fetches hints from a second server and refills each
//!   consumed slot with a freshly minted one.
//! - [`OneServerClient`] builds its own hints by streaming the database and
//!   refills consumed slots from a precomputed backup pool.

pub mod error;
pub mod hint_store;
pub mod one_server;
pub mod query;
pub mod two_server;

pub use error::{ClientError, Result};
pub use hint_store::{BackupHint, BackupPool, HintStore, IndicatorBits};
pub use one_server::OneServerClient;
pub use query::{QueryEngine, SlotState, Target};
pub use two_server::TwoServerClient;
