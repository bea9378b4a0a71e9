//! PIR Seeder - hint-generating server for the two-server variant
//!
//! This crate mints hints by:
//! 1. Evaluating the partition-major PRF over every partition of a hint ID
//! 2. Selecting the median cutoff and a pinned extra entry outside the subset
//! 3. XOR-accumulating the selected entries from its database copy

pub mod generator;

pub use generator::HintGenerator;
