//! s3pir benchmark harness
//!
//! Builds a random database, runs the offline phase of the chosen variant,
//! issues a batch of queries and appends the timings to a CSV file.
//!
//! Usage:
//!   s3pir --variant two-server 20 32 results.csv
//!   s3pir --variant one-server 16 64 results.csv --verify

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use pir_client::{OneServerClient, TwoServerClient};
use pir_core::{InMemoryStorage, Orientation, Params, PirConfig, Prf, Storage};
use pir_seeder::HintGenerator;
use pir_server::Responder;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing_subscriber::EnvFilter;

const CSV_HEADER: &str = "Variant, Log2 DBSize, EntrySize(Bytes), NumQueries, Offline Time (s), Online Time (ms),  Amortized Compute Time Per Query (ms)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Variant {
    OneServer,
    TwoServer,
}

impl Variant {
    fn label(self) -> &'static str {
        match self {
            Variant::OneServer => "One server",
            Variant::TwoServer => "Two server",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "s3pir")]
#[command(about = "Run the stateful sublinear PIR protocol and record timings")]
struct Args {
    /// Protocol variant
    #[arg(long, value_enum)]
    variant: Variant,

    /// Database holds 2^LOG_N entries
    log_n: u32,

    /// Entry size in bytes (multiple of 8)
    entry_bytes: usize,

    /// CSV file to append results to
    output: PathBuf,

    /// Hint-pool multiplier (overrides the config file)
    #[arg(long)]
    lambda: Option<u32>,

    /// Number of queries (default: one partition's worth)
    #[arg(long)]
    queries: Option<usize>,

    /// Seed for the database and the client session
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// JSON config supplying lambda and the PRF key
    #[arg(long)]
    config: Option<PathBuf>,

    /// Check every answer against the database
    #[arg(long)]
    verify: bool,

    /// Write the client session after the run (bincode); resumable
    #[arg(long)]
    state_out: Option<PathBuf>,
}

struct RunStats {
    queries: usize,
    offline_secs: f64,
    online_ms_per_query: f64,
    amortized_ms_per_query: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PirConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PirConfig::new(args.log_n, args.entry_bytes),
    };
    config.log_n = args.log_n;
    config.entry_bytes = args.entry_bytes;
    if let Some(lambda) = args.lambda {
        config.lambda = lambda;
    }
    let params = config.params()?;
    let key = config.prf_key()?;

    tracing::info!(
        variant = ?args.variant,
        log_n = params.log_n,
        entry_bytes = params.entry_bytes,
        lambda = params.lambda,
        "Initializing database"
    );
    let db = InMemoryStorage::init(&params, &mut ChaCha20Rng::seed_from_u64(args.seed));

    let stats = match args.variant {
        Variant::TwoServer => run_two_server(&args, &params, &key, &db)?,
        Variant::OneServer => run_one_server(&args, &params, &key, &db)?,
    };

    append_csv(&args.output, args.variant, &params, &stats)?;
    println!(
        "{}: {} queries, offline {:.3} s, {:.4} ms/query",
        args.variant.label(),
        stats.queries,
        stats.offline_secs,
        stats.online_ms_per_query
    );
    if let Some(amortized) = stats.amortized_ms_per_query {
        println!("Amortized compute time per query: {amortized:.4} ms");
    }
    Ok(())
}

/// Query `i` of the run: walks partitions and offsets together
fn query_index(params: &Params, i: usize) -> u64 {
    let i = i as u32;
    params.index_of(i % params.part_num, i % params.part_size)
}

fn verify(db: &InMemoryStorage, index: u64, entry: &[u64]) -> Result<()> {
    if db.get(index)? != entry {
        bail!("wrong answer for index {index}");
    }
    Ok(())
}

fn run_two_server(
    args: &Args,
    params: &Params,
    key: &[u8; 16],
    db: &InMemoryStorage,
) -> Result<RunStats> {
    let responder = Responder::new(db, params.clone())?;
    let mut seeder =
        HintGenerator::with_prf(db, params.clone(), Prf::new(key, Orientation::PartitionMajor))?;
    let mut client = TwoServerClient::with_prf(
        params.clone(),
        Prf::new(key, Orientation::PartitionMajor),
        args.seed,
    )?;

    let start = Instant::now();
    client.offline(&mut seeder)?;
    let offline_secs = start.elapsed().as_secs_f64();
    tracing::info!("Offline: {:.3} s", offline_secs);

    let queries = args.queries.unwrap_or(params.part_size as usize);
    let start = Instant::now();
    for i in 0..queries {
        let index = query_index(params, i);
        let entry = client.query(&responder, &seeder, index)?;
        if args.verify {
            verify(db, index, &entry)?;
        }
    }
    let online_ms_per_query = per_query_ms(start, queries);

    if let Some(path) = &args.state_out {
        client.save_session(path)?;
        tracing::info!("Saved client session to {}", path.display());
    }
    Ok(RunStats {
        queries,
        offline_secs,
        online_ms_per_query,
        amortized_ms_per_query: None,
    })
}

fn run_one_server(
    args: &Args,
    params: &Params,
    key: &[u8; 16],
    db: &InMemoryStorage,
) -> Result<RunStats> {
    let responder = Responder::new(db, params.clone())?;
    let mut client =
        OneServerClient::with_prf(params.clone(), Prf::new(key, Orientation::HintMajor), args.seed)?;

    let start = Instant::now();
    client.offline(db)?;
    let offline_secs = start.elapsed().as_secs_f64();
    tracing::info!("Offline: {:.3} s", offline_secs);

    let budget = client.remaining_queries();
    let requested = args.queries.unwrap_or(params.part_size as usize);
    if requested > budget {
        tracing::warn!(requested, budget, "Capping queries at the backup budget");
    }
    let queries = requested.min(budget);

    let start = Instant::now();
    for i in 0..queries {
        let index = query_index(params, i);
        let entry = client.query(&responder, index)?;
        if args.verify {
            verify(db, index, &entry)?;
        }
    }
    let online_ms_per_query = per_query_ms(start, queries);
    tracing::info!(
        replenished_uses = client.replenished_hint_uses(),
        remaining = client.remaining_queries(),
        "Online phase complete"
    );

    if let Some(path) = &args.state_out {
        client.save_session(path)?;
        tracing::info!("Saved client session to {}", path.display());
    }

    // Offline cost spread over every query the backup pool can serve
    let amortized = offline_secs * 1000.0 / params.num_backup_hints as f64 + online_ms_per_query;
    Ok(RunStats {
        queries,
        offline_secs,
        online_ms_per_query,
        amortized_ms_per_query: Some(amortized),
    })
}

fn per_query_ms(start: Instant, queries: usize) -> f64 {
    if queries == 0 {
        return 0.0;
    }
    start.elapsed().as_secs_f64() * 1000.0 / queries as f64
}

fn append_csv(path: &Path, variant: Variant, params: &Params, stats: &RunStats) -> Result<()> {
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    if is_new {
        writeln!(file, "{CSV_HEADER}")?;
    }
    let amortized = stats
        .amortized_ms_per_query
        .map_or_else(|| "-".to_string(), |ms| ms.to_string());
    writeln!(
        file,
        "{}, {}, {}, {}, {}, {}, {}",
        variant.label(),
        params.log_n,
        params.entry_bytes,
        stats.queries,
        stats.offline_secs,
        stats.online_ms_per_query,
        amortized
    )?;
    Ok(())
}
