//! tictactoe-selfplay - random self-play record writer
//!
//! Plays uniformly random tic-tac-toe games and writes one game record per
//! game into `--out`, making each file visible only by atomic rename. Runs
//! until `--games` records are written or the process is killed; a kill
//! between games never leaves a partial record under its final name.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use engine_core::record_file_name;
use games_tictactoe::play_random_game;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "tictactoe-selfplay")]
#[command(about = "Write random tic-tac-toe game records for the evolver")]
struct Args {
    /// Directory receiving game-record files
    #[arg(long)]
    out: PathBuf,

    /// Number of games to write (0 = until killed)
    #[arg(long, default_value_t = 0)]
    games: u64,

    /// RNG seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Pause between games in milliseconds
    #[arg(long, default_value_t = 5)]
    interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating output directory {}", args.out.display()))?;

    let mut rng = match args.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    };

    let device = std::env::var("EVOLVE_DEVICE").unwrap_or_else(|_| "general".to_string());
    info!(
        out = %args.out.display(),
        games = args.games,
        device = %device,
        "Self-play started"
    );

    let mut written = 0u64;
    while args.games == 0 || written < args.games {
        let record = play_random_game(&mut rng);
        let path = args.out.join(record_file_name());
        record
            .write_atomic(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        written += 1;
        debug!(path = %path.display(), plies = record.steps.len(), "Game written");

        if args.interval_ms > 0 {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }

    info!(written, "Self-play finished");
    Ok(())
}
