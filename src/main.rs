//! Stakepot: delegator jackpot daemon and admin CLI
//!
//! `run` starts the scheduler; every other subcommand performs one
//! operation against the same store and prints JSON to stdout.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use stakepot::report::{self, DEFAULT_PAGE_SIZE};
use stakepot::{
    Alphabet, ChainClient, JackpotDraft, Lottery, LotteryConfig, LotteryError, PoolMode, Storage,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Stakepot version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "stakepot", version, about = "Stakepot: jackpot rounds for stake delegators")]
struct Args {
    /// Data directory
    #[arg(short, long, env = "STAKEPOT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Ticket alphabet: hex, alnum
    #[arg(long, env = "STAKEPOT_ALPHABET", default_value = "hex")]
    alphabet: Alphabet,

    /// Ticket hash length
    #[arg(
        long,
        env = "STAKEPOT_HASH_LENGTH",
        default_value = "4",
        value_parser = clap::value_parser!(u8).range(1..=12)
    )]
    hash_length: u8,

    /// Sample this many random hashes instead of the full space
    #[arg(long, env = "STAKEPOT_SAMPLE")]
    sample: Option<u64>,

    /// Fixed shuffle seed (reproducible pools)
    #[arg(long, env = "STAKEPOT_SEED")]
    seed: Option<u64>,

    /// Staking REST delegations endpoint
    #[arg(long, env = "STAKEPOT_DELEGATIONS_URL")]
    delegations_url: Option<String>,

    /// Tendermint RPC block endpoint
    #[arg(long, env = "STAKEPOT_BLOCK_URL")]
    block_url: Option<String>,

    /// Distribution REST commission endpoint
    #[arg(long, env = "STAKEPOT_COMMISSION_URL")]
    commission_url: Option<String>,

    /// Block polling window during a draw, in seconds
    #[arg(long, env = "STAKEPOT_POLL_WINDOW", default_value = "30")]
    poll_window: u64,

    /// Scheduler tick, in seconds
    #[arg(long, env = "STAKEPOT_CYCLE_SECS", default_value = "60")]
    cycle_secs: u64,

    /// Delegator ingestion period, in seconds
    #[arg(long, env = "STAKEPOT_INGEST_SECS", default_value = "3600")]
    ingest_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Fetch the delegator set once
    Ingest,
    /// Run a single scheduler cycle now
    Cycle,
    /// Create a pending jackpot
    CreateJackpot {
        /// Draw date, RFC 3339 (e.g. 2026-11-01T18:00:00Z)
        #[arg(long)]
        draw_date: DateTime<Utc>,
        /// Share of the reward paid out, 0-100
        #[arg(long)]
        reward_percentage: Decimal,
        /// Share of the pool distributed before the draw, 0-100
        #[arg(long)]
        winning_percentage: Decimal,
        #[arg(long)]
        ticket_cost: Decimal,
        /// Minutes before the draw at which distribution starts
        #[arg(long)]
        start_distribute_time: Option<i64>,
    },
    /// Opt a delegator into the current round
    OptIn { address: String },
    /// Jackpot amount and ticket totals
    Summary { address: Option<String> },
    /// Time left until the draw
    Countdown,
    /// Participant statistics
    Stats { address: String },
    /// Tickets owned by an address
    Tickets {
        address: String,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Claimed wins, newest first
    Winners {
        #[arg(long)]
        address: Option<String>,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Outcomes of closed rounds
    Jackpots {
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Regenerate the ticket pool
    ResetPool,
}

impl Args {
    fn config(&self) -> LotteryConfig {
        let mut config = LotteryConfig {
            data_dir: self.data_dir.clone(),
            poll_window: Duration::from_secs(self.poll_window),
            cycle_interval: Duration::from_secs(self.cycle_secs.max(1)),
            ingest_interval: Duration::from_secs(self.ingest_secs.max(1)),
            ..Default::default()
        };
        config.pool.alphabet = self.alphabet;
        config.pool.hash_length = usize::from(self.hash_length);
        config.pool.shuffle_seed = self.seed;
        if let Some(count) = self.sample {
            config.pool.mode = PoolMode::Sampled(count);
        }
        if let Some(url) = &self.delegations_url {
            config.endpoints.delegations_url = url.clone();
        }
        if let Some(url) = &self.block_url {
            config.endpoints.block_url = url.clone();
        }
        if let Some(url) = &self.commission_url {
            config.endpoints.commission_url = url.clone();
        }
        config
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit code by error class: 2 bad input, 3 retry later, 1 anything else
fn exit_code(e: &(dyn Error + 'static)) -> i32 {
    match e.downcast_ref::<LotteryError>() {
        Some(e) if e.is_client_error() => 2,
        Some(e) if e.is_unavailable() => 3,
        _ => 1,
    }
}

async fn execute(args: Args) -> Result<(), Box<dyn Error>> {
    let config = args.config();
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Storage::open(&config.data_dir)?);
    let client = ChainClient::new(&config)?;
    let lottery = Lottery::new(store.clone(), config, client);
    let now = Utc::now();

    match args.command {
        Command::Run => {
            let meta = lottery.ensure_pool()?;
            info!("════════════════════════════════════════════════════════════");
            info!("  Stakepot v{}", VERSION);
            info!("════════════════════════════════════════════════════════════");
            info!(
                "Pool: {} tickets ({:?}, length {}) | Cycle: {:?} | Ingest: {:?}",
                meta.size,
                lottery.config().pool.alphabet,
                lottery.config().pool.hash_length,
                lottery.config().cycle_interval,
                lottery.config().ingest_interval
            );

            tokio::select! {
                _ = lottery.run() => {}
                _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
            }
        }
        Command::Ingest => {
            let count = lottery.ingest_delegators().await;
            print_json(&serde_json::json!({ "ingested": count }))?;
        }
        Command::Cycle => {
            lottery.ensure_pool()?;
            let cycle = lottery.run_cycle(now).await?;
            print_json(&serde_json::json!({
                "switched_to": cycle.switched_to,
                "distribution": cycle.distribution,
                "winner": cycle.resolution.as_ref().and_then(|r| r.winner()),
                "settled": cycle.settled,
            }))?;
        }
        Command::CreateJackpot {
            draw_date,
            reward_percentage,
            winning_percentage,
            ticket_cost,
            start_distribute_time,
        } => {
            let draft = JackpotDraft {
                reward_percentage,
                winning_percentage,
                ticket_cost,
                start_distribute_time: start_distribute_time
                    .unwrap_or(lottery.config().default_start_distribute_time),
                draw_date,
            };
            print_json(&lottery.create_jackpot(draft, now).await?)?;
        }
        Command::OptIn { address } => print_json(&lottery.opt_in(&address)?)?,
        Command::Summary { address } => print_json(&report::summary(
            lottery.store(),
            lottery.config(),
            address.as_deref(),
        )?)?,
        Command::Countdown => print_json(&report::countdown(lottery.store(), now)?)?,
        Command::Stats { address } => {
            match report::participant_stats(lottery.store(), lottery.config(), &address)? {
                Some(stats) => print_json(&stats)?,
                None => return Err(format!("participant {} not found", address).into()),
            }
        }
        Command::Tickets {
            address,
            page,
            page_size,
        } => print_json(&report::tickets_by_address(
            lottery.store(),
            lottery.config(),
            &address,
            page,
            page_size,
        )?)?,
        Command::Winners {
            address,
            page,
            page_size,
        } => print_json(&report::recent_winners(
            lottery.store(),
            address.as_deref(),
            page,
            page_size,
        )?)?,
        Command::Jackpots { page, page_size } => {
            print_json(&report::recent_jackpots(lottery.store(), page, page_size)?)?
        }
        Command::ResetPool => print_json(&lottery.reset_pool()?)?,
    }

    store.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Logs go to stderr, stdout carries JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stakepot=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = execute(args).await {
        error!("{}", e);
        std::process::exit(exit_code(e.as_ref()));
    }
}
