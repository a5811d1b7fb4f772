use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ride_core::config::EngineConfig;
use ride_core::dispatch::Dispatcher;
use ride_core::ecs::{Decision, MatchRequest, MatchResult, SessionId, SessionStatus};
use ride_core::engine::RideEngine;
use ride_core::fare::{QuoteRequest, VehicleClass};
use ride_core::pool::{Candidate, CandidatePool, SharedCandidatePool};
use ride_core::spatial::cell_from_lat_lng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ride",
    about = "Fare quoting and ride matching engine",
    long_about = "Quote fares from the configured rate cards and run the matching\n\
                  coordinator against a synthetic driver pool."
)]
struct Cli {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(long, global = true, env = "RIDE_CONFIG")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "RIDE_LOG_JSON")]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a single trip
    Quote {
        /// Vehicle class (auto, mini, sedan, suv, wheelchair_accessible)
        #[arg(long, default_value = "mini")]
        class: VehicleClass,
        /// Estimated trip distance in km
        #[arg(long)]
        distance: f64,
        /// Estimated trip duration in minutes
        #[arg(long)]
        duration: f64,
        #[arg(long)]
        shared: bool,
        #[arg(long, default_value_t = 1.0)]
        multiplier: f64,
        #[arg(long)]
        coupon: Option<String>,
        #[arg(long)]
        insurance: bool,
        /// Also price the shared and solo variants side by side
        #[arg(long)]
        compare: bool,
        /// Pricing instant as Unix ms (coupon expiry is checked against it)
        #[arg(long)]
        at_ms: Option<i64>,
    },
    /// Run quote-to-completion for a batch of riders over a synthetic pool
    Demo {
        #[arg(long, default_value_t = 50)]
        drivers: u64,
        #[arg(long, default_value_t = 80)]
        riders: usize,
        #[arg(long, default_value_t = 4)]
        shards: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Check a configuration file and print it with defaults filled in
    ValidateConfig {
        path: PathBuf,
    },
}

// ── Entry point ────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::ValidateConfig { path } => {
            let config = EngineConfig::from_path(&path).map_err(|e| e.to_string())?;
            print_json(&config)
        }
        Commands::Quote {
            class,
            distance,
            duration,
            shared,
            multiplier,
            coupon,
            insurance,
            compare,
            at_ms,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(at_ms) = at_ms {
                config = config.with_epoch_ms(at_ms);
            }
            let mut engine = RideEngine::new(config, SharedCandidatePool::default().into_shared())
                .map_err(|e| e.to_string())?;

            let mut request = QuoteRequest::new(class, distance, duration)
                .shared(shared)
                .with_demand_multiplier(multiplier)
                .with_insurance(insurance);
            if let Some(code) = coupon {
                request = request.with_coupon(code);
            }

            if compare {
                let comparison = engine
                    .sharing_comparison(&request)
                    .map_err(|e| e.to_string())?;
                return print_json(&comparison);
            }
            let quote = engine.quote(&request).map_err(|e| e.to_string())?;
            print_json(&quote)
        }
        Commands::Demo {
            drivers,
            riders,
            shards,
            seed,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            run_demo(&config, drivers, riders, shards)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::from_path(path).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{out}");
    Ok(())
}

// ── Demo ───────────────────────────────────────────────────────────

/// Downtown Bengaluru.
const DEMO_CENTER: (f64, f64) = (12.9716, 77.5946);

fn run_demo(
    config: &EngineConfig,
    drivers: u64,
    riders: usize,
    shards: usize,
) -> Result<(), String> {
    let center = cell_from_lat_lng(DEMO_CENTER.0, DEMO_CENTER.1)
        .ok_or_else(|| "demo center is not a valid coordinate".to_string())?;
    let disk: Vec<h3o::CellIndex> = center.grid_disk(8);
    let dropoff = disk.last().copied().unwrap_or(center);

    let pool = SharedCandidatePool::new((0..drivers).map(|i| {
        let cell = disk[(i as usize * 7) % disk.len()];
        Candidate::driver(i + 1, VehicleClass::Mini, cell).with_rating(4.0 + (i % 10) as f32 / 10.0)
    }))
    .into_shared();
    let shared_pool: Arc<dyn CandidatePool> = pool.clone();
    let mut dispatcher = Dispatcher::new(config, shared_pool, shards).map_err(|e| e.to_string())?;

    let shard_count = dispatcher.shard_count();
    let outcomes = dispatcher.run(|shard, engine| {
        let mine = (0..riders).filter(|rider| rider % shard_count == shard);
        let mut results = Vec::new();
        for rider in mine {
            let pickup = disk[(rider * 13) % disk.len()];
            let trip = QuoteRequest::new(VehicleClass::Mini, 4.0 + (rider % 12) as f64, 15.0);
            let Ok(quote) = engine.quote(&trip) else {
                continue;
            };
            let mut request = MatchRequest::new(quote.id, pickup, dropoff);
            if rider % 5 == 0 {
                request = request.scheduled(engine.now_ms() + 3_600_000);
            }
            let Ok(session) = engine.request_match(request) else {
                continue;
            };
            drive_session(engine, session, rider);
            if let Some(result) = engine.take_result(session) {
                results.push(result);
            }
        }
        results
    });

    let results: Vec<MatchResult> = outcomes.into_iter().flatten().collect();
    let assigned = results
        .iter()
        .filter(|r| matches!(r, MatchResult::Assigned { .. }))
        .count();
    tracing::info!(
        riders,
        assigned,
        failed = results.len() - assigned,
        drivers_free = pool.available_count(),
        "demo finished"
    );
    print_json(&serde_json::json!({
        "riders": riders,
        "assigned": assigned,
        "failed": results.len() - assigned,
        "telemetry": dispatcher.telemetry(),
    }))
}

/// Plays the candidate side: every third rider's first driver declines, every
/// seventh rider's assigned driver cancels once.
fn drive_session(engine: &mut RideEngine, session: SessionId, rider: usize) {
    let mut declined_once = false;
    let mut cancelled_once = false;
    loop {
        let Ok(snapshot) = engine.match_status(session) else {
            return;
        };
        let Some(candidate) = snapshot.active.as_ref().map(|c| c.id) else {
            return;
        };
        let step = match snapshot.status {
            SessionStatus::Found if rider % 3 == 0 && !declined_once => {
                declined_once = true;
                engine.match_respond(session, candidate, Decision::Decline)
            }
            SessionStatus::Found => engine.match_respond(session, candidate, Decision::Accept),
            SessionStatus::Accepted if rider % 7 == 0 && !cancelled_once => {
                cancelled_once = true;
                engine.candidate_cancel(session, candidate)
            }
            SessionStatus::Accepted => engine.trip_started(session),
            SessionStatus::InProgress => engine.trip_completed(session),
            _ => return,
        };
        if let Err(err) = step {
            tracing::warn!(%session, error = %err, "demo step rejected");
            return;
        }
    }
}
