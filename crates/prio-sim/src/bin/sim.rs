#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use prio_core::OverlapPolicy;
use prio_sim::campaign::{self, CampaignConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "prio-sim: deterministic fault-injection simulation for prio",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run one seed and check invariants",
        after_help = "EXAMPLES:\n    prio-sim run --seed 7 --policy concurrent"
    )]
    Run {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[command(flatten)]
        params: Params,
    },
    #[command(
        about = "Run a range of seeds and report the first failure",
        after_help = "EXAMPLES:\n    prio-sim campaign --from 0 --count 500"
    )]
    Campaign {
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 100)]
        count: u64,
        #[command(flatten)]
        params: Params,
    },
    #[command(about = "Replay one seed and print its full trace")]
    Replay {
        #[arg(long)]
        seed: u64,
        #[command(flatten)]
        params: Params,
    },
}

#[derive(Args, Debug)]
struct Params {
    /// Overlap policy for requests sharing a list.
    #[arg(long, value_enum, default_value_t = Policy::Queue)]
    policy: Policy,
    #[arg(long, default_value_t = 24)]
    rounds: u64,
    #[arg(long, default_value_t = 8)]
    items: usize,
    /// Network drop rate (percent).
    #[arg(long, default_value_t = 10)]
    drop: u8,
    /// Server error rate (percent).
    #[arg(long, default_value_t = 10)]
    server_errors: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Policy {
    Queue,
    Reject,
    Concurrent,
}

impl From<Policy> for OverlapPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Queue => Self::Queue,
            Policy::Reject => Self::Reject,
            Policy::Concurrent => Self::Concurrent,
        }
    }
}

impl Params {
    fn campaign(&self, seeds: std::ops::Range<u64>) -> CampaignConfig {
        let defaults = CampaignConfig::default();
        CampaignConfig {
            seed_range: seeds,
            items: self.items,
            initially_prioritized: defaults.initially_prioritized.min(self.items),
            rounds: self.rounds,
            overlap: self.policy.into(),
            fault_drop_percent: self.drop,
            fault_server_error_percent: self.server_errors,
            ..defaults
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PRIO_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "prio=debug,info"
        } else {
            "prio=info,warn"
        })
    });

    let format = env::var("PRIO_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { seed, params } => {
            let config = params.campaign(seed..seed.saturating_add(1));
            config.validate()?;
            let trace = campaign::replay_seed(seed, &config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&trace.oracle)?);
            } else {
                let stats = &trace.result.stats;
                println!(
                    "seed {seed}: commands={} sent={} committed={} rolled_back={} superseded={} stale={} passed={}",
                    stats.commands,
                    stats.sent,
                    stats.committed,
                    stats.rolled_back,
                    stats.superseded,
                    stats.stale_responses,
                    trace.oracle.passed
                );
                for violation in &trace.oracle.violations {
                    println!("  {violation}");
                }
            }
            Ok(exit_code(trace.oracle.passed))
        }
        Commands::Campaign {
            from,
            count,
            params,
        } => {
            let config = params.campaign(from..from.saturating_add(count));
            let report = campaign::run_campaign(&config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "campaign: {}/{} seeds passed, {} reached interesting states",
                    report.seeds_passed, report.seeds_run, report.interesting_states_reached
                );
                if let Some(seed) = report.first_failure {
                    println!("first failure: seed {seed} (replay with `prio-sim replay --seed {seed}`)");
                }
                for failure in &report.failures {
                    for violation in &failure.violations {
                        println!("  seed {}: {violation}", failure.seed);
                    }
                }
            }
            Ok(exit_code(report.all_passed()))
        }
        Commands::Replay { seed, params } => {
            let config = params.campaign(seed..seed.saturating_add(1));
            config.validate()?;
            let trace = campaign::replay_seed(seed, &config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&trace)?);
            } else {
                for event in &trace.result.trace {
                    println!("[{:>4}] {:?}", event.round, event.kind);
                }
                println!("ui:     {:?}", trace.result.ui.to_map());
                println!("server: {:?}", trace.result.server.to_map());
                println!("passed: {}", trace.oracle.passed);
            }
            Ok(exit_code(trace.oracle.passed))
        }
    }
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
