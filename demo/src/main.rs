//! CONCORD Coordination Bus: Demo CLI
//!
//! Runs scripted coordination scenarios against a virtual clock, or serves a
//! live bus with its background jobs for a few seconds.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- self-healing
//!   cargo run -p demo -- priority
//!   cargo run -p demo -- retry
//!   cargo run -p demo -- escalation
//!   cargo run -p demo -- serve --seconds 5
//!   cargo run -p demo -- --config demo/roster.toml run-all

mod scenarios;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use concord_contracts::{
    agent::AgentId,
    error::CoordResult,
    message::{MessageDraft, Priority, Receiver},
    payload::{Inquiry, MessagePayload, TaskAssignment},
};
use concord_core::{clock::SystemClock, BusRuntime, CoordinationBus};
use concord_history::InMemoryHistory;
use concord_roster::Roster;

use scenarios::{describe, escalation, priority, retry, self_healing};

/// Roster used when `--config` is not given.
const DEFAULT_ROSTER: &str = include_str!("../roster.toml");

// ── CLI definition ────────────────────────────────────────────────────────────

/// CONCORD: inter-agent coordination bus demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "CONCORD coordination bus demo",
    long_about = "Runs CONCORD coordination scenarios showing priority delivery,\n\
                  bounded retries, conflict escalation, and self-healing."
)]
struct Cli {
    /// Roster TOML with timing, escalation table and agent capabilities.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scripted scenarios in sequence.
    RunAll,
    /// Scenario 1: a silent agent's task moves to a capable peer.
    SelfHealing,
    /// Scenario 2: mailbox ordering by priority, then arrival.
    Priority,
    /// Scenario 3: bounded delivery retries with backoff.
    Retry,
    /// Scenario 4: conflict routing, blocked tasks, response timeouts.
    Escalation,
    /// Run a live bus with its background jobs on the system clock.
    Serve {
        /// How long to keep the bus running.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for routing-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match load_roster(cli.config) {
        Ok(roster) => match cli.command {
            Command::RunAll => run_all(&roster),
            Command::SelfHealing => self_healing::run_scenario(&roster),
            Command::Priority => priority::run_scenario(&roster),
            Command::Retry => retry::run_scenario(&roster),
            Command::Escalation => escalation::run_scenario(&roster),
            Command::Serve { seconds } => serve(&roster, seconds).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            println!("Done.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_roster(path: Option<PathBuf>) -> CoordResult<Roster> {
    match path {
        Some(path) => Roster::from_file(&path),
        None => Roster::from_toml_str(DEFAULT_ROSTER),
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

fn run_all(roster: &Roster) -> CoordResult<()> {
    self_healing::run_scenario(roster)?;
    priority::run_scenario(roster)?;
    retry::run_scenario(roster)?;
    escalation::run_scenario(roster)?;
    Ok(())
}

// ── Live bus ──────────────────────────────────────────────────────────────────

async fn serve(roster: &Roster, seconds: u64) -> CoordResult<()> {
    println!("=== Live bus for {}s (Ctrl-C to stop early) ===", seconds);
    println!();

    let history = InMemoryHistory::new(roster.timing().history_max_records);
    let shared = Arc::new(roster.clone());
    let bus = Arc::new(CoordinationBus::new(
        roster.timing().clone(),
        Arc::new(SystemClock),
        shared.clone(),
        shared,
        Box::new(history.clone()),
    ));

    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    seen += 1;
                    if let Some(line) = describe(&event) {
                        println!("  [event] {}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        seen
    });

    let runtime = BusRuntime::spawn(bus.clone());

    bus.send_message(
        MessageDraft::new(
            "product-manager",
            Receiver::Unicast(AgentId::new("backend-developer")),
            "live-demo",
            MessagePayload::TaskAssignment(TaskAssignment::new("health-endpoint", "Add a health endpoint")),
        )
        .priority(Priority::High),
    )?;
    bus.send_message(MessageDraft::new(
        "backend-developer",
        Receiver::Unicast(AgentId::new("system-architect")),
        "live-demo",
        MessagePayload::Query(Inquiry {
            question: "Should the health endpoint check the database?".to_string(),
            context: serde_json::Value::Null,
        }),
    ))?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    let pending = bus.pending_responses();
    runtime.shutdown().await?;
    let seen = printer.await.unwrap_or_else(|e| {
        warn!(error = %e, "event printer task failed");
        0
    });

    println!();
    println!("  Events observed:        {}", seen);
    println!("  History records:        {}", history.len());
    println!("  Unanswered at shutdown: {}", pending);
    println!();
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("CONCORD: Inter-Agent Coordination Bus");
    println!("=====================================");
    println!();
    println!("Per message:");
    println!("  [1] Validate the envelope and reject duplicate ids");
    println!("  [2] Queue into each receiver's mailbox by priority, then arrival");
    println!("  [3] Failed deliveries retry at 5s, then 2s and 4s backoff, four attempts in all");
    println!("  [4] Queries and escalations wait five minutes for a reply");
    println!("Every 30s, agents silent for over two minutes are healed and their work moves on.");
    println!();
}
