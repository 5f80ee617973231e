//! CLI binary for replaying attempt event scenarios through the behaviour.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use proctor_behaviour::{
    AttemptEvent, BasicQuestion, ImmediateBehaviour, RawStep, RecordStore, ScriptedDispatcher,
};
use proctor_store::MemoryRecordStore;
use proctor_types::{Attempt, AttemptState, Decision, ScorePolicy};

#[derive(Parser)]
#[command(name = "proctor", version, about = "Replay driver for the Proctor grading behaviour")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON event scenario against an in-memory store
    Replay {
        /// Path to the scenario .json file
        scenario: PathBuf,
    },

    /// Print the attempt state partition table
    States,
}

/// A scenario file: an attempt, the grading jobs the store should consider
/// live, a scripted sequence of dispatcher verdicts, and the raw event steps
/// to classify and process in order.
#[derive(Deserialize)]
struct Scenario {
    #[serde(default = "default_slot")]
    slot: u32,
    max_mark: f64,
    #[serde(default)]
    min_fraction: f64,
    #[serde(default)]
    score_policy: ScorePolicy,
    /// Jobs registered as authoritative before the replay starts.
    #[serde(default)]
    jobs: Vec<Uuid>,
    /// Create a regrade override record for this attempt before replaying.
    #[serde(default)]
    seed_override: bool,
    /// States the dispatcher returns, in order; `needs_grading` once exhausted.
    #[serde(default)]
    dispatch: Vec<AttemptState>,
    steps: Vec<ScenarioStep>,
}

#[derive(Deserialize)]
struct ScenarioStep {
    /// Step id; generated when omitted. Stable ids matter for comment replay.
    id: Option<Uuid>,
    #[serde(default)]
    vars: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    response: std::collections::BTreeMap<String, String>,
}

fn default_slot() -> u32 {
    1
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Replay { scenario } => {
            cmd_replay(&scenario).await?;
        }
        Commands::States => {
            cmd_states();
        }
    }

    Ok(())
}

async fn cmd_replay(path: &std::path::Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)?;
    let scenario: Scenario = serde_json::from_str(&source)?;
    tracing::debug!(steps = scenario.steps.len(), "Scenario loaded");

    let store = MemoryRecordStore::new();
    for job in &scenario.jobs {
        store.register_job(*job).await;
    }

    let usage_id = Uuid::new_v4();
    let mut attempt = Attempt::new(usage_id, scenario.slot, scenario.max_mark);
    if scenario.seed_override {
        store.seed_override(usage_id, scenario.slot).await;
    }

    let behaviour = ImmediateBehaviour::new(
        Arc::new(store.clone()),
        Arc::new(ScriptedDispatcher::new(scenario.dispatch)),
        Arc::new(BasicQuestion::new(scenario.min_fraction)),
        Arc::new(store.clone()),
    )
    .with_score_policy(scenario.score_policy);

    println!(
        "{:<4} {:<18} {:<8} {:<15} {:<9} ACTION",
        "#", "EVENT", "VERDICT", "STATE", "FRACTION"
    );

    for (index, step) in scenario.steps.iter().enumerate() {
        let mut raw = RawStep::new(step.id.unwrap_or_else(Uuid::new_v4));
        raw.vars = step.vars.clone();
        for (name, value) in &step.response {
            raw.response.set(name, value);
        }

        let event = AttemptEvent::classify(&raw)?;
        let action = behaviour.summarise_action(&event);
        let kind = event.kind();
        let decision = behaviour.process(&mut attempt, raw.id, event).await?;

        if decision.is_keep() {
            let kept = attempt.last_step().expect("kept step present");
            store.record_step(usage_id, kept).await;
        }

        println!(
            "{:<4} {:<18} {:<8} {:<15} {:<9} {}",
            index + 1,
            kind,
            match decision {
                Decision::Keep => "keep",
                Decision::Discard => "discard",
            },
            format!("{:?}", attempt.state()),
            attempt
                .fraction()
                .map(|f| format!("{f:.3}"))
                .unwrap_or_else(|| "-".to_string()),
            action,
        );
    }

    println!();
    println!("Final state: {:?}", attempt.state());
    if let Some(fraction) = attempt.fraction() {
        println!(
            "Final mark: {:.2} / {}",
            fraction * scenario.max_mark,
            scenario.max_mark
        );
    }
    if scenario.seed_override {
        let record = store.regrade_override(usage_id, scenario.slot).await?;
        if let Some(record) = record {
            match record.new_fraction {
                Some(f) => println!("Override record fraction: {f:.3}"),
                None => println!("Override record fraction: (unset)"),
            }
        }
    }

    Ok(())
}

fn cmd_states() {
    println!("{:<16} {:<8} {:<10} GRADED", "STATE", "ACTIVE", "FINISHED");
    for state in [
        AttemptState::NotStarted,
        AttemptState::InProgress,
        AttemptState::Complete,
        AttemptState::Invalid,
        AttemptState::Finished,
        AttemptState::NeedsGrading,
        AttemptState::GaveUp,
        AttemptState::GradedWrong,
        AttemptState::GradedPartial,
        AttemptState::GradedRight,
    ] {
        println!(
            "{:<16} {:<8} {:<10} {}",
            format!("{state:?}"),
            state.is_active(),
            state.is_finished(),
            state.is_graded(),
        );
    }
}
