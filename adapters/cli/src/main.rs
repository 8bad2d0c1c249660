#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs one bombsite decision tick from a scenario file.

mod scenario;

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use bombsite_core::{Action, ActionKind, Direction};
use bombsite_engine::{decide, initialize};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;

#[derive(Debug, Parser)]
#[command(name = "bombsite")]
#[command(about = "Chooses one tick of bombsite actions for the scenario's side")]
struct Cli {
    /// Scenario TOML holding the map, constants and the current snapshot
    #[arg(long, short)]
    scenario: PathBuf,

    /// How the chosen actions are printed
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One line per action.
    Text,
    /// JSON array of actions.
    Json,
}

/// Entry point for the bombsite command-line interface.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let text = fs::read_to_string(&cli.scenario)
        .with_context(|| format!("failed to read scenario {}", cli.scenario.display()))?;
    let scenario = Scenario::parse(&text)
        .with_context(|| format!("failed to load scenario {}", cli.scenario.display()))?;
    let snapshot = scenario.snapshot()?;

    let mut engine = initialize(
        scenario.side,
        snapshot.board.clone(),
        scenario.constants,
        scenario.config,
    )
    .context("engine rejected the scenario constants")?;

    let mut actions = Vec::new();
    decide(&mut engine, &snapshot, &mut actions);
    info!(
        side = ?scenario.side,
        tick = snapshot.tick,
        actions = actions.len(),
        "decision complete"
    );

    match cli.format {
        OutputFormat::Text => {
            for action in &actions {
                println!("{}", describe(action));
            }
        }
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&actions).context("failed to encode actions")?;
            println!("{json}");
        }
    }
    Ok(())
}

fn describe(action: &Action) -> String {
    let kind = match action.kind {
        ActionKind::Move => "move",
        ActionKind::Plant => "plant",
        ActionKind::Defuse => "defuse",
    };
    let direction = match action.direction {
        Direction::North => "north",
        Direction::East => "east",
        Direction::South => "south",
        Direction::West => "west",
    };
    format!("agent {} {kind} {direction}", action.agent.get())
}
