//! # Policy Bridge CLI
//!
//! Operator tool over a local bridge: inspect the tiers, install and remove
//! rule vectors, and run one-off enforcement calls.
//!
//! Usage:
//!   policy-bridge stats
//!   policy-bridge get <rule_id>
//!   policy-bridge list
//!   policy-bridge install <rules.json>
//!   policy-bridge remove <rule_id>
//!   policy-bridge enforce <intent.json> <bindings.json>
//!   policy-bridge hitlog [--limit N]

use clap::{Parser, Subcommand};
use policy_bridge::telemetry::current_sessions;
use policy_bridge::{Bridge, BridgeConfig, IntentVector, RuleBinding, RuleVector, StorageConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "policy-bridge")]
#[command(about = "Inspect and drive the tiered rule-vector store", long_about = None)]
struct Cli {
    /// Directory holding warm_storage.bin and cold_storage.db
    /// (overrides POLICY_BRIDGE_WARM_PATH / POLICY_BRIDGE_COLD_PATH)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-tier counts and hit statistics
    Stats,

    /// Print one rule vector as JSON
    Get {
        rule_id: String,
    },

    /// List every installed rule id
    List,

    /// Install rule vectors from a JSON file (one vector or an array)
    Install {
        path: PathBuf,
    },

    /// Remove a rule from every tier
    Remove {
        rule_id: String,
    },

    /// Evaluate an intent against rule bindings
    Enforce {
        /// JSON intent: {"action": [...], "resource": [...], "data": [...], "risk": [...]}
        intent: PathBuf,

        /// JSON array of {"boundary_id", "rule_id", "decision", "priority"}
        bindings: PathBuf,
    },

    /// Show the most recent audited enforcement sessions
    Hitlog {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    One(RuleVector),
    Many(Vec<RuleVector>),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("policy_bridge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = BridgeConfig::from_env()?;
    if let Some(dir) = &cli.data_dir {
        let storage = StorageConfig::in_dir(dir);
        config.storage.warm_storage_path = storage.warm_storage_path;
        config.storage.cold_storage_path = storage.cold_storage_path;
    }

    if let Commands::Hitlog { limit } = cli.command {
        return show_hitlog(Path::new(&config.telemetry.hitlog_dir), limit);
    }

    let bridge = Bridge::new(config)?;

    match cli.command {
        Commands::Stats => {
            print_json(&bridge.storage_stats()?)?;
            if let Some(stats) = bridge.telemetry_stats() {
                print_json(&stats)?;
            }
        }

        Commands::Get { rule_id } => match bridge.get_rule_vector(&rule_id)? {
            Some(vector) => print_json(&vector)?,
            None => {
                eprintln!("rule '{}' not found", rule_id);
                std::process::exit(1);
            }
        },

        Commands::List => {
            for rule_id in bridge.list_rule_ids()? {
                println!("{}", rule_id);
            }
        }

        Commands::Install { path } => {
            let vectors = match read_json::<RuleFile>(&path)? {
                RuleFile::One(vector) => vec![vector],
                RuleFile::Many(vectors) => vectors,
            };
            let report = bridge.install_rules_batch(vectors)?;
            println!(
                "installed {} rules ({} demoted from hot, {} overflowed to cold)",
                report.installed.len(),
                report.demoted.len(),
                report.overflowed_to_cold.len()
            );
        }

        Commands::Remove { rule_id } => {
            if bridge.remove_rule(&rule_id)? {
                println!("removed {}", rule_id);
            } else {
                println!("{} was not installed", rule_id);
            }
        }

        Commands::Enforce { intent, bindings } => {
            let intent: IntentVector = read_json(&intent)?;
            let bindings: Vec<RuleBinding> = read_json(&bindings)?;
            print_json(&bridge.enforce(&intent, &bindings))?;
        }

        Commands::Hitlog { .. } => {}
    }

    Ok(())
}

fn show_hitlog(dir: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = current_sessions(dir)?;
    let start = sessions.len().saturating_sub(limit);

    for session in &sessions[start..] {
        println!(
            "{}  {:<8} {:>4} rules  {:>6}us  {}",
            session.session_id,
            session.decision.to_string(),
            session.rules_evaluated,
            session.duration_us,
            session.matched_rule.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
