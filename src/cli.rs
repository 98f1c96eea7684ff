//! CLI interface for adaptation-engine

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::adaptation::{build_fossilization_alerts, render_alerts, AdaptationEngine, AdaptationProfile};
use crate::config::{self, Config};
use crate::ledger::InterventionSource;
use crate::store::SqliteStore;
use crate::types::ErrorEvent;

#[derive(Parser)]
#[command(name = "adaptation-engine")]
#[command(about = "Error pattern clustering, fossilization tiers and content weights for language learners", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true, env = "ADAPTATION_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and print a learner's adaptation profile
    Profile {
        #[arg(short, long)]
        learner: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print fossilization alerts as they would appear in a tutor prompt
    Alerts {
        #[arg(short, long)]
        learner: String,
    },
    /// Record an intervention against a currently surfaced pattern
    Record {
        #[arg(short, long)]
        learner: String,
        /// Pattern key, e.g. "grammar|verb_conjugation"
        #[arg(short, long)]
        pattern: String,
        #[arg(short, long, value_enum)]
        source: SourceArg,
    },
    /// Measure outcomes of stale interventions now
    Measure {
        #[arg(short, long)]
        learner: String,
    },
    /// Load error events from a JSON array
    Ingest {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Content,
    Workshop,
    Tutor,
}

impl From<SourceArg> for InterventionSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Content => InterventionSource::ContentSelection,
            SourceArg::Workshop => InterventionSource::WorkshopSelection,
            SourceArg::Tutor => InterventionSource::TutorPrompt,
        }
    }
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_file = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };
    let mut config = Config::load_from(&config_file)?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Commands::Profile { learner, json } => {
            let engine = open_engine(config).await?;
            let profile = engine.get_adaptation_profile(&learner).await
                .with_context(|| format!("Failed to compute profile for {}", learner))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                print_profile(&profile);
            }
        }
        Commands::Alerts { learner } => {
            let engine = open_engine(config).await?;
            let profile = engine.get_adaptation_profile(&learner).await?;
            let alerts = build_fossilization_alerts(&profile);
            if alerts.is_empty() {
                println!("No fossilizing patterns for {}.", learner);
            } else {
                print!("{}", render_alerts(&alerts));
            }
        }
        Commands::Record { learner, pattern, source } => {
            let engine = open_engine(config).await?;
            let profile = engine.get_adaptation_profile(&learner).await?;
            let Some(priority) = profile.priority(&pattern) else {
                bail!("Pattern '{}' is not currently surfaced for {}. Run 'adaptation-engine profile --learner {}' to list patterns.", pattern, learner, learner);
            };
            match engine.record_intervention(&learner, priority, source.into()).await {
                Some(record) => println!(
                    "Recorded {} intervention {} on {} (tier {}, frequency {}%)",
                    record.source, record.id, record.pattern_key, record.tier.level(), record.frequency_at_intervention
                ),
                None => bail!("Failed to record intervention; see log output"),
            }
        }
        Commands::Measure { learner } => {
            let engine = open_engine(config).await?;
            let measured = engine.measure_outcomes(&learner).await?;
            println!("Measured {} intervention(s) for {}.", measured, learner);
        }
        Commands::Ingest { file } => {
            let contents = tokio::fs::read_to_string(&file).await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let events: Vec<ErrorEvent> = serde_json::from_str(&contents)
                .context("Expected a JSON array of error events")?;
            let store = SqliteStore::new(&config.database_path).await
                .context("Failed to open database")?;
            let inserted = store.insert_events(&events).await?;
            println!(
                "Inserted {} of {} event(s) into {}",
                inserted,
                events.len(),
                config.database_path.display()
            );
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                println!("# {}", config_file.display());
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Init { force } => {
                if config_file.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", config_file.display());
                }
                Config::default().save_to(&config_file)?;
                println!("Wrote default configuration to {}", config_file.display());
            }
        },
    }

    Ok(())
}

async fn open_engine(config: Config) -> Result<AdaptationEngine> {
    AdaptationEngine::from_config(config).await
        .context("Failed to initialize adaptation engine")
}

fn print_profile(profile: &AdaptationProfile) {
    println!("Learner:      {}", profile.learner_id);
    println!("Highest tier: {} ({})", profile.highest_tier.level(), profile.highest_tier);
    println!("Clustering:   {}", profile.clustering);
    println!();

    if profile.priorities.is_empty() {
        println!("No patterns above the nudge threshold.");
    } else {
        println!("{:<40} {:>5} {:>5} {:<11} {:>13}", "PATTERN", "FREQ", "TIER", "TREND", "INTERVENTIONS");
        for p in &profile.priorities {
            println!(
                "{:<40} {:>4}% {:>5} {:<11} {:>9} ({} ok)",
                p.pattern_key,
                p.frequency,
                p.tier.level(),
                p.trend.to_string(),
                p.intervention_count,
                p.intervention_successes
            );
        }
    }

    let c = &profile.content_weights;
    let w = &profile.workshop_weights;
    println!();
    println!("Content weights:   unseen {:.2}  weak {:.2}  fossilizing {:.2}  random {:.2}", c.unseen, c.weak, c.fossilizing, c.random);
    println!("Challenge weights: unseen {:.2}  weak {:.2}  fossilizing {:.2}  random {:.2}", w.unseen, w.weak, w.fossilizing, w.random);
}
