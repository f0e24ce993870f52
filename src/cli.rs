//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the triage orchestrator.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Triage Orchestrator - resilient capability aggregation for patient triage
///
/// Fans an intake out to transcription, triage, translation, history, vitals
/// and insurance providers, and drives persona hand-offs in caller sessions.
#[derive(Parser, Debug)]
#[command(name = "triage-orchestrator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, env = "TRIAGE_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Aggregate one intake and print the composite result as JSON
    Triage(TriageArgs),

    /// Run an interactive persona session on stdin
    Session {
        /// Persona entered on start (overrides session.starting_persona)
        #[arg(long)]
        persona: Option<String>,
    },

    /// Inspect personas
    Personas {
        #[command(subcommand)]
        subcommand: PersonasSubcommand,
    },

    /// List configured capability providers
    Capabilities {
        /// Probe each provider's health endpoint
        #[arg(long)]
        probe: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Intake sources for the `triage` command
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TriageArgs {
    /// Typed symptoms (text intake)
    #[arg(short, long)]
    pub symptoms: Option<String>,

    /// Audio file to transcribe
    #[arg(short, long)]
    pub audio: Option<PathBuf>,

    /// JSON intake file ({audio, symptoms, language, patient_id}); "-" reads stdin
    #[arg(long, conflicts_with_all = ["symptoms", "audio"])]
    pub intake: Option<String>,

    /// Language hint ("auto" lets transcription detect it)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Patient identifier for insurance verification
    #[arg(long)]
    pub patient_id: Option<String>,

    /// Run capabilities one at a time in the configured order
    #[arg(long)]
    pub sequential: bool,

    /// Use mock providers for every capability
    #[arg(long)]
    pub mock: bool,

    /// Pretty-print the JSON result
    #[arg(long)]
    pub pretty: bool,
}

/// Persona subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PersonasSubcommand {
    /// List registered personas
    List,

    /// Show one persona in full
    Show {
        /// Persona name (e.g. triage, support, billing)
        name: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show,

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration
    Validate,
}
