//! Triage Orchestrator
//!
//! Entry point for the `triage-orchestrator` binary. Command results go to
//! stdout; logs and errors go to stderr.

mod cli;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use triage_orchestrator::capability::{CapabilityHealth, CapabilityRegistry};
use triage_orchestrator::config::{self, AggregationMode, OrchestratorConfig};
use triage_orchestrator::error::{Error, Result};
use triage_orchestrator::logging;
use triage_orchestrator::orchestrator::{Aggregator, Intake, IntakeRequest};
use triage_orchestrator::session::{
    ChannelDelegate, PersonaRegistry, Session, SessionEvent, Transition,
};
use triage_orchestrator::types::CapabilityKind;
use triage_orchestrator::version;

use crate::cli::{Cli, Commands, ConfigSubcommand, PersonasSubcommand, TriageArgs};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't need the full logging setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone(), cli.config.as_deref());
        }
        _ => {}
    }

    let config = OrchestratorConfig::load(cli.config.as_deref())?;

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting triage orchestrator"
    );

    match cli.command {
        Commands::Triage(args) => build_runtime()?.block_on(run_triage(config, args)),
        Commands::Session { persona } => build_runtime()?.block_on(run_session(config, persona)),
        Commands::Personas { subcommand } => handle_personas_command(&config, subcommand),
        Commands::Capabilities { probe } => {
            build_runtime()?.block_on(list_capabilities(&config, probe))
        }
        // Handled above
        Commands::Version | Commands::Config { .. } => Ok(()),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("triage-orchestrator")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

// ─────────────────────────────────────────────────────────────────
// triage
// ─────────────────────────────────────────────────────────────────

async fn run_triage(mut config: OrchestratorConfig, args: TriageArgs) -> Result<()> {
    if args.mock {
        config.capabilities = config.capabilities.all_mock();
    }
    if args.sequential {
        config.aggregation.mode = AggregationMode::Sequential;
    }

    let intake = read_intake(&args, &config.service.default_language)?;
    let aggregator = Aggregator::from_config(&config)?;

    // Ctrl+C abandons in-flight calls; the result is still printed in full
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning in-flight capability calls");
            on_signal.cancel();
        }
    });

    let composite = aggregator.aggregate_with_cancel(&intake, cancel).await;
    let json = if args.pretty {
        serde_json::to_string_pretty(&composite)?
    } else {
        serde_json::to_string(&composite)?
    };
    println!("{}", json);

    aggregator
        .flush(Duration::from_millis(config.persistence.timeout_ms))
        .await;
    Ok(())
}

/// Build the intake from a JSON document or from individual flags
fn read_intake(args: &TriageArgs, default_language: &str) -> Result<Intake> {
    if let Some(source) = &args.intake {
        let json = if source == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            std::fs::read_to_string(source).map_err(|e| Error::IoRead {
                path: PathBuf::from(source),
                source: e,
            })?
        };

        let mut request = IntakeRequest::from_json(&json)?;
        if args.language.is_some() {
            request.language = args.language.clone();
        }
        if args.patient_id.is_some() {
            request.patient_id = args.patient_id.clone();
        }
        return request.into_intake(default_language);
    }

    let audio = match &args.audio {
        Some(path) => Some(std::fs::read(path).map_err(|e| Error::IoRead {
            path: path.clone(),
            source: e,
        })?),
        None => None,
    };

    Intake::new(
        audio,
        args.symptoms.clone(),
        args.language.clone(),
        args.patient_id.clone(),
        default_language,
    )
}

// ─────────────────────────────────────────────────────────────────
// session
// ─────────────────────────────────────────────────────────────────

enum SessionControl {
    Continue,
    Quit,
}

async fn run_session(config: OrchestratorConfig, persona: Option<String>) -> Result<()> {
    let registry = Arc::new(PersonaRegistry::load(config.persona_dir().as_deref())?);

    let mut settings = config.session.clone();
    if let Some(persona) = persona {
        settings.starting_persona = persona;
    }

    let (delegate, mut events) = ChannelDelegate::new();
    let mut session = Session::new(registry, &settings)?.with_delegate(Arc::new(delegate));

    let started = session.start().await?;
    println!("Session {} started with {}", session.id(), started.to);
    print_events(&mut events);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_session_line(&mut session, line).await {
            Ok(SessionControl::Continue) => {}
            Ok(SessionControl::Quit) => break,
            Err(e) => eprintln!("error: {}", e),
        }
        print_events(&mut events);
    }

    session.end();
    println!("Session {} ended", session.id());
    Ok(())
}

async fn handle_session_line(session: &mut Session, line: &str) -> Result<SessionControl> {
    let Some(command) = line.strip_prefix('/') else {
        session.add_user_message(line)?;
        return Ok(SessionControl::Continue);
    };

    let (command, arg) = command
        .split_once(char::is_whitespace)
        .map(|(c, a)| (c, a.trim()))
        .unwrap_or((command, ""));

    match command {
        "transfer" => report_transition(session.transfer(arg).await?),
        "tool" => report_transition(session.handle_tool_call(arg).await?),
        "assistant" => {
            session.add_assistant_message(arg)?;
        }
        "context" => {
            let name = if arg.is_empty() {
                session.active_name().unwrap_or_default().to_string()
            } else {
                arg.to_string()
            };
            match session.context(&name) {
                Some(context) => {
                    for item in context.items() {
                        println!("  {}", item);
                    }
                }
                None => println!("  (no context for {})", name),
            }
        }
        "personas" => {
            let active = session.active_name().unwrap_or_default().to_string();
            for persona in session.registry().iter() {
                let marker = if persona.name == active { "*" } else { " " };
                println!("{} {:<10} {}", marker, persona.name, persona.display_name);
            }
        }
        "state" => println!(
            "{} (previous: {})",
            session.state(),
            session.previous_persona().unwrap_or("-")
        ),
        "quit" | "exit" => return Ok(SessionControl::Quit),
        "help" => print_session_help(),
        other => eprintln!("unknown command: /{} (try /help)", other),
    }

    Ok(SessionControl::Continue)
}

fn report_transition(transition: Option<Transition>) {
    match transition {
        Some(t) => println!(
            "Transferred {} -> {} ({} items carried)",
            t.from.as_deref().unwrap_or("-"),
            t.to,
            t.carried_items
        ),
        None => println!("No transfer"),
    }
}

fn print_events(events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Attributes { attributes, .. } => {
                let pairs: Vec<String> = attributes
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                println!("[attributes] {}", pairs.join(" "));
            }
            SessionEvent::Announcement { persona, text } => println!("[{}] {}", persona, text),
            SessionEvent::ReplyRequested { persona, context_len } => {
                println!("[reply requested] {} ({} items)", persona, context_len)
            }
        }
    }
}

fn print_session_help() {
    println!("Lines without a leading '/' are user messages.");
    println!("  /transfer <persona>   hand the caller to another persona");
    println!("  /tool <name>          record a tool call (transfer_to_<persona> transfers)");
    println!("  /assistant <text>     record an assistant reply");
    println!("  /context [persona]    print a persona's context");
    println!("  /personas             list personas");
    println!("  /state                show session state");
    println!("  /quit                 end the session");
}

// ─────────────────────────────────────────────────────────────────
// personas, capabilities, config
// ─────────────────────────────────────────────────────────────────

fn handle_personas_command(config: &OrchestratorConfig, subcommand: PersonasSubcommand) -> Result<()> {
    let registry = PersonaRegistry::load(config.persona_dir().as_deref())?;

    match subcommand {
        PersonasSubcommand::List => {
            for persona in registry.iter() {
                let marker = if persona.name == config.session.starting_persona {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<10} {:<30} -> {}",
                    marker,
                    persona.name,
                    persona.display_name,
                    persona.transfers.join(", ")
                );
            }
        }
        PersonasSubcommand::Show { name } => {
            let persona = registry.require(&name)?;
            println!("Name:         {}", persona.name);
            println!("Display name: {}", persona.display_name);
            println!("Description:  {}", persona.description);
            println!("Transfers:    {}", persona.transfers.join(", "));
            println!("Tools:        {}", persona.transfer_tools().join(", "));
            println!("Hand-off:     {}", persona.handoff_message);
            println!("Speech in:    {}", persona.bindings.speech_in);
            println!("Reasoning:    {}", persona.bindings.reasoning);
            println!("Speech out:   {}", persona.bindings.speech_out);
            if let Some(vad) = &persona.bindings.voice_activity {
                println!("VAD:          {}", vad);
            }
            println!();
            println!("{}", persona.instructions.trim());
        }
    }

    Ok(())
}

async fn list_capabilities(config: &OrchestratorConfig, probe: bool) -> Result<()> {
    let registry = CapabilityRegistry::from_config(&config.capabilities)?;

    for kind in CapabilityKind::all() {
        let settings = config.capabilities.get(*kind);
        let mut line = format!(
            "{:<14} {:<9} {}",
            kind.name(),
            settings.provider.as_str(),
            settings.endpoint.as_deref().unwrap_or("-")
        );

        if probe {
            let health = match registry.get(*kind) {
                Some(client) => {
                    match tokio::time::timeout(settings.timeout(), client.health_check()).await {
                        Ok(Ok(health)) => health,
                        Ok(Err(e)) => CapabilityHealth::down(e.to_string()),
                        Err(_) => CapabilityHealth::down("probe timed out"),
                    }
                }
                None => CapabilityHealth::down("not registered"),
            };

            if health.operational {
                let latency = health
                    .latency_ms
                    .map(|ms| format!(" ({}ms)", ms))
                    .unwrap_or_default();
                line.push_str(&format!("  up{}", latency));
            } else {
                line.push_str(&format!(
                    "  down: {}",
                    health.error.as_deref().unwrap_or("unknown")
                ));
            }
        }

        println!("{}", line);
    }

    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand, config_path: Option<&str>) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let cfg = OrchestratorConfig::load(config_path)?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate => {
            let cfg = OrchestratorConfig::load(config_path)?;

            // The starting persona must exist in the registry the session will use
            PersonaRegistry::load(cfg.persona_dir().as_deref())?
                .require(&cfg.session.starting_persona)?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
