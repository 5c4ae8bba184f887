//! CLI entrypoint for puppet-link
//!
//! This is the main binary that wires together all layers: it loads the
//! configuration, starts the reactor and HTTP transport, and hands them to
//! the adapters each subcommand needs.

mod commands;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use puppet_infrastructure::{ConfigLoader, FileConfig, Severity};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "puppet-link", version, about = "Speech, chat-completion and live chat for a streaming puppet")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Give up on one-shot commands after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 60, global = true)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the configured chat channel and print its messages
    Chat {
        /// Answer messages that mention the bot through chat completion
        #[arg(long)]
        respond: bool,
    },
    /// Transcribe a 16 kHz mono PCM WAV file
    Transcribe {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Synthesize speech into a file
    Speak {
        text: String,
        /// Where to write the audio
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Ask the chat-completion service one question
    Complete { prompt: String },
    /// Show configuration sources, issues and the merged result
    Config,
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    info!("Starting puppet-link");

    let config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Command::Config = cli.command {
        return commands::show_config(&config, cli.config.as_deref());
    }

    check_config(&config)?;
    let timeout = Duration::from_secs(cli.timeout);
    let services = commands::Services::new(config)?;

    match cli.command {
        Command::Chat { respond } => commands::chat(&services, respond),
        Command::Transcribe { file } => commands::transcribe(&services, &file, timeout),
        Command::Speak { text, output } => commands::speak(&services, &text, &output, timeout),
        Command::Complete { prompt } => commands::complete(&services, &prompt, timeout),
        Command::Config => Ok(()),
    }
}

/// Log warnings; refuse to start on errors.
fn check_config(config: &FileConfig) -> Result<()> {
    let issues = config.validate();
    for issue in issues.iter().filter(|i| i.severity == Severity::Warning) {
        warn!("{}", issue);
    }
    if FileConfig::has_errors(&issues) {
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| format!("  {}", i))
            .collect();
        bail!("Configuration is invalid:\n{}", errors.join("\n"));
    }
    Ok(())
}
