// CLI module - User-facing command-line interface

pub mod output;

use crate::config::{Ecosystem, LoadReport};
use crate::error::{HerderError, Result};
use crate::process::{AppStatus, Supervisor};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// herder - supervise the apps declared in an ecosystem file
#[derive(Debug, Parser)]
#[command(name = "herder")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level for herder's own diagnostics (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Supervise the apps in the foreground until interrupted
    Run {
        /// Ecosystem file (.toml or .json)
        file: PathBuf,

        /// Only run the named app (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,
    },

    /// Check an ecosystem file and list its apps
    Validate {
        /// Ecosystem file (.toml or .json)
        file: PathBuf,
    },

    /// Print the normalized ecosystem file
    Show {
        /// Ecosystem file (.toml or .json)
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Toml)]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Toml,
    Json,
}

impl Cli {
    /// Install the tracing subscriber for herder's own logs
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        debug!(?self, "parsed CLI arguments");

        match self.command {
            Commands::Run { file, only } => run(&file, &only).await.map(|_| ()),
            Commands::Validate { file } => validate(&file),
            Commands::Show { file, format } => show(&file, format),
        }
    }
}

async fn run(file: &Path, only: &[String]) -> Result<Vec<AppStatus>> {
    let report = Ecosystem::from_file(file)?;
    output::print_rejected(&report.rejected);

    let specs = select_apps(report, only)?;
    if specs.is_empty() {
        return Err(HerderError::InvalidConfig(format!(
            "No runnable apps in {}",
            file.display()
        )));
    }

    let supervisor = Supervisor::start(specs);
    output::print_info(&format!(
        "Supervising {} app(s) from {}",
        supervisor.len(),
        file.display()
    ));

    tokio::select! {
        _ = supervisor.wait_all() => {
            info!("All apps reached a final state");
        }
        signal = shutdown_signal() => {
            info!("Received {}, stopping apps", signal);
        }
    }

    let statuses = supervisor.shutdown().await;
    output::print_status_table(&statuses);

    Ok(statuses)
}

fn validate(file: &Path) -> Result<()> {
    let report = Ecosystem::from_file(file)?;

    if !report.specs().is_empty() {
        output::print_spec_table(report.specs());
    }
    output::print_rejected(&report.rejected);

    if report.is_clean() {
        output::print_success_msg(&format!(
            "{} app(s) valid in {}",
            report.specs().len(),
            file.display()
        ));
        Ok(())
    } else {
        Err(HerderError::InvalidConfig(format!(
            "{} app(s) rejected in {}",
            report.rejected.len(),
            file.display()
        )))
    }
}

fn show(file: &Path, format: Format) -> Result<()> {
    let report = Ecosystem::from_file(file)?;
    output::print_rejected(&report.rejected);

    println!("{}", render(&report.ecosystem, format)?);

    Ok(())
}

fn render(ecosystem: &Ecosystem, format: Format) -> Result<String> {
    match format {
        Format::Toml => ecosystem.to_toml_string(),
        Format::Json => ecosystem.to_json_string(),
    }
}

/// Keep the accepted specs named in `only` (all of them when empty)
fn select_apps(
    report: LoadReport,
    only: &[String],
) -> Result<Vec<crate::config::ManagedProcessSpec>> {
    if let Some(missing) = only
        .iter()
        .find(|name| report.ecosystem.find(name).is_none())
    {
        return Err(HerderError::ProcessNotFound(missing.clone()));
    }

    Ok(report
        .ecosystem
        .apps
        .into_iter()
        .filter(|spec| only.is_empty() || only.iter().any(|name| name == spec.name()))
        .collect())
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            tracing::warn!("Failed to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return "Ctrl-C";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
