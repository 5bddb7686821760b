// Output formatting and display for CLI

use crate::config::{ManagedProcessSpec, Rejected};
use crate::process::{AppStatus, ProcessState};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print every rejected app entry to stderr
pub fn print_rejected(rejected: &[Rejected]) {
    for entry in rejected {
        eprintln!(
            "{} {}: {}",
            "✗ Rejected".red().bold(),
            entry.label().cyan(),
            entry.error
        );
    }
}

/// Print a formatted table of validated specs
pub fn print_spec_table(specs: &[ManagedProcessSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Cwd")]
        cwd: String,
        #[tabled(rename = "Restart")]
        restart: String,
        #[tabled(rename = "Logs")]
        logs: String,
    }

    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| {
            let policy = spec.restart_policy();
            let logging = spec.logging();
            SpecRow {
                name: truncate(spec.name(), 20),
                command: truncate(&spec.command_line(), 40),
                cwd: spec.cwd().display().to_string(),
                restart: if policy.autorestart {
                    format!(
                        "max {} / {}",
                        policy.max_restarts,
                        format_duration(&policy.restart_delay)
                    )
                } else {
                    "off".to_string()
                },
                logs: if logging.merge_logs {
                    format!("{} (merged)", logging.out_file.display())
                } else {
                    format!(
                        "{}\n{}",
                        logging.out_file.display(),
                        logging.error_file.display()
                    )
                },
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Print the final status of each supervised app
pub fn print_status_table(statuses: &[AppStatus]) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Spawns")]
        spawns: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last exit")]
        last_exit: String,
    }

    let rows: Vec<StatusRow> = statuses
        .iter()
        .map(|status| StatusRow {
            name: truncate(&status.name, 20),
            state: format_state_colored(status),
            spawns: format!("{}/{}", status.spawns, status.attempts),
            restarts: status.restarts.to_string(),
            last_exit: status
                .last_exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

fn format_state_colored(status: &AppStatus) -> String {
    let label = if status.exhausted {
        format!("{} (budget exhausted)", status.state)
    } else {
        status.state.to_string()
    };

    match status.state {
        ProcessState::Running => label.green().to_string(),
        ProcessState::Stopped if status.exhausted => label.yellow().to_string(),
        ProcessState::Stopped | ProcessState::Exited => label.dimmed().to_string(),
        ProcessState::RestartPending => label.yellow().to_string(),
        ProcessState::Errored => label.red().to_string(),
    }
}

/// Format a duration in a human-readable way
fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
