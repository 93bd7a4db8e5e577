// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! lanectl - thin operator CLI for the lane control daemon.
//!
//! Dispatch, completion, and task routing are driven entirely through the
//! file-dropped IPC mailboxes (`lanectl-ipc`); this binary only surfaces
//! daemon status and worker-run ledger state, plus daemon lifecycle
//! management (start/stop), over the minimal status socket.

mod client;
mod color;
mod daemon_process;
mod env;
mod output;
mod table;

use std::io::Write as _;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::DaemonClient;
use output::OutputFormat;
use table::{Column, Table};

#[derive(Parser)]
#[command(
    name = "lanectl",
    version,
    about = "lanectl - operator status and worker-run ledger inspection for lanectld"
)]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon-wide status: uptime, lane count, active container count
    Status,
    /// List every non-terminal worker-run ledger row
    Runs,
    /// Fetch a single ledger row by run_id (or unique prefix)
    Show {
        /// run_id or unique prefix
        run_id: String,
    },
    /// Daemon process management
    Daemon(DaemonArgs),
}

#[derive(clap::Args)]
struct DaemonArgs {
    #[command(subcommand)]
    command: DaemonCommand,
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start lanectld in the background if it isn't already running
    Start,
    /// Stop a running lanectld
    Stop,
    /// Report whether lanectld is running and reachable
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.output;

    match cli.command {
        Commands::Daemon(args) => daemon_command(args.command, format).await,
        Commands::Status => {
            let client = DaemonClient::connect_or_start().await?;
            print_status(&client.status().await?, format)
        }
        Commands::Runs => {
            let client = DaemonClient::connect_or_start().await?;
            print_runs(client.list_runs().await?, format)
        }
        Commands::Show { run_id } => {
            let client = DaemonClient::connect_or_start().await?;
            match client.get_run(&run_id).await? {
                Some(run) => print_run(&run, format),
                None => {
                    eprintln!("no worker run matching '{run_id}'");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn daemon_command(command: DaemonCommand, format: OutputFormat) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            let client = DaemonClient::connect_or_start().await?;
            client.ping().await?;
            println!("lanectld is running");
            Ok(())
        }
        DaemonCommand::Stop => {
            client::stop_daemon();
            println!("lanectld stopped");
            Ok(())
        }
        DaemonCommand::Status => {
            match DaemonClient::connect() {
                Ok(client) if client.ping().await.is_ok() => {
                    let version = client.version().await.unwrap_or_default();
                    match format {
                        OutputFormat::Text => println!("lanectld is running (version {version})"),
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::json!({"running": true, "version": version})
                        ),
                    }
                }
                _ => match format {
                    OutputFormat::Text => println!("lanectld is not running"),
                    OutputFormat::Json => {
                        println!("{}", serde_json::json!({"running": false}))
                    }
                },
            }
            Ok(())
        }
    }
}

fn print_status(status: &lanectl_daemon::StatusSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Text => {
            println!("uptime:             {}", humanize_secs(status.uptime_secs));
            println!("registered lanes:   {}", status.registered_lanes);
            println!("active containers:  {}", status.active_containers);
            println!("non-terminal runs:  {}", status.non_terminal_runs);
        }
    }
    Ok(())
}

fn print_runs(runs: Vec<lanectl_daemon::RunSummary>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        OutputFormat::Text => {
            let mut table = Table::new(vec![
                Column::left("RUN"),
                Column::left("LANE"),
                Column::status("STATUS"),
                Column::left("REPAIRS"),
                Column::muted("AGE"),
            ]);
            for run in &runs {
                table.row(vec![
                    short_id(&run.run_id),
                    run.lane_id.clone(),
                    format!("{:?}", run.status).to_lowercase(),
                    run.repair_attempts.to_string(),
                    output::format_time_ago(run.created_at_epoch_ms),
                ]);
            }
            let mut out = std::io::stdout();
            table.render(&mut out);
            let _ = out.flush();
            if runs.is_empty() {
                println!("no non-terminal worker runs");
            }
        }
    }
    Ok(())
}

fn print_run(run: &lanectl_daemon::RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(run)?);
        }
        OutputFormat::Text => {
            println!("run_id:       {}", run.run_id);
            println!("lane:         {}", run.lane_id);
            println!("phase:        {:?}", run.phase);
            println!("status:       {}", color::status(&format!("{:?}", run.status).to_lowercase()));
            println!("repairs:      {}", run.repair_attempts);
            println!("created:      {}", output::format_time_ago(run.created_at_epoch_ms));
            if let Some(completed) = run.completed_at_epoch_ms {
                println!("completed:    {}", output::format_time_ago(completed));
            }
        }
    }
    Ok(())
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn humanize_secs(secs: u64) -> String {
    let d = Duration::from_secs(secs);
    let days = d.as_secs() / 86_400;
    let hours = (d.as_secs() % 86_400) / 3_600;
    let mins = (d.as_secs() % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}
