pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "caseflow",
    about = "Caseflow operator CLI",
    long_about = "Run conversation turns through the workflow engine, inspect persisted run \
                  snapshots, and check runtime readiness.",
    after_help = "Examples:\n  caseflow run --conversation-id 12345 --dry-run\n  caseflow runs\n  caseflow inspect <run-id>\n  caseflow doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Execute one conversation turn against the configured services")]
    Run {
        #[arg(long, help = "Ticketing conversation id to answer")]
        conversation_id: String,
        #[arg(long, help = "Skip all ticketing write operations")]
        dry_run: bool,
        #[arg(long, help = "Response mode override (ticket|slack)")]
        mode: Option<String>,
    },
    #[command(about = "List persisted run snapshots, newest first")]
    Runs,
    #[command(about = "Print one persisted run snapshot in full")]
    Inspect {
        #[arg(help = "Run id of the snapshot to print")]
        run_id: String,
    },
    #[command(about = "Inspect effective configuration values with secret redaction")]
    Config,
    #[command(about = "Validate config, template contracts, and snapshot-dir readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { conversation_id, dry_run, mode } => {
            commands::run::run(&conversation_id, dry_run, mode.as_deref())
        }
        Command::Runs => commands::runs::run(),
        Command::Inspect { run_id } => commands::inspect::run(&run_id),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
