pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::approval::ApprovalCommand;
use commands::CommandResult;
use fintrack_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "fintrack",
    about = "Fintrack approval workflow operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness, and drive approval requests.",
    after_help = "Examples:\n  fintrack migrate\n  fintrack doctor --json\n  fintrack approvals pending --tenant acme --principal u-sup --role supervisor"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Create, decide, and query approval requests")]
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommand,
    },
}

pub fn run() -> ExitCode {
    let result = execute(Cli::parse());
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub fn execute(cli: Cli) -> CommandResult {
    match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            CommandResult { exit_code, output }
        }
        Command::Approvals { command } => {
            let config = match AppConfig::load(LoadOptions::default()) {
                Ok(config) => config,
                Err(error) => {
                    return CommandResult::failure(
                        "approvals",
                        "config_validation",
                        format!("configuration issue: {error}"),
                        2,
                    );
                }
            };
            fintrack_engine::init_logging(&config);
            commands::approval::run(config, command)
        }
    }
}
