//! tfengine CLI - Runs the execution engine behind a stdio transport or as a
//! one-shot command.

mod commands;
mod config;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::Result;

use crate::logging::LogFormat;

#[derive(Parser)]
#[command(name = "tfengine")]
#[command(
    author,
    version,
    about = "Runs Terraform on behalf of an orchestrator and streams its output"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine configuration file (JSON)
    #[arg(short = 'c', long, global = true, env = "TFENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `tfengine_engine=debug`
    #[arg(long, global = true, env = "TFENGINE_LOG")]
    log_level: Option<String>,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "text",
        env = "TFENGINE_LOG_FORMAT"
    )]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve engine requests as JSON lines over stdin and stdout
    Serve,

    /// Run a single command and stream its output
    Run {
        /// Working directory for the command
        #[arg(short = 'C', long)]
        working_dir: Option<PathBuf>,

        /// Environment override (repeatable)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = commands::run::parse_env_pair)]
        env: Vec<(String, String)>,

        /// Do not report a failing exit code
        #[arg(short, long)]
        quiet: bool,

        /// Command followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run the plugin-level initialization
    Init,

    /// Run the plugin-level shutdown
    Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    logging::init(cli.log_level.as_deref(), cli.log_format)?;
    let engine_config = config::load(cli.config.as_deref())?;
    let engine = tfengine_engine::Engine::new(engine_config);

    match cli.command {
        Commands::Serve => commands::serve::execute(engine).await,

        Commands::Run {
            working_dir,
            env,
            quiet,
            command,
        } => commands::run::execute(&engine, command, working_dir, env, quiet).await,

        Commands::Init => commands::lifecycle::initialize(&engine).await,

        Commands::Shutdown => commands::lifecycle::shutdown(&engine).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_trailing_args() {
        let cli = Cli::try_parse_from([
            "tfengine",
            "run",
            "-e",
            "TF_LOG=debug",
            "--",
            "terraform",
            "plan",
            "-no-color",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { command, env, .. } => {
                assert_eq!(command, vec!["terraform", "plan", "-no-color"]);
                assert_eq!(env, vec![("TF_LOG".to_string(), "debug".to_string())]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["tfengine", "run"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tfengine", "serve", "--log-format", "json"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
