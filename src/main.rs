//! Sprintplanner CLI - feature and story planning against Azure DevOps boards.

use clap::Parser;
use sprintplanner::cli::{Cli, Commands, ConfigCommands};
use sprintplanner::commands::{self, Output, Settings};
use sprintplanner::config::{ConfigOverrides, ConfigStore, OutputFormat};
use std::process;
use tracing_subscriber::EnvFilter;

/// Log filter environment variable; overrides `-v`.
const LOG_ENV: &str = "SP_LOG";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = overrides_from(&cli);
    let settings = ConfigStore::from_env().and_then(|store| Settings::load(store, &overrides));
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => exit_with(&e, cli.human_readable),
    };
    let human = cli.human_readable || settings.config.output_format() == OutputFormat::Human;

    if let Err(e) = run_command(cli.command, &settings, human).await {
        exit_with(&e, human);
    }
}

/// Log to stderr; `SP_LOG` wins over the verbosity flag.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialized");
    }
}

fn overrides_from(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref org) = cli.organization {
        overrides = overrides.with_organization(org);
    }
    if let Some(ref project) = cli.project {
        overrides = overrides.with_project(project);
    }
    if let Some(ref url) = cli.base_url {
        overrides = overrides.with_base_url(url);
    }
    if let Some(ref token) = cli.token {
        overrides = overrides.with_token(token);
    }
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    overrides
}

fn exit_with(e: &sprintplanner::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

async fn run_command(
    command: Commands,
    settings: &Settings,
    human: bool,
) -> Result<(), sprintplanner::Error> {
    match command {
        Commands::Areas => output(&commands::areas(settings).await?, human),
        Commands::Iterations => output(&commands::iterations(settings).await?, human),
        Commands::Data { area, pi } => {
            let result = commands::data(settings, &area, pi.as_deref()).await?;
            output(&result, human);
        }
        Commands::SetIteration { id, iteration_path } => {
            let result = commands::set_iteration(settings, id, &iteration_path).await?;
            output(&result, human);
        }
        Commands::SetTests { id, sit, uat, e2e } => {
            let result = commands::set_tests(settings, id, sit, uat, e2e).await?;
            output(&result, human);
        }
        Commands::Open { id } => output(&commands::open(settings, id).await?, human),
        Commands::Config { command } => match command {
            ConfigCommands::Show => output(&commands::config_show(settings), human),
            ConfigCommands::Set { key, value } => {
                output(&commands::config_set(&settings.store, &key, &value)?, human);
            }
            ConfigCommands::SetToken { token } => {
                output(&commands::config_set_token(&settings.store, &token)?, human);
            }
            ConfigCommands::ClearToken => {
                output(&commands::config_clear_token(&settings.store)?, human);
            }
        },
        Commands::Version => output(&commands::version(), human),
    }
    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
