//! CLI argument definitions for Sprintplanner.

use clap::{ArgAction, Parser, Subcommand};

pub fn package_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Short commit hash the binary was built from, or "unknown".
pub fn git_commit() -> &'static str {
    env!("SP_GIT_COMMIT")
}

pub fn build_timestamp() -> &'static str {
    env!("SP_BUILD_TIMESTAMP")
}

/// Sprintplanner - feature and story planning against Azure DevOps boards.
///
/// Every request goes through the same bridge the board overlay uses: the
/// trigger is placed on a board page, the overlay is opened, and the command
/// is sent once the handshake completes.
#[derive(Parser, Debug)]
#[command(name = "sp")]
#[command(author, version, about = "Plan features and stories on Azure DevOps boards", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Increase log verbosity (-v info, -vv debug). SP_LOG takes precedence.
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Azure DevOps organization (also SP_ORGANIZATION)
    #[arg(long = "org", global = true)]
    pub organization: Option<String>,

    /// Project name (also SP_PROJECT)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Service root, e.g. https://dev.azure.com (also SP_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Personal access token. Prefer SP_ADO_TOKEN or `sp config set-token`.
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the top-level area roots, then the configured favorites among them
    Areas,

    /// List program increments with the current and next ones picked for today
    Iterations,

    /// Fetch features under an area root and their child stories
    Data {
        /// Area root path, e.g. "Fabrikam Fiber\Checkout"
        #[arg(long)]
        area: String,

        /// Program increment root path. Defaults to the current increment.
        #[arg(long)]
        pi: Option<String>,
    },

    /// Move a work item to another iteration
    SetIteration {
        /// Work item ID
        id: u64,
        /// Target iteration path
        iteration_path: String,
    },

    /// Replace the test tags of a work item
    ///
    /// Tags not selected are removed; unrelated tags are kept.
    SetTests {
        /// Work item ID
        id: u64,

        /// Tag the item for system integration testing
        #[arg(long)]
        sit: bool,

        /// Tag the item for user acceptance testing
        #[arg(long)]
        uat: bool,

        /// Tag the item for end-to-end testing
        #[arg(long)]
        e2e: bool,
    },

    /// Print the edit page URL of a work item
    Open {
        /// Work item ID
        id: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show version and build information
    Version,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration and where each value came from
    Show,

    /// Set a configuration value in config.kdl
    Set {
        /// Configuration key (see `sp config show`)
        key: String,
        /// Configuration value
        value: String,
    },

    /// Store the personal access token in state.kdl
    SetToken {
        /// Personal access token
        token: String,
    },

    /// Remove the stored personal access token
    ClearToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sp", "areas", "-H", "-vv", "--org", "contoso"]).unwrap();
        assert!(cli.human_readable);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.organization.as_deref(), Some("contoso"));
        assert!(matches!(cli.command, Commands::Areas));
    }

    #[test]
    fn test_set_tests_flags() {
        let cli = Cli::try_parse_from(["sp", "set-tests", "42", "--sit", "--e2e"]).unwrap();
        match cli.command {
            Commands::SetTests { id, sit, uat, e2e } => {
                assert_eq!(id, 42);
                assert!(sit && e2e && !uat);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_data_requires_area() {
        assert!(Cli::try_parse_from(["sp", "data"]).is_err());
        let cli = Cli::try_parse_from(["sp", "data", "--area", "P\\A"]).unwrap();
        assert!(matches!(cli.command, Commands::Data { pi: None, .. }));
    }

    #[test]
    fn test_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["sp", "open", "abc"]).is_err());
    }
}
