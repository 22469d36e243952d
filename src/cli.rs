use clap::{Args, Command, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use crate::{CorruptPolicy, command_name};

#[derive(Parser)]
#[command(author, version, about, color = clap::ColorChoice::Never)]
pub struct Cli {
    /// Disable styling and separators
    #[arg(long, global = true)]
    pub plain: bool,
    /// Use this profile store file instead of the default location
    #[arg(long, global = true, value_name = "path")]
    pub store: Option<PathBuf>,
    /// What to do with a store file that cannot be parsed
    #[arg(long, global = true, value_enum, default_value_t = CorruptPolicy::Discard)]
    pub on_corrupt: CorruptPolicy,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List saved profiles
    List,
    /// Save a new profile
    Add {
        /// Display name (unique, case-insensitive)
        #[arg(long)]
        name: String,
        /// Endpoint base URL (http or https)
        #[arg(long, value_name = "url")]
        base_url: String,
        /// API key sent as bearer token
        #[arg(long, value_name = "key")]
        api_key: String,
        #[command(flatten)]
        models: ModelArgs,
        /// Probe the endpoint first and only save if it answers
        #[arg(long)]
        test: bool,
    },
    /// Change fields of a saved profile
    Update {
        /// Profile name or id
        #[arg(value_name = "profile")]
        profile: String,
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// New base URL
        #[arg(long, value_name = "url")]
        base_url: Option<String>,
        /// New API key
        #[arg(long, value_name = "key")]
        api_key: Option<String>,
        #[command(flatten)]
        models: ModelArgs,
        /// Remove every model override before applying new ones
        #[arg(long)]
        clear_models: bool,
    },
    /// Delete a saved profile
    Delete {
        /// Profile name or id
        #[arg(value_name = "profile")]
        profile: String,
        /// Skip delete confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Switch the active profile
    Use {
        /// Profile name or id; omit to pick from a list
        #[arg(value_name = "profile", conflicts_with = "none")]
        profile: Option<String>,
        /// Deactivate profiles and fall back to other authentication
        #[arg(long)]
        none: bool,
    },
    /// Print environment variables for the active profile
    Env {
        /// Prepend this to every variable name
        #[arg(long, default_value = "")]
        prefix: String,
        /// Print as shell export statements
        #[arg(long)]
        export: bool,
    },
    /// Check that credentials reach the endpoint
    Test {
        /// Profile name or id; defaults to the active profile
        #[arg(value_name = "profile", conflicts_with_all = ["all", "base_url"])]
        profile: Option<String>,
        /// Probe this base URL instead of a saved profile
        #[arg(long, value_name = "url", requires = "api_key", conflicts_with = "all")]
        base_url: Option<String>,
        /// API key to use with --base-url
        #[arg(long, value_name = "key", requires = "base_url")]
        api_key: Option<String>,
        /// Probe every saved profile
        #[arg(long)]
        all: bool,
        /// Give up after this many milliseconds
        #[arg(long, value_name = "ms")]
        timeout_ms: Option<u64>,
    },
}

#[derive(Args, Clone, Debug, Default)]
pub struct ModelArgs {
    /// Default model
    #[arg(long, value_name = "model")]
    pub model: Option<String>,
    /// Model used for the haiku slot
    #[arg(long, value_name = "model")]
    pub haiku: Option<String>,
    /// Model used for the sonnet slot
    #[arg(long, value_name = "model")]
    pub sonnet: Option<String>,
    /// Model used for the opus slot
    #[arg(long, value_name = "model")]
    pub opus: Option<String>,
}

pub fn command_with_examples() -> Command {
    let name = command_name();
    let mut cmd = Cli::command();
    cmd.set_bin_name(name);
    cmd = cmd.after_help(examples_root(name));
    cmd
}

fn examples_root(name: &str) -> String {
    format!(
        "Examples:\n  {name} add --name Prod --base-url https://api.example.com --api-key <key> --test\n  {name} list\n  {name} use Prod\n  {name} env --prefix ANTHROPIC_ --export\n  {name} test --all\n  {name} delete Dev"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_add_with_models() {
        let cli = Cli::try_parse_from([
            "endpoint-profiles",
            "--plain",
            "add",
            "--name",
            "Prod",
            "--base-url",
            "https://api.example.com",
            "--api-key",
            "sk-ant-abcdefghij12",
            "--sonnet",
            "s-1",
            "--test",
        ])
        .unwrap();
        assert!(cli.plain);
        assert_eq!(cli.on_corrupt, CorruptPolicy::Discard);
        match cli.command {
            Commands::Add { name, models, test, .. } => {
                assert_eq!(name, "Prod");
                assert_eq!(models.sonnet.as_deref(), Some("s-1"));
                assert!(models.model.is_none());
                assert!(test);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn use_rejects_profile_with_none() {
        assert!(Cli::try_parse_from(["endpoint-profiles", "use", "Prod", "--none"]).is_err());
        assert!(Cli::try_parse_from(["endpoint-profiles", "use", "--none"]).is_ok());
    }

    #[test]
    fn test_raw_credentials_need_both_flags() {
        assert!(
            Cli::try_parse_from(["endpoint-profiles", "test", "--base-url", "http://x"]).is_err()
        );
        let cli = Cli::try_parse_from([
            "endpoint-profiles",
            "--on-corrupt",
            "backup",
            "test",
            "--base-url",
            "http://x",
            "--api-key",
            "k",
            "--timeout-ms",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.on_corrupt, CorruptPolicy::Backup);
        assert!(matches!(
            cli.command,
            Commands::Test {
                timeout_ms: Some(50),
                ..
            }
        ));
    }

    #[test]
    fn examples_use_command_name() {
        assert!(examples_root("ep").contains("ep use Prod"));
    }
}
