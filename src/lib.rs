use clap::{FromArgMatches, error::ErrorKind};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, command_with_examples};
use crate::commands::{ProfileEdits, TestTarget};

pub const LOG_ENV_VAR: &str = "ENDPOINT_PROFILES_LOG";

pub fn run_cli() {
    init_tracing();
    let args: Vec<std::ffi::OsString> = std::env::args_os().collect();
    if let Err(message) = run_cli_with_args(args) {
        eprintln!("{}", render_failure(&message));
        std::process::exit(1);
    }
}

/// Usage errors from clap arrive already formatted.
fn render_failure(message: &str) -> String {
    if message.starts_with("error:") {
        message.trim_end().to_string()
    } else {
        format_error(message)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_cli_with_args(args: Vec<std::ffi::OsString>) -> Result<(), String> {
    if args.len() == 1 {
        let name = package_command_name();
        println!("{name} {}", env!("CARGO_PKG_VERSION"));
        println!();
        let mut cmd = command_with_examples();
        let _ = cmd.print_help();
        println!();
        return Ok(());
    }
    let cmd = command_with_examples();
    let matches = match cmd.clone().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                return Ok(());
            }
            return Err(err.to_string());
        }
    };
    let cli = Cli::from_arg_matches(&matches).map_err(|err| err.to_string())?;
    set_plain(cli.plain);
    if let Err(message) = run(cli) {
        if message == CANCELLED_MESSAGE {
            let message = format_cancel(use_color_stdout());
            print_output_block(&message);
            return Ok(());
        }
        return Err(message);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), String> {
    let paths = resolve_paths(cli.store.as_deref())?;
    tracing::debug!(store = %paths.store.display(), "using profile store");
    let store = ProfileStore::new(paths).with_corrupt_policy(cli.on_corrupt);
    let service = ProfileService::new(store);

    match cli.command {
        Commands::List => commands::list_profiles(&service),
        Commands::Add {
            name,
            base_url,
            api_key,
            models,
            test,
        } => {
            let input = NewProfile {
                name,
                base_url,
                api_key,
                models: ModelSlots {
                    default: models.model,
                    haiku: models.haiku,
                    sonnet: models.sonnet,
                    opus: models.opus,
                }
                .normalized(),
            };
            commands::add_profile(&service, input, test)
        }
        Commands::Update {
            profile,
            name,
            base_url,
            api_key,
            models,
            clear_models,
        } => commands::update_profile(
            &service,
            &profile,
            ProfileEdits {
                name,
                base_url,
                api_key,
                models,
                clear_models,
            },
        ),
        Commands::Delete { profile, yes } => commands::delete_profile(&service, &profile, yes),
        Commands::Use { profile, none } => {
            commands::use_profile(&service, profile.as_deref(), none)
        }
        Commands::Env { prefix, export } => commands::print_env(&service, &prefix, export),
        Commands::Test {
            profile,
            base_url,
            api_key,
            all,
            timeout_ms,
        } => {
            let target = match (profile, base_url, api_key) {
                _ if all => TestTarget::All,
                (_, Some(base_url), Some(api_key)) => TestTarget::Raw { base_url, api_key },
                (Some(profile), _, _) => TestTarget::Profile(profile),
                (None, _, _) => TestTarget::Active,
            };
            commands::test_profiles(&service, target, timeout_ms)
        }
    }
}

mod cli;
mod commands;
mod common;
mod connection;
mod error;
mod messages;
mod service;
mod store;
#[cfg(test)]
mod test_utils;
mod ui;
mod validate;

pub(crate) use common::*;
pub(crate) use messages::*;
pub(crate) use ui::*;

pub use common::{HOME_ENV_VAR, Paths, resolve_paths};
pub use connection::{CancelToken, ConnectionTester, DEFAULT_TIMEOUT_MS, TestResult, test_connection};
pub use error::{ProfileError, ProfileResult};
pub use service::{
    ENV_AUTH_TOKEN, ENV_BASE_URL, ENV_DEFAULT_HAIKU_MODEL, ENV_DEFAULT_OPUS_MODEL,
    ENV_DEFAULT_SONNET_MODEL, ENV_MODEL, NewProfile, ProfileService, ProfileUpdate,
    apply_invariants, profile_environment,
};
pub(crate) use service::check_credentials;
pub use store::{
    CorruptPolicy, ModelSlots, Profile, ProfileCollection, ProfileStore, STORE_VERSION,
    generate_id, harden, parse_collection, parse_or_default,
};
pub(crate) use store::StoreLock;
pub use ui::mask_api_key;
pub use validate::{normalize_name, validate_api_key, validate_base_url, validate_name_unique};

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn run_cli_with_args_help() {
        run_cli_with_args(args(&["endpoint-profiles"])).unwrap();
    }

    #[test]
    fn run_cli_with_args_display_help() {
        run_cli_with_args(args(&["endpoint-profiles", "--help"])).unwrap();
    }

    #[test]
    fn run_cli_with_args_errors() {
        let err = run_cli_with_args(args(&["endpoint-profiles", "nope"])).unwrap_err();
        assert!(err.contains("error"));
    }

    #[test]
    fn render_failure_keeps_clap_errors() {
        let _env = crate::test_utils::set_env_guard("NO_COLOR", Some("1"));
        assert_eq!(
            render_failure("error: unexpected argument\n"),
            "error: unexpected argument"
        );
        assert_eq!(
            render_failure("Profile 'x' was not found."),
            "Error: Profile 'x' was not found."
        );
    }

    #[test]
    fn run_dispatches_against_explicit_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("nested").join("profiles.json");
        let store_arg = store.to_string_lossy().into_owned();
        let _plain = crate::test_utils::set_plain_guard(true);
        run_cli_with_args(args(&[
            "endpoint-profiles",
            "--plain",
            "--store",
            &store_arg,
            "add",
            "--name",
            "Prod",
            "--base-url",
            "https://api.example.com",
            "--api-key",
            "sk-ant-abcdefghij12",
            "--model",
            "m-1",
        ]))
        .unwrap();
        run_cli_with_args(args(&["endpoint-profiles", "--store", &store_arg, "list"])).unwrap();

        let collection = ProfileStore::at(&store).load();
        assert_eq!(collection.profiles.len(), 1);
        assert_eq!(
            collection.profiles[0]
                .models
                .as_ref()
                .and_then(|models| models.default.as_deref()),
            Some("m-1")
        );
        assert!(collection.active_profile().is_some());

        let err = run_cli_with_args(args(&[
            "endpoint-profiles",
            "--store",
            &store_arg,
            "delete",
            "ghost",
            "--yes",
        ]))
        .unwrap_err();
        assert!(err.contains("not found"));
    }
}
