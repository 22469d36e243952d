use inquire::{Confirm, Select};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, IsTerminal as _};
use std::time::Duration;

use crate::cli::ModelArgs;
use crate::{
    CANCELLED_MESSAGE, ConnectionTester, DEFAULT_TIMEOUT_MS, ModelSlots, NewProfile,
    PROBE_ERR_SOME_FAILED, PROFILE_ERR_DELETE_CONFIRM_REQUIRED, PROFILE_ERR_EMPTY_PROMPT,
    PROFILE_ERR_NO_CREDENTIALS, PROFILE_ERR_PROMPT, PROFILE_ERR_QUOTE,
    PROFILE_ERR_TEST_FAILED_NOT_SAVED, PROFILE_ERR_TTY_REQUIRED, PROFILE_MSG_ACTIVATED,
    PROFILE_MSG_CREATED, PROFILE_MSG_CREATED_ACTIVE, PROFILE_MSG_DEACTIVATED,
    PROFILE_MSG_DELETED, PROFILE_MSG_NO_ACTIVE_ENV, PROFILE_MSG_UPDATED, PROFILE_PROMPT_DELETE,
    PROFILE_PROMPT_HELP, PROFILE_PROMPT_NONE, PROFILE_PROMPT_USE, Profile, ProfileError,
    ProfileService, ProfileUpdate, TestResult, UI_FALLBACK_ACTIVE, format_action,
    format_entry_header, format_hint, format_list_hint, format_no_profiles, format_test_result,
    format_warning, inquire_select_render_config, is_inquire_cancel, is_plain,
    print_output_block, profile_detail_lines, use_color_stderr, use_color_stdout,
};

const MAX_PROBE_CONCURRENCY: usize = 4;

pub fn list_profiles(service: &ProfileService) -> Result<(), String> {
    let use_color = use_color_stdout();
    let collection = service.get_profiles();
    if collection.profiles.is_empty() {
        print_output_block(&format_no_profiles(use_color));
        return Ok(());
    }

    let mut lines = Vec::with_capacity(collection.profiles.len() * 6);
    for (idx, profile) in collection.profiles.iter().enumerate() {
        let is_active = collection.is_active(&profile.id);
        lines.push(format_entry_header(profile, is_active, use_color));
        lines.extend(profile_detail_lines(profile, use_color));
        if idx + 1 < collection.profiles.len() {
            push_separator(&mut lines);
        }
    }
    if collection.active_profile().is_none() {
        lines.push(format_hint(UI_FALLBACK_ACTIVE, use_color));
    }
    print_output_block(&lines.join("\n"));
    Ok(())
}

pub fn add_profile(
    service: &ProfileService,
    input: NewProfile,
    test_first: bool,
) -> Result<(), String> {
    if test_first {
        crate::check_credentials(&input.base_url, &input.api_key).map_err(|err| err.to_string())?;
        let result = ConnectionTester::new().test(&input.base_url, &input.api_key, None);
        if !result.is_success() {
            return Err(crate::msg1(
                PROFILE_ERR_TEST_FAILED_NOT_SAVED,
                result.message(),
            ));
        }
    }
    let profile = service
        .create_profile(input)
        .map_err(|err| err.to_string())?;
    let template = if service.get_profiles().is_active(&profile.id) {
        PROFILE_MSG_CREATED_ACTIVE
    } else {
        PROFILE_MSG_CREATED
    };
    let message = format_action(&crate::msg1(template, &profile.name), use_color_stdout());
    print_output_block(&message);
    Ok(())
}

/// Optional field changes layered over a stored profile.
#[derive(Clone, Debug, Default)]
pub struct ProfileEdits {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub models: ModelArgs,
    pub clear_models: bool,
}

pub fn update_profile(
    service: &ProfileService,
    id_or_name: &str,
    edits: ProfileEdits,
) -> Result<(), String> {
    let existing = resolve(service, id_or_name)?;
    let update = merge_edits(existing, edits);
    let profile = service
        .update_profile(update)
        .map_err(|err| err.to_string())?;
    let message = format_action(
        &crate::msg1(PROFILE_MSG_UPDATED, &profile.name),
        use_color_stdout(),
    );
    print_output_block(&message);
    Ok(())
}

fn merge_edits(existing: Profile, edits: ProfileEdits) -> ProfileUpdate {
    let base = if edits.clear_models {
        ModelSlots::default()
    } else {
        existing.models.unwrap_or_default()
    };
    let models = ModelSlots {
        default: edits.models.model.or(base.default),
        haiku: edits.models.haiku.or(base.haiku),
        sonnet: edits.models.sonnet.or(base.sonnet),
        opus: edits.models.opus.or(base.opus),
    };
    ProfileUpdate {
        id: existing.id,
        name: edits.name.unwrap_or(existing.name),
        base_url: edits.base_url.unwrap_or(existing.base_url),
        api_key: edits.api_key.unwrap_or(existing.api_key),
        models: models.normalized(),
    }
}

pub fn delete_profile(service: &ProfileService, id_or_name: &str, yes: bool) -> Result<(), String> {
    let profile = resolve(service, id_or_name)?;
    if !yes && !confirm_delete(&profile.name)? {
        return Err(CANCELLED_MESSAGE.to_string());
    }
    service
        .delete_profile(&profile.id)
        .map_err(|err| err.to_string())?;
    let message = format_action(
        &crate::msg1(PROFILE_MSG_DELETED, &profile.name),
        use_color_stdout(),
    );
    print_output_block(&message);
    Ok(())
}

fn confirm_delete(name: &str) -> Result<bool, String> {
    let is_tty = io::stdin().is_terminal();
    if !is_tty {
        return Err(PROFILE_ERR_DELETE_CONFIRM_REQUIRED.to_string());
    }
    let prompt = crate::msg1(PROFILE_PROMPT_DELETE, name);
    let selection = Confirm::new(&prompt)
        .with_default(false)
        .with_render_config(inquire_select_render_config())
        .prompt();
    confirm_delete_with(is_tty, selection)
}

fn confirm_delete_with(
    is_tty: bool,
    selection: Result<bool, inquire::error::InquireError>,
) -> Result<bool, String> {
    if !is_tty {
        return Err(PROFILE_ERR_DELETE_CONFIRM_REQUIRED.to_string());
    }
    handle_inquire_result(selection)
}

pub fn use_profile(
    service: &ProfileService,
    id_or_name: Option<&str>,
    none: bool,
) -> Result<(), String> {
    let target = if none {
        None
    } else if let Some(id_or_name) = id_or_name {
        Some(resolve(service, id_or_name)?)
    } else {
        require_tty(PROFILE_PROMPT_USE)?;
        select_profile(service)?
    };

    service
        .set_active_profile(target.as_ref().map(|profile| profile.id.as_str()))
        .map_err(|err| err.to_string())?;
    let message = match &target {
        Some(profile) => crate::msg1(PROFILE_MSG_ACTIVATED, &profile.name),
        None => PROFILE_MSG_DEACTIVATED.to_string(),
    };
    print_output_block(&format_action(&message, use_color_stdout()));
    Ok(())
}

#[derive(Clone)]
struct Choice {
    profile: Option<Profile>,
    active: bool,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.profile {
            Some(profile) => {
                let header = format_entry_header(profile, self.active, use_color_stderr());
                write!(f, "{header}")
            }
            None => f.write_str(PROFILE_PROMPT_NONE),
        }
    }
}

fn select_profile(service: &ProfileService) -> Result<Option<Profile>, String> {
    let collection = service.get_profiles();
    if collection.profiles.is_empty() {
        return Err(PROFILE_ERR_EMPTY_PROMPT.to_string());
    }
    let mut choices: Vec<Choice> = collection
        .profiles
        .iter()
        .map(|profile| Choice {
            active: collection.is_active(&profile.id),
            profile: Some(profile.clone()),
        })
        .collect();
    choices.push(Choice {
        profile: None,
        active: collection.active_profile_id.is_none(),
    });
    let cursor = choices.iter().position(|choice| choice.active).unwrap_or(0);
    let selection = Select::new(PROFILE_PROMPT_USE, choices)
        .with_help_message(PROFILE_PROMPT_HELP)
        .with_render_config(inquire_select_render_config())
        .with_starting_cursor(cursor)
        .prompt();
    handle_inquire_result(selection).map(|choice| choice.profile)
}

pub fn print_env(service: &ProfileService, prefix: &str, export: bool) -> Result<(), String> {
    let env = service.active_profile_environment();
    if env.is_empty() {
        eprintln!("{}", format_warning(PROFILE_MSG_NO_ACTIVE_ENV, use_color_stderr()));
        return Ok(());
    }
    for line in env_lines(&env, prefix, export)? {
        println!("{line}");
    }
    Ok(())
}

fn env_lines(
    env: &BTreeMap<String, String>,
    prefix: &str,
    export: bool,
) -> Result<Vec<String>, String> {
    env.iter()
        .map(|(key, value)| {
            let key = format!("{prefix}{key}");
            if !export {
                return Ok(format!("{key}={value}"));
            }
            let quoted =
                shlex::try_quote(value).map_err(|_| crate::msg1(PROFILE_ERR_QUOTE, &key))?;
            Ok(format!("export {key}={quoted}"))
        })
        .collect()
}

/// What `test` should probe.
#[derive(Clone, Debug)]
pub enum TestTarget {
    Active,
    Profile(String),
    Raw { base_url: String, api_key: String },
    All,
}

pub fn test_profiles(
    service: &ProfileService,
    target: TestTarget,
    timeout_ms: Option<u64>,
) -> Result<(), String> {
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    let tester = ConnectionTester::new().with_timeout(timeout);
    let use_color = use_color_stdout();

    let targets: Vec<(String, String, String)> = match target {
        TestTarget::Raw { base_url, api_key } => vec![(base_url.clone(), base_url, api_key)],
        TestTarget::Profile(id_or_name) => {
            let profile = resolve(service, &id_or_name)?;
            vec![probe_target(profile)]
        }
        TestTarget::Active => {
            let profile = service
                .get_profiles()
                .active_profile()
                .cloned()
                .ok_or_else(|| PROFILE_ERR_NO_CREDENTIALS.to_string())?;
            vec![probe_target(profile)]
        }
        TestTarget::All => {
            let collection = service.get_profiles();
            if collection.profiles.is_empty() {
                print_output_block(&format_no_profiles(use_color));
                return Ok(());
            }
            collection.profiles.into_iter().map(probe_target).collect()
        }
    };

    let results = run_probes(&tester, &targets);
    let failed = results.iter().filter(|result| !result.is_success()).count();
    let lines: Vec<String> = targets
        .iter()
        .zip(&results)
        .map(|((label, _, _), result)| format_test_result(label, result, use_color))
        .collect();
    print_output_block(&lines.join("\n"));

    match (failed, results.as_slice()) {
        (0, _) => Ok(()),
        (_, [single]) => Err(single.message()),
        (failed, all) => Err(crate::msg2(PROBE_ERR_SOME_FAILED, failed, all.len())),
    }
}

fn probe_target(profile: Profile) -> (String, String, String) {
    (profile.name, profile.base_url, profile.api_key)
}

fn run_probes(tester: &ConnectionTester, targets: &[(String, String, String)]) -> Vec<TestResult> {
    let probe = |(_, base_url, api_key): &(String, String, String)| {
        tester.test(base_url, api_key, None)
    };
    if targets.len() < 2 {
        return targets.iter().map(probe).collect();
    }
    let mut results = Vec::with_capacity(targets.len());
    for chunk in targets.chunks(MAX_PROBE_CONCURRENCY) {
        let mut chunk_results: Vec<TestResult> = chunk.par_iter().map(probe).collect();
        results.append(&mut chunk_results);
    }
    results
}

/// Looks a profile up, pointing at `list` when nothing matches.
fn resolve(service: &ProfileService, id_or_name: &str) -> Result<Profile, String> {
    service.resolve(id_or_name).map_err(|err| match err {
        ProfileError::NotFound { .. } => {
            let hint = format_list_hint(use_color_stderr());
            if is_plain() {
                format!("{err}\n{hint}")
            } else {
                format!("{err}{hint}")
            }
        }
        other => other.to_string(),
    })
}

fn push_separator(lines: &mut Vec<String>) {
    if !is_plain() {
        lines.push(String::new());
    }
}

fn require_tty(action: &str) -> Result<(), String> {
    require_tty_with(io::stdin().is_terminal(), action)
}

fn require_tty_with(is_tty: bool, action: &str) -> Result<(), String> {
    if is_tty {
        Ok(())
    } else {
        Err(crate::msg1(PROFILE_ERR_TTY_REQUIRED, action))
    }
}

fn handle_inquire_result<T>(result: Result<T, inquire::error::InquireError>) -> Result<T, String> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if is_inquire_cancel(&err) => Err(CANCELLED_MESSAGE.to_string()),
        Err(err) => Err(crate::msg1(PROFILE_ERR_PROMPT, err)),
    }
}
