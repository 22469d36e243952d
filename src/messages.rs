pub const CANCELLED_MESSAGE: &str = "Cancelled.";

pub const COMMON_ERR_RESOLVE_HOME: &str = "Error: Could not resolve home directory";
pub const COMMON_ERR_RESOLVE_PARENT: &str = "Error: Could not resolve parent directory for {}";
pub const COMMON_ERR_CREATE_DIR: &str = "Error: Cannot create directory {}: {}";
pub const COMMON_ERR_INVALID_FILE_NAME: &str = "Error: Store path {} has an invalid file name";
pub const COMMON_ERR_GET_TIME: &str = "Error: Failed to read system time: {}";
pub const COMMON_ERR_CREATE_TEMP: &str = "Error: Failed to create temp file for {}: {}";
pub const COMMON_ERR_WRITE_TEMP: &str = "Error: Failed to write temp file for {}: {}";
pub const COMMON_ERR_SET_TEMP_PERMISSIONS: &str =
    "Error: Failed to set temp file permissions for {}: {}";
pub const COMMON_ERR_REPLACE_FILE: &str = "Error: Failed to replace {}: {}";
pub const COMMON_ERR_EXISTS_NOT_FILE: &str = "Error: {} exists and is not a file";

pub const STORE_ERR_SERIALIZE: &str = "Error: Failed to serialize profiles: {}";
pub const STORE_ERR_LOCK_OPEN: &str = "Error: Could not open profiles lock: {}";
pub const STORE_ERR_LOCK_ACQUIRE: &str =
    "Error: Could not acquire profiles lock. Ensure no other {} is running and retry.";
pub const STORE_ERR_LOCK_HELD: &str = "Error: Could not lock profiles file: {}";

pub const PROFILE_ERR_DELETE_CONFIRM_REQUIRED: &str =
    "Error: Deleting without a TTY requires --yes.";
pub const PROFILE_ERR_TTY_REQUIRED: &str =
    "Error: {} selection requires a TTY. Pass a profile name instead.";
pub const PROFILE_ERR_PROMPT: &str = "Error: Failed to read selection: {}";
pub const PROFILE_ERR_NO_CREDENTIALS: &str =
    "Error: Pass a profile, or both --base-url and --api-key.";
pub const PROFILE_ERR_TEST_FAILED_NOT_SAVED: &str =
    "Connection test failed; profile was not saved.\n{}";

pub const PROFILE_ERR_QUOTE: &str = "Error: Cannot quote the value of {} for a shell";
pub const PROFILE_ERR_EMPTY_PROMPT: &str = "Error: No profiles to choose from.";

pub const PROFILE_MSG_CREATED: &str = "Created profile {}";
pub const PROFILE_MSG_CREATED_ACTIVE: &str = "Created profile {} (now active)";
pub const PROFILE_MSG_UPDATED: &str = "Updated profile {}";
pub const PROFILE_MSG_DELETED: &str = "Deleted profile {}";
pub const PROFILE_MSG_ACTIVATED: &str = "Now using profile {}";
pub const PROFILE_MSG_DEACTIVATED: &str = "No profile active; using fallback authentication";
pub const PROFILE_MSG_NO_ACTIVE_ENV: &str =
    "No active profile. Nothing to export; fallback authentication applies.";
pub const PROFILE_PROMPT_DELETE: &str = "Delete profile {}?";
pub const PROFILE_PROMPT_USE: &str = "Use which profile?";
pub const PROFILE_PROMPT_NONE: &str = "(none: fallback authentication)";
pub const PROFILE_PROMPT_HELP: &str = "Use arrow keys to move, Enter to select";

pub const PROBE_MSG_SUCCESS: &str = "Connected ({} in {} ms)";
pub const PROBE_MSG_RATE_LIMITED: &str =
    "Connected, but the endpoint is rate limiting requests ({} in {} ms)";
pub const PROBE_ERR_AUTH: &str = "Authentication failed (401). Check your API key.";
pub const PROBE_ERR_API_CODE: &str = "API error: {}";
pub const PROBE_ERR_API_MESSAGE: &str = "API error ({}): {}";
pub const PROBE_ERR_NETWORK: &str = "Could not reach endpoint: {}";
pub const PROBE_ERR_TIMED_OUT: &str = "No response within {} ms";
pub const PROBE_ERR_CANCELLED: &str = "Connection test cancelled";
pub const PROBE_ERR_SOME_FAILED: &str = "{} of {} connection tests failed";
pub const PROBE_ERR_WORKER: &str = "probe worker exited before reporting";
pub const PROBE_ERR_ABANDONED: &str = "probe abandoned before the connection opened";

pub const UI_ERROR_PREFIX: &str = "Error:";
pub const UI_WARNING_PREFIX: &str = "Warning: ";
pub const UI_INFO_PREFIX: &str = "Info: {}";
pub const UI_ACTIVE_MARK: &str = "active";
pub const UI_NO_PROFILES: &str = "No profiles saved yet.{}";
pub const UI_HINT_ADD_PROFILE: &str = "Add one with {add}";
pub const UI_HINT_LIST_PROFILES: &str = "Run {list} to see your profiles.";
pub const UI_FALLBACK_ACTIVE: &str = "No profile active; fallback authentication applies.";
pub const UI_DETAIL_BASE_URL: &str = "URL:      {}";
pub const UI_DETAIL_API_KEY: &str = "Key:      {}";
pub const UI_DETAIL_MODELS: &str = "Models:   {}";
pub const UI_DETAIL_UPDATED: &str = "Updated:  {}";
pub const UI_DETAIL_ID: &str = "ID:       {}";

pub fn msg1(template: &str, a: impl std::fmt::Display) -> String {
    template.replacen("{}", &a.to_string(), 1)
}

pub fn msg2(template: &str, a: impl std::fmt::Display, b: impl std::fmt::Display) -> String {
    let out = template.replacen("{}", &a.to_string(), 1);
    out.replacen("{}", &b.to_string(), 1)
}
