use directories::BaseDirs;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[cfg(test)]
use std::cell::Cell;
#[cfg(test)]
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    COMMON_ERR_CREATE_DIR, COMMON_ERR_CREATE_TEMP, COMMON_ERR_EXISTS_NOT_FILE, COMMON_ERR_GET_TIME,
    COMMON_ERR_INVALID_FILE_NAME, COMMON_ERR_REPLACE_FILE, COMMON_ERR_RESOLVE_HOME,
    COMMON_ERR_RESOLVE_PARENT, COMMON_ERR_SET_TEMP_PERMISSIONS, COMMON_ERR_WRITE_TEMP,
};

pub const HOME_ENV_VAR: &str = "ENDPOINT_PROFILES_HOME";
const STORE_DIR_NAME: &str = ".endpoint-profiles";
const STORE_FILE_NAME: &str = "profiles.json";

#[cfg(unix)]
const OWNER_ONLY_FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const OWNER_ONLY_DIR_MODE: u32 = 0o700;

/// Locations of the profile store and its lock file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub store: PathBuf,
    pub lock: PathBuf,
}

impl Paths {
    pub fn for_store(store: impl Into<PathBuf>) -> Self {
        let store = store.into();
        let root = store
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let lock = store.with_extension("lock");
        Self { root, store, lock }
    }

    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::for_store(root.join(STORE_FILE_NAME))
    }
}

pub fn command_name() -> &'static str {
    static COMMAND_NAME: OnceLock<String> = OnceLock::new();
    COMMAND_NAME
        .get_or_init(|| {
            let env_value = env::var("ENDPOINT_PROFILES_COMMAND").ok();
            compute_command_name_from(env_value, env::args_os())
        })
        .as_str()
}

fn compute_command_name_from<I>(env_value: Option<String>, mut args: I) -> String
where
    I: Iterator<Item = std::ffi::OsString>,
{
    if let Some(value) = env_value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    args.next()
        .and_then(|arg| {
            Path::new(&arg)
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| package_command_name().to_string())
}

pub fn package_command_name() -> &'static str {
    "endpoint-profiles"
}

pub(crate) const FAIL_SET_PERMISSIONS: usize = 1;
pub(crate) const FAIL_WRITE_OPEN: usize = 2;
pub(crate) const FAIL_WRITE_WRITE: usize = 3;
pub(crate) const FAIL_WRITE_PERMS: usize = 4;
pub(crate) const FAIL_WRITE_SYNC: usize = 5;
pub(crate) const FAIL_WRITE_RENAME: usize = 6;

#[cfg(test)]
thread_local! {
    static FAILPOINT: Cell<usize> = const { Cell::new(0) };
}
#[cfg(test)]
static FAILPOINT_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
fn maybe_fail(step: usize) -> std::io::Result<()> {
    if FAILPOINT.with(|failpoint| failpoint.get()) == step {
        return Err(std::io::Error::other("failpoint"));
    }
    Ok(())
}

#[cfg(not(test))]
fn maybe_fail(_step: usize) -> std::io::Result<()> {
    Ok(())
}

/// Runs `f` with the given write failpoint armed on the current thread.
#[cfg(test)]
pub(crate) fn with_failpoint<F: FnOnce()>(step: usize, f: F) {
    let _guard = FAILPOINT_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let prev = FAILPOINT.with(|failpoint| {
        let prev = failpoint.get();
        failpoint.set(step);
        prev
    });
    f();
    FAILPOINT.with(|failpoint| failpoint.set(prev));
}

/// Resolves the default store location, or wraps an explicit store file.
pub fn resolve_paths(store_override: Option<&Path>) -> Result<Paths, String> {
    if let Some(store) = store_override {
        return Ok(Paths::for_store(store));
    }
    let root = resolve_store_dir().ok_or_else(|| COMMON_ERR_RESOLVE_HOME.to_string())?;
    Ok(Paths::in_dir(root))
}

fn resolve_store_dir() -> Option<PathBuf> {
    let store_home = env::var_os(HOME_ENV_VAR).map(PathBuf::from);
    let base_home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    let home = env::var_os("HOME").map(PathBuf::from);
    let userprofile = env::var_os("USERPROFILE").map(PathBuf::from);
    resolve_store_dir_with(store_home, base_home, home, userprofile)
}

fn resolve_store_dir_with(
    store_home: Option<PathBuf>,
    base_home: Option<PathBuf>,
    home: Option<PathBuf>,
    userprofile: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = non_empty_path(store_home) {
        return Some(path);
    }
    non_empty_path(base_home)
        .or_else(|| non_empty_path(home))
        .or_else(|| non_empty_path(userprofile))
        .map(|home| home.join(STORE_DIR_NAME))
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|path| !path.as_os_str().is_empty())
}

/// Creates `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), String> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|err| crate::msg2(COMMON_ERR_CREATE_DIR, dir.display(), err))
}

pub fn ensure_file_or_absent(path: &Path) -> Result<(), String> {
    if path.exists() && !path.is_file() {
        return Err(crate::msg1(COMMON_ERR_EXISTS_NOT_FILE, path.display()));
    }
    Ok(())
}

/// Restricts `path` to its owner: 0600 for files, 0700 for directories.
#[cfg(unix)]
pub fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    maybe_fail(FAIL_SET_PERMISSIONS)?;
    let mode = if fs::metadata(path)?.is_dir() {
        OWNER_ONLY_DIR_MODE
    } else {
        OWNER_ONLY_FILE_MODE
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_owner_only(path: &Path) -> std::io::Result<()> {
    maybe_fail(FAIL_SET_PERMISSIONS)?;
    fs::metadata(path).map(|_| ())
}

/// Writes `contents` to `path` through a sibling temp file and a rename.
///
/// Existing permissions are carried over; a new file starts owner-only.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), String> {
    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());
    write_atomic_with_permissions(path, contents, permissions)
}

fn write_atomic_with_permissions(
    path: &Path,
    contents: &[u8],
    permissions: Option<fs::Permissions>,
) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| crate::msg1(COMMON_ERR_RESOLVE_PARENT, path.display()))?;
    ensure_dir(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| crate::msg1(COMMON_ERR_INVALID_FILE_NAME, path.display()))?;
    let pid = std::process::id();
    let mut attempt = 0u32;
    loop {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| crate::msg1(COMMON_ERR_GET_TIME, err))?
            .as_nanos();
        let tmp_name = format!(".{file_name}.tmp-{pid}-{nanos}-{attempt}");
        let tmp_path = parent.join(tmp_name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let mode = permissions
                .as_ref()
                .map(|permissions| permissions.mode())
                .unwrap_or(OWNER_ONLY_FILE_MODE);
            options.mode(mode);
        }
        let mut tmp_file = match options.open(&tmp_path) {
            Ok(file) => file,
            Err(err) => {
                attempt += 1;
                if attempt < 5 {
                    continue;
                }
                return Err(crate::msg2(COMMON_ERR_CREATE_TEMP, path.display(), err));
            }
        };
        if let Err(err) = maybe_fail(FAIL_WRITE_OPEN) {
            drop(tmp_file);
            let _ = fs::remove_file(&tmp_path);
            return Err(crate::msg2(COMMON_ERR_CREATE_TEMP, path.display(), err));
        }

        if let Err(err) = maybe_fail(FAIL_WRITE_WRITE).and_then(|_| tmp_file.write_all(contents)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(crate::msg2(COMMON_ERR_WRITE_TEMP, path.display(), err));
        }

        if let Some(permissions) = permissions.as_ref()
            && let Err(err) = maybe_fail(FAIL_WRITE_PERMS)
                .and_then(|_| fs::set_permissions(&tmp_path, permissions.clone()))
        {
            let _ = fs::remove_file(&tmp_path);
            return Err(crate::msg2(
                COMMON_ERR_SET_TEMP_PERMISSIONS,
                path.display(),
                err,
            ));
        }

        if let Err(err) = maybe_fail(FAIL_WRITE_SYNC).and_then(|_| tmp_file.sync_all()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(crate::msg2(COMMON_ERR_WRITE_TEMP, path.display(), err));
        }
        drop(tmp_file);

        let rename_result = maybe_fail(FAIL_WRITE_RENAME).and_then(|_| fs::rename(&tmp_path, path));
        match rename_result {
            Ok(()) => return Ok(()),
            Err(err) => {
                #[cfg(windows)]
                {
                    if path.exists() {
                        let _ = fs::remove_file(path);
                    }
                    if fs::rename(&tmp_path, path).is_ok() {
                        return Ok(());
                    }
                }
                let _ = fs::remove_file(&tmp_path);
                return Err(crate::msg2(COMMON_ERR_REPLACE_FILE, path.display(), err));
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
