use fslock::LockFile;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};
use serde_with::{NoneAsEmptyString, serde_as};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[cfg(test)]
use std::cell::Cell;

use crate::{
    Paths, ProfileError, ProfileResult, STORE_ERR_LOCK_ACQUIRE, STORE_ERR_LOCK_HELD,
    STORE_ERR_LOCK_OPEN, STORE_ERR_SERIALIZE, command_name, ensure_dir, ensure_file_or_absent,
    now_ms, set_owner_only, write_atomic,
};

pub const STORE_VERSION: u32 = 1;

#[cfg(not(test))]
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(test)]
const LOCK_TIMEOUT: Duration = Duration::from_millis(200);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

#[cfg(test)]
const LOCK_FAIL_ERR: usize = 1;
#[cfg(test)]
const LOCK_FAIL_BUSY: usize = 2;

#[cfg(test)]
thread_local! {
    static LOCK_FAILPOINT: Cell<usize> = const { Cell::new(0) };
}

/// Provider model identifiers keyed by slot.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "NoneAsEmptyString")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "NoneAsEmptyString")]
    pub haiku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "NoneAsEmptyString")]
    pub sonnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "NoneAsEmptyString")]
    pub opus: Option<String>,
}

impl ModelSlots {
    /// Trims every slot, drops blank ones, and returns `None` when nothing is left.
    pub fn normalized(self) -> Option<Self> {
        let slots = Self {
            default: trim_slot(self.default),
            haiku: trim_slot(self.haiku),
            sonnet: trim_slot(self.sonnet),
            opus: trim_slot(self.opus),
        };
        if slots.is_empty() { None } else { Some(slots) }
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.haiku.is_none() && self.sonnet.is_none() && self.opus.is_none()
    }

    /// `(slot, model)` pairs for the slots that are set.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("default", self.default.as_deref()),
            ("haiku", self.haiku.as_deref()),
            ("sonnet", self.sonnet.as_deref()),
            ("opus", self.opus.as_deref()),
        ]
        .into_iter()
        .filter_map(|(slot, model)| model.map(|model| (slot, model)))
    }
}

fn trim_slot(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelSlots>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The persisted store: every profile plus the active pointer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCollection {
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_profile_id: Option<String>,
    #[serde(default = "store_version")]
    pub version: u32,
}

impl Default for ProfileCollection {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            active_profile_id: None,
            version: STORE_VERSION,
        }
    }
}

fn store_version() -> u32 {
    STORE_VERSION
}

impl ProfileCollection {
    pub fn find(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|profile| profile.id == id)
    }

    /// Looks a profile up by trimmed, case-insensitive name.
    pub fn find_by_name(&self, name: &str) -> Option<&Profile> {
        let wanted = crate::normalize_name(name);
        self.profiles
            .iter()
            .find(|profile| crate::normalize_name(&profile.name) == wanted)
    }

    /// The active profile, if the pointer is set and resolves.
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.find(id))
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active_profile_id.as_deref() == Some(id)
    }

    pub(crate) fn id_name_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.profiles
            .iter()
            .map(|profile| (profile.id.as_str(), profile.name.as_str()))
    }
}

/// What [`ProfileStore::load`] does with a file it cannot parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CorruptPolicy {
    /// Start over with an empty collection; the next save overwrites the file.
    #[default]
    Discard,
    /// Rename the unreadable file aside first, then start over.
    Backup,
}

/// Parses store bytes, enforcing the structure of the persisted file.
pub fn parse_collection(bytes: &[u8]) -> Result<ProfileCollection, String> {
    serde_json::from_slice::<ProfileCollection>(bytes).map_err(|err| err.to_string())
}

/// Fail-open parse: anything that is not a well-formed store becomes an
/// empty collection.
pub fn parse_or_default(bytes: &[u8]) -> ProfileCollection {
    parse_collection(bytes).unwrap_or_default()
}

/// File-backed persistence for one [`ProfileCollection`].
#[derive(Clone, Debug)]
pub struct ProfileStore {
    paths: Paths,
    corrupt_policy: CorruptPolicy,
}

impl ProfileStore {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            corrupt_policy: CorruptPolicy::default(),
        }
    }

    /// Store backed by `path`, with its lock file alongside.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::new(Paths::for_store(path))
    }

    #[must_use]
    pub fn with_corrupt_policy(mut self, policy: CorruptPolicy) -> Self {
        self.corrupt_policy = policy;
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn path(&self) -> &Path {
        &self.paths.store
    }

    /// Reads the store. Never fails: a missing, unreadable or malformed file
    /// yields an empty collection.
    pub fn load(&self) -> ProfileCollection {
        let path = &self.paths.store;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "profile store absent; starting empty");
                return ProfileCollection::default();
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read profile store; treating as empty");
                return ProfileCollection::default();
            }
        };
        match parse_collection(&bytes) {
            Ok(collection) => {
                tracing::debug!(
                    path = %path.display(),
                    profiles = collection.profiles.len(),
                    "loaded profile store"
                );
                collection
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "profile store is malformed; treating as empty");
                if self.corrupt_policy == CorruptPolicy::Backup {
                    backup_corrupt(path);
                }
                ProfileCollection::default()
            }
        }
    }

    /// Writes the collection durably before returning, then hardens the file.
    pub fn save(&self, collection: &ProfileCollection) -> ProfileResult<()> {
        let path = &self.paths.store;
        let persistence = |message: String| ProfileError::Persistence {
            path: path.clone(),
            message,
        };
        ensure_dir(&self.paths.root).map_err(persistence)?;
        ensure_file_or_absent(path).map_err(persistence)?;
        let json = serde_json::to_string_pretty(collection)
            .map_err(|err| persistence(crate::msg1(STORE_ERR_SERIALIZE, err)))?;
        write_atomic(path, format!("{json}\n").as_bytes()).map_err(persistence)?;
        tracing::debug!(
            path = %path.display(),
            profiles = collection.profiles.len(),
            "saved profile store"
        );
        self.harden();
        Ok(())
    }

    /// Best-effort owner-only permissions on the store file and directory.
    pub fn harden(&self) {
        harden(&self.paths.store);
        if !self.paths.root.as_os_str().is_empty() {
            harden(&self.paths.root);
        }
    }

    /// Takes the cross-process store lock, polling until it frees up.
    pub(crate) fn lock(&self) -> ProfileResult<StoreLock> {
        ensure_dir(&self.paths.root).map_err(ProfileError::Lock)?;
        let start = Instant::now();
        let mut lock = LockFile::open(&self.paths.lock)
            .map_err(|err| ProfileError::Lock(crate::msg1(STORE_ERR_LOCK_OPEN, err)))?;
        loop {
            match try_lock(&mut lock) {
                Ok(true) => break,
                Ok(false) => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        return Err(ProfileError::Lock(crate::msg1(
                            STORE_ERR_LOCK_ACQUIRE,
                            command_name(),
                        )));
                    }
                    tracing::debug!(lock = %self.paths.lock.display(), "profile store lock busy; retrying");
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(err) => {
                    return Err(ProfileError::Lock(crate::msg1(STORE_ERR_LOCK_HELD, err)));
                }
            }
        }
        Ok(StoreLock { _lock: lock })
    }
}

/// Held for the duration of a store mutation; unlocks on drop.
pub(crate) struct StoreLock {
    _lock: LockFile,
}

#[cfg(not(test))]
fn try_lock(lock: &mut LockFile) -> Result<bool, fslock::Error> {
    lock.try_lock()
}

#[cfg(test)]
fn try_lock(lock: &mut LockFile) -> Result<bool, fslock::Error> {
    match LOCK_FAILPOINT.with(Cell::get) {
        LOCK_FAIL_ERR => Err(std::io::Error::other("fail")),
        LOCK_FAIL_BUSY => Ok(false),
        _ => lock.try_lock(),
    }
}

/// Restricts `path` to its owner. Failures are logged and otherwise ignored.
pub fn harden(path: &Path) {
    if let Err(err) = set_owner_only(path) {
        tracing::warn!(path = %path.display(), error = %err, "could not restrict permissions");
    }
}

fn backup_corrupt(path: &Path) {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", now_ms()));
    let backup = PathBuf::from(name);
    match fs::rename(path, &backup) {
        Ok(()) => {
            tracing::warn!(backup = %backup.display(), "moved malformed profile store aside");
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not back up malformed profile store");
        }
    }
}

/// Random UUID-v4 string. Falls back to a seeded PRNG when the OS source
/// fails.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
        tracing::warn!(error = %err, "OS random source unavailable; using fallback generator");
        fallback_random_bytes(&mut bytes);
    }
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

fn fallback_random_bytes(bytes: &mut [u8; 16]) {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let seed = (nanos as u64)
        ^ ((nanos >> 64) as u64)
        ^ (u64::from(std::process::id()) << 32)
        ^ COUNTER.fetch_add(1, Ordering::Relaxed).rotate_left(17);
    StdRng::seed_from_u64(seed).fill_bytes(bytes);
}
