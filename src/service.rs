use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    ModelSlots, Profile, ProfileCollection, ProfileError, ProfileResult, ProfileStore, StoreLock,
    generate_id, now_ms, validate_api_key, validate_base_url, validate_name_unique,
};

pub const ENV_BASE_URL: &str = "BASE_URL";
pub const ENV_AUTH_TOKEN: &str = "AUTH_TOKEN";
pub const ENV_MODEL: &str = "MODEL";
pub const ENV_DEFAULT_HAIKU_MODEL: &str = "DEFAULT_HAIKU_MODEL";
pub const ENV_DEFAULT_SONNET_MODEL: &str = "DEFAULT_SONNET_MODEL";
pub const ENV_DEFAULT_OPUS_MODEL: &str = "DEFAULT_OPUS_MODEL";

/// Fields supplied when creating a profile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Option<ModelSlots>,
}

/// Full replacement of a profile's mutable fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Option<ModelSlots>,
}

/// Profile operations over one store, with every mutation serialized.
///
/// Keep a single service per store path within a process; the lock file
/// covers other processes.
pub struct ProfileService {
    store: ProfileStore,
    writer: Mutex<()>,
}

/// Both halves of the single-writer section: the in-process mutex and the
/// store's lock file.
struct WriteGuard<'a> {
    _store_lock: StoreLock,
    _writer: MutexGuard<'a, ()>,
}

impl ProfileService {
    pub fn new(store: ProfileStore) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    fn begin_write(&self) -> ProfileResult<WriteGuard<'_>> {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let store_lock = self.store.lock()?;
        Ok(WriteGuard {
            _store_lock: store_lock,
            _writer: writer,
        })
    }

    /// Snapshot of the store; does not take the writer lock.
    pub fn get_profiles(&self) -> ProfileCollection {
        self.store.load()
    }

    pub fn get_profile(&self, id: &str) -> Option<Profile> {
        self.store.load().find(id).cloned()
    }

    /// Finds a profile by exact id, then by normalized name.
    pub fn resolve(&self, id_or_name: &str) -> ProfileResult<Profile> {
        let collection = self.store.load();
        collection
            .find(id_or_name.trim())
            .or_else(|| collection.find_by_name(id_or_name))
            .cloned()
            .ok_or_else(|| ProfileError::NotFound {
                id: id_or_name.trim().to_string(),
            })
    }

    pub fn create_profile(&self, input: NewProfile) -> ProfileResult<Profile> {
        check_credentials(&input.base_url, &input.api_key)?;

        let _guard = self.begin_write()?;
        let mut collection = self.store.load();
        if !validate_name_unique(&input.name, collection.id_name_pairs(), None) {
            return Err(ProfileError::DuplicateName {
                name: input.name.trim().to_string(),
            });
        }

        let now = now_ms();
        let profile = Profile {
            id: generate_id(),
            name: input.name.trim().to_string(),
            base_url: input.base_url.trim().to_string(),
            api_key: input.api_key.trim().to_string(),
            models: input.models.and_then(ModelSlots::normalized),
            created_at: now,
            updated_at: now,
        };
        collection.profiles.push(profile.clone());
        if collection.profiles.len() == 1 {
            collection.active_profile_id = Some(profile.id.clone());
        }
        apply_invariants(&mut collection);
        self.store.save(&collection)?;

        tracing::info!(
            id = %profile.id,
            name = %profile.name,
            active = collection.is_active(&profile.id),
            "created profile"
        );
        Ok(profile)
    }

    pub fn update_profile(&self, input: ProfileUpdate) -> ProfileResult<Profile> {
        check_credentials(&input.base_url, &input.api_key)?;

        let _guard = self.begin_write()?;
        let mut collection = self.store.load();
        if collection.find(&input.id).is_none() {
            return Err(ProfileError::NotFound { id: input.id });
        }
        if !validate_name_unique(&input.name, collection.id_name_pairs(), Some(&input.id)) {
            return Err(ProfileError::DuplicateName {
                name: input.name.trim().to_string(),
            });
        }

        let updated = {
            let Some(profile) = collection.find_mut(&input.id) else {
                return Err(ProfileError::NotFound { id: input.id });
            };
            profile.name = input.name.trim().to_string();
            profile.base_url = input.base_url.trim().to_string();
            profile.api_key = input.api_key.trim().to_string();
            profile.models = input.models.and_then(ModelSlots::normalized);
            profile.updated_at = now_ms().max(profile.updated_at.saturating_add(1));
            profile.clone()
        };
        apply_invariants(&mut collection);
        self.store.save(&collection)?;

        tracing::info!(id = %updated.id, name = %updated.name, "updated profile");
        Ok(updated)
    }

    pub fn delete_profile(&self, id: &str) -> ProfileResult<()> {
        let _guard = self.begin_write()?;
        let mut collection = self.store.load();
        let Some(index) = collection
            .profiles
            .iter()
            .position(|profile| profile.id == id)
        else {
            return Err(ProfileError::NotFound { id: id.to_string() });
        };
        if collection.is_active(id) {
            return Err(ProfileError::CannotDeleteActive { id: id.to_string() });
        }

        let removed = collection.profiles.remove(index);
        apply_invariants(&mut collection);
        self.store.save(&collection)?;

        tracing::info!(id = %removed.id, name = %removed.name, "deleted profile");
        Ok(())
    }

    /// Points the store at `id`, or clears the pointer for `None`.
    pub fn set_active_profile(&self, id: Option<&str>) -> ProfileResult<()> {
        let _guard = self.begin_write()?;
        let mut collection = self.store.load();
        match id {
            None => collection.active_profile_id = None,
            Some(id) => {
                if collection.find(id).is_none() {
                    return Err(ProfileError::NotFound { id: id.to_string() });
                }
                collection.active_profile_id = Some(id.to_string());
            }
        }
        apply_invariants(&mut collection);
        self.store.save(&collection)?;

        match id {
            Some(id) => tracing::info!(id, "activated profile"),
            None => tracing::info!("cleared active profile"),
        }
        Ok(())
    }

    /// Environment for a child process using the active profile.
    ///
    /// Empty when no profile is active. Blank values are left out rather
    /// than exported as empty strings.
    pub fn active_profile_environment(&self) -> BTreeMap<String, String> {
        let collection = self.store.load();
        match collection.active_profile() {
            Some(profile) => profile_environment(profile),
            None => BTreeMap::new(),
        }
    }
}

pub(crate) fn check_credentials(base_url: &str, api_key: &str) -> ProfileResult<()> {
    if !validate_base_url(base_url) {
        return Err(ProfileError::InvalidBaseUrl);
    }
    if !validate_api_key(api_key) {
        return Err(ProfileError::InvalidApiKey);
    }
    Ok(())
}

/// Re-establishes the pointer invariants after a structural change: the
/// active id must name a stored profile, and an empty store has none.
pub fn apply_invariants(collection: &mut ProfileCollection) {
    if collection.profiles.is_empty() {
        collection.active_profile_id = None;
        return;
    }
    if let Some(active) = collection.active_profile_id.as_deref()
        && collection.find(active).is_none()
    {
        tracing::warn!(id = active, "active profile pointer was dangling; clearing it");
        collection.active_profile_id = None;
    }
}

/// Fixed-name environment mapping for one profile.
pub fn profile_environment(profile: &Profile) -> BTreeMap<String, String> {
    let models = profile.models.as_ref();
    let entries = [
        (ENV_BASE_URL, Some(profile.base_url.as_str())),
        (ENV_AUTH_TOKEN, Some(profile.api_key.as_str())),
        (ENV_MODEL, models.and_then(|m| m.default.as_deref())),
        (ENV_DEFAULT_HAIKU_MODEL, models.and_then(|m| m.haiku.as_deref())),
        (ENV_DEFAULT_SONNET_MODEL, models.and_then(|m| m.sonnet.as_deref())),
        (ENV_DEFAULT_OPUS_MODEL, models.and_then(|m| m.opus.as_deref())),
    ];
    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?.trim();
            (!value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}
