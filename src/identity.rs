//! In-memory owner of the profile, installation and purchaser info, mirrored
//! to the local cache on every mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::device::generate_uuid;
use crate::error::AdaptyError;
use crate::models::{EntitlementSnapshot, Installation, Profile};
use crate::storage::{LocalCache, keys};

#[derive(Debug, Default)]
struct IdentityState {
    profile: Option<Profile>,
    installation: Option<Installation>,
    purchaser_info: Option<EntitlementSnapshot>,
    seed: Option<String>,
    pending_meta_id: Option<String>,
}

/// Identity store.
///
/// Writers are serialized by one lock, and the cache write happens while the
/// lock is held so the cache never reorders two replacements. Persistence is
/// best-effort: a failed cache write is logged and the in-memory value stands.
///
/// Every `clear()` bumps a generation counter. Callers capture the generation
/// before a network call and commit through the `*_if_current` setters so that
/// completions arriving after a logout are dropped.
pub struct IdentityStore {
    cache: Arc<dyn LocalCache>,
    state: RwLock<IdentityState>,
    generation: AtomicU64,
}

impl IdentityStore {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            cache,
            state: RwLock::new(IdentityState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Restore state from the cache. Missing or unreadable entries load as
    /// absent, which is how a fresh device looks.
    pub fn load(&self) {
        let profile: Option<Profile> = self.read_cached(keys::PROFILE);
        let installation: Option<Installation> = self.read_cached(keys::INSTALLATION);
        let purchaser_info: Option<EntitlementSnapshot> = self.read_cached(keys::PURCHASER_INFO);

        tracing::debug!(
            "Loaded identity from cache (profile: {}, installation: {})",
            profile.is_some(),
            installation.is_some()
        );

        let mut state = self.write_state();
        state.profile = profile;
        state.installation = installation;
        state.purchaser_info = purchaser_info;
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read_state().profile.clone()
    }

    pub fn profile_id(&self) -> Option<String> {
        self.read_state().profile.as_ref().map(|p| p.profile_id.clone())
    }

    pub fn installation(&self) -> Option<Installation> {
        self.read_state().installation.clone()
    }

    pub fn purchaser_info(&self) -> Option<EntitlementSnapshot> {
        self.read_state().purchaser_info.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Generation and profile id read under one lock, so the pair always
    /// belongs to the same identity. Capture it before any network call.
    pub fn current(&self) -> (u64, Option<String>) {
        let state = self.read_state();
        let profile_id = state.profile.as_ref().map(|p| p.profile_id.clone());
        (self.generation(), profile_id)
    }

    pub fn set_profile(&self, profile: Profile) {
        let mut state = self.write_state();
        self.persist(keys::PROFILE, &profile);
        state.profile = Some(profile);
    }

    pub fn set_installation(&self, installation: Installation) {
        let mut state = self.write_state();
        self.persist(keys::INSTALLATION, &installation);
        state.installation = Some(installation);
    }

    pub fn set_purchaser_info(&self, snapshot: EntitlementSnapshot) {
        let mut state = self.write_state();
        self.persist(keys::PURCHASER_INFO, &snapshot);
        state.purchaser_info = Some(snapshot);
    }

    /// Store `profile` unless the identity was cleared since `generation`.
    pub fn set_profile_if_current(&self, generation: u64, profile: Profile) -> bool {
        let mut state = self.write_state();
        if !self.is_current(generation) {
            tracing::debug!("Dropping profile {} from a cleared identity", profile.profile_id);
            return false;
        }
        self.persist(keys::PROFILE, &profile);
        state.profile = Some(profile);
        true
    }

    /// Store `installation` unless the identity was cleared since `generation`.
    pub fn set_installation_if_current(&self, generation: u64, installation: Installation) -> bool {
        let mut state = self.write_state();
        if !self.is_current(generation) {
            tracing::debug!(
                "Dropping installation {} from a cleared identity",
                installation.installation_meta_id
            );
            return false;
        }
        self.persist(keys::INSTALLATION, &installation);
        state.installation = Some(installation);
        true
    }

    /// Store `snapshot` unless the identity was cleared since `generation`.
    pub fn set_purchaser_info_if_current(&self, generation: u64, snapshot: EntitlementSnapshot) -> bool {
        let mut state = self.write_state();
        if !self.is_current(generation) {
            tracing::debug!("Dropping purchaser info from a cleared identity");
            return false;
        }
        self.persist(keys::PURCHASER_INFO, &snapshot);
        state.purchaser_info = Some(snapshot);
        true
    }

    /// Seed identifier for anonymous profile creation.
    ///
    /// Generated once and persisted so every retry of a failed creation sends
    /// the same seed. Rotated only by `clear()`.
    pub fn profile_seed(&self) -> String {
        let mut state = self.write_state();
        self.get_or_create(&mut state.seed, keys::PROFILE_SEED)
    }

    /// Installation meta-id to send on the next sync: the stored installation's
    /// id, otherwise a locally generated one that is persisted until the first
    /// sync succeeds.
    pub fn installation_meta_id(&self) -> String {
        let mut state = self.write_state();
        if let Some(installation) = &state.installation {
            return installation.installation_meta_id.clone();
        }
        self.get_or_create(&mut state.pending_meta_id, keys::INSTALLATION_META_ID)
    }

    /// Remove profile, installation, purchaser info and both idempotency keys.
    pub fn clear(&self) {
        let mut state = self.write_state();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = IdentityState::default();
        for key in keys::ALL {
            if let Err(e) = self.cache.remove(key) {
                tracing::warn!("Failed to remove {} from cache: {}", key, e);
            }
        }
        tracing::info!("Identity cleared");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn get_or_create(&self, slot: &mut Option<String>, key: &str) -> String {
        if let Some(id) = slot {
            return id.clone();
        }
        let id = self.cache.get(key).unwrap_or_else(|| {
            let id = generate_uuid();
            if let Err(e) = self.cache.set(key, &id) {
                tracing::warn!("Failed to persist {}: {}", key, e);
            }
            id
        });
        *slot = Some(id.clone());
        id
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(AdaptyError::from)
            .and_then(|json| self.cache.set(key, &json));
        if let Err(e) = result {
            tracing::warn!("Failed to persist {}: {}", key, e);
        }
    }

    fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.cache.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, IdentityState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IdentityState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("profile_id", &self.profile_id())
            .field("generation", &self.generation())
            .finish()
    }
}
