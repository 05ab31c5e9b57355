//! Profile creation and incremental profile/installation sync.

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::api::RemoteApi;
use crate::device::{DeviceDescriptor, encode_push_token};
use crate::error::{AdaptyError, Result};
use crate::identity::IdentityStore;
use crate::models::{Attribution, Installation, Parameters, Profile, ProfileAttributes};

/// Keeps the local profile and installation in step with the backend.
///
/// Operations on the same entity are serialized by a per-entity async lock held
/// across the network call, so concurrent updates reach the backend (and the
/// identity store) in the order they were issued. A failed call never touches
/// the stored value.
pub struct SyncEngine {
    api: Arc<dyn RemoteApi>,
    identity: Arc<IdentityStore>,
    device: DeviceDescriptor,
    advertising_id: Option<String>,
    push_token: RwLock<Option<String>>,
    profile_lock: Mutex<()>,
    installation_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        identity: Arc<IdentityStore>,
        device: DeviceDescriptor,
        advertising_id: Option<String>,
    ) -> Self {
        Self {
            api,
            identity,
            device,
            advertising_id,
            push_token: RwLock::new(None),
            profile_lock: Mutex::new(()),
            installation_lock: Mutex::new(()),
        }
    }

    /// Return the stored profile, creating it first when there is none.
    ///
    /// The boolean is `true` when this call created the profile.
    pub async fn ensure_profile(&self) -> Result<(Profile, bool)> {
        let _guard = self.profile_lock.lock().await;
        if let Some(profile) = self.identity.profile() {
            return Ok((profile, false));
        }
        let profile = self.create_profile_locked().await?;
        Ok((profile, true))
    }

    /// Create the profile. Fails with `AlreadyAuthenticated` without touching
    /// the network when one already exists.
    pub async fn create_profile(&self) -> Result<Profile> {
        let _guard = self.profile_lock.lock().await;
        if self.identity.profile().is_some() {
            return Err(AdaptyError::already_authenticated());
        }
        self.create_profile_locked().await
    }

    async fn create_profile_locked(&self) -> Result<Profile> {
        let generation = self.identity.generation();
        let seed = self.identity.profile_seed();

        let mut attributes = Parameters::new();
        if let Some(idfa) = &self.advertising_id {
            attributes.insert("idfa".into(), idfa.clone().into());
        }

        let (profile, is_new) = self.api.create_profile(&seed, &attributes).await?;
        tracing::info!("Profile {} ready (new: {})", profile.profile_id, is_new);

        if !self.identity.set_profile_if_current(generation, profile.clone()) {
            return Err(AdaptyError::identity_reset());
        }
        Ok(profile)
    }

    /// Send a sparse profile patch and store the backend's merged result.
    pub async fn update_profile(&self, attributes: &ProfileAttributes) -> Result<Profile> {
        let _guard = self.profile_lock.lock().await;
        let (generation, profile_id) = self.identity.current();
        let profile_id = profile_id.ok_or_else(AdaptyError::missing_required_params)?;

        let mut params = attributes.to_parameters()?;
        if let Some(idfa) = &self.advertising_id {
            params.insert("idfa".into(), idfa.clone().into());
        }

        let profile = self
            .api
            .update_profile(&profile_id, &params)
            .await
            .inspect_err(|e| tracing::warn!("Profile update failed: {}", e))?;

        if !self.identity.set_profile_if_current(generation, profile.clone()) {
            return Err(AdaptyError::identity_reset());
        }
        Ok(profile)
    }

    /// Sync device attributes (plus `overrides`) to the installation record.
    pub async fn sync_installation(&self, overrides: Parameters) -> Result<Installation> {
        let _guard = self.installation_lock.lock().await;
        let (generation, profile_id) = self.identity.current();
        let profile_id = profile_id.ok_or_else(AdaptyError::missing_required_params)?;
        let meta_id = self.identity.installation_meta_id();

        let mut params = self.device.to_parameters();
        if let Some(token) = self.push_token() {
            params.insert("device_token".into(), token.into());
        }
        params.extend(overrides);

        let installation = self
            .api
            .sync_installation(&meta_id, &profile_id, &params)
            .await
            .inspect_err(|e| tracing::warn!("Installation sync failed: {}", e))?;

        if !self.identity.set_installation_if_current(generation, installation.clone()) {
            return Err(AdaptyError::identity_reset());
        }
        Ok(installation)
    }

    /// Send attribution data for the existing installation.
    pub async fn update_attribution(&self, attribution: &Attribution) -> Result<Installation> {
        let _guard = self.installation_lock.lock().await;
        let (generation, profile_id) = self.identity.current();
        let (Some(profile_id), Some(current)) = (profile_id, self.identity.installation()) else {
            return Err(AdaptyError::missing_required_params());
        };

        let params = attribution.to_parameters()?;
        let installation = self
            .api
            .sync_installation(&current.installation_meta_id, &profile_id, &params)
            .await
            .inspect_err(|e| tracing::warn!("Attribution update failed: {}", e))?;

        if !self.identity.set_installation_if_current(generation, installation.clone()) {
            return Err(AdaptyError::identity_reset());
        }
        Ok(installation)
    }

    /// Remember a raw push token; it is sent with every later installation sync.
    pub fn set_push_token(&self, token: Option<&[u8]>) {
        let encoded = token.map(encode_push_token);
        let mut slot = self.push_token.write().unwrap_or_else(|e| e.into_inner());
        *slot = encoded;
    }

    pub fn push_token(&self) -> Option<String> {
        self.push_token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("device", &self.device)
            .field("has_push_token", &self.push_token().is_some())
            .finish()
    }
}
