//! Adapty client: the surface exposed to the embedding application.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::{HttpApi, RemoteApi};
use crate::config::AdaptyOptions;
use crate::device::DeviceDescriptor;
use crate::error::{AdaptyError, Result};
use crate::identity::IdentityStore;
use crate::models::{
    Attribution, EntitlementSnapshot, Installation, Parameters, PlatformProduct, Profile,
    ProfileAttributes, PurchaseContainer, PurchaseResult, ValidationContext,
};
use crate::purchases::{PurchasePipeline, PurchaseQueue};
use crate::sessions::HeartbeatScheduler;
use crate::sync::SyncEngine;

/// Adapty SDK client.
///
/// Owns its identity store and every component around it; construct one per
/// app process and share it by reference. Lifecycle signals are delivered
/// explicitly through [`on_activate`](Self::on_activate) and
/// [`on_background`](Self::on_background).
///
/// # Example
/// ```rust,ignore
/// use adapty_sdk::{Adapty, AdaptyOptions, ProfileAttributes};
///
/// let adapty = Adapty::activate("public-api-key", store_queue, AdaptyOptions::from_env()).await?;
///
/// adapty
///     .update_profile(&ProfileAttributes {
///         email: Some("user@example.com".into()),
///         ..Default::default()
///     })
///     .await?;
///
/// if adapty.get_purchaser_info().await?.is_active("premium") {
///     unlock_premium();
/// }
/// ```
pub struct Adapty {
    identity: Arc<IdentityStore>,
    sync: Arc<SyncEngine>,
    purchases: Arc<PurchasePipeline>,
    sessions: Arc<HeartbeatScheduler>,
    api: Arc<dyn RemoteApi>,
    initialized: AtomicBool,
}

impl Adapty {
    /// Create a client talking to the Adapty backend and run the first
    /// activation.
    ///
    /// Only configuration problems are returned as errors. Network failures
    /// during the first activation are logged; call
    /// [`on_activate`](Self::on_activate) again to retry.
    pub async fn activate(
        api_key: &str,
        queue: Arc<dyn PurchaseQueue>,
        options: AdaptyOptions,
    ) -> Result<Self> {
        let api = Arc::new(HttpApi::new(api_key, &options)?);
        let adapty = Self::with_api(api, queue, options);

        if let Err(e) = adapty.on_activate().await {
            tracing::warn!("Activation incomplete, will retry on next activation: {}", e);
        }
        Ok(adapty)
    }

    /// Build a client around an explicit remote API. Loads cached identity but
    /// performs no network calls.
    pub fn with_api(api: Arc<dyn RemoteApi>, queue: Arc<dyn PurchaseQueue>, options: AdaptyOptions) -> Self {
        let identity = Arc::new(IdentityStore::new(options.storage.clone()));
        identity.load();

        let sync = Arc::new(SyncEngine::new(
            api.clone(),
            identity.clone(),
            DeviceDescriptor::current(&options),
            options.advertising_id.clone(),
        ));
        let purchases = Arc::new(PurchasePipeline::new(api.clone(), identity.clone(), queue));
        let sessions = Arc::new(HeartbeatScheduler::new(
            api.clone(),
            identity.clone(),
            options.heartbeat_interval,
        ));

        Self {
            identity,
            sync,
            purchases,
            sessions,
            api,
            initialized: AtomicBool::new(false),
        }
    }

    // ==================== Lifecycle ====================

    /// App became active.
    ///
    /// Makes sure a profile exists, runs the initial requests once per profile
    /// and (re)starts the heartbeat.
    pub async fn on_activate(&self) -> Result<Profile> {
        let (profile, created) = self.sync.ensure_profile().await?;
        if created {
            tracing::info!("Created profile {}", profile.profile_id);
        }

        if !self.initialized.swap(true, Ordering::SeqCst) {
            self.perform_initial_requests().await;
        } else {
            self.sessions.start();
        }

        Ok(profile)
    }

    /// App moved to the background.
    pub async fn on_background(&self) {
        self.sessions.on_background().await;
    }

    async fn perform_initial_requests(&self) {
        if let Err(e) = self.sync.sync_installation(Parameters::new()).await {
            tracing::warn!("Initial installation sync failed: {}", e);
        }
        self.sessions.start();

        self.purchases.start_observing();
        self.purchases.resume_deferred().await;
        self.purchases.sync_transactions_history().await;
    }

    // ==================== Profile ====================

    pub async fn update_profile(&self, attributes: &ProfileAttributes) -> Result<Profile> {
        self.sync.update_profile(attributes).await
    }

    pub async fn update_attribution(&self, attribution: &Attribution) -> Result<Installation> {
        self.sync.update_attribution(attribution).await
    }

    /// Set (or clear) the push token and sync it to the installation.
    pub async fn set_push_token(&self, token: Option<&[u8]>) -> Result<Installation> {
        self.sync.set_push_token(token);
        self.sync.sync_installation(Parameters::new()).await
    }

    /// Hex-encoded push token currently held by the SDK.
    pub fn push_token(&self) -> Option<String> {
        self.sync.push_token()
    }

    pub fn customer_user_id(&self) -> Option<String> {
        self.identity.profile().and_then(|p| p.customer_user_id)
    }

    pub fn profile(&self) -> Option<Profile> {
        self.identity.profile()
    }

    pub fn installation(&self) -> Option<Installation> {
        self.identity.installation()
    }

    // ==================== Purchases ====================

    pub async fn get_purchase_containers(&self) -> Result<Vec<PurchaseContainer>> {
        self.purchases.get_purchase_containers().await
    }

    pub async fn make_purchase(&self, product: &PlatformProduct, offer_id: Option<&str>) -> Result<PurchaseResult> {
        self.purchases.make_purchase(product, offer_id).await
    }

    pub async fn restore_purchases(&self) -> Result<EntitlementSnapshot> {
        self.purchases.restore_purchases().await
    }

    pub async fn validate_receipt(
        &self,
        receipt: &str,
        context: Option<&ValidationContext>,
    ) -> Result<EntitlementSnapshot> {
        self.purchases.validate_receipt(receipt, context).await
    }

    /// Fetch purchaser info from the backend and cache it.
    pub async fn get_purchaser_info(&self) -> Result<EntitlementSnapshot> {
        let (generation, profile_id) = self.identity.current();
        let profile_id = profile_id.ok_or_else(AdaptyError::missing_required_params)?;

        let snapshot = self.api.get_purchaser_info(&profile_id).await?;
        self.identity.set_purchaser_info_if_current(generation, snapshot.clone());
        Ok(snapshot)
    }

    /// Last purchaser info received, without a network call.
    pub fn cached_purchaser_info(&self) -> Option<EntitlementSnapshot> {
        self.identity.purchaser_info()
    }

    // ==================== Logout ====================

    /// Drop the current identity and create a fresh anonymous profile.
    ///
    /// The heartbeat is stopped before the identity is cleared. Requests still
    /// in flight for the old identity complete without touching the new one.
    pub async fn logout(&self) -> Result<Profile> {
        self.sessions.invalidate();
        self.identity.clear();
        self.purchases.reset();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Logged out");

        self.on_activate().await
    }
}

impl std::fmt::Debug for Adapty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapty")
            .field("identity", &self.identity)
            .field("sessions", &self.sessions)
            .field("purchases", &self.purchases)
            .finish()
    }
}
