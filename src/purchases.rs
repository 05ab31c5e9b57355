//! Purchase observation and receipt validation pipeline.
//!
//! Every store transaction moves `pending → validating → {validated | failed}`.
//! A transaction is finalized with the platform queue only after the backend
//! accepted the receipt or rejected it outright. Transient failures leave it
//! unfinalized so the platform redelivers it on the next launch.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::RemoteApi;
use crate::error::{AdaptyError, AdaptyErrorCode, Result};
use crate::identity::IdentityStore;
use crate::models::{
    EntitlementSnapshot, Parameters, PlatformProduct, PurchaseContainer, PurchaseResult,
    StoreTransaction, TransactionState, ValidationContext,
};

/// Platform purchase queue (StoreKit, Play Billing, ...).
#[async_trait]
pub trait PurchaseQueue: Send + Sync {
    /// Stream of transactions the platform reports as unfinished.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreTransaction>;

    /// Localized definitions for the given product ids. Unknown ids are omitted.
    async fn products(&self, product_ids: &[String]) -> Result<Vec<PlatformProduct>>;

    /// Present the purchase and wait for the resulting transaction.
    async fn purchase(&self, product: &PlatformProduct, offer_id: Option<&str>) -> Result<StoreTransaction>;

    /// Acknowledge a transaction so it is not redelivered.
    async fn finish_transaction(&self, transaction_id: &str) -> Result<()>;

    /// Full purchase history for the signed-in store account.
    async fn restore_completed_transactions(&self) -> Result<Vec<StoreTransaction>>;

    /// Most recent receipt cached on the device.
    fn latest_receipt(&self) -> Option<String>;
}

type Outcome = Option<Result<EntitlementSnapshot>>;

/// Finalized transactions whose state and outcome are kept for lookup.
const FINALIZED_RETENTION: usize = 64;

#[derive(Default)]
struct PipelineState {
    states: HashMap<String, TransactionState>,
    in_flight: HashMap<String, watch::Receiver<Outcome>>,
    outcomes: HashMap<String, Result<EntitlementSnapshot>>,
    finalized: VecDeque<String>,
    deferred: Vec<StoreTransaction>,
}

impl PipelineState {
    /// Remember a finalized transaction, evicting the oldest beyond the
    /// retention limit.
    fn record_finalized(&mut self, id: &str, outcome: Result<EntitlementSnapshot>) {
        self.outcomes.insert(id.to_string(), outcome);
        self.finalized.retain(|f| f != id);
        self.finalized.push_back(id.to_string());
        while self.finalized.len() > FINALIZED_RETENTION {
            if let Some(evicted) = self.finalized.pop_front() {
                self.states.remove(&evicted);
                self.outcomes.remove(&evicted);
            }
        }
    }
}

/// Releases the in-flight slot of a leading validation. If the leader is
/// dropped before it completes, the transaction goes back to `Pending` so the
/// next delivery starts a fresh validation.
struct InFlight<'a> {
    pipeline: &'a PurchasePipeline,
    id: &'a str,
    completed: bool,
}

impl InFlight<'_> {
    fn complete(mut self, result: &Result<EntitlementSnapshot>) {
        self.completed = true;
        let mut state = self.pipeline.lock_state();
        state.in_flight.remove(self.id);
        if state.states.get(self.id).is_some_and(TransactionState::is_terminal) {
            state.record_finalized(self.id, result.clone());
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut state = self.pipeline.lock_state();
        state.in_flight.remove(self.id);
        if state.states.get(self.id) == Some(&TransactionState::Validating) {
            state.states.insert(self.id.to_string(), TransactionState::Pending);
        }
        tracing::debug!("Validation of {} abandoned", self.id);
    }
}

enum Slot {
    Join(watch::Receiver<Outcome>),
    Lead(watch::Sender<Outcome>),
}

/// Drives store transactions through backend validation.
pub struct PurchasePipeline {
    api: Arc<dyn RemoteApi>,
    identity: Arc<IdentityStore>,
    queue: Arc<dyn PurchaseQueue>,
    state: Mutex<PipelineState>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl PurchasePipeline {
    pub fn new(api: Arc<dyn RemoteApi>, identity: Arc<IdentityStore>, queue: Arc<dyn PurchaseQueue>) -> Self {
        Self {
            api,
            identity,
            queue,
            state: Mutex::new(PipelineState::default()),
            observer: Mutex::new(None),
        }
    }

    /// Start listening to the platform queue. Calling it again while the
    /// listener runs is a no-op.
    pub fn start_observing(self: &Arc<Self>) {
        let mut observer = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        if observer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let mut rx = self.queue.subscribe();
        let pipeline = Arc::downgrade(self);
        *observer = Some(tokio::spawn(async move {
            while let Some(transaction) = rx.recv().await {
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    let id = transaction.transaction_id.clone();
                    if let Err(e) = pipeline.validate(transaction).await {
                        tracing::debug!("Observed transaction {} not validated: {}", id, e);
                    }
                });
            }
            tracing::debug!("Purchase queue observer stopped");
        }));
        tracing::info!("Observing purchase queue");
    }

    pub fn stop_observing(&self) {
        if let Some(handle) = self.observer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    /// Current state of a tracked transaction.
    pub fn transaction_state(&self, transaction_id: &str) -> Option<TransactionState> {
        self.lock_state().states.get(transaction_id).copied()
    }

    /// Number of transactions waiting for a profile.
    pub fn deferred_count(&self) -> usize {
        self.lock_state().deferred.len()
    }

    /// Validate a transaction the platform reports as pending.
    ///
    /// Without a profile the transaction is parked and `MissingRequiredParams`
    /// returned; [`resume_deferred`](Self::resume_deferred) picks it up later.
    /// A second call for a transaction already in flight waits for and shares
    /// the first call's result instead of issuing another request.
    pub async fn validate(&self, transaction: StoreTransaction) -> Result<EntitlementSnapshot> {
        let id = transaction.transaction_id.clone();

        let slot = {
            let mut state = self.lock_state();
            if let Some(rx) = state.in_flight.get(&id) {
                Slot::Join(rx.clone())
            } else if self.identity.profile_id().is_none() {
                tracing::info!("Deferring transaction {} until a profile exists", id);
                state.states.insert(id.clone(), TransactionState::Pending);
                if !state.deferred.iter().any(|t| t.transaction_id == id) {
                    state.deferred.push(transaction.clone());
                }
                return Err(AdaptyError::missing_required_params());
            } else {
                let (tx, rx) = watch::channel(None);
                state.in_flight.insert(id.clone(), rx);
                state.states.insert(id.clone(), TransactionState::Validating);
                Slot::Lead(tx)
            }
        };

        match slot {
            Slot::Join(rx) => Self::join(rx).await,
            Slot::Lead(tx) => {
                let flight = InFlight {
                    pipeline: self,
                    id: &id,
                    completed: false,
                };
                let result = self.run_validation(&transaction).await;
                flight.complete(&result);
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }

    /// Validate every transaction parked while no profile existed.
    pub async fn resume_deferred(&self) {
        let deferred = std::mem::take(&mut self.lock_state().deferred);
        if deferred.is_empty() {
            return;
        }
        tracing::info!("Resuming {} deferred transactions", deferred.len());
        for transaction in deferred {
            let id = transaction.transaction_id.clone();
            if let Err(e) = self.validate(transaction).await {
                tracing::warn!("Deferred transaction {} not validated: {}", id, e);
            }
        }
    }

    /// Validate an explicit receipt and merge the result into the identity store.
    pub async fn validate_receipt(
        &self,
        receipt: &str,
        context: Option<&ValidationContext>,
    ) -> Result<EntitlementSnapshot> {
        let (generation, profile_id) = self.identity.current();
        let profile_id = profile_id.ok_or_else(AdaptyError::missing_required_params)?;

        let attributes = Self::receipt_attributes(&profile_id, receipt, context)?;
        let snapshot = self.api.validate_receipt(&attributes).await?;

        if !self.identity.set_purchaser_info_if_current(generation, snapshot.clone()) {
            tracing::debug!("Receipt validated for a profile that was logged out");
        }
        Ok(snapshot)
    }

    /// Purchase a product and wait until its transaction is validated.
    pub async fn make_purchase(&self, product: &PlatformProduct, offer_id: Option<&str>) -> Result<PurchaseResult> {
        if self.identity.profile_id().is_none() {
            return Err(AdaptyError::missing_required_params());
        }

        let transaction = self.queue.purchase(product, offer_id).await?;
        tracing::info!(
            "Purchased {} (transaction {})",
            transaction.product_id,
            transaction.transaction_id
        );

        // The observer may already have validated it.
        let recorded = self.lock_state().outcomes.remove(&transaction.transaction_id);
        let purchaser_info = match recorded {
            Some(outcome) => outcome?,
            None => self.validate(transaction.clone()).await?,
        };

        Ok(PurchaseResult {
            transaction,
            purchaser_info,
        })
    }

    /// Re-validate the full store purchase history.
    ///
    /// Returns the newest purchaser info. When the store reports no
    /// transactions the backend's current purchaser info is returned instead.
    ///
    /// Fails with `IdentityReset` when the identity is cleared while the store
    /// is collecting the history.
    pub async fn restore_purchases(&self) -> Result<EntitlementSnapshot> {
        let (generation, profile_id) = self.identity.current();
        let profile_id = profile_id.ok_or_else(AdaptyError::missing_required_params)?;

        let transactions = self.queue.restore_completed_transactions().await?;
        if self.identity.generation() != generation {
            tracing::debug!("Identity cleared during restore, dropping store history");
            return Err(AdaptyError::identity_reset());
        }
        tracing::info!("Restoring {} transactions", transactions.len());

        if transactions.is_empty() {
            let snapshot = self.api.get_purchaser_info(&profile_id).await?;
            self.identity.set_purchaser_info_if_current(generation, snapshot.clone());
            return Ok(snapshot);
        }

        let mut latest = None;
        let mut first_error = None;
        for transaction in transactions {
            let id = transaction.transaction_id.clone();
            match self.validate(transaction).await {
                Ok(snapshot) => latest = Some(snapshot),
                Err(e) => {
                    tracing::warn!("Restored transaction {} not validated: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match (latest, first_error) {
            (Some(snapshot), _) => Ok(snapshot),
            (None, Some(e)) => Err(e),
            (None, None) => Err(AdaptyError::invalid_response("no validation result")),
        }
    }

    /// Backend purchase containers with each product joined to its platform
    /// definition. Products the platform doesn't know are dropped.
    pub async fn get_purchase_containers(&self) -> Result<Vec<PurchaseContainer>> {
        let profile_id = self.identity.profile_id();
        let mut containers = self.api.get_purchase_containers(profile_id.as_deref()).await?;

        let mut product_ids: Vec<String> = containers
            .iter()
            .flat_map(|c| c.products.iter().map(|p| p.vendor_product_id.clone()))
            .collect();
        product_ids.sort();
        product_ids.dedup();

        let store_products: HashMap<String, PlatformProduct> = self
            .queue
            .products(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.vendor_product_id.clone(), p))
            .collect();

        for container in &mut containers {
            container.products.retain_mut(|product| match store_products.get(&product.vendor_product_id) {
                Some(store_product) => {
                    product.store_product = Some(store_product.clone());
                    true
                }
                None => {
                    tracing::debug!("Store has no product {}", product.vendor_product_id);
                    false
                }
            });
        }

        Ok(containers)
    }

    /// Re-validate the latest cached receipt to refresh offer eligibility.
    /// Best effort: failures are logged and dropped.
    pub async fn sync_transactions_history(&self) {
        let Some(receipt) = self.queue.latest_receipt() else {
            tracing::debug!("No cached receipt, skipping history sync");
            return;
        };

        if let Err(e) = self.validate_receipt(&receipt, None).await {
            tracing::warn!("Transaction history sync failed: {}", e);
        }
    }

    /// Forget deferred transactions and finalized history; used on logout.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.deferred.clear();
        state.outcomes.clear();
        for id in std::mem::take(&mut state.finalized) {
            state.states.remove(&id);
        }
    }

    async fn run_validation(&self, transaction: &StoreTransaction) -> Result<EntitlementSnapshot> {
        let id = &transaction.transaction_id;

        let Some(receipt) = transaction.receipt.clone().or_else(|| self.queue.latest_receipt()) else {
            tracing::warn!("No receipt available for transaction {}", id);
            self.set_state(id, TransactionState::Pending);
            return Err(AdaptyError::missing_required_params());
        };

        let result = self.validate_receipt(&receipt, transaction.context.as_ref()).await;

        match &result {
            Ok(_) => {
                self.set_state(id, TransactionState::Validated);
                self.finalize(id).await;
            }
            Err(e) if e.code == AdaptyErrorCode::ServerRejected => {
                tracing::warn!("Backend rejected transaction {}: {}", id, e);
                self.set_state(id, TransactionState::Failed);
                self.finalize(id).await;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Validation of {} failed transiently, awaiting redelivery: {}", id, e);
            }
            Err(e) => {
                tracing::warn!("Validation of {} not attempted: {}", id, e);
                self.set_state(id, TransactionState::Pending);
            }
        }

        result
    }

    async fn finalize(&self, transaction_id: &str) {
        match self.queue.finish_transaction(transaction_id).await {
            Ok(()) => tracing::debug!("Finished transaction {}", transaction_id),
            Err(e) => tracing::warn!("Failed to finish transaction {}: {}", transaction_id, e),
        }
    }

    async fn join(mut rx: watch::Receiver<Outcome>) -> Result<EntitlementSnapshot> {
        let outcome = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| AdaptyError::network("validation was abandoned"))?
            .clone();
        outcome.unwrap_or_else(|| Err(AdaptyError::network("validation was abandoned")))
    }

    fn receipt_attributes(
        profile_id: &str,
        receipt: &str,
        context: Option<&ValidationContext>,
    ) -> Result<Parameters> {
        let mut attributes = Parameters::new();
        attributes.insert("profile_id".into(), profile_id.into());
        attributes.insert("receipt_encoded".into(), receipt.into());
        if let Some(context) = context
            && let serde_json::Value::Object(extra) = serde_json::to_value(context)?
        {
            attributes.extend(extra);
        }
        Ok(attributes)
    }

    fn set_state(&self, transaction_id: &str, state: TransactionState) {
        self.lock_state().states.insert(transaction_id.to_string(), state);
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PurchasePipeline {
    fn drop(&mut self) {
        self.stop_observing();
    }
}

impl std::fmt::Debug for PurchasePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("PurchasePipeline")
            .field("tracked", &state.states.len())
            .field("in_flight", &state.in_flight.len())
            .field("deferred", &state.deferred.len())
            .finish()
    }
}
