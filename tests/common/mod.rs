//! Test utilities and fixtures for Adapty SDK integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub use adapty_sdk::*;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a profile from a JSON object, the way the backend returns it.
pub fn profile_from(value: Value) -> Profile {
    serde_json::from_value(value).expect("valid profile fixture")
}

pub fn test_profile(id: &str) -> Profile {
    profile_from(json!({ "profile_id": id }))
}

pub fn test_installation(meta_id: &str) -> Installation {
    serde_json::from_value(json!({ "installation_meta_id": meta_id }))
        .expect("valid installation fixture")
}

pub fn test_snapshot(level: &str) -> EntitlementSnapshot {
    serde_json::from_value(json!({
        "paid_access_levels": { level: { "is_active": true } }
    }))
    .expect("valid snapshot fixture")
}

pub fn test_transaction(id: &str) -> StoreTransaction {
    StoreTransaction {
        transaction_id: id.to_string(),
        product_id: "monthly".to_string(),
        receipt: Some(format!("receipt-{}", id)),
        context: None,
    }
}

pub fn test_product(id: &str) -> PlatformProduct {
    PlatformProduct {
        vendor_product_id: id.to_string(),
        localized_title: format!("Product {}", id),
        localized_description: String::new(),
        price: "9.99".to_string(),
        currency_code: Some("USD".to_string()),
        region_code: Some("US".to_string()),
        subscription_period: None,
    }
}

pub fn network_error() -> AdaptyError {
    AdaptyError::network("connection reset")
}

pub fn rejected_error() -> AdaptyError {
    AdaptyError::with_status(AdaptyErrorCode::ServerRejected, "invalid receipt", 400)
}

/// One request seen by [`MockApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateProfile { seed: String, attributes: Parameters },
    UpdateProfile { profile_id: String, attributes: Parameters },
    SyncInstallation { meta_id: String, profile_id: String, attributes: Parameters },
    ValidateReceipt { attributes: Parameters },
    GetPurchaserInfo { profile_id: String },
    GetPurchaseContainers { profile_id: Option<String> },
    LiveEvent { profile_id: String, attributes: Parameters },
}

/// In-process backend. Queued responses are used first; without one each
/// call succeeds with a plausible default.
#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<Call>>,
    create_responses: Mutex<VecDeque<Result<(Profile, bool)>>>,
    update_responses: Mutex<VecDeque<Result<Profile>>>,
    installation_responses: Mutex<VecDeque<Result<Installation>>>,
    validate_responses: Mutex<VecDeque<Result<EntitlementSnapshot>>>,
    purchaser_info_responses: Mutex<VecDeque<Result<EntitlementSnapshot>>>,
    live_event_responses: Mutex<VecDeque<Result<()>>>,
    containers: Mutex<Vec<PurchaseContainer>>,
    update_delay: Mutex<Option<Duration>>,
    validate_delay: Mutex<Option<Duration>>,
    profiles_created: Mutex<u32>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateProfile { .. }))
    }

    pub fn validate_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ValidateReceipt { .. }))
    }

    pub fn live_events(&self) -> usize {
        self.count(|c| matches!(c, Call::LiveEvent { .. }))
    }

    pub fn seeds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateProfile { seed, .. } => Some(seed),
                _ => None,
            })
            .collect()
    }

    pub fn installation_meta_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SyncInstallation { meta_id, .. } => Some(meta_id),
                _ => None,
            })
            .collect()
    }

    pub fn push_create(&self, response: Result<(Profile, bool)>) {
        self.create_responses.lock().unwrap().push_back(response);
    }

    pub fn push_update(&self, response: Result<Profile>) {
        self.update_responses.lock().unwrap().push_back(response);
    }

    pub fn push_installation(&self, response: Result<Installation>) {
        self.installation_responses.lock().unwrap().push_back(response);
    }

    pub fn push_validate(&self, response: Result<EntitlementSnapshot>) {
        self.validate_responses.lock().unwrap().push_back(response);
    }

    pub fn push_purchaser_info(&self, response: Result<EntitlementSnapshot>) {
        self.purchaser_info_responses.lock().unwrap().push_back(response);
    }

    pub fn push_live_event(&self, response: Result<()>) {
        self.live_event_responses.lock().unwrap().push_back(response);
    }

    pub fn set_containers(&self, containers: Vec<PurchaseContainer>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    /// Hold every receipt validation for `delay`; `None` answers at once.
    pub fn set_validate_delay(&self, delay: Option<Duration>) {
        *self.validate_delay.lock().unwrap() = delay;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn create_profile(&self, seed_id: &str, attributes: &Parameters) -> Result<(Profile, bool)> {
        self.record(Call::CreateProfile {
            seed: seed_id.to_string(),
            attributes: attributes.clone(),
        });
        tokio::task::yield_now().await;

        let queued = self.create_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let mut n = self.profiles_created.lock().unwrap();
            *n += 1;
            Ok((test_profile(&format!("profile-{}", n)), true))
        })
    }

    async fn update_profile(&self, profile_id: &str, attributes: &Parameters) -> Result<Profile> {
        self.record(Call::UpdateProfile {
            profile_id: profile_id.to_string(),
            attributes: attributes.clone(),
        });
        let delay = *self.update_delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let queued = self.update_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let mut body = attributes.clone();
            body.insert("profile_id".into(), profile_id.into());
            Ok(profile_from(Value::Object(body)))
        })
    }

    async fn sync_installation(
        &self,
        installation_meta_id: &str,
        profile_id: &str,
        attributes: &Parameters,
    ) -> Result<Installation> {
        self.record(Call::SyncInstallation {
            meta_id: installation_meta_id.to_string(),
            profile_id: profile_id.to_string(),
            attributes: attributes.clone(),
        });
        tokio::task::yield_now().await;

        let queued = self.installation_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let mut body = attributes.clone();
            body.insert("installation_meta_id".into(), installation_meta_id.into());
            Ok(serde_json::from_value(Value::Object(body)).expect("installation body"))
        })
    }

    async fn validate_receipt(&self, attributes: &Parameters) -> Result<EntitlementSnapshot> {
        self.record(Call::ValidateReceipt {
            attributes: attributes.clone(),
        });
        let delay = *self.validate_delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let queued = self.validate_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(test_snapshot("premium")))
    }

    async fn get_purchaser_info(&self, profile_id: &str) -> Result<EntitlementSnapshot> {
        self.record(Call::GetPurchaserInfo {
            profile_id: profile_id.to_string(),
        });
        tokio::task::yield_now().await;

        let queued = self.purchaser_info_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(EntitlementSnapshot::default()))
    }

    async fn get_purchase_containers(&self, profile_id: Option<&str>) -> Result<Vec<PurchaseContainer>> {
        self.record(Call::GetPurchaseContainers {
            profile_id: profile_id.map(str::to_string),
        });
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn track_live_event(&self, profile_id: &str, attributes: &Parameters) -> Result<()> {
        self.record(Call::LiveEvent {
            profile_id: profile_id.to_string(),
            attributes: attributes.clone(),
        });

        let queued = self.live_event_responses.lock().unwrap().pop_front();
        queued.unwrap_or(Ok(()))
    }
}

/// Platform purchase queue double.
///
/// Transactions stay pending until finished; every new subscriber gets the
/// pending ones redelivered, the way a store queue behaves on app launch.
#[derive(Default)]
pub struct MockQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<StoreTransaction>>>,
    pending: Mutex<Vec<StoreTransaction>>,
    finished: Mutex<Vec<String>>,
    products: Mutex<Vec<PlatformProduct>>,
    history: Mutex<Vec<StoreTransaction>>,
    receipt: Mutex<Option<String>>,
    next_purchase: Mutex<Option<Result<StoreTransaction>>>,
    restore_delay: Mutex<Option<Duration>>,
}

impl MockQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the platform reporting a new transaction.
    pub fn deliver(&self, transaction: StoreTransaction) {
        self.pending.lock().unwrap().push(transaction.clone());
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(transaction);
        }
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn is_finished(&self, transaction_id: &str) -> bool {
        self.finished.lock().unwrap().iter().any(|id| id == transaction_id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.transaction_id.clone())
            .collect()
    }

    pub fn set_products(&self, products: Vec<PlatformProduct>) {
        *self.products.lock().unwrap() = products;
    }

    pub fn set_history(&self, history: Vec<StoreTransaction>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn set_receipt(&self, receipt: &str) {
        *self.receipt.lock().unwrap() = Some(receipt.to_string());
    }

    pub fn set_next_purchase(&self, result: Result<StoreTransaction>) {
        *self.next_purchase.lock().unwrap() = Some(result);
    }

    /// Keep the store's restore sheet open for `delay`.
    pub fn set_restore_delay(&self, delay: Duration) {
        *self.restore_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl PurchaseQueue for MockQueue {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreTransaction> {
        let (tx, rx) = mpsc::unbounded_channel();
        for transaction in self.pending.lock().unwrap().iter() {
            let _ = tx.send(transaction.clone());
        }
        *self.sender.lock().unwrap() = Some(tx);
        rx
    }

    async fn products(&self, product_ids: &[String]) -> Result<Vec<PlatformProduct>> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| product_ids.contains(&p.vendor_product_id))
            .cloned()
            .collect())
    }

    async fn purchase(&self, product: &PlatformProduct, _offer_id: Option<&str>) -> Result<StoreTransaction> {
        let next = self.next_purchase.lock().unwrap().take();
        let transaction = match next {
            Some(result) => result?,
            None => StoreTransaction {
                transaction_id: format!("txn-{}", product.vendor_product_id),
                product_id: product.vendor_product_id.clone(),
                receipt: Some("purchase-receipt".to_string()),
                context: None,
            },
        };
        self.pending.lock().unwrap().push(transaction.clone());
        Ok(transaction)
    }

    async fn finish_transaction(&self, transaction_id: &str) -> Result<()> {
        self.pending
            .lock()
            .unwrap()
            .retain(|t| t.transaction_id != transaction_id);
        self.finished.lock().unwrap().push(transaction_id.to_string());
        Ok(())
    }

    async fn restore_completed_transactions(&self) -> Result<Vec<StoreTransaction>> {
        let delay = *self.restore_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.history.lock().unwrap().clone())
    }

    fn latest_receipt(&self) -> Option<String> {
        self.receipt.lock().unwrap().clone()
    }
}

pub fn test_options(storage: Arc<dyn LocalCache>) -> AdaptyOptions {
    AdaptyOptions {
        storage,
        heartbeat_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

/// Client over the mocks with an in-memory cache. No network calls yet.
pub fn test_client(api: &Arc<MockApi>, queue: &Arc<MockQueue>) -> Adapty {
    init_tracing();
    Adapty::with_api(
        api.clone(),
        queue.clone(),
        test_options(Arc::new(MemoryStorage::new())),
    )
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `cond` holds, giving up after a bounded number of rounds.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    cond()
}
