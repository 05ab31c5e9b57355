use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Parameters;

/// Validation progress of a store transaction while the SDK tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// Observed but not yet submitted (e.g. waiting for a profile)
    Pending,
    /// Submitted, or failed transiently and awaiting redelivery
    Validating,
    /// Backend accepted the receipt; transaction finalized
    Validated,
    /// Backend rejected the receipt; transaction finalized
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated | Self::Failed)
    }
}

/// Transaction delivered by the platform purchase queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTransaction {
    pub transaction_id: String,
    pub product_id: String,
    /// Encoded receipt; when absent the queue's latest receipt is used
    pub receipt: Option<String>,
    /// Commercial context captured when the purchase was initiated
    pub context: Option<ValidationContext>,
}

/// Optional commercial context sent along with a receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    /// Decimal price as displayed to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_price: Option<String>,
    /// ISO 4217 currency code
    #[serde(rename = "price_locale", skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    /// ISO 3166 region code of the storefront
    #[serde(rename = "store_country", skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
}

/// One access level as computed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLevel {
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub will_renew: bool,
    #[serde(default)]
    pub is_in_grace_period: bool,
}

/// Server-computed purchase and subscription status (purchaser info).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_user_id: Option<String>,
    #[serde(default)]
    pub paid_access_levels: BTreeMap<String, AccessLevel>,
    #[serde(default)]
    pub subscriptions: Parameters,
    #[serde(default)]
    pub non_subscriptions: Parameters,
    #[serde(flatten)]
    pub extra: Parameters,
}

impl EntitlementSnapshot {
    /// Whether the named access level is currently active.
    pub fn is_active(&self, access_level: &str) -> bool {
        self.paid_access_levels
            .get(access_level)
            .map(|level| level.is_active)
            .unwrap_or(false)
    }
}

/// Product definition as localized by the platform store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProduct {
    pub vendor_product_id: String,
    pub localized_title: String,
    pub localized_description: String,
    /// Decimal price string, e.g. "9.99"
    pub price: String,
    pub currency_code: Option<String>,
    pub region_code: Option<String>,
    #[serde(default)]
    pub subscription_period: Option<String>,
}

/// Product entry inside a purchase container, augmented with the platform definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerProduct {
    pub vendor_product_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub promotional_offer_id: Option<String>,
    #[serde(default)]
    pub promotional_offer_eligibility: bool,
    #[serde(default)]
    pub introductory_offer_eligibility: bool,
    #[serde(default)]
    pub store_product: Option<PlatformProduct>,
}

/// Backend-configured group of products offered together (a paywall).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseContainer {
    pub id: String,
    #[serde(default)]
    pub developer_id: Option<String>,
    #[serde(default)]
    pub variation_id: Option<String>,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub products: Vec<ContainerProduct>,
}

/// Outcome of a completed purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseResult {
    pub transaction: StoreTransaction,
    pub purchaser_info: EntitlementSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_access_level_lookup() {
        let snapshot: EntitlementSnapshot = serde_json::from_value(json!({
            "paid_access_levels": {
                "premium": { "is_active": true, "vendor_product_id": "monthly" },
                "legacy": { "is_active": false }
            }
        }))
        .unwrap();

        assert!(snapshot.is_active("premium"));
        assert!(!snapshot.is_active("legacy"));
        assert!(!snapshot.is_active("missing"));
    }

    #[test]
    fn test_validation_context_field_names() {
        let context = ValidationContext {
            variation_id: Some("var-1".into()),
            currency_code: Some("USD".into()),
            region_code: Some("US".into()),
            ..Default::default()
        };

        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value["variation_id"], json!("var-1"));
        assert_eq!(value["price_locale"], json!("USD"));
        assert_eq!(value["store_country"], json!("US"));
        assert!(value.get("original_price").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransactionState::Validated.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
        assert!(!TransactionState::Validating.is_terminal());
        assert!(!TransactionState::Pending.is_terminal());
    }
}
