//! Remote API facade: the only place that talks to the backend.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::config::AdaptyOptions;
use crate::device::SDK_VERSION;
use crate::error::{AdaptyError, Result, map_status_to_error_code};
use crate::models::{EntitlementSnapshot, Installation, Parameters, Profile, PurchaseContainer};

/// Resource type names used in request envelopes.
pub mod types {
    pub const PROFILE: &str = "adapty_analytics_profile";
    pub const INSTALLATION: &str = "adapty_analytics_profile_installation_meta";
    pub const RECEIPT: &str = "adapty_inapps_apple_receipt_validation_result";
    pub const LIVE_EVENT: &str = "adapty_analytics_live_event";
}

/// Backend operations consumed by the sync engine, purchase pipeline and
/// heartbeat scheduler. Every attribute bag is sparse: omitted keys are left
/// unchanged server-side.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create the profile keyed by `seed_id`. Returns the profile and whether
    /// the backend created it (as opposed to finding an existing one).
    async fn create_profile(&self, seed_id: &str, attributes: &Parameters) -> Result<(Profile, bool)>;

    async fn update_profile(&self, profile_id: &str, attributes: &Parameters) -> Result<Profile>;

    async fn sync_installation(
        &self,
        installation_meta_id: &str,
        profile_id: &str,
        attributes: &Parameters,
    ) -> Result<Installation>;

    async fn validate_receipt(&self, attributes: &Parameters) -> Result<EntitlementSnapshot>;

    async fn get_purchaser_info(&self, profile_id: &str) -> Result<EntitlementSnapshot>;

    async fn get_purchase_containers(&self, profile_id: Option<&str>) -> Result<Vec<PurchaseContainer>>;

    async fn track_live_event(&self, profile_id: &str, attributes: &Parameters) -> Result<()>;
}

#[derive(Deserialize)]
struct Resource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Parameters,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// HTTP implementation of [`RemoteApi`].
pub struct HttpApi {
    api_key: String,
    base_url: String,
    http: HttpClient,
}

impl HttpApi {
    pub fn new(api_key: &str, options: &AdaptyOptions) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AdaptyError::configuration("api_key is required"));
        }
        let base_url = options.normalized_base_url();
        Url::parse(&base_url).map_err(|_| AdaptyError::configuration("Invalid base URL"))?;

        let http = HttpClient::builder()
            .user_agent(format!("adapty-sdk-rust/{}", SDK_VERSION))
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| AdaptyError::configuration(e.to_string()))?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            http,
        })
    }

    fn envelope(id: &str, kind: &str, attributes: &Parameters) -> Value {
        json!({
            "data": {
                "id": id,
                "type": kind,
                "attributes": attributes,
            }
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Api-Key {}", self.api_key));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<(StatusCode, Value)> {
        let status = response.status();

        if !status.is_success() {
            #[derive(Deserialize)]
            struct ErrorResponse {
                #[serde(default)]
                errors: Vec<ErrorDetail>,
                #[serde(default)]
                detail: Option<String>,
            }

            #[derive(Deserialize)]
            struct ErrorDetail {
                #[serde(default)]
                detail: Option<String>,
                #[serde(default)]
                source: Option<String>,
            }

            let body: Option<ErrorResponse> = response.json().await.ok();
            let message = body
                .and_then(|b| {
                    b.errors
                        .into_iter()
                        .find_map(|e| match (e.source, e.detail) {
                            (Some(source), Some(detail)) => Some(format!("{}: {}", source, detail)),
                            (None, Some(detail)) => Some(detail),
                            _ => None,
                        })
                        .or(b.detail)
                })
                .unwrap_or_else(|| format!("Request failed: {}", status.as_u16()));

            let code = map_status_to_error_code(status.as_u16());
            tracing::debug!("Backend returned {}: {}", status, message);
            return Err(AdaptyError::with_status(code, message, status.as_u16()));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok((status, Value::Null));
        }

        let body = serde_json::from_str(&text).map_err(|e| AdaptyError::invalid_response(e.to_string()))?;
        Ok((status, body))
    }

    /// Parse `data.attributes`, filling `id_field` from `data.id` when the
    /// attributes don't carry it.
    fn parse_resource<T: DeserializeOwned>(body: Value, id_field: &str) -> Result<T> {
        let envelope: Envelope<Resource> = serde_json::from_value(body)
            .map_err(|e| AdaptyError::invalid_response(e.to_string()))?;
        let Resource { id, mut attributes } = envelope.data;

        if !attributes.contains_key(id_field)
            && let Some(id) = id
        {
            attributes.insert(id_field.to_string(), Value::String(id));
        }

        serde_json::from_value(Value::Object(attributes))
            .map_err(|e| AdaptyError::invalid_response(e.to_string()))
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn create_profile(&self, seed_id: &str, attributes: &Parameters) -> Result<(Profile, bool)> {
        let body = Self::envelope(seed_id, types::PROFILE, attributes);
        let path = format!("/sdk/analytics/profiles/{}/", urlencoding::encode(seed_id));
        let (status, response) = self.send(Method::POST, &path, Some(&body)).await?;
        let profile = Self::parse_resource(response, "profile_id")?;
        Ok((profile, status == StatusCode::CREATED))
    }

    async fn update_profile(&self, profile_id: &str, attributes: &Parameters) -> Result<Profile> {
        let body = Self::envelope(profile_id, types::PROFILE, attributes);
        let path = format!("/sdk/analytics/profiles/{}/", urlencoding::encode(profile_id));
        let (_, response) = self.send(Method::PATCH, &path, Some(&body)).await?;
        Self::parse_resource(response, "profile_id")
    }

    async fn sync_installation(
        &self,
        installation_meta_id: &str,
        profile_id: &str,
        attributes: &Parameters,
    ) -> Result<Installation> {
        let body = Self::envelope(installation_meta_id, types::INSTALLATION, attributes);
        let path = format!(
            "/sdk/analytics/profiles/{}/installation-metas/{}/",
            urlencoding::encode(profile_id),
            urlencoding::encode(installation_meta_id)
        );
        let (_, response) = self.send(Method::POST, &path, Some(&body)).await?;
        Self::parse_resource(response, "installation_meta_id")
    }

    async fn validate_receipt(&self, attributes: &Parameters) -> Result<EntitlementSnapshot> {
        let body = Self::envelope("", types::RECEIPT, attributes);
        let (_, response) = self
            .send(Method::POST, "/sdk/in-apps/apple/receipt/validate/", Some(&body))
            .await?;
        Self::parse_resource(response, "profile_id")
    }

    async fn get_purchaser_info(&self, profile_id: &str) -> Result<EntitlementSnapshot> {
        let path = format!(
            "/sdk/analytics/profiles/{}/purchaser-info/",
            urlencoding::encode(profile_id)
        );
        let (_, response) = self.send(Method::GET, &path, None).await?;
        Self::parse_resource(response, "profile_id")
    }

    async fn get_purchase_containers(&self, profile_id: Option<&str>) -> Result<Vec<PurchaseContainer>> {
        let path = match profile_id {
            Some(id) => format!("/sdk/in-apps/purchase-containers/?profile_id={}", urlencoding::encode(id)),
            None => "/sdk/in-apps/purchase-containers/".to_string(),
        };
        let (_, response) = self.send(Method::GET, &path, None).await?;

        let envelope: Envelope<Vec<Resource>> = serde_json::from_value(response)
            .map_err(|e| AdaptyError::invalid_response(e.to_string()))?;

        envelope
            .data
            .into_iter()
            .map(|resource| {
                let mut attributes = resource.attributes;
                if !attributes.contains_key("id")
                    && let Some(id) = resource.id
                {
                    attributes.insert("id".to_string(), Value::String(id));
                }
                serde_json::from_value(Value::Object(attributes))
                    .map_err(|e| AdaptyError::invalid_response(e.to_string()))
            })
            .collect()
    }

    async fn track_live_event(&self, profile_id: &str, attributes: &Parameters) -> Result<()> {
        let body = Self::envelope(profile_id, types::LIVE_EVENT, attributes);
        let path = format!(
            "/sdk/analytics/profiles/{}/events/live/",
            urlencoding::encode(profile_id)
        );
        self.send(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}
