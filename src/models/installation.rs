use serde::{Deserialize, Serialize};

use super::Parameters;
use crate::error::Result;

/// One app installation, scoped to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    /// Upsert key sent back on every sync
    #[serde(alias = "profile_installation_meta_id")]
    pub installation_meta_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapty_sdk_version: Option<String>,
    #[serde(flatten)]
    pub extra: Parameters,
}

/// Attribution payload reported by a mobile measurement partner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attribution {
    #[serde(rename = "attribution_network", skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(rename = "attribution_campaign", skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(rename = "attribution_tracker_token", skip_serializing_if = "Option::is_none")]
    pub tracker_token: Option<String>,
    #[serde(rename = "attribution_tracker_name", skip_serializing_if = "Option::is_none")]
    pub tracker_name: Option<String>,
    #[serde(rename = "attribution_adgroup", skip_serializing_if = "Option::is_none")]
    pub adgroup: Option<String>,
    #[serde(rename = "attribution_creative", skip_serializing_if = "Option::is_none")]
    pub creative: Option<String>,
    #[serde(rename = "attribution_click_label", skip_serializing_if = "Option::is_none")]
    pub click_label: Option<String>,
    #[serde(rename = "attribution_adid", skip_serializing_if = "Option::is_none")]
    pub adid: Option<String>,
}

impl Attribution {
    pub fn to_parameters(&self) -> Result<Parameters> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(Parameters::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_installation_accepts_server_meta_id_name() {
        let installation: Installation = serde_json::from_value(json!({
            "profile_installation_meta_id": "meta-1",
            "os": "linux",
        }))
        .unwrap();

        assert_eq!(installation.installation_meta_id, "meta-1");
        assert_eq!(installation.os.as_deref(), Some("linux"));
    }

    #[test]
    fn test_attribution_uses_prefixed_keys() {
        let attribution = Attribution {
            network: Some("Organic".into()),
            adid: Some("ad-1".into()),
            ..Default::default()
        };

        let params = attribution.to_parameters().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["attribution_network"], json!("Organic"));
        assert_eq!(params["attribution_adid"], json!("ad-1"));
    }
}
