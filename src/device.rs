//! Device identifiers and runtime descriptors sent with installation syncs

use crate::config::AdaptyOptions;
use crate::models::Parameters;

/// SDK version reported to the backend
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Monotonic build number of the SDK wire contract
pub const SDK_VERSION_BUILD: u32 = 1;

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Hex-encode a raw push token the way the backend expects it.
pub fn encode_push_token(token: &[u8]) -> String {
    token.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Runtime attributes describing this installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub sdk_version: String,
    pub sdk_version_build: u32,
    pub app_version: Option<String>,
    pub app_build: Option<String>,
    pub device: String,
    pub locale: String,
    pub os: String,
    pub platform: String,
    pub timezone: String,
    pub device_identifier: Option<String>,
}

impl DeviceDescriptor {
    /// Describe the current process, taking app details from the options.
    pub fn current(options: &AdaptyOptions) -> Self {
        Self {
            sdk_version: SDK_VERSION.to_string(),
            sdk_version_build: SDK_VERSION_BUILD,
            app_version: options.app_version.clone(),
            app_build: options.app_build.clone(),
            device: std::env::consts::ARCH.to_string(),
            locale: current_locale(),
            os: std::env::consts::OS.to_string(),
            platform: std::env::consts::FAMILY.to_string(),
            timezone: current_timezone(),
            device_identifier: options.device_identifier.clone(),
        }
    }

    pub fn to_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("adapty_sdk_version".into(), self.sdk_version.clone().into());
        params.insert("adapty_sdk_version_build".into(), self.sdk_version_build.into());
        if let Some(app_build) = &self.app_build {
            params.insert("app_build".into(), app_build.clone().into());
        }
        if let Some(app_version) = &self.app_version {
            params.insert("app_version".into(), app_version.clone().into());
        }
        params.insert("device".into(), self.device.clone().into());
        params.insert("locale".into(), self.locale.clone().into());
        params.insert("os".into(), self.os.clone().into());
        params.insert("platform".into(), self.platform.clone().into());
        params.insert("timezone".into(), self.timezone.clone().into());
        if let Some(device_identifier) = &self.device_identifier {
            params.insert("device_identifier".into(), device_identifier.clone().into());
        }
        params
    }
}

/// Locale from the POSIX environment, e.g. `en_US` from `en_US.UTF-8`.
fn current_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty() && v != "C" && v != "POSIX")
        .and_then(|v| v.split('.').next().map(str::to_string))
        .unwrap_or_else(|| "en_US".to_string())
}

/// IANA zone from `TZ` when set, otherwise the local UTC offset.
fn current_timezone() -> String {
    match std::env::var("TZ") {
        Ok(tz) if !tz.is_empty() => tz.trim_start_matches(':').to_string(),
        _ => chrono::Local::now().offset().to_string(),
    }
}
