mod installation;
mod profile;
mod purchase;

pub use installation::*;
pub use profile::*;
pub use purchase::*;

/// Flat attribute bag sent to the backend. A missing key means "do not change".
pub type Parameters = serde_json::Map<String, serde_json::Value>;
