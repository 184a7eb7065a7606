use serde::Deserialize;

/// Settings for the legacy C2DM endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct C2dmSettings {
    /// Send endpoint.
    pub endpoint: String,
    /// Maximum encoded form size in bytes.
    pub max_body_size: usize,
}

impl Default for C2dmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://android.apis.google.com/c2dm/send".to_string(),
            max_body_size: 1024,
        }
    }
}
