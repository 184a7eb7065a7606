use serde::Deserialize;

/// Settings for the GCM JSON multicast endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct GcmSettings {
    /// Multicast send endpoint.
    pub endpoint: String,
    /// Registration ids accepted per multicast request.
    pub max_registration_ids: usize,
}

impl Default for GcmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://android.googleapis.com/gcm/send".to_string(),
            max_registration_ids: 1000,
        }
    }
}
