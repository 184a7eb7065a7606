use serde::Deserialize;

/// Settings for the binary APNS gateway.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct ApnsSettings {
    /// Production gateway endpoint, `host:port`.
    pub endpoint: String,
    /// Sandbox gateway endpoint, `host:port`.
    pub sandbox_endpoint: String,
    /// Route pushes through the sandbox gateway instead.
    pub sandbox: bool,
    /// Sockets kept per application.
    pub pool_size: usize,
    /// How long to wait for an error frame after a write, in milliseconds.
    /// The gateway only responds on error.
    pub read_timeout_millis: u64,
    /// Maximum payload size in bytes. Apple caps the legacy gateway at 256.
    pub max_payload_size: usize,
}

impl Default for ApnsSettings {
    fn default() -> Self {
        Self {
            endpoint: "gateway.push.apple.com:2195".to_string(),
            sandbox_endpoint: "gateway.sandbox.push.apple.com:2195".to_string(),
            sandbox: false,
            pool_size: 20,
            read_timeout_millis: 150,
            max_payload_size: 256,
        }
    }
}

impl ApnsSettings {
    /// The gateway endpoint selected by the sandbox flag.
    pub fn gateway(&self) -> &str {
        if self.sandbox {
            &self.sandbox_endpoint
        } else {
            &self.endpoint
        }
    }
}
