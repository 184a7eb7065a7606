use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::status::PushStatus;

/// A single delivery intent: one payload headed at one or more device
/// tokens on one provider.
///
/// The `app_name` doubles as the provider-side collapse key. For APNS each
/// device token is a hex string; for GCM and C2DM it is an opaque
/// registration ID.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Notification {
    pub app_name: String,
    /// Provider tag: `apns`, `gcm` or `c2dm`.
    pub provider: String,
    #[serde(default)]
    pub device_tokens: Vec<String>,
    /// Data forwarded to the provider.
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
    /// Expiry in seconds; 0 defers to the adapter default.
    #[serde(default)]
    pub expiry: u32,
    /// Optional caller data, carried through but not interpreted.
    #[serde(default)]
    #[allow(dead_code)]
    pub extra_data: HashMap<String, serde_json::Value>,

    // Assigned at dispatch time.
    #[serde(skip)]
    pub guid: String,
    #[serde(skip)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub status: Option<PushStatus>,
    #[serde(skip)]
    pub retries: u32,
}

impl Notification {
    /// Stamp the job with a fresh id and creation time.
    pub fn init(&mut self) {
        self.guid = Uuid::new_v4().to_string();
        self.created_at = Some(Utc::now());
        self.status = None;
    }
}
