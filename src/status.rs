//! Per-job push results and the provider error taxonomy.

use std::collections::HashMap;
use std::fmt;

use serde_json::json;
use thiserror::Error;

/// Errors a provider can record against a device token.
///
/// The rendered strings are the wire-visible kind names; the binary
/// gateway's framing statuses keep Apple's wording.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RouterError {
    // Input validation
    #[error("NoDeviceTokens")]
    NoDeviceTokens,
    #[error("TooManyDeviceTokens")]
    TooManyDeviceTokens,
    #[error("NoPayload")]
    NoPayload,
    #[error("MessageTooBig")]
    MessageTooBig,
    #[error("InvalidJSON")]
    InvalidJson,

    // Credentials
    #[error("Unauthorized")]
    Unauthorized,

    // Registration
    #[error("InvalidRegistration")]
    InvalidRegistration,
    #[error("NotRegistered")]
    NotRegistered,
    #[error("MismatchSenderId")]
    MismatchSenderId,
    #[error("InvalidPackageName")]
    InvalidPackageName,
    #[error("InvalidDataKey")]
    InvalidDataKey,
    #[error("InvalidTtl")]
    InvalidTtl,
    #[error("MissingCollapseKey")]
    MissingCollapseKey,

    // Transient provider failures
    #[error("ServiceUnavailable")]
    ServiceUnavailable,
    #[error("Unavailable")]
    Unavailable,
    #[error("ProcessingError")]
    ProcessingError,
    #[error("QuotaExceeded")]
    QuotaExceeded,
    #[error("DeviceQuotaExceeded")]
    DeviceQuotaExceeded,
    #[error("InternalServerError")]
    InternalServerError,
    #[error("InvalidResponse")]
    InvalidResponse,
    #[error("UnknownError")]
    UnknownError,
    #[error("Unknown")]
    Unknown,
    #[error("UnknownAPNS")]
    UnknownApns,
    #[error("ClientNotConnected")]
    ClientNotConnected,

    // Binary gateway error-frame statuses
    #[error("Missing Device Token")]
    MissingDeviceToken,
    #[error("Missing Topic")]
    MissingTopic,
    #[error("Missing Payload")]
    MissingPayload,
    #[error("Invalid Token Size")]
    InvalidTokenSize,
    #[error("Invalid Topic Size")]
    InvalidTopicSize,
    #[error("Invalid Payload Size")]
    InvalidPayloadSize,
    #[error("Invalid Token")]
    InvalidToken,

    /// Raw transport or parse error carried through verbatim.
    #[error("{0}")]
    Other(String),
}

impl RouterError {
    /// Map a provider result code (GCM `results[].error`, C2DM `Error=`)
    /// onto the taxonomy; unknown codes are carried verbatim.
    pub fn from_provider_code(code: &str) -> Self {
        match code {
            "InvalidRegistration" => RouterError::InvalidRegistration,
            "NotRegistered" => RouterError::NotRegistered,
            "MismatchSenderId" => RouterError::MismatchSenderId,
            "InvalidPackageName" => RouterError::InvalidPackageName,
            "InvalidDataKey" => RouterError::InvalidDataKey,
            "InvalidTtl" => RouterError::InvalidTtl,
            "MissingCollapseKey" => RouterError::MissingCollapseKey,
            "MessageTooBig" => RouterError::MessageTooBig,
            "Unavailable" => RouterError::Unavailable,
            "InternalServerError" => RouterError::InternalServerError,
            "QuotaExceeded" => RouterError::QuotaExceeded,
            "DeviceQuotaExceeded" => RouterError::DeviceQuotaExceeded,
            other => RouterError::Other(other.to_string()),
        }
    }

    /// Transient failures are re-enqueued through the retry scheduler.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RouterError::InternalServerError
                | RouterError::ServiceUnavailable
                | RouterError::Unavailable
                | RouterError::InvalidResponse
                | RouterError::UnknownError
        )
    }

    /// Registration errors whose token should be dropped upstream.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            RouterError::InvalidRegistration | RouterError::NotRegistered
        )
    }
}

/// The outcome of one push attempt.
#[derive(Clone, Debug, Default)]
pub struct PushStatus {
    /// Whether the dispatcher should resend this notification.
    pub retry: bool,
    /// Seconds to wait before resending; 0 defers to the retry counter.
    pub delay: u64,
    /// The number of devices successfully pushed to.
    pub successes: u32,
    /// Device tokens that failed during the push and why. The empty-string
    /// key means the whole batch failed.
    pub errors: HashMap<String, RouterError>,
    /// Registration IDs that need replacing: old id → canonical id.
    pub updates: HashMap<String, String>,
}

impl PushStatus {
    /// Determine if the push request was a success. Pending updates do not
    /// make it a failure.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Render the status as a JSON summary: `{"ok":1}` on success, otherwise
/// an object carrying `errors` and/or `updates`. Each key appears only
/// when non-empty.
impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut status = serde_json::Map::new();
        if self.errors.is_empty() && self.updates.is_empty() {
            status.insert("ok".to_string(), json!(1));
        } else {
            if !self.errors.is_empty() {
                let errors: HashMap<&str, String> = self
                    .errors
                    .iter()
                    .map(|(token, error)| (token.as_str(), error.to_string()))
                    .collect();
                status.insert("errors".to_string(), json!(errors));
            }
            if !self.updates.is_empty() {
                status.insert("updates".to_string(), json!(self.updates));
            }
        }
        match serde_json::to_string(&status) {
            Ok(rendered) => f.write_str(&rendered),
            Err(_) => f.write_str("Unknown"),
        }
    }
}
