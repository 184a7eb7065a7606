//! Adapter for the GCM JSON multicast endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::notification::Notification;
use crate::routers::common::retry_after;
use crate::routers::gcm::settings::GcmSettings;
use crate::routers::Router;
use crate::status::{PushStatus, RouterError};

/// Four weeks, the service's maximum time-to-live.
const DEFAULT_TTL: u32 = 2_419_200;

/// Multicast request body.
#[derive(Serialize)]
struct GcmMessage<'a> {
    registration_ids: &'a [String],
    collapse_key: &'a str,
    data: &'a HashMap<String, serde_json::Value>,
    delay_while_idle: bool,
    time_to_live: u32,
}

// The expected GCM response message, one result per registration id in
// request order.
#[derive(Debug, Default, Deserialize)]
struct GcmResponse {
    #[serde(default, rename = "multicast_id")]
    _multicast_id: i64,
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
    #[serde(default)]
    canonical_ids: u32,
    #[serde(default)]
    results: Vec<GcmResult>,
}

#[derive(Debug, Default, Deserialize)]
struct GcmResult {
    message_id: Option<String>,
    registration_id: Option<String>,
    error: Option<String>,
}

pub struct GcmRouter {
    settings: GcmSettings,
    http: reqwest::Client,
}

impl GcmRouter {
    pub fn new(settings: GcmSettings, http: reqwest::Client) -> Self {
        Self { settings, http }
    }
}

#[async_trait]
impl Router for GcmRouter {
    async fn push(&self, notification: &Notification, auth: &str) -> PushStatus {
        let mut status = PushStatus::default();

        if notification.device_tokens.is_empty() {
            warn!("No registration ids given for {}", notification.app_name);
            status
                .errors
                .insert(String::new(), RouterError::NoDeviceTokens);
            return status;
        }
        if notification.device_tokens.len() > self.settings.max_registration_ids {
            warn!(
                "Too many registration ids ({} max): {}",
                self.settings.max_registration_ids,
                notification.device_tokens.len()
            );
            status
                .errors
                .insert(String::new(), RouterError::TooManyDeviceTokens);
            return status;
        }
        if notification.payload.is_empty() {
            warn!("No payload defined for {}", notification.app_name);
            status.errors.insert(
                notification.device_tokens[0].clone(),
                RouterError::NoPayload,
            );
            return status;
        }

        let message = GcmMessage {
            registration_ids: &notification.device_tokens,
            collapse_key: &notification.app_name,
            data: &notification.payload,
            delay_while_idle: true,
            time_to_live: if notification.expiry == 0 {
                DEFAULT_TTL
            } else {
                notification.expiry
            },
        };

        let response = match self
            .http
            .post(&self.settings.endpoint)
            .header("Authorization", format!("key={auth}"))
            .header("Content-Type", "application/json")
            .json(&message)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("GCM request failed: {}", e);
                status.retry = true;
                status
                    .errors
                    .insert(String::new(), RouterError::Other(e.to_string()));
                return status;
            }
        };

        match response.status() {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::INTERNAL_SERVER_ERROR => {
                warn!("GCM service unavailable for {}", notification.app_name);
                status.delay = retry_after(&response);
                status.retry = true;
                status
                    .errors
                    .insert(String::new(), RouterError::ServiceUnavailable);
                return status;
            }
            StatusCode::UNAUTHORIZED => {
                warn!("GCM unauthorized for {}", notification.app_name);
                status
                    .errors
                    .insert(String::new(), RouterError::Unauthorized);
                return status;
            }
            StatusCode::BAD_REQUEST => {
                warn!("GCM rejected malformed body for {}", notification.app_name);
                status
                    .errors
                    .insert(String::new(), RouterError::InvalidJson);
                return status;
            }
            StatusCode::OK => {}
            other => {
                warn!("GCM push returned {} for {}", other, notification.app_name);
                status.retry = true;
                status
                    .errors
                    .insert(String::new(), RouterError::UnknownError);
                return status;
            }
        }

        // The header must be read before the body consumes the response.
        let delay = retry_after(&response);
        let body: GcmResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("GCM response unreadable: {}", e);
                status.retry = true;
                status
                    .errors
                    .insert(String::new(), RouterError::InvalidResponse);
                return status;
            }
        };

        status.successes = body.success;

        // When every send landed on the stored id there is nothing further
        // to map.
        if body.failure == 0 && body.canonical_ids == 0 {
            return status;
        }

        if body.failure > 0 {
            status.delay = delay;
        }

        for (i, result) in body.results.iter().enumerate() {
            let Some(input_token) = notification.device_tokens.get(i) else {
                break;
            };

            // A message id means the send was processed; a registration id
            // alongside it signals the canonical id to store.
            let message_id = result.message_id.as_deref().unwrap_or_default();
            if !message_id.is_empty() {
                if let Some(canonical_id) = result
                    .registration_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                {
                    status
                        .updates
                        .insert(input_token.clone(), canonical_id.to_string());
                }
            } else {
                let code = result.error.as_deref().unwrap_or_default();
                status
                    .errors
                    .insert(input_token.clone(), RouterError::from_provider_code(code));
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::GcmRouter;
    use crate::notification::Notification;
    use crate::routers::gcm::settings::GcmSettings;
    use crate::routers::Router;
    use crate::status::RouterError;

    const AUTH: &str = "KEY";

    fn test_router(server: &mockito::ServerGuard) -> GcmRouter {
        crate::logging::init_test_logging();
        GcmRouter::new(
            GcmSettings {
                endpoint: format!("{}/gcm/send", server.url()),
                ..Default::default()
            },
            reqwest::Client::new(),
        )
    }

    fn test_notification(tokens: &[&str]) -> Notification {
        Notification {
            app_name: "a".to_string(),
            provider: "gcm".to_string(),
            device_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            payload: [("msg".to_string(), json!("hi"))].into_iter().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_device_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gcm/send")
            .match_header("Authorization", "key=KEY")
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::Json(json!({
                "registration_ids": ["dev1"],
                "collapse_key": "a",
                "data": {"msg": "hi"},
                "delay_while_idle": true,
                "time_to_live": 2_419_200,
            })))
            .with_body(
                r#"{"multicast_id":1,"success":1,"failure":0,"canonical_ids":0,"results":[{"message_id":"m1"}]}"#,
            )
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(status.ok());
        assert_eq!(status.successes, 1);
        assert!(status.updates.is_empty());
        assert!(!status.retry);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn canonical_id_is_recorded_for_the_input_token() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_body(
                r#"{"multicast_id":1,"success":1,"failure":0,"canonical_ids":1,"results":[{"message_id":"m1","registration_id":"dev1-new"}]}"#,
            )
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(status.ok());
        assert_eq!(status.successes, 1);
        assert_eq!(status.updates.get("dev1"), Some(&"dev1-new".to_string()));
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_retry_after_hint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_header("Retry-After", "7")
            .with_body(
                r#"{"multicast_id":1,"success":1,"failure":1,"canonical_ids":0,"results":[{"message_id":"m"},{"error":"Unavailable"}]}"#,
            )
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t1", "t2"]), AUTH)
            .await;
        assert_eq!(status.successes, 1);
        assert_eq!(status.errors.get("t2"), Some(&RouterError::Unavailable));
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.delay, 7);
        assert!(!status.retry);
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_after_the_hint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_status(503)
            .with_header("Retry-After", "12")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.delay, 12);
        assert_eq!(
            status.errors.get(""),
            Some(&RouterError::ServiceUnavailable)
        );
    }

    #[tokio::test]
    async fn unauthorized_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_status(401)
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(!status.retry);
        assert_eq!(status.errors.get(""), Some(&RouterError::Unauthorized));
    }

    #[tokio::test]
    async fn bad_request_means_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_status(400)
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(!status.retry);
        assert_eq!(status.errors.get(""), Some(&RouterError::InvalidJson));
    }

    #[tokio::test]
    async fn unexpected_statuses_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gcm/send")
            .with_status(418)
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["dev1"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.errors.get(""), Some(&RouterError::UnknownError));
    }

    #[tokio::test]
    async fn no_device_tokens() {
        let server = mockito::Server::new_async().await;
        let status = test_router(&server)
            .push(&test_notification(&[]), AUTH)
            .await;
        assert_eq!(status.errors.get(""), Some(&RouterError::NoDeviceTokens));
        assert!(!status.retry);
    }

    #[tokio::test]
    async fn too_many_device_tokens() {
        let server = mockito::Server::new_async().await;
        let tokens: Vec<String> = (0..1001).map(|i| format!("t{i}")).collect();
        let token_refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let status = test_router(&server)
            .push(&test_notification(&token_refs), AUTH)
            .await;
        assert_eq!(
            status.errors.get(""),
            Some(&RouterError::TooManyDeviceTokens)
        );
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let server = mockito::Server::new_async().await;
        let mut notification = test_notification(&["dev1"]);
        notification.payload.clear();
        let status = test_router(&server).push(&notification, AUTH).await;
        assert_eq!(status.errors.get("dev1"), Some(&RouterError::NoPayload));
    }
}
