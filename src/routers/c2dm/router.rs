//! Adapter for the legacy C2DM form endpoint, one request per device
//! token.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;

use crate::notification::Notification;
use crate::routers::c2dm::settings::C2dmSettings;
use crate::routers::common::retry_after;
use crate::routers::Router;
use crate::status::{PushStatus, RouterError};

/// The endpoint reports errors as `Error=<code>` in an otherwise 200 body.
fn error_code(body: &str) -> Option<&str> {
    static ERROR_RE: OnceLock<Regex> = OnceLock::new();
    let re = ERROR_RE.get_or_init(|| Regex::new(r"Error=(.*)").expect("static regex"));
    re.captures(body)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
}

pub struct C2dmRouter {
    settings: C2dmSettings,
    http: reqwest::Client,
}

impl C2dmRouter {
    pub fn new(settings: C2dmSettings, http: reqwest::Client) -> Self {
        Self { settings, http }
    }

    /// Form-encode one send: registration id, collapse key, and the
    /// string-valued payload entries as `data.<key>`. The `id` key is
    /// reserved and non-string values are skipped.
    fn encode_form(&self, notification: &Notification, device_token: &str) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("registration_id", device_token);
        form.append_pair("collapse_key", &notification.app_name);
        for (key, value) in &notification.payload {
            if key == "id" {
                continue;
            }
            if let Some(value) = value.as_str() {
                form.append_pair(&format!("data.{key}"), value);
            }
        }
        form.finish()
    }
}

#[async_trait]
impl Router for C2dmRouter {
    async fn push(&self, notification: &Notification, auth: &str) -> PushStatus {
        let mut status = PushStatus::default();

        if notification.device_tokens.is_empty() {
            warn!("No registration ids given for {}", notification.app_name);
            status
                .errors
                .insert(String::new(), RouterError::NoDeviceTokens);
            return status;
        }

        for device_token in &notification.device_tokens {
            if notification.payload.is_empty() {
                warn!("No payload defined for {}", notification.app_name);
                status
                    .errors
                    .insert(device_token.clone(), RouterError::NoPayload);
                return status;
            }

            let body = self.encode_form(notification, device_token);
            if body.len() >= self.settings.max_body_size {
                warn!(
                    "Message too long ({} max): {}",
                    self.settings.max_body_size,
                    body.len()
                );
                status
                    .errors
                    .insert(device_token.clone(), RouterError::MessageTooBig);
                return status;
            }

            let response = match self
                .http
                .post(&self.settings.endpoint)
                .header("Authorization", format!("GoogleLogin auth={auth}"))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("C2DM request failed: {}", e);
                    status.retry = true;
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::Other(e.to_string()));
                    return status;
                }
            };

            match response.status() {
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::INTERNAL_SERVER_ERROR => {
                    warn!("C2DM service unavailable for {}", notification.app_name);
                    status.delay = retry_after(&response);
                    status.retry = true;
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::ServiceUnavailable);
                    return status;
                }
                StatusCode::UNAUTHORIZED => {
                    warn!("C2DM unauthorized for {}", notification.app_name);
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::Unauthorized);
                    return status;
                }
                // Other statuses still carry an Error= body worth scanning.
                _ => {}
            }

            let delay = retry_after(&response);
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("C2DM response unreadable: {}", e);
                    status.retry = true;
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::Other(e.to_string()));
                    return status;
                }
            };

            let Some(code) = error_code(&body) else {
                status.successes += 1;
                continue;
            };

            let error = match RouterError::from_provider_code(code) {
                error @ RouterError::QuotaExceeded => {
                    warn!("C2DM quota exceeded for {}", notification.app_name);
                    status.retry = true;
                    error
                }
                error @ RouterError::DeviceQuotaExceeded => {
                    warn!("C2DM device quota exceeded for {}", notification.app_name);
                    status.retry = true;
                    status.delay = delay;
                    error
                }
                error @ (RouterError::InvalidRegistration
                | RouterError::NotRegistered
                | RouterError::MessageTooBig
                | RouterError::MissingCollapseKey) => {
                    warn!("C2DM rejected {}: {}", device_token, error);
                    error
                }
                _ => {
                    warn!(
                        "C2DM unknown error {:?} for {}",
                        code, notification.app_name
                    );
                    status.retry = true;
                    status.delay = delay;
                    RouterError::UnknownError
                }
            };
            status.errors.insert(device_token.clone(), error);
            return status;
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{error_code, C2dmRouter};
    use crate::notification::Notification;
    use crate::routers::c2dm::settings::C2dmSettings;
    use crate::routers::Router;
    use crate::status::RouterError;

    const AUTH: &str = "TOKEN";

    fn test_router(server: &mockito::ServerGuard) -> C2dmRouter {
        crate::logging::init_test_logging();
        C2dmRouter::new(
            C2dmSettings {
                endpoint: format!("{}/c2dm/send", server.url()),
                ..Default::default()
            },
            reqwest::Client::new(),
        )
    }

    fn test_notification(tokens: &[&str]) -> Notification {
        Notification {
            app_name: "a".to_string(),
            provider: "c2dm".to_string(),
            device_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            payload: [("msg".to_string(), json!("hi"))].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn error_codes_are_scanned_out_of_the_body() {
        assert_eq!(error_code("Error=QuotaExceeded"), Some("QuotaExceeded"));
        assert_eq!(error_code("id=123456"), None);
        assert_eq!(error_code(""), None);
    }

    #[test]
    fn form_encoding_skips_reserved_and_non_string_entries() {
        let router = C2dmRouter::new(C2dmSettings::default(), reqwest::Client::new());
        let mut notification = test_notification(&["reg1"]);
        notification.payload.insert("id".to_string(), json!("skipped"));
        notification.payload.insert("count".to_string(), json!(3));

        let body = router.encode_form(&notification, "reg1");
        assert!(body.contains("registration_id=reg1"));
        assert!(body.contains("collapse_key=a"));
        assert!(body.contains("data.msg=hi"));
        assert!(!body.contains("data.id"));
        assert!(!body.contains("count"));
    }

    #[tokio::test]
    async fn invalid_registration_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/c2dm/send")
            .match_header("Authorization", "GoogleLogin auth=TOKEN")
            .with_body("Error=InvalidRegistration")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert_eq!(
            status.errors.get("t"),
            Some(&RouterError::InvalidRegistration)
        );
        assert!(!status.retry);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn every_token_is_sent_while_successful() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/c2dm/send")
            .with_body("id=123456")
            .expect(2)
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t1", "t2"]), AUTH)
            .await;
        assert!(status.ok());
        assert_eq!(status.successes, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_after_the_hint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/c2dm/send")
            .with_status(503)
            .with_header("Retry-After", "5")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.delay, 5);
        assert_eq!(
            status.errors.get("t"),
            Some(&RouterError::ServiceUnavailable)
        );
    }

    #[tokio::test]
    async fn unauthorized_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/c2dm/send")
            .with_status(401)
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert!(!status.retry);
        assert_eq!(status.errors.get("t"), Some(&RouterError::Unauthorized));
    }

    #[tokio::test]
    async fn quota_exceeded_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/c2dm/send")
            .with_body("Error=QuotaExceeded")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.errors.get("t"), Some(&RouterError::QuotaExceeded));
    }

    #[tokio::test]
    async fn device_quota_keeps_the_retry_after_hint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/c2dm/send")
            .with_header("Retry-After", "30")
            .with_body("Error=DeviceQuotaExceeded")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.delay, 30);
        assert_eq!(
            status.errors.get("t"),
            Some(&RouterError::DeviceQuotaExceeded)
        );
    }

    #[tokio::test]
    async fn unknown_error_codes_are_retried_as_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/c2dm/send")
            .with_header("Retry-After", "9")
            .with_body("Error=PhantomFailure")
            .create_async()
            .await;

        let status = test_router(&server)
            .push(&test_notification(&["t"]), AUTH)
            .await;
        assert!(status.retry);
        assert_eq!(status.delay, 9);
        assert_eq!(status.errors.get("t"), Some(&RouterError::UnknownError));
    }

    #[tokio::test]
    async fn oversized_form_is_rejected_locally() {
        let server = mockito::Server::new_async().await;
        let mut notification = test_notification(&["t"]);
        notification
            .payload
            .insert("blob".to_string(), json!("x".repeat(2000)));

        let status = test_router(&server).push(&notification, AUTH).await;
        assert_eq!(status.errors.get("t"), Some(&RouterError::MessageTooBig));
        assert!(!status.retry);
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
    async fn empty_payload_is_rejected() {
        let server = mockito::Server::new_async().await;
        let mut notification = test_notification(&["t"]);
        notification.payload.clear();
        let status = test_router(&server).push(&notification, AUTH).await;
        assert_eq!(status.errors.get("t"), Some(&RouterError::NoPayload));
    }
}
