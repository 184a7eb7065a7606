//! Adapter for Apple's legacy binary gateway protocol.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::notification::Notification;
use crate::routers::apns::pool::SocketPool;
use crate::routers::apns::settings::ApnsSettings;
use crate::routers::Router;
use crate::status::{PushStatus, RouterError};

/// Assemble one binary PDU: command, transaction id, expiry, token and
/// payload with their big-endian lengths.
fn build_pdu(transaction_id: u32, expiry: u32, token: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(13 + token.len() + payload.len());
    pdu.push(1u8);
    pdu.extend_from_slice(&transaction_id.to_be_bytes());
    pdu.extend_from_slice(&expiry.to_be_bytes());
    pdu.extend_from_slice(&(token.len() as u16).to_be_bytes());
    pdu.extend_from_slice(token);
    pdu.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    pdu.extend_from_slice(payload);
    pdu
}

/// Map a gateway error-frame status code to (retry, error). Status 0 is a
/// plain acknowledgement.
fn gateway_status(code: u8) -> (bool, Option<RouterError>) {
    match code {
        0 => (false, None),
        1 => (true, Some(RouterError::ProcessingError)),
        2 => (false, Some(RouterError::MissingDeviceToken)),
        3 => (false, Some(RouterError::MissingTopic)),
        4 => (false, Some(RouterError::MissingPayload)),
        5 => (false, Some(RouterError::InvalidTokenSize)),
        6 => (false, Some(RouterError::InvalidTopicSize)),
        7 => (false, Some(RouterError::InvalidPayloadSize)),
        8 => (false, Some(RouterError::InvalidToken)),
        255 => (true, Some(RouterError::Unknown)),
        _ => (false, Some(RouterError::UnknownApns)),
    }
}

/// Apple binary-gateway router. Holds one socket pool per application,
/// built lazily from the job's PEM credential.
pub struct ApnsRouter {
    settings: ApnsSettings,
    pools: Mutex<HashMap<String, SocketPool>>,
}

impl ApnsRouter {
    pub fn new(settings: ApnsSettings) -> Self {
        Self {
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the application's pool, building it under the lock on first
    /// use so concurrent jobs for a new application share one pool.
    fn pool(&self, app_name: &str, auth: &str) -> std::io::Result<SocketPool> {
        let mut pools = self.pools.lock().expect("poisoned apns pool lock");
        if let Some(pool) = pools.get(app_name) {
            return Ok(pool.clone());
        }
        let pool = SocketPool::new(auth.as_bytes(), &self.settings)?;
        pools.insert(app_name.to_string(), pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl Router for ApnsRouter {
    async fn push(&self, notification: &Notification, auth: &str) -> PushStatus {
        let mut status = PushStatus::default();

        if notification.device_tokens.is_empty() {
            warn!("No device tokens given for {}", notification.app_name);
            status
                .errors
                .insert(String::new(), RouterError::NoDeviceTokens);
            return status;
        }

        // The gateway carries the payload opaquely; it must arrive as a
        // pre-serialized string.
        let payload = match notification.payload.get("payload").and_then(Value::as_str) {
            Some(payload) => payload.as_bytes().to_vec(),
            None => {
                warn!("Invalid payload for {}, expected a string", notification.app_name);
                status.errors.insert(
                    notification.device_tokens[0].clone(),
                    RouterError::InvalidJson,
                );
                return status;
            }
        };

        if payload.len() > self.settings.max_payload_size {
            warn!(
                "MessageTooBig: given: {} max: {}",
                payload.len(),
                self.settings.max_payload_size
            );
            status.errors.insert(
                notification.device_tokens[0].clone(),
                RouterError::MessageTooBig,
            );
            return status;
        }

        let expiry = if notification.expiry == 0 {
            Utc::now().timestamp() as u32 + 60 * 60
        } else {
            notification.expiry
        };

        for device_token in &notification.device_tokens {
            let token = match hex::decode(device_token) {
                Ok(token) => token,
                Err(e) => {
                    warn!("Bad device token {}: {}", device_token, e);
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::Other(e.to_string()));
                    return status;
                }
            };

            let pool = match self.pool(&notification.app_name, auth) {
                Ok(pool) => pool,
                Err(e) => {
                    warn!("Could not build gateway pool: {}", e);
                    status
                        .errors
                        .insert(String::new(), RouterError::Other(e.to_string()));
                    return status;
                }
            };

            let mut socket = match pool.get().await {
                Ok(socket) => socket,
                Err(e) => {
                    status.retry = true;
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::Other(e.to_string()));
                    return status;
                }
            };

            if let Err(e) = socket.connect().await {
                warn!("Gateway connect failed: {}", e);
                status.retry = true;
                status
                    .errors
                    .insert(device_token.clone(), RouterError::Other(e.to_string()));
                return status;
            }

            let pdu = build_pdu(socket.next_transaction_id(), expiry, &token, &payload);
            if let Err(e) = socket.write_pdu(&pdu).await {
                warn!("Gateway write failed: {}", e);
                status.retry = true;
                status
                    .errors
                    .insert(device_token.clone(), RouterError::ClientNotConnected);
                return status;
            }

            match socket.read_status().await {
                // The gateway stays silent on success.
                Ok(None) => status.successes += 1,
                Ok(Some(code)) => match gateway_status(code) {
                    (_, None) => status.successes += 1,
                    (retry, Some(error)) => {
                        warn!("Gateway rejected send to {}: {}", device_token, error);
                        status.retry = retry;
                        status.errors.insert(device_token.clone(), error);
                        return status;
                    }
                },
                Err(e) => {
                    warn!("Gateway read failed: {}", e);
                    status
                        .errors
                        .insert(device_token.clone(), RouterError::InvalidResponse);
                    return status;
                }
            }
        }

        status
    }
}
