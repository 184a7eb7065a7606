//! Provider adapters route notifications to vendor gateways.

use std::fmt::{self, Display};
use std::str::FromStr;

use async_trait::async_trait;

use crate::notification::Notification;
use crate::status::PushStatus;

pub mod apns;
pub mod c2dm;
mod common;
pub mod gcm;

/// One provider adapter. `push` performs the delivery attempt and folds
/// every failure into the returned status; adapter errors never escape the
/// dispatcher.
#[async_trait]
pub trait Router: Send + Sync {
    async fn push(&self, notification: &Notification, auth: &str) -> PushStatus;
}

/// Valid `Notification::provider` tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouterType {
    Apns,
    Gcm,
    C2dm,
}

impl RouterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterType::Apns => "apns",
            RouterType::Gcm => "gcm",
            RouterType::C2dm => "c2dm",
        }
    }
}

impl FromStr for RouterType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apns" => Ok(RouterType::Apns),
            "gcm" => Ok(RouterType::Gcm),
            "c2dm" => Ok(RouterType::C2dm),
            _ => Err(()),
        }
    }
}

impl Display for RouterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the provider adapters.
pub struct Routers {
    pub apns: Box<dyn Router>,
    pub gcm: Box<dyn Router>,
    pub c2dm: Box<dyn Router>,
}

impl Routers {
    /// Get the adapter which handles the provider tag.
    pub fn get(&self, router_type: RouterType) -> &dyn Router {
        match router_type {
            RouterType::Apns => self.apns.as_ref(),
            RouterType::Gcm => self.gcm.as_ref(),
            RouterType::C2dm => self.c2dm.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::RouterType;

    #[test]
    fn provider_tags_round_trip() {
        for tag in ["apns", "gcm", "c2dm"] {
            assert_eq!(RouterType::from_str(tag).unwrap().to_string(), tag);
        }
        assert!(RouterType::from_str("webpush").is_err());
        assert!(RouterType::from_str("").is_err());
    }
}
