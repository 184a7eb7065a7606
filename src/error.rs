//! Errors raised during startup and by the HTTP layer.
//!
//! Provider failures never surface here: the dispatcher folds them into a
//! `PushStatus` and the ingress response does not depend on delivery
//! outcome.

use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] cadence::MetricError),
}
