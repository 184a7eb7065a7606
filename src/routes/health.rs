//! Health and heartbeat routes.

use std::sync::atomic::Ordering;

use actix_web::web::{Data, Json};
use actix_web::HttpResponse;
use serde_json::json;

use crate::server::ServerState;

/// Handle the `/health` and `/__heartbeat__` routes, reporting the
/// dispatcher's counters.
pub async fn health_route(state: Data<ServerState>) -> Json<serde_json::Value> {
    let stats = &state.dispatcher.stats;
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
        "running": stats.running.load(Ordering::Relaxed),
        "sent": {
            "apns": stats.apns.load(Ordering::Relaxed),
            "gcm": stats.gcm.load(Ordering::Relaxed),
            "c2dm": stats.c2dm.load(Ordering::Relaxed),
        },
        "errors": {
            "apns": stats.apns_errors.load(Ordering::Relaxed),
            "gcm": stats.gcm_errors.load(Ordering::Relaxed),
            "c2dm": stats.c2dm_errors.load(Ordering::Relaxed),
        },
    }))
}

/// Handle the `/status` route.
pub async fn status_route(state: Data<ServerState>) -> Json<serde_json::Value> {
    let mut status: std::collections::HashMap<&str, serde_json::Value> =
        std::collections::HashMap::new();
    status.insert("version", json!(env!("CARGO_PKG_VERSION")));
    if state.dispatcher.quitting() {
        status.insert("status", json!("SHUTDOWN"));
    } else {
        status.insert("status", json!("OK"));
    }
    let stats = &state.dispatcher.stats;
    status.insert("running", json!(stats.running.load(Ordering::Relaxed)));
    status.insert(
        "sent",
        json!({
            "apns": stats.apns.load(Ordering::Relaxed),
            "gcm": stats.gcm.load(Ordering::Relaxed),
            "c2dm": stats.c2dm.load(Ordering::Relaxed),
        }),
    );
    status.insert(
        "errors",
        json!({
            "apns": stats.apns_errors.load(Ordering::Relaxed),
            "gcm": stats.gcm_errors.load(Ordering::Relaxed),
            "c2dm": stats.c2dm_errors.load(Ordering::Relaxed),
        }),
    );

    Json(json!(status))
}

/// Handle the `/__lbheartbeat__` route, used by the load balancers.
pub async fn lb_heartbeat_route() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Handle the `/__version__` route.
pub async fn version_route() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
