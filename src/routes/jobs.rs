//! Batch ingress endpoint.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::notification::Notification;
use crate::server::ServerState;

/// The inbound envelope: a batch of jobs sharing one credential.
#[derive(Debug, Deserialize)]
pub struct JobList {
    pub jobs: Vec<Notification>,
    pub auth: String,
}

/// Handle `POST /jobs`.
///
/// The batch is acknowledged as soon as it parses; delivery runs on one
/// spawned task per job and the response never waits for it.
pub async fn jobs_route(state: web::Data<ServerState>, body: web::Bytes) -> HttpResponse {
    let job_list: JobList = match serde_json::from_slice(&body) {
        Ok(job_list) => job_list,
        Err(e) => {
            warn!("Could not decode job batch: {}", e);
            return HttpResponse::BadRequest().body("Bad Request");
        }
    };

    debug!("Accepted {} jobs", job_list.jobs.len());
    let JobList { jobs, auth } = job_list;
    for job in jobs {
        state.dispatcher.spawn_work(job, auth.clone());
    }

    HttpResponse::Ok().body("OK")
}
