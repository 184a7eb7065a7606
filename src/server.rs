//! Main application server

use std::sync::Arc;

use actix_web::{dev, web, App, HttpServer};

use crate::dispatch::Dispatcher;
use crate::error::ApiResult;
use crate::metrics;
use crate::routes::health::{health_route, lb_heartbeat_route, status_route, version_route};
use crate::routes::jobs::jobs_route;
use crate::settings::Settings;

#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,
}

pub struct Server;

impl Server {
    /// Assemble the dispatcher and HTTP server. The dispatcher handle is
    /// returned alongside so the caller can close it once the server
    /// stops.
    pub fn with_settings(settings: Settings) -> ApiResult<(dev::Server, Arc<Dispatcher>)> {
        let metrics = Arc::new(metrics::metrics_from_opts(&settings)?);
        let bind_address = format!("{}:{}", settings.host, settings.port);
        let dispatcher = Arc::new(Dispatcher::new(&settings, metrics));
        let state = ServerState {
            dispatcher: dispatcher.clone(),
        };

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                // Endpoints
                .service(web::resource("/jobs").route(web::post().to(jobs_route)))
                // Health checks
                .service(web::resource("/status").route(web::get().to(status_route)))
                .service(web::resource("/health").route(web::get().to(health_route)))
                .service(web::resource("/__heartbeat__").route(web::get().to(health_route)))
                .service(web::resource("/__lbheartbeat__").route(web::get().to(lb_heartbeat_route)))
                .service(web::resource("/__version__").route(web::get().to(version_route)))
        })
        .bind(bind_address)?
        .run();

        Ok((server, dispatcher))
    }
}
