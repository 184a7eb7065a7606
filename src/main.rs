#![forbid(unsafe_code)]

#[macro_use]
extern crate slog_scope;

mod dispatch;
mod error;
mod logging;
mod metrics;
mod notification;
mod routers;
mod routes;
mod server;
mod settings;
mod status;

use docopt::Docopt;
use serde::Deserialize;
use std::error::Error;

const USAGE: &str = "
Usage: pushbridge [options]

Options:
    -h, --help              Show this message
    --config=CONFIGFILE     Pushbridge configuration file path.
    --port=PORT             Port to listen on, overriding the settings value.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
    flag_port: Option<u16>,
}

#[actix_rt::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let mut settings = settings::Settings::with_env_and_config_file(&args.flag_config)?;
    if let Some(port) = args.flag_port {
        settings.port = port;
    }
    let host_port = format!("{}:{}", &settings.host, &settings.port);
    logging::init_logging(!settings.human_logs, logging::get_default_hostname())
        .expect("Logging failed to initialize");
    debug!("Starting up pushbridge...");

    let _sentry = sentry::init(sentry::ClientOptions {
        release: sentry::release_name!(),
        ..Default::default()
    });

    let (server, dispatcher) = server::Server::with_settings(settings)?;
    info!("Server started: {}", host_port);
    server.await?;

    // The server has stopped taking requests; stop the retry scheduler from
    // re-enqueuing as well. In-flight sends are left to finish.
    info!("Server closing");
    dispatcher.close();
    logging::reset_logging();
    Ok(())
}
