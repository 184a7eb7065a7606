//! Application settings

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::routers::apns::settings::ApnsSettings;
use crate::routers::c2dm::settings::C2dmSettings;
use crate::routers::gcm::settings::GcmSettings;

pub const ENV_PREFIX: &str = "pushbridge";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub human_logs: bool,

    pub connection_timeout_millis: u64,
    pub request_timeout_millis: u64,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    pub statsd_label: String,

    pub apns: ApnsSettings,
    pub gcm: GcmSettings,
    pub c2dm: C2dmSettings,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            host: "0.0.0.0".to_string(),
            port: 9999,
            human_logs: false,
            connection_timeout_millis: 1000,
            request_timeout_millis: 3000,
            statsd_host: None,
            statsd_port: 8125,
            statsd_label: "pushbridge".to_string(),
            apns: ApnsSettings::default(),
            gcm: GcmSettings::default(),
            c2dm: C2dmSettings::default(),
        }
    }
}

impl Settings {
    /// Load the settings from the config file if supplied, then the environment.
    pub fn with_env_and_config_file(filename: &Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // Merge the config file if supplied
        if let Some(config_filename) = filename {
            config = config.add_source(File::with_name(config_filename));
        }

        // Merge the environment overrides
        // Note: Specify the separator here so that the shell can properly pass args
        // down to the sub structures.
        config = config.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let built = config.build()?;

        built
            .try_deserialize::<Self>()
            .map_err(|error| match error {
                // Configuration errors are not very sysop friendly. Try to
                // make them a bit more 3AM useful.
                ConfigError::Message(error_msg) => {
                    println!("Bad configuration: {:?}", &error_msg);
                    println!("Please set in config file or use environment variable.");
                    println!(
                        "For example to set `human_logs` use env var `{}__HUMAN_LOGS`\n",
                        ENV_PREFIX.to_uppercase()
                    );
                    error!("Configuration error: Value undefined {:?}", &error_msg);
                    ConfigError::NotFound(error_msg)
                }
                _ => {
                    error!("Configuration error: Other: {:?}", &error);
                    error
                }
            })
    }
}
