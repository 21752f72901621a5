//! `load_config`: reads the YAML transfer configuration and injects the wiki
//! endpoints from the environment.
//!
//! The YAML document maps directly onto [`TransferConfig`]; every key is
//! optional, so an empty mapping selects all defaults. Endpoints are never read
//! from the file: `SOURCE_API_URL` and `DESTINATION_API_URL` must be set in the
//! environment (a `.env` file is honoured by the binary).
//!
//! # Errors
//! All failures are `anyhow::Error`s naming the file or variable at fault.

use anyhow::Result;
use filemover_core::config::TransferConfig;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const SOURCE_API_URL: &str = "SOURCE_API_URL";
pub const DESTINATION_API_URL: &str = "DESTINATION_API_URL";

/// Action API endpoints of the two corpora.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub source_api_url: String,
    pub destination_api_url: String,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub transfer: TransferConfig,
    pub endpoints: Endpoints,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let transfer: TransferConfig = if config_content.trim().is_empty() {
        TransferConfig::default()
    } else {
        match serde_yaml::from_str(&config_content) {
            Ok(conf) => {
                info!(config_path = ?path_ref, "Parsed config YAML successfully");
                conf
            }
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow::anyhow!(
                    "Failed to parse config YAML {:?}: {e}",
                    path_ref
                ));
            }
        }
    };
    if transfer.concurrency == 0 {
        return Err(anyhow::anyhow!(
            "Invalid config {:?}: concurrency must be at least 1",
            path_ref
        ));
    }
    transfer.trace_loaded();

    let endpoints = Endpoints {
        source_api_url: required_env(SOURCE_API_URL)?,
        destination_api_url: required_env(DESTINATION_API_URL)?,
    };
    info!(
        source = %endpoints.source_api_url,
        destination = %endpoints.destination_api_url,
        "Wiki endpoints loaded from environment"
    );

    Ok(CliConfig {
        transfer,
        endpoints,
    })
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) => {
            error!(variable = name, "Environment variable is empty");
            Err(anyhow::anyhow!("Environment variable {name} is set but empty"))
        }
        Err(e) => {
            error!(error = ?e, variable = name, "Environment variable missing");
            Err(anyhow::anyhow!("Environment variable {name} must be set: {e}"))
        }
    }
}
