//! Layered configuration loading.

use anyhow::{Context, Result};
use ferry_core::FerryConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;

/// Config file read from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "ferry.toml";

/// Prefix for environment overrides, e.g. `FERRY_STORAGE__BUCKET`.
pub const ENV_PREFIX: &str = "FERRY_";

/// Load configuration: defaults, then the TOML file, then `FERRY_*` env vars.
///
/// An explicitly named file must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<FerryConfig> {
    let mut figment = Figment::new();

    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::debug!(config_path = %path.display(), "loading configuration from file");
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                tracing::debug!(
                    config_path = DEFAULT_CONFIG_FILE,
                    "loading configuration from file"
                );
                figment = figment.merge(Toml::file(default));
            }
        }
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")
}
