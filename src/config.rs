use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use confique::Config as _;

use crate::prelude::*;


/// The locations where we look for a configuration file. The first existing
/// file in this list is used.
const DEFAULT_PATHS: &[&str] = &["config.toml", "/etc/bank-ledger/config.toml"];

const CONFIG_PATH_ENV: &str = "BANK_LEDGER_CONFIG_PATH";

/// Configuration for the bank ledger service.
///
/// A configuration file is optional: every value without a default can also
/// be set via the environment variable noted next to it. Environment
/// variables take precedence over the file. All relative paths are relative
/// to the location of this configuration file.
#[derive(Debug, confique::Config)]
pub(crate) struct Config {
    #[config(nested)]
    pub(crate) ledger: crate::ledger::LedgerConfig,

    #[config(nested)]
    pub(crate) http: crate::http::HttpConfig,

    #[config(nested)]
    pub(crate) log: crate::logger::LogConfig,
}

impl Config {
    /// Tries to find a config file by checking `BANK_LEDGER_CONFIG_PATH` and
    /// the list of default config file locations. The first one found is
    /// loaded via [`Self::load_from`]. If there is none, the configuration is
    /// built from environment variables and defaults only. Returns the loaded
    /// config and the path that it was loaded from, if any.
    pub(crate) fn from_env_or_default_locations() -> Result<(Self, Option<PathBuf>)> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let config = Self::load_from(&path)
                    .context(format!("failed to load configuration from '{}'", path.display()))?;
                Ok((config, Some(path)))
            }
            None => {
                let config = Config::builder()
                    .env()
                    .load()
                    .context("failed to load configuration from environment variables")?;
                config.validate()?;
                Ok((config, None))
            }
        }
    }

    /// Loads the configuration from a specific TOML file, with environment
    /// variables overriding values from the file.
    pub(crate) fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Config::builder()
            .env()
            .file(path)
            .load()
            .context(format!("failed to read config file '{}'", path.display()))?;

        config.fix_paths(path)?;
        config.validate()?;

        Ok(config)
    }

    /// Checks combinations of values that are invalid together.
    pub(crate) fn validate(&self) -> Result<()> {
        self.ledger.validate()
    }

    /// Goes through all paths in the configuration and changes relative paths
    /// to be absolute based on the path of the configuration file itself.
    fn fix_paths(&mut self, config_path: &Path) -> Result<()> {
        fn fix_path(base_path: &Path, path: &mut PathBuf) {
            if path.is_relative() {
                *path = base_path.join(&path);
            }
        }

        let absolute_config_path = config_path.canonicalize()
            .context("failed to canonicalize config path")?;
        let base = absolute_config_path.parent()
            .ok_or_else(|| anyhow!("config file path has no parent"))?;

        if let Some(p) = &mut self.http.unix_socket {
            fix_path(base, p);
        }
        if let Some(p) = &mut self.log.file {
            fix_path(base, p);
        }
        if let Some(p) = &mut self.ledger.server_cert {
            fix_path(base, p);
        }

        Ok(())
    }
}

/// Writes the generated TOML config template file to the given destination or
/// stdout.
pub(crate) fn write_template(path: Option<&PathBuf>) -> Result<()> {
    use confique::toml::FormatOptions;

    info!(
        "Writing configuration template to '{}'",
        path.map(|p| p.display().to_string()).unwrap_or("<stdout>".into()),
    );

    let mut options = FormatOptions::default();
    options.general.nested_field_gap = 2;
    let template = confique::toml::template::<Config>(options);
    match path {
        Some(path) => fs::write(path, template)?,
        None => io::stdout().write_all(template.as_bytes())?,
    }

    Ok(())
}
