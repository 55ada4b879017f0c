use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_default::DefaultFromSerde;

use crate::{launcher::LauncherConfig, locations::LocationsConfig, module};

pub const ENV_PREFIX: &str = "VRPROFILE_";

/// Main vrprofile settings structure
#[derive(Clone, Debug, Serialize, Deserialize, DefaultFromSerde)]
pub struct Settings {
    /// Default log level, can be overridden by command line options or
    /// environment variables
    #[serde(default = "default_log_filter")]
    pub log_level: log::LevelFilter,

    /// Write logs to `log_file` instead of standard error
    #[serde(default)]
    pub log_to_file: bool,

    /// Log file, defaults to `vrprofile.log` in the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Root of profiles, the last backup, and deletion history
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of deleted profiles kept for recovery
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Capture the live state of touched modules before every switch
    #[serde(default = "default_true")]
    pub auto_backup: bool,

    /// Ask before switching, undoing, or deleting
    #[serde(default = "default_true")]
    pub confirm_switch: bool,

    /// Modules enabled in new profiles when none are given
    #[serde(default = "default_modules")]
    pub default_modules: Vec<String>,

    #[serde(default)]
    pub locations: LocationsConfig,

    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Per-module globs (relative to each live directory) never copied
    #[serde(default = "default_exclude")]
    pub exclude: BTreeMap<String, Vec<String>>,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.history_capacity == 0 {
            anyhow::bail!("history_capacity must be at least 1");
        }
        let mut seen = HashSet::new();
        for id in &self.default_modules {
            if module::get(id).is_none() {
                anyhow::bail!("unknown module in default_modules: {id:?}");
            }
            if !seen.insert(id) {
                anyhow::bail!("duplicate module in default_modules: {id:?}");
            }
        }
        for id in self.exclude.keys() {
            if module::get(id).is_none() {
                anyhow::bail!("unknown module in exclude: {id:?}");
            }
        }
        if self.launcher.app_id.trim().is_empty() {
            anyhow::bail!("launcher.app_id must not be empty");
        }
        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vrprofile.log"))
    }

    pub fn excludes(&self, module_id: &str) -> &[String] {
        self.exclude
            .get(module_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Loads settings from defaults, a TOML file, and `VRPROFILE_*` variables.
///
/// Without an explicit file, `<config dir>/vrprofile/config.toml` is used
/// when it exists.
pub fn load_config(path: &Option<PathBuf>) -> anyhow::Result<Settings> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("settings file {p:?} does not exist");
            }
            log::debug!("loading settings from {p:?}");
            figment = figment.merge(Toml::file(p));
        }
        None => {
            if let Some(p) = default_config_path().filter(|p| p.exists()) {
                log::debug!("loading settings from {p:?}");
                figment = figment.merge(Toml::file(p));
            }
        }
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    let settings: Settings = figment.extract().context("failed to load settings")?;
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

pub fn load_config_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
    load_config(&Some(path.as_ref().to_path_buf()))
}

pub fn display_config(settings: &Settings) -> anyhow::Result<String> {
    toml::to_string_pretty(settings).context("failed to serialize settings")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vrprofile").join("config.toml"))
}

fn default_log_filter() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("vrprofile"))
        .unwrap_or_else(|| PathBuf::from("vrprofile-data"))
}

fn default_history_capacity() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_modules() -> Vec<String> {
    ["slimevr", "steamvr", "resonite"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exclude() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([("resolute".to_string(), vec!["**/*.log".to_string()])])
}
