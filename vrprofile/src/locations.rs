use std::{
    env,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::utils::{current_user_home, first_existing};

/// Overrides for the well-known directories applications keep state in
///
/// On Linux these usually point into a Proton prefix, e.g.
/// `~/.steam/steam/steamapps/compatdata/<app>/pfx/drive_c/users/steamuser`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationsConfig {
    /// `%APPDATA%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appdata: Option<PathBuf>,

    /// `%LOCALAPPDATA%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_appdata: Option<PathBuf>,

    /// `%ALLUSERSPROFILE%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_data: Option<PathBuf>,

    /// `%USERPROFILE%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// Steam installation directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam: Option<PathBuf>,

    /// Resonite installation directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resonite: Option<PathBuf>,
}

/// Resolved host directories modules derive their live paths from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locations {
    pub appdata: PathBuf,
    pub local_appdata: PathBuf,
    pub program_data: PathBuf,
    pub home: PathBuf,
    pub steam: Option<PathBuf>,
    pub resonite: Option<PathBuf>,
}

impl Locations {
    pub fn resolve(config: &LocationsConfig) -> anyhow::Result<Self> {
        let home = match config.home.clone().or_else(|| env_path("USERPROFILE")) {
            Some(home) => home,
            None => current_user_home()?,
        };
        let appdata = config
            .appdata
            .clone()
            .or_else(|| env_path("APPDATA"))
            .unwrap_or_else(|| home.join("AppData").join("Roaming"));
        let local_appdata = config
            .local_appdata
            .clone()
            .or_else(|| env_path("LOCALAPPDATA"))
            .unwrap_or_else(|| home.join("AppData").join("Local"));
        let program_data = config
            .program_data
            .clone()
            .or_else(|| env_path("ALLUSERSPROFILE"))
            .unwrap_or_else(default_program_data);
        let steam = config.steam.clone().or_else(|| find_steam(&home));
        let resonite = config.resonite.clone().or_else(|| {
            steam
                .as_ref()
                .map(|s| s.join("steamapps").join("common").join("Resonite"))
                .filter(|p| p.exists())
        });
        let locations = Self {
            appdata,
            local_appdata,
            program_data,
            home,
            steam,
            resonite,
        };
        log::debug!("resolved locations: {locations:#?}");
        Ok(locations)
    }

    /// Every location below `root`, for sandboxes and tests.
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let home = root.join("home");
        let steam = root.join("Steam");
        Self {
            appdata: home.join("AppData").join("Roaming"),
            local_appdata: home.join("AppData").join("Local"),
            program_data: root.join("ProgramData"),
            resonite: Some(steam.join("steamapps").join("common").join("Resonite")),
            steam: Some(steam),
            home,
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(windows)]
fn default_program_data() -> PathBuf {
    PathBuf::from("C:/ProgramData")
}

#[cfg(not(windows))]
fn default_program_data() -> PathBuf {
    PathBuf::from("/var/lib")
}

fn find_steam(home: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = env_path("PROGRAMFILES(X86)") {
        candidates.push(dir.join("Steam"));
    }
    if let Some(dir) = env_path("PROGRAMFILES") {
        candidates.push(dir.join("Steam"));
    }
    candidates.extend([
        home.join(".steam").join("steam"),
        home.join(".local").join("share").join("Steam"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
        PathBuf::from("C:/Program Files (x86)/Steam"),
        PathBuf::from("C:/Steam"),
    ]);
    first_existing(candidates.iter().map(|c| c.join("config"))).and_then(|config| {
        config.parent().map(Path::to_path_buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_environment() {
        let root = tempfile::tempdir().unwrap();
        let steam = root.path().join("Steam");
        std::fs::create_dir_all(steam.join("steamapps/common/Resonite")).unwrap();
        let config = LocationsConfig {
            appdata: Some(root.path().join("roaming")),
            local_appdata: Some(root.path().join("local")),
            program_data: Some(root.path().join("programdata")),
            home: Some(root.path().join("home")),
            steam: Some(steam.clone()),
            resonite: None,
        };
        let locations = Locations::resolve(&config).unwrap();
        assert_eq!(locations.appdata, root.path().join("roaming"));
        assert_eq!(locations.program_data, root.path().join("programdata"));
        assert_eq!(locations.steam, Some(steam.clone()));
        assert_eq!(
            locations.resonite,
            Some(steam.join("steamapps/common/Resonite"))
        );
    }

    #[test]
    fn sandbox_layout_is_under_root() {
        let locations = Locations::under("/sandbox");
        assert!(locations.appdata.starts_with("/sandbox"));
        assert!(locations.resonite.unwrap().starts_with("/sandbox/Steam"));
    }
}
