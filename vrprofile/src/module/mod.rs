use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::SystemTime,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    config::Settings, launcher::DirectoryPair, locations::Locations, process::ProcessMatcher,
    process::ProcessProbe, statistics::Statistics,
};

pub mod babble;
pub mod copy;
pub mod eyetrackvr;
pub mod resolute;
pub mod resonite;
pub mod resonite_mod_settings;
pub mod slimevr;
pub mod steamvr;
pub mod virtual_desktop;

pub const MANIFEST_FILE: &str = "snapshot.json";
pub const FILES_DIR: &str = "files";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// Live paths are copied into and out of the snapshot store
    Copy,
    /// State lives in a directory pair the launcher is pointed at
    ExternalState,
}

/// One location a module owns, addressed inside a snapshot by `slot`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivePath {
    /// Relative path inside the snapshot's `files` directory
    pub slot: String,
    pub path: PathBuf,
}

impl LivePath {
    pub fn new(slot: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            slot: slot.into(),
            path: path.into(),
        }
    }

    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub slot: String,
    pub present: bool,
}

/// Content of `snapshot.json`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub module: String,
    #[serde(with = "humantime_serde")]
    pub captured_at: SystemTime,
    pub slots: Vec<SlotState>,
}

/// A published snapshot of one module
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub manifest: Manifest,
}

impl Snapshot {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text =
            fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
        let manifest =
            serde_json::from_str(&text).with_context(|| format!("failed to parse {path:?}"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn files_dir(&self) -> PathBuf {
        self.dir.join(FILES_DIR)
    }

    pub fn slot(&self, slot: &str) -> Option<&SlotState> {
        self.manifest.slots.iter().find(|s| s.slot == slot)
    }
}

/// Per-profile settings of one module
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOptions {
    /// Application directory, instead of searching the usual places
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// SteamVR driver enabled after switching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_driver: Option<String>,

    /// Include mod and library DLLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dlls: Option<bool>,

    /// Include the VRCFaceTracking module configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_vrcft: Option<bool>,

    /// Directory pair the launcher is pointed at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<DirectoryPair>,

    /// Launch flags added next to the path flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_flags: Option<String>,
}

pub const OPTION_KEYS: &[&str] = &[
    "root_dir",
    "active_driver",
    "save_dlls",
    "include_vrcft",
    "data_dir",
    "cache_dir",
    "launch_flags",
];

impl ModuleOptions {
    /// Sets `key` to `value`, or clears it when `value` is `None`.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        match key {
            "root_dir" => self.root_dir = value.map(PathBuf::from),
            "active_driver" => self.active_driver = value.map(str::to_string),
            "save_dlls" => self.save_dlls = value.map(parse_bool).transpose()?,
            "include_vrcft" => self.include_vrcft = value.map(parse_bool).transpose()?,
            "launch_flags" => self.launch_flags = value.map(str::to_string),
            "data_dir" | "cache_dir" => match value {
                Some(value) => {
                    let pair = self.directories.get_or_insert_with(|| DirectoryPair {
                        data: PathBuf::from(value),
                        cache: PathBuf::from(value),
                    });
                    if key == "data_dir" {
                        pair.data = PathBuf::from(value);
                    } else {
                        pair.cache = PathBuf::from(value);
                    }
                }
                None => self.directories = None,
            },
            _ => anyhow::bail!(
                "unknown option {key:?}, expected one of: {}",
                OPTION_KEYS.join(", ")
            ),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" => Ok(true),
        "0" | "no" | "off" => Ok(false),
        other => bool::from_str(other).with_context(|| format!("invalid boolean {value:?}")),
    }
}

/// Everything a module needs to resolve and transfer its state
#[derive(Clone, Copy, Debug)]
pub struct ModuleContext<'a> {
    pub profile: &'a str,
    pub options: &'a ModuleOptions,
    pub settings: &'a Settings,
    pub locations: &'a Locations,
    pub probe: &'a dyn ProcessProbe,
    pub statistics: &'a Statistics,
}

/// Integration for one managed application
///
/// Implementations hold no state; everything that varies per machine or
/// per profile arrives through [`ModuleContext`].
pub trait Module: Debug + Send + Sync {
    /// Stable identifier used in the registry and on disk
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn kind(&self) -> ModuleKind {
        ModuleKind::Copy
    }

    /// Live locations in a stable order.
    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath>;

    /// Processes that mean the application is running.
    fn process_names(&self) -> Vec<ProcessMatcher>;

    /// Processes that additionally must be closed before [`Module::apply`].
    fn apply_guard(&self, _ctx: &ModuleContext) -> Vec<ProcessMatcher> {
        Vec::new()
    }

    /// Copies the live paths below `dest`, which is an empty directory.
    fn capture(&self, ctx: &ModuleContext, dest: &Path) -> anyhow::Result<Vec<SlotState>> {
        copy::capture(self.id(), &self.paths(ctx), ctx, dest)
    }

    /// Replaces the live paths with `snapshot`.
    ///
    /// External-state modules get no snapshot.
    fn apply(&self, ctx: &ModuleContext, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        let snapshot =
            snapshot.with_context(|| format!("module {} needs a snapshot to apply", self.id()))?;
        copy::apply(&self.paths(ctx), ctx, snapshot)
    }

    /// Directory pair the launcher currently points at, for backups.
    ///
    /// `None` for modules without external state.
    fn current_external(&self, _ctx: &ModuleContext) -> anyhow::Result<Option<DirectoryPair>> {
        Ok(None)
    }
}

static MODULES: &[&dyn Module] = &[
    &slimevr::SlimeVr,
    &steamvr::SteamVr,
    &resonite::Resonite,
    &resonite_mod_settings::ResoniteModSettings,
    &resolute::Resolute,
    &eyetrackvr::EyeTrackVr,
    &babble::Babble,
    &virtual_desktop::VirtualDesktop,
];

/// All modules in display order
pub fn all() -> &'static [&'static dyn Module] {
    MODULES
}

pub fn get(id: &str) -> Option<&'static dyn Module> {
    MODULES.iter().copied().find(|m| m.id() == id)
}

/// Files of `names` below `dir`, keyed by their relative name.
pub(crate) fn files_in(dir: &Path, names: &[&str]) -> Vec<LivePath> {
    names
        .iter()
        .map(|name| LivePath::new(*name, dir.join(name)))
        .collect()
}

/// First candidate holding any of `markers`, else the first that exists.
pub(crate) fn find_app_dir(candidates: &[PathBuf], markers: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|c| c.is_dir() && markers.iter().any(|m| c.join(m).exists()))
        .or_else(|| candidates.iter().find(|c| c.is_dir()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_are_unique_and_stable() {
        let ids: Vec<_> = all().iter().map(|m| m.id()).collect();
        assert_eq!(
            ids,
            [
                "slimevr",
                "steamvr",
                "resonite",
                "resonite_mod_settings",
                "resolute",
                "eyetrackvr",
                "babble",
                "virtual_desktop"
            ]
        );
        assert!(get("resonite").is_some());
        assert!(get("vrchat").is_none());
    }

    #[test]
    fn only_resonite_is_external() {
        for module in all() {
            let expected = if module.id() == "resonite" {
                ModuleKind::ExternalState
            } else {
                ModuleKind::Copy
            };
            assert_eq!(module.kind(), expected, "{}", module.id());
        }
    }

    #[test]
    fn options_can_be_set_and_cleared() {
        let mut options = ModuleOptions::default();
        options.set("save_dlls", Some("no")).unwrap();
        options.set("active_driver", Some("handtracking")).unwrap();
        options.set("data_dir", Some("/d")).unwrap();
        options.set("cache_dir", Some("/c")).unwrap();
        assert_eq!(options.save_dlls, Some(false));
        assert_eq!(options.active_driver.as_deref(), Some("handtracking"));
        assert_eq!(
            options.directories,
            Some(DirectoryPair {
                data: "/d".into(),
                cache: "/c".into()
            })
        );
        options.set("active_driver", None).unwrap();
        assert_eq!(options.active_driver, None);
        assert!(options.set("colour", Some("red")).is_err());
        assert!(options.set("save_dlls", Some("maybe")).is_err());
    }

    #[test]
    fn app_dir_prefers_candidates_with_config() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("first");
        let second = root.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("settings.json"), "{}").unwrap();
        let candidates = [first.clone(), second.clone(), root.path().join("absent")];
        assert_eq!(find_app_dir(&candidates, &["settings.json"]), Some(second));
        assert_eq!(find_app_dir(&candidates, &["other.json"]), Some(first));
        assert_eq!(find_app_dir(&candidates[2..], &["settings.json"]), None);
    }
}
