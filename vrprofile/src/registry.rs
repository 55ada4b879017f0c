use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    module::ModuleOptions,
    transfer::{Staging, write_atomic},
};

pub const PROFILE_FILE: &str = "profile.json";
/// Prefix of names the data directory reserves for itself
pub const RESERVED_PREFIX: &str = "__";

static UNSAFE_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f\x7f]"#).expect("valid pattern"));

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub options: ModuleOptions,
}

fn default_enabled() -> bool {
    true
}

impl ModuleEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            options: ModuleOptions::default(),
        }
    }
}

/// Metadata record of one profile, stored as `profile.json`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(with = "humantime_serde")]
    pub created: SystemTime,
    #[serde(default, with = "humantime_serde")]
    pub last_switched: Option<SystemTime>,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl Profile {
    pub fn new(name: impl Into<String>, modules: Vec<ModuleEntry>) -> Self {
        Self {
            name: name.into(),
            notes: String::new(),
            created: SystemTime::now(),
            last_switched: None,
            modules,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.iter().filter(|m| m.enabled)
    }

    pub fn entry(&self, id: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Entry of `id`, added disabled when the profile never had it.
    pub fn entry_mut(&mut self, id: &str) -> &mut ModuleEntry {
        let index = match self.modules.iter().position(|m| m.id == id) {
            Some(index) => index,
            None => {
                let mut entry = ModuleEntry::new(id);
                entry.enabled = false;
                self.modules.push(entry);
                self.modules.len() - 1
            }
        };
        &mut self.modules[index]
    }

    pub fn sort_key(&self) -> SystemTime {
        self.last_switched.unwrap_or(self.created)
    }
}

/// Turns a user supplied name into a safe directory name.
pub fn sanitize_name(name: &str) -> Result<String> {
    let invalid = |reason| Error::InvalidName {
        name: name.to_string(),
        reason,
    };
    let cleaned = UNSAFE_CHARACTERS.replace_all(name, "");
    // trailing dots and spaces are dropped by Windows
    let cleaned = cleaned.trim().trim_end_matches(['.', ' ']).to_string();
    if cleaned.is_empty() {
        return Err(invalid("empty after removing unsafe characters"));
    }
    if cleaned.starts_with(RESERVED_PREFIX) {
        return Err(invalid("names starting with `__` are reserved"));
    }
    if cleaned.starts_with('.') {
        return Err(invalid("names must not start with a dot"));
    }
    Ok(cleaned)
}

/// Profile metadata below `<data_dir>/profiles`
#[derive(Clone, Debug)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read(&self, dir: &Path) -> anyhow::Result<Profile> {
        let path = dir.join(PROFILE_FILE);
        let text =
            fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse {path:?}"))
    }

    /// All profiles, most recently switched (or created) first.
    pub fn list(&self) -> anyhow::Result<Vec<Profile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open directory {:?}", self.dir));
            }
        };
        let mut profiles = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read entry of {:?}", self.dir))?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with('.') || name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            if !entry.path().join(PROFILE_FILE).exists() {
                log::warn!("ignoring {:?} without {PROFILE_FILE}", entry.path());
                continue;
            }
            match self.read(&entry.path()) {
                Ok(profile) => profiles.push(profile),
                Err(e) => log::error!("skipping unreadable profile {:?}: {e:#}", entry.path()),
            }
        }
        profiles.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()).then(a.name.cmp(&b.name)));
        Ok(profiles)
    }

    /// Looks a profile up case-insensitively.
    pub fn find(&self, name: &str) -> anyhow::Result<Option<Profile>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .find(|p| p.name.to_lowercase() == wanted))
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        self.find(name)
            .map_err(|e| Error::storage("failed to read profiles", e))?
            .ok_or_else(|| Error::ProfileNotFound {
                name: name.to_string(),
            })
    }

    pub fn save(&self, profile: &Profile) -> anyhow::Result<()> {
        let path = self.profile_dir(&profile.name).join(PROFILE_FILE);
        let text = serde_json::to_string_pretty(profile).context("failed to serialize profile")?;
        write_atomic(&path, text.as_bytes())
    }

    pub fn ensure_free(&self, name: &str) -> Result<()> {
        let taken = self
            .find(name)
            .map_err(|e| Error::storage("failed to read profiles", e))?
            .is_some();
        if taken || self.profile_dir(name).exists() {
            return Err(Error::NameConflict {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Publishes a new profile directory holding only its metadata.
    pub fn create(&self, profile: &Profile) -> Result<()> {
        self.ensure_free(&profile.name)?;
        let target = self.profile_dir(&profile.name);
        let publish = || -> anyhow::Result<()> {
            let staging = Staging::adjacent_to(&target)?;
            let payload = staging.payload_dir()?;
            let text =
                serde_json::to_string_pretty(profile).context("failed to serialize profile")?;
            let path = payload.join(PROFILE_FILE);
            fs::write(&path, text).with_context(|| format!("failed to write {path:?}"))?;
            staging.commit(&target)
        };
        publish().map_err(|e| Error::storage(format!("failed to create profile {}", profile.name), e))?;
        log::info!("created profile {}", profile.name);
        Ok(())
    }

    /// Renames the profile directory, then its metadata.
    pub fn rename(&self, old: &str, new: &str) -> Result<Profile> {
        let mut profile = self.load(old)?;
        let new = sanitize_name(new)?;
        let same = profile.name.to_lowercase() == new.to_lowercase();
        if !same {
            self.ensure_free(&new)?;
        }
        let from = self.profile_dir(&profile.name);
        let to = self.profile_dir(&new);
        fs::rename(&from, &to).map_err(|e| {
            Error::storage(format!("failed to rename {from:?} to {to:?}"), e)
        })?;
        log::info!("renamed profile {} to {new}", profile.name);
        profile.name = new;
        self.save(&profile)
            .map_err(|e| Error::storage("failed to update profile metadata", e))?;
        Ok(profile)
    }
}
