use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{registry::Profile, transfer::Staging};

pub const RECORD_FILE: &str = "record.json";
const PROFILE_DIR: &str = "profile";
const EXTERNAL_DIR: &str = "external";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRecord {
    #[serde(with = "humantime_serde")]
    pub deleted_at: SystemTime,
    pub profile: Profile,
    /// Whether the managed data/cache pair moved along
    #[serde(default)]
    pub has_external: bool,
}

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub dir: PathBuf,
    pub record: DeletionRecord,
}

impl HistoryEntry {
    pub fn profile_dir(&self) -> PathBuf {
        self.dir.join(PROFILE_DIR)
    }

    pub fn external_dir(&self) -> PathBuf {
        self.dir.join(EXTERNAL_DIR)
    }
}

/// Bounded buffer of deleted profiles, most recent first
#[derive(Clone, Debug)]
pub struct DeletionHistory {
    dir: PathBuf,
    capacity: usize,
}

impl DeletionHistory {
    pub fn new(dir: PathBuf, capacity: usize) -> Self {
        Self { dir, capacity }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Moves a profile directory (and its managed external pair) into a
    /// new record, then evicts records past capacity.
    ///
    /// The record is published before anything moves; records whose
    /// profile never arrived are ignored by [`DeletionHistory::list`].
    pub fn push(
        &self,
        profile: &Profile,
        profile_dir: &Path,
        external: Option<&Path>,
    ) -> anyhow::Result<HistoryEntry> {
        let deleted_at = SystemTime::now();
        let nanos = deleted_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = self.dir.join(format!("{nanos:020}-{}", profile.name));
        let record = DeletionRecord {
            deleted_at,
            profile: profile.clone(),
            has_external: external.is_some(),
        };

        let staging = Staging::adjacent_to(&dir)?;
        let payload = staging.payload_dir()?;
        let text = serde_json::to_string_pretty(&record).context("failed to serialize record")?;
        let path = payload.join(RECORD_FILE);
        fs::write(&path, text).with_context(|| format!("failed to write {path:?}"))?;
        staging.commit(&dir)?;

        let entry = HistoryEntry { dir, record };
        move_dir(profile_dir, &entry.profile_dir())?;
        if let Some(external) = external {
            move_dir(external, &entry.external_dir())?;
        }
        log::info!("moved profile {} into history", profile.name);
        self.evict()?;
        Ok(entry)
    }

    fn evict(&self) -> anyhow::Result<()> {
        for entry in self.list()?.into_iter().skip(self.capacity) {
            fs::remove_dir_all(&entry.dir)
                .with_context(|| format!("failed to remove {:?}", entry.dir))?;
            log::info!(
                "evicted deleted profile {} from history",
                entry.record.profile.name
            );
        }
        Ok(())
    }

    /// Complete records, most recently deleted first.
    pub fn list(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open directory {:?}", self.dir));
            }
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read entry of {:?}", self.dir))?;
            let dir = entry.path();
            let path = dir.join(RECORD_FILE);
            if !path.is_file() || !dir.join(PROFILE_DIR).is_dir() {
                continue;
            }
            let text =
                fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
            let record =
                serde_json::from_str(&text).with_context(|| format!("failed to parse {path:?}"))?;
            records.push(HistoryEntry { dir, record });
        }
        records.sort_by(|a, b| {
            b.record
                .deleted_at
                .cmp(&a.record.deleted_at)
                .then_with(|| b.dir.cmp(&a.dir))
        });
        Ok(records)
    }

    /// Moves a record back to `profile_dir` (and `external_dir`), then
    /// drops the record.
    ///
    /// When the external pair cannot move, the profile goes back into the
    /// record, which stays listed.
    pub fn restore(
        &self,
        entry: &HistoryEntry,
        profile_dir: &Path,
        external_dir: &Path,
    ) -> anyhow::Result<()> {
        move_dir(&entry.profile_dir(), profile_dir)?;
        if entry.record.has_external
            && entry.external_dir().exists()
            && let Err(err) = move_dir(&entry.external_dir(), external_dir)
        {
            if let Err(back) = fs::rename(profile_dir, entry.profile_dir()) {
                log::error!("failed to move {profile_dir:?} back into history: {back}");
            }
            return Err(err);
        }
        fs::remove_dir_all(&entry.dir)
            .with_context(|| format!("failed to remove {:?}", entry.dir))?;
        log::info!("restored profile {} from history", entry.record.profile.name);
        Ok(())
    }
}

fn move_dir(from: &Path, to: &Path) -> anyhow::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {parent:?}"))?;
    }
    fs::rename(from, to).with_context(|| format!("failed to move {from:?} to {to:?}"))
}
