use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    module::{Module, ModuleContext, ModuleKind, ModuleOptions},
    store::materialize,
    transfer::Staging,
};

pub const RECORD_FILE: &str = "backup.json";

/// One module captured by the last switch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: String,
    /// Options the live paths were resolved with; for external-state
    /// modules `directories` is the pair the launcher pointed at
    #[serde(default)]
    pub options: ModuleOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(with = "humantime_serde")]
    pub created: SystemTime,
    /// Profile the switch went to
    pub target_profile: String,
    pub modules: Vec<BackupEntry>,
}

/// The single "last backup" slot
///
/// Holds the live state of every module the most recent switch touched,
/// taken right before that switch applied anything.
#[derive(Clone, Debug)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn module_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Captures `modules` into a fresh slot and publishes it over the
    /// previous one in a single step.
    ///
    /// Nothing is published unless every module was captured.
    pub fn record(
        &self,
        target_profile: &str,
        modules: &[(&'static dyn Module, ModuleContext)],
    ) -> Result<BackupRecord> {
        let storage = |e: anyhow::Error| Error::storage("failed to prepare the backup slot", e);

        let staging = Staging::adjacent_to(&self.dir).map_err(storage)?;
        let payload = staging.payload_dir().map_err(storage)?;
        let mut entries = Vec::with_capacity(modules.len());
        for (module, ctx) in modules {
            let mut options = ctx.options.clone();
            match module.kind() {
                ModuleKind::Copy => {
                    materialize(*module, ctx, &payload.join(module.id()))
                        .map_err(capture_failed(target_profile, module.id()))?;
                }
                ModuleKind::ExternalState => {
                    options.directories = module
                        .current_external(ctx)
                        .map_err(capture_failed(target_profile, module.id()))?;
                    options.launch_flags = None;
                }
            }
            log::debug!("backed up {}", module.id());
            entries.push(BackupEntry {
                id: module.id().to_string(),
                options,
            });
        }

        let record = BackupRecord {
            created: SystemTime::now(),
            target_profile: target_profile.to_string(),
            modules: entries,
        };
        let text = serde_json::to_string_pretty(&record)
            .context("failed to serialize backup record")
            .map_err(storage)?;
        let path = payload.join(RECORD_FILE);
        fs::write(&path, text)
            .with_context(|| format!("failed to write {path:?}"))
            .map_err(storage)?;
        staging
            .commit(&self.dir)
            .map_err(|e| Error::storage("failed to publish the backup slot", e))?;
        log::info!(
            "backed up {} module(s) before switching to {target_profile}",
            record.modules.len()
        );
        Ok(record)
    }

    pub fn load(&self) -> Result<BackupRecord> {
        let path = self.dir.join(RECORD_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NoBackup),
            Err(e) => return Err(Error::storage(format!("failed to read {path:?}"), e)),
        };
        serde_json::from_str(&text)
            .map_err(|e| Error::storage(format!("failed to parse {path:?}"), e))
    }

    pub fn exists(&self) -> bool {
        self.dir.join(RECORD_FILE).is_file()
    }
}

fn capture_failed(profile: &str, module: &str) -> impl FnOnce(anyhow::Error) -> Error {
    let (profile, module) = (profile.to_string(), module.to_string());
    move |source| Error::CaptureFailed {
        profile,
        module,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings, locations::Locations, module, process::FixedProbe,
        statistics::Statistics,
    };

    #[test]
    fn failed_capture_keeps_previous_slot() {
        let root = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(root.path().join("last_backup"));
        let settings = Settings::default();
        let locations = Locations::under(root.path().join("machine"));
        let options = ModuleOptions::default();
        let probe = FixedProbe::new();
        let statistics = Statistics::default();
        let ctx = ModuleContext {
            profile: "work",
            options: &options,
            settings: &settings,
            locations: &locations,
            probe: &probe,
            statistics: &statistics,
        };
        let slimevr = module::get("slimevr").unwrap();
        let resonite = module::get("resonite").unwrap();

        let first = ledger.record("work", &[(slimevr, ctx)]).unwrap();
        assert_eq!(ledger.load().unwrap(), first);

        // no launcher configuration exists in the sandbox
        let err = ledger
            .record("home", &[(slimevr, ctx), (resonite, ctx)])
            .unwrap_err();
        assert!(matches!(err, Error::CaptureFailed { module, .. } if module == "resonite"));
        assert_eq!(ledger.load().unwrap().target_profile, "work");
    }

    #[test]
    fn missing_slot_is_no_backup() {
        let root = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(root.path().join("last_backup"));
        assert!(matches!(ledger.load(), Err(Error::NoBackup)));
        assert!(!ledger.exists());
    }
}
