use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;

use crate::{
    module::{FILES_DIR, MANIFEST_FILE, Manifest, Module, ModuleContext, ModuleKind, Snapshot},
    transfer::Staging,
};

const PROFILES_DIR: &str = "profiles";
const BACKUP_DIR: &str = "last_backup";
const HISTORY_DIR: &str = "history";
const EXTERNAL_DIR: &str = "external";

/// Layout of a data directory and the snapshot transfer primitives
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR)
    }

    /// Directory holding the managed data/cache pair of `profile`.
    pub fn external_dir(&self, profile: &str) -> PathBuf {
        self.root.join(EXTERNAL_DIR).join(profile)
    }

    pub fn external_root(&self) -> PathBuf {
        self.root.join(EXTERNAL_DIR)
    }

    pub fn exists(&self, profile_dir: &Path, module_id: &str) -> bool {
        profile_dir.join(module_id).join(MANIFEST_FILE).is_file()
    }

    /// Replaces the snapshot of `module` in `profile_dir` with the live
    /// state. The previous snapshot stays in place if anything fails.
    pub fn capture(
        &self,
        profile_dir: &Path,
        module: &dyn Module,
        ctx: &ModuleContext,
    ) -> anyhow::Result<()> {
        let target = profile_dir.join(module.id());
        let staging = Staging::adjacent_to(&target)?;
        materialize(module, ctx, &staging.payload())?;
        staging.commit(&target)?;
        ctx.statistics.modules.increase();
        log::info!("saved {} into profile {}", module.id(), ctx.profile);
        Ok(())
    }

    /// Applies the snapshot of `module` found in `profile_dir`.
    pub fn apply(
        &self,
        profile_dir: &Path,
        module: &dyn Module,
        ctx: &ModuleContext,
    ) -> anyhow::Result<()> {
        match module.kind() {
            ModuleKind::Copy => {
                let snapshot = Snapshot::open(&profile_dir.join(module.id()))?;
                module.apply(ctx, Some(&snapshot))?;
            }
            ModuleKind::ExternalState => module.apply(ctx, None)?,
        }
        ctx.statistics.modules.increase();
        log::info!("applied {} from {}", module.id(), ctx.profile);
        Ok(())
    }
}

/// Writes a complete snapshot of `module` at `dir`, which must not exist.
pub fn materialize(module: &dyn Module, ctx: &ModuleContext, dir: &Path) -> anyhow::Result<()> {
    let files = dir.join(FILES_DIR);
    fs::create_dir_all(&files).with_context(|| format!("failed to create directory {files:?}"))?;
    let slots = module.capture(ctx, &files)?;
    let manifest = Manifest {
        module: module.id().to_string(),
        captured_at: SystemTime::now(),
        slots,
    };
    let text = serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;
    let path = dir.join(MANIFEST_FILE);
    fs::write(&path, text).with_context(|| format!("failed to write {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        locations::Locations,
        module::{self, ModuleOptions},
        process::FixedProbe,
        statistics::Statistics,
    };

    #[test]
    fn capture_publishes_and_replaces_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path().join("data"));
        let settings = Settings::default();
        let locations = Locations::under(root.path().join("machine"));
        let options = ModuleOptions::default();
        let probe = FixedProbe::new();
        let statistics = Statistics::default();
        let ctx = ModuleContext {
            profile: "p",
            options: &options,
            settings: &settings,
            locations: &locations,
            probe: &probe,
            statistics: &statistics,
        };
        let slimevr = module::get("slimevr").unwrap();
        let live = locations.appdata.join("dev.slimevr.SlimeVR");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("vrconfig.yml"), "v: 1").unwrap();

        let profile_dir = store.profiles_dir().join("p");
        assert!(!store.exists(&profile_dir, "slimevr"));
        store.capture(&profile_dir, slimevr, &ctx).unwrap();
        assert!(store.exists(&profile_dir, "slimevr"));

        fs::write(live.join("vrconfig.yml"), "v: 2").unwrap();
        store.capture(&profile_dir, slimevr, &ctx).unwrap();
        let saved = profile_dir.join("slimevr").join(FILES_DIR).join("vrconfig.yml");
        assert_eq!(fs::read_to_string(saved).unwrap(), "v: 2");
        let snapshot = Snapshot::open(&profile_dir.join("slimevr")).unwrap();
        assert!(snapshot.slot("vrconfig.yml").unwrap().present);
        assert!(!snapshot.slot("osc.json").unwrap().present);
        assert_eq!(fs::read_dir(&profile_dir).unwrap().count(), 1);
    }
}
