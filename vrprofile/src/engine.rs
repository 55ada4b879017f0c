use std::{
    collections::BTreeSet,
    fs,
    path::Path,
    time::SystemTime,
};

use crate::{
    config::Settings,
    error::{Error, Result},
    history::{DeletionHistory, HistoryEntry},
    launcher::DirectoryPair,
    ledger::{BackupRecord, Ledger},
    locations::Locations,
    lock::{BACKUP_KEY, DataRootLock, ProfileLocks},
    module::{self, Module, ModuleContext, ModuleKind, ModuleOptions, copy::tree_size},
    process::{ProcessMatcher, ProcessProbe, SystemProbe, check_running, running_among},
    registry::{ModuleEntry, PROFILE_FILE, Profile, Registry, sanitize_name},
    statistics::Statistics,
    store::SnapshotStore,
    transfer::{Staging, copy_tree, remove_stale_staging, write_atomic},
};

/// Outcome of a switch or an undo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchReport {
    pub profile: String,
    pub applied: Vec<String>,
    /// Enabled modules without a snapshot
    pub skipped: Vec<String>,
    pub backed_up: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleStatus {
    pub id: &'static str,
    pub display_name: &'static str,
    pub running: Vec<String>,
    pub live_present: bool,
    pub live_bytes: u64,
    /// `None` when no profile was asked about
    pub has_snapshot: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Profile operations over one data directory
///
/// Operations on the same profile are serialized; operations on different
/// profiles may run on separate threads. Transfer counters go to the
/// [`Statistics`] each operation is given.
#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    locations: Locations,
    probe: Box<dyn ProcessProbe>,
    store: SnapshotStore,
    registry: Registry,
    ledger: Ledger,
    history: DeletionHistory,
    locks: ProfileLocks,
    root_lock: DataRootLock,
}

impl Engine {
    /// Opens the configured data directory on this machine.
    pub fn open(settings: Settings) -> Result<Self> {
        let locations = Locations::resolve(&settings.locations)
            .map_err(|e| Error::storage("failed to resolve application directories", e))?;
        Self::with_parts(settings, locations, Box::new(SystemProbe))
    }

    pub fn with_parts(
        settings: Settings,
        locations: Locations,
        probe: Box<dyn ProcessProbe>,
    ) -> Result<Self> {
        let root = settings.data_dir.clone();
        fs::create_dir_all(&root)
            .map_err(|e| Error::storage(format!("failed to create data directory {root:?}"), e))?;
        let root_lock = DataRootLock::acquire(&root)?;
        let store = SnapshotStore::new(root.clone());
        let engine = Self {
            registry: Registry::new(store.profiles_dir()),
            ledger: Ledger::new(store.backup_dir()),
            history: DeletionHistory::new(store.history_dir(), settings.history_capacity),
            store,
            settings,
            locations,
            probe,
            locks: ProfileLocks::default(),
            root_lock,
        };
        engine
            .clean_staging()
            .map_err(|e| Error::storage("failed to clean up interrupted operations", e))?;
        log::debug!("opened data directory {:?}", engine.root_lock.path());
        Ok(engine)
    }

    fn clean_staging(&self) -> anyhow::Result<()> {
        let mut dirs = vec![
            self.store.root().to_path_buf(),
            self.store.profiles_dir(),
            self.store.history_dir(),
            self.store.external_root(),
        ];
        dirs.extend(
            self.registry
                .list()?
                .iter()
                .map(|p| self.registry.profile_dir(&p.name)),
        );
        let removed: usize = dirs
            .iter()
            .map(|d| remove_stale_staging(d))
            .sum::<anyhow::Result<usize>>()?;
        if removed > 0 {
            log::info!("removed {removed} staging area(s) left by an interrupted operation");
        }
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn locations(&self) -> &Locations {
        &self.locations
    }

    pub fn data_dir(&self) -> &Path {
        self.store.root()
    }

    fn ctx<'a>(
        &'a self,
        profile: &'a str,
        options: &'a ModuleOptions,
        statistics: &'a Statistics,
    ) -> ModuleContext<'a> {
        ModuleContext {
            profile,
            options,
            settings: &self.settings,
            locations: &self.locations,
            probe: self.probe.as_ref(),
            statistics,
        }
    }

    fn guard(&self, matchers: &[ProcessMatcher]) -> Result<()> {
        let running = check_running(self.probe.as_ref(), matchers).map_err(Error::ProcessCheck)?;
        if running.is_empty() {
            Ok(())
        } else {
            Err(Error::AppsStillRunning {
                names: running.into_iter().collect(),
            })
        }
    }

    /// Process matchers gating a switch of `modules`.
    fn switch_matchers(
        &self,
        modules: &[(&'static dyn Module, ModuleOptions)],
        profile: &str,
    ) -> Vec<ProcessMatcher> {
        let statistics = Statistics::default();
        let mut matchers = BTreeSet::new();
        for (module, options) in modules {
            matchers.extend(module.process_names());
            matchers.extend(module.apply_guard(&self.ctx(profile, options, &statistics)));
        }
        matchers.into_iter().collect()
    }

    fn storage(context: impl Into<String>) -> impl FnOnce(anyhow::Error) -> Error {
        let context = context.into();
        move |e| Error::storage(context, e)
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.registry
            .list()
            .map_err(Self::storage("failed to list profiles"))
    }

    pub fn profile(&self, name: &str) -> Result<Profile> {
        self.registry.load(name)
    }

    /// Managed data/cache pair of a profile.
    fn managed_pair(&self, profile: &str) -> DirectoryPair {
        DirectoryPair::under(&self.store.external_dir(profile))
    }

    fn is_managed(&self, profile: &str, pair: &DirectoryPair) -> bool {
        *pair == self.managed_pair(profile)
    }

    /// Gives every enabled external-state module of `profile` a directory
    /// pair. Returns whether the profile changed.
    fn assign_external(&self, profile: &mut Profile) -> bool {
        let pair = self.managed_pair(&profile.name);
        let mut changed = false;
        for entry in profile.modules.iter_mut().filter(|m| m.enabled) {
            let external =
                module::get(&entry.id).map(|m| m.kind()) == Some(ModuleKind::ExternalState);
            if external && entry.options.directories.is_none() {
                entry.options.directories = Some(pair.clone());
                changed = true;
            }
        }
        changed
    }

    fn create_external(&self, profile: &Profile) -> Result<()> {
        for entry in profile.enabled() {
            if let Some(pair) = &entry.options.directories {
                pair.create().map_err(Self::storage(format!(
                    "failed to create directories of {}",
                    profile.name
                )))?;
            }
        }
        Ok(())
    }

    fn resolve_modules(ids: &[String]) -> Result<Vec<&'static dyn Module>> {
        let mut seen = BTreeSet::new();
        let mut modules = Vec::new();
        for id in ids {
            let module = module::get(id).ok_or_else(|| Error::UnknownModule { id: id.clone() })?;
            if seen.insert(module.id()) {
                modules.push(module);
            }
        }
        Ok(modules)
    }

    /// Enabled modules of `profile`, restricted to `only` when given.
    fn selected(
        profile: &Profile,
        only: Option<&[String]>,
    ) -> Result<Vec<(&'static dyn Module, ModuleOptions)>> {
        if let Some(only) = only {
            Self::resolve_modules(only)?;
        }
        let mut selected = Vec::new();
        for entry in profile.enabled() {
            let module = module::get(&entry.id).ok_or_else(|| Error::UnknownModule {
                id: entry.id.clone(),
            })?;
            if only.is_some_and(|only| !only.iter().any(|id| id == module.id())) {
                continue;
            }
            selected.push((module, entry.options.clone()));
        }
        if let Some(only) = only {
            for id in only {
                if profile.entry(id).is_none_or(|e| !e.enabled) {
                    log::warn!("module {id} is not enabled in profile {}", profile.name);
                }
            }
        }
        Ok(selected)
    }

    pub fn create_profile(&self, name: &str, modules: &[String], notes: &str) -> Result<Profile> {
        let name = sanitize_name(name)?;
        let _guard = self.locks.acquire([&name]);
        let ids = if modules.is_empty() {
            self.settings.default_modules.as_slice()
        } else {
            modules
        };
        let modules = Self::resolve_modules(ids)?;
        self.registry.ensure_free(&name)?;

        let mut profile = Profile::new(
            &name,
            modules.iter().map(|m| ModuleEntry::new(m.id())).collect(),
        );
        profile.notes = notes.to_string();
        self.assign_external(&mut profile);
        self.registry.create(&profile)?;
        self.create_external(&profile)?;
        Ok(profile)
    }

    /// Captures the live state of the profile's enabled modules, or of
    /// `only` among them. Returns the captured module ids.
    pub fn save_current(
        &self,
        name: &str,
        only: Option<&[String]>,
        statistics: &Statistics,
    ) -> Result<Vec<String>> {
        let _guard = self.locks.acquire([name]);
        let mut profile = self.registry.load(name)?;
        if self.assign_external(&mut profile) {
            self.registry
                .save(&profile)
                .map_err(Self::storage("failed to update profile metadata"))?;
        }
        self.create_external(&profile)?;

        let selected = Self::selected(&profile, only)?;
        let matchers: Vec<_> = selected
            .iter()
            .flat_map(|(m, _)| m.process_names())
            .collect();
        match check_running(self.probe.as_ref(), &matchers) {
            Ok(running) if !running.is_empty() => {
                log::warn!("saving while running, files may be inconsistent: {running:?}");
            }
            Ok(_) => {}
            Err(e) => log::warn!("failed to check running processes: {e:#}"),
        }

        let profile_dir = self.registry.profile_dir(&profile.name);
        let mut saved = Vec::new();
        for (module, options) in &selected {
            let ctx = self.ctx(&profile.name, options, statistics);
            match module.kind() {
                ModuleKind::Copy => self
                    .store
                    .capture(&profile_dir, *module, &ctx)
                    .map_err(|source| Error::CaptureFailed {
                        profile: profile.name.clone(),
                        module: module.id().to_string(),
                        source,
                    })?,
                ModuleKind::ExternalState => {
                    log::info!("{} keeps its state in {:?}", module.id(), options.directories);
                }
            }
            saved.push(module.id().to_string());
        }
        Ok(saved)
    }

    /// Makes `name` the active profile.
    ///
    /// Fails with [`Error::AppsStillRunning`] before touching anything when
    /// an affected application is running. The live state is backed up
    /// first; a failure while applying stops at the failing module.
    pub fn switch_to(&self, name: &str, statistics: &Statistics) -> Result<SwitchReport> {
        let _guard = self.locks.acquire([name, BACKUP_KEY]);
        let mut profile = self.registry.load(name)?;
        let profile_dir = self.registry.profile_dir(&profile.name);

        let mut skipped = Vec::new();
        let mut selected = Vec::new();
        for (module, options) in Self::selected(&profile, None)? {
            let has_state = match module.kind() {
                ModuleKind::Copy => self.store.exists(&profile_dir, module.id()),
                ModuleKind::ExternalState => true,
            };
            if has_state {
                selected.push((module, options));
            } else {
                log::warn!("profile {} has no snapshot of {}", profile.name, module.id());
                skipped.push(module.id().to_string());
            }
        }
        if selected.is_empty() {
            return Err(Error::NothingToApply {
                profile: profile.name,
            });
        }
        let matchers = self.switch_matchers(&selected, &profile.name);
        self.guard(&matchers)?;

        if self.assign_external(&mut profile) {
            self.registry
                .save(&profile)
                .map_err(Self::storage("failed to update profile metadata"))?;
            selected = Self::selected(&profile, None)?
                .into_iter()
                .filter(|(m, _)| selected.iter().any(|(s, _)| s.id() == m.id()))
                .collect();
        }
        self.create_external(&profile)?;

        let backed_up = self.settings.auto_backup;
        if backed_up {
            let contexts: Vec<_> = selected
                .iter()
                .map(|(m, options)| (*m, self.ctx(&profile.name, options, statistics)))
                .collect();
            self.ledger.record(&profile.name, &contexts)?;
        }

        // applications may have started while backing up
        self.guard(&matchers)?;

        let mut applied = Vec::new();
        for (module, options) in &selected {
            let ctx = self.ctx(&profile.name, options, statistics);
            if let Err(err) = self.store.apply(&profile_dir, *module, &ctx) {
                return Err(self.apply_failed(&profile.name, *module, applied, err));
            }
            applied.push(module.id().to_string());
        }

        profile.last_switched = Some(SystemTime::now());
        self.registry
            .save(&profile)
            .map_err(Self::storage("failed to update profile metadata"))?;
        log::info!("switched to profile {}", profile.name);
        Ok(SwitchReport {
            profile: profile.name,
            applied,
            skipped,
            backed_up,
        })
    }

    fn apply_failed(
        &self,
        profile: &str,
        module: &dyn Module,
        applied: Vec<String>,
        err: anyhow::Error,
    ) -> Error {
        log::error!("failed to apply {} from {profile}: {err:#}", module.id());
        let wrap = |source: anyhow::Error| Error::ApplyFailed {
            profile: profile.to_string(),
            module: module.id().to_string(),
            applied: applied.clone(),
            source,
        };
        if applied.is_empty() {
            Error::classify(err, wrap)
        } else {
            wrap(err)
        }
    }

    /// Re-applies the backup slot. The slot itself is left as it is.
    pub fn undo_last_switch(&self, statistics: &Statistics) -> Result<SwitchReport> {
        let _guard = self.locks.acquire([BACKUP_KEY]);
        let record = self.ledger.load()?;
        let mut selected = Vec::new();
        for entry in &record.modules {
            let module = module::get(&entry.id).ok_or_else(|| Error::UnknownModule {
                id: entry.id.clone(),
            })?;
            selected.push((module, entry.options.clone()));
        }
        const SLOT: &str = "last backup";
        self.guard(&self.switch_matchers(&selected, SLOT))?;

        let mut applied = Vec::new();
        for (module, options) in &selected {
            let ctx = self.ctx(SLOT, options, statistics);
            if let Err(err) = self.store.apply(self.ledger.dir(), *module, &ctx) {
                return Err(self.apply_failed(SLOT, *module, applied, err));
            }
            applied.push(module.id().to_string());
        }
        log::info!(
            "restored the state from before switching to {}",
            record.target_profile
        );
        Ok(SwitchReport {
            profile: record.target_profile,
            applied,
            skipped: Vec::new(),
            backed_up: false,
        })
    }

    pub fn backup(&self) -> Result<Option<BackupRecord>> {
        match self.ledger.load() {
            Ok(record) => Ok(Some(record)),
            Err(Error::NoBackup) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Moves a profile into the deletion history.
    pub fn delete_profile(&self, name: &str) -> Result<HistoryEntry> {
        let _guard = self.locks.acquire([name]);
        let profile = self.registry.load(name)?;
        let selected = Self::selected(&profile, None)?;
        let matchers: Vec<_> = selected
            .iter()
            .flat_map(|(m, _)| m.process_names())
            .collect();
        self.guard(&matchers)?;

        let external = self.store.external_dir(&profile.name);
        let owns_external = profile
            .modules
            .iter()
            .filter_map(|m| m.options.directories.as_ref())
            .any(|pair| self.is_managed(&profile.name, pair))
            && external.exists();
        self.history
            .push(
                &profile,
                &self.registry.profile_dir(&profile.name),
                owns_external.then_some(external.as_path()),
            )
            .map_err(Self::storage(format!("failed to delete profile {}", profile.name)))
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.history
            .list()
            .map_err(Self::storage("failed to read deletion history"))
    }

    /// Brings back the deleted profile at `index` (0 is the most recent).
    pub fn restore_deleted(&self, index: usize) -> Result<Profile> {
        let entries = self.history()?;
        let len = entries.len();
        let entry = entries
            .into_iter()
            .nth(index)
            .ok_or(Error::HistoryIndex { index, len })?;
        let profile = entry.record.profile.clone();
        let _guard = self.locks.acquire([&profile.name]);
        self.registry.ensure_free(&profile.name)?;
        let external = self.store.external_dir(&profile.name);
        if entry.record.has_external && external.exists() {
            return Err(Error::ExternalConflict {
                profile: profile.name,
                path: external,
            });
        }
        self.history
            .restore(&entry, &self.registry.profile_dir(&profile.name), &external)
            .map_err(Self::storage(format!("failed to restore profile {}", profile.name)))?;
        Ok(profile)
    }

    /// Running state of `modules` (all when empty), and whether `profile`
    /// has a snapshot of each.
    pub fn query_running_status(
        &self,
        modules: &[String],
        profile: Option<&str>,
    ) -> Result<Vec<ModuleStatus>> {
        let profile = profile.map(|name| self.registry.load(name)).transpose()?;
        let modules = if !modules.is_empty() {
            Self::resolve_modules(modules)?
        } else if let Some(profile) = &profile {
            Self::selected(profile, None)?
                .into_iter()
                .map(|(m, _)| m)
                .collect()
        } else {
            module::all().to_vec()
        };
        let processes = self.probe.processes().map_err(Error::ProcessCheck)?;
        let default_options = ModuleOptions::default();
        let statistics = Statistics::default();

        let mut statuses = Vec::with_capacity(modules.len());
        for module in modules {
            let options = profile
                .as_ref()
                .and_then(|p| p.entry(module.id()))
                .map(|e| &e.options)
                .unwrap_or(&default_options);
            let name = profile.as_ref().map(|p| p.name.as_str()).unwrap_or("");
            let paths = module.paths(&self.ctx(name, options, &statistics));
            let has_snapshot = profile.as_ref().map(|p| match module.kind() {
                ModuleKind::Copy => self
                    .store
                    .exists(&self.registry.profile_dir(&p.name), module.id()),
                ModuleKind::ExternalState => options.directories.is_some(),
            });
            statuses.push(ModuleStatus {
                id: module.id(),
                display_name: module.display_name(),
                running: running_among(&processes, &module.process_names())
                    .into_iter()
                    .collect(),
                live_present: paths.iter().any(|p| p.exists()),
                live_bytes: paths.iter().map(|p| tree_size(&p.path)).sum(),
                has_snapshot,
            });
        }
        Ok(statuses)
    }

    /// Renames a profile together with its managed directories.
    ///
    /// Gated like a switch. A launcher pointing at the managed pair is
    /// repointed at its new location; on failure the profile goes back to
    /// its old name.
    pub fn rename_profile(&self, old: &str, new: &str) -> Result<Profile> {
        let new_name = sanitize_name(new)?;
        // the launcher configuration is shared with switches
        let _guard = self.locks.acquire([old, new_name.as_str(), BACKUP_KEY]);
        let before = self.registry.load(old)?;
        let selected = Self::selected(&before, None)?;
        self.guard(&self.switch_matchers(&selected, &before.name))?;

        let from = self.store.external_dir(&before.name);
        let to = self.store.external_dir(&new_name);
        let old_pair = self.managed_pair(&before.name);
        let moves_external = from != to && from.exists();
        let launched: Vec<&dyn Module> = selected
            .iter()
            .filter(|(module, options)| {
                moves_external
                    && options.directories.as_ref() == Some(&old_pair)
                    && self.launcher_points_at(*module, options, &before.name, &old_pair)
            })
            .map(|(module, _)| *module)
            .collect();

        let mut profile = self.registry.rename(old, &new_name)?;
        if !moves_external {
            return Ok(profile);
        }
        if let Err(e) = fs::rename(&from, &to) {
            self.rollback_rename(&before, &profile.name, None);
            return Err(Error::storage(format!("failed to move {from:?} to {to:?}"), e));
        }
        let new_pair = self.managed_pair(&profile.name);
        for entry in &mut profile.modules {
            if entry.options.directories.as_ref() == Some(&old_pair) {
                entry.options.directories = Some(new_pair.clone());
            }
        }

        let statistics = Statistics::default();
        let publish = || -> Result<()> {
            self.registry
                .save(&profile)
                .map_err(Self::storage("failed to update profile metadata"))?;
            for module in &launched {
                let options = profile
                    .entry(module.id())
                    .map(|e| e.options.clone())
                    .unwrap_or_default();
                module
                    .apply(&self.ctx(&profile.name, &options, &statistics), None)
                    .map_err(|err| {
                        let context = format!("failed to repoint {}", module.id());
                        Error::classify(err, Self::storage(context))
                    })?;
                log::info!("repointed {} at the directories of {}", module.id(), profile.name);
            }
            Ok(())
        };
        if let Err(err) = publish() {
            self.rollback_rename(&before, &profile.name, Some((to.as_path(), from.as_path())));
            return Err(err);
        }
        Ok(profile)
    }

    /// Whether `module`'s launcher currently starts it with `pair`.
    fn launcher_points_at(
        &self,
        module: &dyn Module,
        options: &ModuleOptions,
        profile: &str,
        pair: &DirectoryPair,
    ) -> bool {
        let statistics = Statistics::default();
        match module.current_external(&self.ctx(profile, options, &statistics)) {
            Ok(current) => current.as_ref() == Some(pair),
            Err(e) => {
                log::debug!("launch configuration of {} unreadable: {e:#}", module.id());
                false
            }
        }
    }

    /// Puts `before` back under its old name, moving `moved` back first.
    fn rollback_rename(&self, before: &Profile, current: &str, moved: Option<(&Path, &Path)>) {
        if let Some((from, to)) = moved
            && let Err(e) = fs::rename(from, to)
        {
            log::error!("failed to move {from:?} back to {to:?}: {e}");
        }
        let restored = self.registry.rename(current, &before.name).and_then(|_| {
            self.registry
                .save(before)
                .map_err(Self::storage("failed to restore profile metadata"))
        });
        if let Err(e) = restored {
            log::error!("failed to restore profile {}: {e:#}", before.name);
        }
    }

    fn publish_copy(
        &self,
        source_dir: &Path,
        mut profile: Profile,
        foreign_pair: impl Fn(&DirectoryPair) -> bool,
        statistics: &Statistics,
    ) -> Result<Profile> {
        let target = self.registry.profile_dir(&profile.name);
        for entry in &mut profile.modules {
            if entry.options.directories.as_ref().is_some_and(&foreign_pair) {
                entry.options.directories = None;
            }
        }
        self.assign_external(&mut profile);
        let publish = || -> anyhow::Result<()> {
            let staging = Staging::adjacent_to(&target)?;
            copy_tree(source_dir, &staging.payload(), None, statistics)?;
            let text = serde_json::to_string_pretty(&profile)?;
            write_atomic(&staging.payload().join(PROFILE_FILE), text.as_bytes())?;
            staging.commit(&target)
        };
        publish().map_err(Self::storage(format!("failed to copy profile {}", profile.name)))?;
        self.create_external(&profile)?;
        Ok(profile)
    }

    /// Copies every snapshot of `source` into a new profile `new`, which
    /// gets its own external directories.
    pub fn duplicate_profile(
        &self,
        source: &str,
        new: &str,
        statistics: &Statistics,
    ) -> Result<Profile> {
        let new_name = sanitize_name(new)?;
        let _guard = self.locks.acquire([source, new_name.as_str()]);
        let original = self.registry.load(source)?;
        self.registry.ensure_free(&new_name)?;

        let mut profile = original.clone();
        profile.name = new_name;
        profile.created = SystemTime::now();
        profile.last_switched = None;
        let source_dir = self.registry.profile_dir(&original.name);
        let profile = self.publish_copy(
            &source_dir,
            profile,
            |pair| self.is_managed(&original.name, pair),
            statistics,
        )?;
        log::info!("duplicated profile {} as {}", original.name, profile.name);
        Ok(profile)
    }

    fn update_profile(
        &self,
        name: &str,
        f: impl FnOnce(&mut Profile) -> Result<()>,
    ) -> Result<Profile> {
        let _guard = self.locks.acquire([name]);
        let mut profile = self.registry.load(name)?;
        f(&mut profile)?;
        self.assign_external(&mut profile);
        self.registry
            .save(&profile)
            .map_err(Self::storage("failed to update profile metadata"))?;
        self.create_external(&profile)?;
        Ok(profile)
    }

    pub fn set_module_enabled(
        &self,
        name: &str,
        module_id: &str,
        enabled: bool,
    ) -> Result<Profile> {
        let module = module::get(module_id).ok_or_else(|| Error::UnknownModule {
            id: module_id.to_string(),
        })?;
        self.update_profile(name, |profile| {
            profile.entry_mut(module.id()).enabled = enabled;
            Ok(())
        })
    }

    pub fn set_module_option(
        &self,
        name: &str,
        module_id: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<Profile> {
        let module = module::get(module_id).ok_or_else(|| Error::UnknownModule {
            id: module_id.to_string(),
        })?;
        self.update_profile(name, |profile| {
            profile
                .entry_mut(module.id())
                .options
                .set(key, value)
                .map_err(|source| Error::InvalidOption {
                    module: module.id().to_string(),
                    key: key.to_string(),
                    source,
                })
        })
    }

    pub fn set_notes(&self, name: &str, notes: &str) -> Result<Profile> {
        self.update_profile(name, |profile| {
            profile.notes = notes.to_string();
            Ok(())
        })
    }

    /// Copies profiles from another data directory: only `name` when given,
    /// otherwise every profile whose name is free here.
    pub fn import_from(
        &self,
        other_root: &Path,
        name: Option<&str>,
        statistics: &Statistics,
    ) -> Result<ImportReport> {
        let other = SnapshotStore::new(other_root.to_path_buf());
        let foreign = Registry::new(other.profiles_dir());
        let profiles = match name {
            Some(name) => vec![foreign.load(name)?],
            None => foreign
                .list()
                .map_err(Self::storage(format!("failed to list profiles of {other_root:?}")))?,
        };

        let mut report = ImportReport::default();
        for profile in profiles {
            let _guard = self.locks.acquire([&profile.name]);
            match self.registry.ensure_free(&profile.name) {
                Ok(()) => {}
                Err(Error::NameConflict { name: conflict }) if name.is_none() => {
                    log::warn!("skipping {conflict}, a profile with that name exists");
                    report.conflicts.push(conflict);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let source_dir = foreign.profile_dir(&profile.name);
            let foreign_pair = DirectoryPair::under(&other.external_dir(&profile.name));
            let imported = self.publish_copy(
                &source_dir,
                profile,
                |pair| *pair == foreign_pair,
                statistics,
            )?;
            log::info!("imported profile {} from {other_root:?}", imported.name);
            report.imported.push(imported.name);
        }
        Ok(report)
    }
}
