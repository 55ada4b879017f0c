use std::{fs, path::Path};

use anyhow::Context;
use serde_json::{Map, Value};

use crate::{
    module::{LivePath, Module, ModuleContext, Snapshot, copy, files_in},
    process::ProcessMatcher,
    transfer::write_atomic,
};

const SETTINGS_FILE: &str = "steamvr.vrsettings";
const CONFIG_ENTRIES: &[&str] = &[SETTINGS_FILE, "controller_base", "controller_user", "drivers"];
/// Driver sections switched off unless selected
pub const KNOWN_DRIVERS: &[&str] = &["cyberfinger", "handtracking", "leapmotion", "ultraleap"];

#[derive(Debug)]
pub struct SteamVr;

impl Module for SteamVr {
    fn id(&self) -> &'static str {
        "steamvr"
    }

    fn display_name(&self) -> &'static str {
        "SteamVR"
    }

    fn description(&self) -> &'static str {
        "SteamVR settings, driver configuration, and controller bindings"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        match ctx.options.root_dir.as_ref().or(ctx.locations.steam.as_ref()) {
            Some(steam) => files_in(&steam.join("config"), CONFIG_ENTRIES),
            None => {
                log::debug!("no Steam installation found");
                Vec::new()
            }
        }
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("vrserver.exe"),
            ProcessMatcher::named("vrmonitor.exe"),
        ]
    }

    fn apply(&self, ctx: &ModuleContext, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        let snapshot = snapshot.context("steamvr needs a snapshot to apply")?;
        let paths = self.paths(ctx);
        copy::apply(&paths, ctx, snapshot)?;
        if let Some(driver) = &ctx.options.active_driver
            && let Some(settings) = paths.iter().find(|p| p.slot == SETTINGS_FILE)
        {
            select_driver(&settings.path, driver)?;
        }
        Ok(())
    }
}

/// Enables `driver_<driver>` in `steamvr.vrsettings` and disables every
/// other known driver section.
pub fn select_driver(path: &Path, driver: &str) -> anyhow::Result<()> {
    let mut root = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<Value>(&text)
            .with_context(|| format!("failed to parse {path:?}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {path:?}")),
    };
    let object = root
        .as_object_mut()
        .with_context(|| format!("{path:?} is not a JSON object"))?;
    for name in KNOWN_DRIVERS.iter().copied().chain([driver]) {
        let section = object
            .entry(format!("driver_{name}"))
            .or_insert_with(|| Value::Object(Map::new()));
        match section.as_object_mut() {
            Some(section) => {
                section.insert("enable".to_string(), Value::Bool(name == driver));
            }
            None => anyhow::bail!("section driver_{name} of {path:?} is not an object"),
        }
    }
    let mut text = serde_json::to_string_pretty(&root).context("failed to serialize settings")?;
    text.push('\n');
    write_atomic(path, text.as_bytes())?;
    log::info!("steamvr: enabled driver {driver}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_one_driver() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{"steamvr": {"requireHmd": false}, "driver_leapmotion": {"enable": true, "x": 1}}"#,
        )
        .unwrap();

        select_driver(&path, "handtracking").unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["driver_handtracking"]["enable"], Value::Bool(true));
        assert_eq!(value["driver_leapmotion"]["enable"], Value::Bool(false));
        assert_eq!(value["driver_leapmotion"]["x"], 1);
        assert_eq!(value["driver_cyberfinger"]["enable"], Value::Bool(false));
        assert_eq!(value["steamvr"]["requireHmd"], Value::Bool(false));
    }

    #[test]
    fn rejects_non_object_settings() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(SETTINGS_FILE);
        fs::write(&path, "[1, 2]").unwrap();
        assert!(select_driver(&path, "cyberfinger").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1, 2]");
    }
}
