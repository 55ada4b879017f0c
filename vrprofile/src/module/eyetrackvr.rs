use std::path::PathBuf;

use crate::{
    module::{LivePath, Module, ModuleContext, find_app_dir},
    process::ProcessMatcher,
};

const CONFIG_FILES: &[&str] = &[
    "settings.json",
    "EyeTrackVR.cfg",
    "config.json",
    "eyetracking_config.cfg",
];
const DATA_DIRS: &[&str] = &["calibration", "calib", "data"];

#[derive(Debug)]
pub struct EyeTrackVr;

impl EyeTrackVr {
    fn app_dir(ctx: &ModuleContext) -> Option<PathBuf> {
        if let Some(dir) = &ctx.options.root_dir {
            return Some(dir.clone());
        }
        let l = &ctx.locations;
        let candidates = [
            l.local_appdata.join("Programs").join("eyetrackvr"),
            l.local_appdata.join("Programs").join("EyeTrackVR"),
            l.appdata.join("eyetrackvr"),
            l.appdata.join("EyeTrackVR"),
            l.home.join("EyeTrackVR"),
        ];
        find_app_dir(&candidates, CONFIG_FILES)
    }
}

impl Module for EyeTrackVr {
    fn id(&self) -> &'static str {
        "eyetrackvr"
    }

    fn display_name(&self) -> &'static str {
        "EyeTrackVR"
    }

    fn description(&self) -> &'static str {
        "eye tracking camera settings, calibration, and the VRCFT module config"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        let mut paths = Vec::new();
        if let Some(dir) = Self::app_dir(ctx) {
            for name in CONFIG_FILES.iter().chain(DATA_DIRS) {
                paths.push(LivePath::new(format!("app/{name}"), dir.join(name)));
            }
        } else {
            log::debug!("no EyeTrackVR directory found");
        }
        if ctx.options.include_vrcft.unwrap_or(true) {
            paths.push(LivePath::new(
                "vrcft/ETVRModuleConfig.json",
                ctx.locations
                    .appdata
                    .join("VRCFaceTracking")
                    .join("CustomLibs")
                    .join("ETVRModuleConfig.json"),
            ));
        }
        paths
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("eyetrackvr.exe"),
            ProcessMatcher::named("eyetrackapp.exe"),
            ProcessMatcher::named("etvr.exe"),
            ProcessMatcher::named("python.exe").with_cmdline("eyetrack"),
        ]
    }
}
