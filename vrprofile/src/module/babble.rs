use std::path::PathBuf;

use crate::{
    module::{LivePath, Module, ModuleContext, find_app_dir},
    process::ProcessMatcher,
};

const CONFIG_FILES: &[&str] = &["babble_settings.json", "settings.json", "config.json"];
/// Names the VRCFT Babble module config had across releases
const VRCFT_FILES: &[&str] = &[
    "VRCFaceTracking.Babble.json",
    "Babble.json",
    "babble_module.json",
];

#[derive(Debug)]
pub struct Babble;

impl Babble {
    fn app_dir(ctx: &ModuleContext) -> Option<PathBuf> {
        if let Some(dir) = &ctx.options.root_dir {
            return Some(dir.clone());
        }
        let l = &ctx.locations;
        let candidates = [
            l.local_appdata.join("Programs").join("ProjectBabble"),
            l.local_appdata.join("Programs").join("project-babble"),
            l.local_appdata.join("ProjectBabble"),
            l.appdata.join("ProjectBabble"),
            l.home.join("ProjectBabble"),
        ];
        find_app_dir(&candidates, CONFIG_FILES)
    }
}

impl Module for Babble {
    fn id(&self) -> &'static str {
        "babble"
    }

    fn display_name(&self) -> &'static str {
        "Project Babble"
    }

    fn description(&self) -> &'static str {
        "mouth tracking camera config, ROI calibration, OSC settings, and the VRCFT module config"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        let mut paths = Vec::new();
        if let Some(dir) = Self::app_dir(ctx) {
            for name in CONFIG_FILES {
                paths.push(LivePath::new(format!("app/{name}"), dir.join(name)));
            }
        }
        if ctx.options.include_vrcft.unwrap_or(true) {
            let libs = ctx.locations.appdata.join("VRCFaceTracking").join("CustomLibs");
            for name in VRCFT_FILES {
                paths.push(LivePath::new(format!("vrcft/{name}"), libs.join(name)));
            }
        }
        paths
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("babble.exe"),
            ProcessMatcher::named("projectbabble.exe"),
            ProcessMatcher::named("babbleapp.exe"),
            ProcessMatcher::named("python.exe").with_cmdline("babble"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings, locations::Locations, module::ModuleOptions, process::FixedProbe,
        statistics::Statistics,
    };

    #[test]
    fn discovers_install_directory() {
        let root = tempfile::tempdir().unwrap();
        let locations = Locations::under(root.path());
        let install = locations.local_appdata.join("ProjectBabble");
        std::fs::create_dir_all(&install).unwrap();
        std::fs::write(install.join("babble_settings.json"), "{}").unwrap();

        let settings = Settings::default();
        let options = ModuleOptions {
            include_vrcft: Some(false),
            ..Default::default()
        };
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
        let paths = Babble.paths(&ctx);
        assert_eq!(paths.len(), CONFIG_FILES.len());
        assert_eq!(paths[0].path, install.join("babble_settings.json"));
        assert_eq!(paths[0].slot, "app/babble_settings.json");
    }
}
