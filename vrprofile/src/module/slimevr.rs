use crate::{
    module::{LivePath, Module, ModuleContext, files_in},
    process::ProcessMatcher,
};

const CONFIG_FILES: &[&str] = &[
    "vrconfig.yml",
    "calibration.json",
    "bonelengths.json",
    "osc.json",
    "vmc.json",
    "filtering.json",
    "tapDetection.json",
    "overlayconfig.yml",
];

#[derive(Debug)]
pub struct SlimeVr;

impl Module for SlimeVr {
    fn id(&self) -> &'static str {
        "slimevr"
    }

    fn display_name(&self) -> &'static str {
        "SlimeVR"
    }

    fn description(&self) -> &'static str {
        "full-body tracking server: tracker calibration, bone lengths, and server settings"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        let dir = ctx
            .options
            .root_dir
            .clone()
            .unwrap_or_else(|| ctx.locations.appdata.join("dev.slimevr.SlimeVR"));
        files_in(&dir, CONFIG_FILES)
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("slimevr.exe"),
            ProcessMatcher::named("slimevr-server.exe"),
            // the server is a jar; other java programs are not ours
            ProcessMatcher::named("java.exe").with_cmdline("slimevr"),
        ]
    }
}
