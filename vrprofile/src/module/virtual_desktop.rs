use crate::{
    module::{LivePath, Module, ModuleContext},
    process::ProcessMatcher,
};

#[derive(Debug)]
pub struct VirtualDesktop;

impl Module for VirtualDesktop {
    fn id(&self) -> &'static str {
        "virtual_desktop"
    }

    fn display_name(&self) -> &'static str {
        "Virtual Desktop"
    }

    fn description(&self) -> &'static str {
        "Virtual Desktop Streamer game, streamer, and binding settings"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        let user = ctx.locations.appdata.join("Virtual Desktop");
        let global = ctx.locations.program_data.join("Virtual Desktop");
        let legacy = ctx.locations.appdata.join("VirtualDesktop");
        // same file names live in several directories
        vec![
            LivePath::new("user/GameSettings.json", user.join("GameSettings.json")),
            LivePath::new(
                "global/StreamerSettings.json",
                global.join("StreamerSettings.json"),
            ),
            LivePath::new(
                "global/BindingSettings.json",
                global.join("BindingSettings.json"),
            ),
            LivePath::new("legacy/Settings.json", legacy.join("Settings.json")),
        ]
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![ProcessMatcher::named("VirtualDesktop.Streamer.exe")]
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
    fn slots_do_not_collide() {
        let settings = Settings::default();
        let locations = Locations::under("/sandbox");
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
        let paths = VirtualDesktop.paths(&ctx);
        let mut slots: Vec<_> = paths.iter().map(|p| p.slot.as_str()).collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), paths.len());
        assert!(
            paths[1]
                .path
                .starts_with("/sandbox/ProgramData/Virtual Desktop")
        );
    }
}
