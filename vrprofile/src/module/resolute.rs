use crate::{
    module::{LivePath, Module, ModuleContext, resonite_mod_settings::resonite_install},
    process::ProcessMatcher,
};

#[derive(Debug)]
pub struct Resolute;

impl Module for Resolute {
    fn id(&self) -> &'static str {
        "resolute"
    }

    fn display_name(&self) -> &'static str {
        "Resolute"
    }

    fn description(&self) -> &'static str {
        "Resolute mod manager state, and the installed RML mods and libraries"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        let mut paths = vec![LivePath::new(
            "resolute_appdata",
            ctx.locations.appdata.join("Resolute"),
        )];
        if ctx.options.save_dlls.unwrap_or(true)
            && let Some(install) = resonite_install(ctx)
        {
            paths.push(LivePath::new("rml_mods", install.join("rml_mods")));
            paths.push(LivePath::new("rml_libs", install.join("rml_libs")));
        }
        paths
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("resolute.exe"),
            ProcessMatcher::named("resonite.exe"),
        ]
    }
}
