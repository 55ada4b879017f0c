use crate::{
    module::{LivePath, Module, ModuleContext},
    process::ProcessMatcher,
};

#[derive(Debug)]
pub struct ResoniteModSettings;

impl Module for ResoniteModSettings {
    fn id(&self) -> &'static str {
        "resonite_mod_settings"
    }

    fn display_name(&self) -> &'static str {
        "Resonite Mod Settings"
    }

    fn description(&self) -> &'static str {
        "configuration of every RML mod (rml_config)"
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        resonite_install(ctx)
            .map(|dir| vec![LivePath::new("rml_config", dir.join("rml_config"))])
            .unwrap_or_default()
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![ProcessMatcher::named("resonite.exe")]
    }
}

/// Resonite installation directory, `root_dir` taking precedence.
pub(crate) fn resonite_install(ctx: &ModuleContext) -> Option<std::path::PathBuf> {
    ctx.options
        .root_dir
        .clone()
        .or_else(|| ctx.locations.resonite.clone())
}
