use std::path::Path;

use anyhow::Context;

use crate::{
    error::Error,
    launcher::{DirectoryPair, Patcher},
    module::{LivePath, Module, ModuleContext, ModuleKind, SlotState, Snapshot},
    process::{ProcessMatcher, check_running},
};

/// Resonite keeps its state in the data and cache directories it is
/// launched with, so switching rewrites Steam's launch options instead of
/// copying files.
#[derive(Debug)]
pub struct Resonite;

impl Resonite {
    fn patcher<'a>(ctx: &ModuleContext<'a>) -> Patcher<'a> {
        Patcher {
            config: &ctx.settings.launcher,
            locations: ctx.locations,
            probe: ctx.probe,
        }
    }
}

impl Module for Resonite {
    fn id(&self) -> &'static str {
        "resonite"
    }

    fn display_name(&self) -> &'static str {
        "Resonite"
    }

    fn description(&self) -> &'static str {
        "per-profile data and cache directories through Steam launch options"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::ExternalState
    }

    fn paths(&self, ctx: &ModuleContext) -> Vec<LivePath> {
        ctx.options
            .directories
            .iter()
            .flat_map(|pair| {
                [
                    LivePath::new("data", &pair.data),
                    LivePath::new("cache", &pair.cache),
                ]
            })
            .collect()
    }

    fn process_names(&self) -> Vec<ProcessMatcher> {
        vec![
            ProcessMatcher::named("resonite.exe"),
            ProcessMatcher::named("resonite-headless.exe"),
        ]
    }

    fn apply_guard(&self, ctx: &ModuleContext) -> Vec<ProcessMatcher> {
        ctx.settings.launcher.matchers()
    }

    fn capture(&self, _ctx: &ModuleContext, _dest: &Path) -> anyhow::Result<Vec<SlotState>> {
        Ok(Vec::new())
    }

    fn apply(&self, ctx: &ModuleContext, _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        let mut guard = self.process_names();
        guard.extend(self.apply_guard(ctx));
        let running = check_running(ctx.probe, &guard).map_err(Error::ProcessCheck)?;
        if !running.is_empty() {
            return Err(Error::AppsStillRunning {
                names: running.into_iter().collect(),
            }
            .into());
        }
        if let Some(pair) = &ctx.options.directories {
            pair.create()
                .with_context(|| format!("failed to prepare directories of {}", ctx.profile))?;
        }
        Self::patcher(ctx).patch(
            ctx.options.directories.as_ref(),
            ctx.options.launch_flags.as_deref(),
        )?;
        Ok(())
    }

    fn current_external(&self, ctx: &ModuleContext) -> anyhow::Result<Option<DirectoryPair>> {
        Ok(Self::patcher(ctx).current()?)
    }
}
