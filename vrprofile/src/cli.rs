use std::io::Write;

use anyhow::Context;
use dialoguer::{Confirm, console::Term};

use crate::{
    Engine, Error,
    command::{Commands, CommonOptions},
    engine::{ModuleStatus, SwitchReport},
    module::{self, ModuleKind},
    statistics::Statistics,
    utils::{enabled_indicator, format_age, format_bytes},
};

/// Terminal front end over an open [`Engine`]
#[derive(Debug)]
pub struct CliContext {
    common: CommonOptions,
    engine: Engine,
    statistics: Statistics,
    /// Notifications and prompts
    term: Term,
    /// Listings
    out: Term,
}

impl CliContext {
    pub fn new(common: CommonOptions, engine: Engine) -> Self {
        Self {
            common,
            engine,
            statistics: Statistics::default(),
            term: Term::stderr(),
            out: Term::stdout(),
        }
    }

    pub fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::List => self.list()?,
            Commands::Create(opts) => {
                let profile = self
                    .engine
                    .create_profile(&opts.name, &opts.modules, &opts.notes)?;
                let modules: Vec<_> = profile.modules.iter().map(|m| m.id.as_str()).collect();
                self.notify("Create", format!("{} ({})", profile.name, modules.join(", ")))?;
            }
            Commands::Save(opts) => {
                let only = (!opts.modules.is_empty()).then_some(opts.modules.as_slice());
                let saved = self.engine.save_current(&opts.name, only, &self.statistics)?;
                for id in saved {
                    self.notify("Save", id)?;
                }
                self.finish()?;
            }
            Commands::Switch { name } => {
                if self.confirm(&format!("Switch to profile {name}?"))? {
                    let report = self
                        .retry_while_running(|| self.engine.switch_to(&name, &self.statistics))?;
                    self.report_switch(&report)?;
                    self.finish()?;
                }
            }
            Commands::Undo => {
                let record = self.engine.backup()?.ok_or(Error::NoBackup)?;
                let prompt = format!(
                    "Restore the state from before switching to {} ({})?",
                    record.target_profile,
                    format_age(record.created)
                );
                if self.confirm(&prompt)? {
                    let report = self
                        .retry_while_running(|| self.engine.undo_last_switch(&self.statistics))?;
                    for id in &report.applied {
                        self.notify("Restore", id)?;
                    }
                    self.finish()?;
                }
            }
            Commands::Delete { name } => {
                if self.confirm(&format!("Delete profile {name}?"))? {
                    let entry = self.retry_while_running(|| self.engine.delete_profile(&name))?;
                    self.notify("Delete", &entry.record.profile.name)?;
                }
            }
            Commands::History => self.history()?,
            Commands::Restore { index } => {
                let profile = self.engine.restore_deleted(index)?;
                self.notify("Restore", &profile.name)?;
            }
            Commands::Status(opts) => self.status(&opts.modules, opts.name.as_deref())?,
            Commands::Rename { old, new } => {
                let profile =
                    self.retry_while_running(|| self.engine.rename_profile(&old, &new))?;
                self.notify("Rename", format!("{old} -> {}", profile.name))?;
            }
            Commands::Duplicate { source, new } => {
                let profile = self
                    .engine
                    .duplicate_profile(&source, &new, &self.statistics)?;
                self.notify("Duplicate", format!("{source} -> {}", profile.name))?;
                self.finish()?;
            }
            Commands::Enable { name, module } => {
                self.engine.set_module_enabled(&name, &module, true)?;
                self.notify("Enable", format!("{module} in {name}"))?;
            }
            Commands::Disable { name, module } => {
                self.engine.set_module_enabled(&name, &module, false)?;
                self.notify("Disable", format!("{module} in {name}"))?;
            }
            Commands::SetOption(opts) => {
                self.engine.set_module_option(
                    &opts.name,
                    &opts.module,
                    &opts.key,
                    opts.value.as_deref(),
                )?;
                let action = if opts.value.is_some() { "Set" } else { "Clear" };
                self.notify(action, format!("{}.{} in {}", opts.module, opts.key, opts.name))?;
            }
            Commands::Notes { name, text } => {
                self.engine.set_notes(&name, &text)?;
                self.notify("Update", &name)?;
            }
            Commands::Import(opts) => {
                let report = self.engine.import_from(
                    &opts.dir,
                    opts.name.as_deref(),
                    &self.statistics,
                )?;
                for name in &report.imported {
                    self.notify("Import", name)?;
                }
                for name in &report.conflicts {
                    self.skipped(format!("{name} (name already taken)"))?;
                }
                self.finish()?;
            }
            Commands::Modules => print_modules(&self.out)?,
            Commands::Validate | Commands::ExampleConfig | Commands::Completion { .. } => {
                anyhow::bail!("this command does not operate on a data directory")
            }
        }
        Ok(())
    }

    fn list(&self) -> anyhow::Result<()> {
        let mut out = &self.out;
        let profiles = self.engine.list_profiles()?;
        if profiles.is_empty() {
            self.term.write_line("no profiles")?;
            return Ok(());
        }
        let active = profiles
            .iter()
            .filter_map(|p| p.last_switched.map(|t| (t, p.name.as_str())))
            .max()
            .map(|(_, name)| name);
        let width = profiles.iter().map(|p| p.name.len()).max().unwrap_or(0);
        for profile in &profiles {
            let modules: Vec<_> = profile.enabled().map(|m| m.id.as_str()).collect();
            let switched = match profile.last_switched {
                Some(t) => format!("switched {}", format_age(t)),
                None => "never switched".to_string(),
            };
            writeln!(
                out,
                "{indicator} {name}  {switched:20}  {modules}",
                indicator = enabled_indicator(out, active == Some(profile.name.as_str())),
                name = out.style().bold().apply_to(format!("{:width$}", profile.name)),
                modules = modules.join(", "),
            )?;
            if !profile.notes.is_empty() {
                writeln!(out, "  {}", out.style().dim().apply_to(&profile.notes))?;
            }
        }
        Ok(())
    }

    fn history(&self) -> anyhow::Result<()> {
        let mut out = &self.out;
        let entries = self.engine.history()?;
        if entries.is_empty() {
            self.term.write_line("no deleted profiles")?;
        }
        for (index, entry) in entries.iter().enumerate() {
            writeln!(
                out,
                "{index}: {name}  deleted {age}{external}",
                name = out.style().bold().apply_to(&entry.record.profile.name),
                age = format_age(entry.record.deleted_at),
                external = if entry.record.has_external {
                    " (with data and cache directories)"
                } else {
                    ""
                },
            )?;
        }
        Ok(())
    }

    fn status(&self, modules: &[String], profile: Option<&str>) -> anyhow::Result<()> {
        let mut out = &self.out;
        let statuses = self.engine.query_running_status(modules, profile)?;
        let width = statuses.iter().map(|s| s.id.len()).max().unwrap_or(0);
        for status in &statuses {
            writeln!(
                out,
                "{id}  {running}  {live}{snapshot}",
                id = out.style().bold().apply_to(format!("{:width$}", status.id)),
                running = running_indicator(out, status),
                live = if status.live_present {
                    format_bytes(status.live_bytes)
                } else {
                    "absent".to_string()
                },
                snapshot = match status.has_snapshot {
                    Some(true) => "  saved",
                    Some(false) => "  not saved",
                    None => "",
                },
            )?;
        }
        if let Some(record) = self.engine.backup()? {
            writeln!(
                out,
                "last backup: before switching to {} ({})",
                record.target_profile,
                format_age(record.created)
            )?;
        }
        Ok(())
    }

    fn report_switch(&self, report: &SwitchReport) -> anyhow::Result<()> {
        if report.backed_up {
            self.notify("Backup", "live state")?;
        }
        for id in &report.applied {
            self.notify("Apply", id)?;
        }
        for id in &report.skipped {
            self.skipped(format!("{id} (no snapshot)"))?;
        }
        Ok(())
    }

    /// Re-runs `op` after the user closed the applications it reported as
    /// running, until it succeeds or the user gives up.
    fn retry_while_running<T>(
        &self,
        mut op: impl FnMut() -> crate::Result<T>,
    ) -> anyhow::Result<T> {
        loop {
            self.statistics.reset();
            match op() {
                Err(Error::AppsStillRunning { names }) if !self.common.yes => {
                    let mut term = &self.term;
                    writeln!(
                        term,
                        "{} {}",
                        term.style().red().bold().apply_to("Running"),
                        names.join(", ")
                    )?;
                    if !self.prompt("Close them and retry?", true)? {
                        anyhow::bail!("aborted while {} still running", names.join(", "));
                    }
                }
                result => return Ok(result?),
            }
        }
    }

    fn confirm(&self, prompt: &str) -> anyhow::Result<bool> {
        if self.common.yes || !self.engine.settings().confirm_switch {
            return Ok(true);
        }
        self.prompt(prompt, false)
    }

    fn prompt(&self, prompt: &str, default: bool) -> anyhow::Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .report(false)
            .default(default)
            .interact_on(&self.term)
            .context("failed to prompt")
    }

    fn notify(&self, action: &str, subject: impl std::fmt::Display) -> anyhow::Result<()> {
        let mut term = &self.term;
        writeln!(
            term,
            "{} {subject}",
            term.style().green().bold().apply_to(action)
        )?;
        Ok(())
    }

    fn skipped(&self, subject: impl std::fmt::Display) -> anyhow::Result<()> {
        let mut term = &self.term;
        writeln!(term, "{} {subject}", term.style().cyan().bold().apply_to("Skip"))?;
        Ok(())
    }

    fn finish(&self) -> anyhow::Result<()> {
        if !self.common.no_statistic {
            let mut term = &self.term;
            writeln!(
                term,
                "{}",
                term.style().bold().underlined().apply_to("Statistics")
            )?;
            term.write_line(&self.statistics.format_with_style(term))?;
        }
        Ok(())
    }
}

fn running_indicator(term: &Term, status: &ModuleStatus) -> String {
    if status.running.is_empty() {
        term.style().dim().apply_to("idle   ").to_string()
    } else {
        format!(
            "{} ({})",
            term.style().red().bold().apply_to("running"),
            status.running.join(", ")
        )
    }
}

pub fn print_modules(mut out: &Term) -> anyhow::Result<()> {
    let width = module::all().iter().map(|m| m.id().len()).max().unwrap_or(0);
    for m in module::all() {
        let kind = match m.kind() {
            ModuleKind::Copy => "",
            ModuleKind::ExternalState => " [launcher]",
        };
        writeln!(
            out,
            "{id}  {name}{kind}: {description}",
            id = out.style().bold().apply_to(format!("{:width$}", m.id())),
            name = m.display_name(),
            description = m.description(),
        )?;
        let processes: Vec<_> = m.process_names().into_iter().map(|p| p.name).collect();
        if !processes.is_empty() {
            writeln!(out, "{:width$}  processes: {}", "", processes.join(", "))?;
        }
    }
    Ok(())
}
