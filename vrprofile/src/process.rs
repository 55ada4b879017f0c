use std::{
    collections::BTreeSet,
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Process name a module declares as "application is live"
///
/// Names compare case-insensitively with any `.exe` suffix removed, so
/// `Resonite.exe` under Wine and a native `resonite` both match
/// `resonite.exe`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessMatcher {
    pub name: String,
    /// Only match when the command line contains this text (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline_contains: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub cmdline: String,
}

/// Process enumeration primitive
pub trait ProcessProbe: Debug + Send + Sync {
    fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>>;
}

impl ProcessMatcher {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmdline_contains: None,
        }
    }

    pub fn with_cmdline(mut self, text: impl Into<String>) -> Self {
        self.cmdline_contains = Some(text.into());
        self
    }

    pub fn matches(&self, process: &ProcessInfo) -> bool {
        if normalize(&self.name) != normalize(&process.name) {
            return false;
        }
        match &self.cmdline_contains {
            Some(text) => process
                .cmdline
                .to_lowercase()
                .contains(&text.to_lowercase()),
            None => true,
        }
    }
}

impl ProcessInfo {
    pub fn new(name: impl Into<String>, cmdline: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmdline: cmdline.into(),
        }
    }
}

fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Returns the names of `matchers` with at least one running process.
///
/// Never cached: callers check right before the operation they gate.
pub fn check_running(
    probe: &dyn ProcessProbe,
    matchers: &[ProcessMatcher],
) -> anyhow::Result<BTreeSet<String>> {
    if matchers.is_empty() {
        return Ok(BTreeSet::new());
    }
    let processes = probe.processes()?;
    log::trace!("{} processes enumerated", processes.len());
    Ok(running_among(&processes, matchers))
}

/// Names of `matchers` found in an already enumerated process list.
pub fn running_among(processes: &[ProcessInfo], matchers: &[ProcessMatcher]) -> BTreeSet<String> {
    let running: BTreeSet<_> = matchers
        .iter()
        .filter(|m| processes.iter().any(|p| m.matches(p)))
        .map(|m| m.name.clone())
        .collect();
    if !running.is_empty() {
        log::debug!("running: {running:?}");
    }
    running
}

/// Enumerates processes through the operating system
#[derive(Clone, Debug, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        let system = System::new_all();
        Ok(system
            .processes()
            .values()
            .map(|process| {
                let args: Vec<_> = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect();
                let name = process_name(
                    &process.name().to_string_lossy(),
                    args.first().map(String::as_str),
                );
                ProcessInfo::new(name, args.join(" "))
            })
            .collect())
    }
}

/// Prefers the file name of `argv0` when the reported name is a prefix of
/// it, as Linux truncates names to 15 bytes and Wine reports the Windows
/// executable there.
fn process_name(reported: &str, argv0: Option<&str>) -> String {
    let program = argv0
        .map(|arg| arg.rsplit(['/', '\\']).next().unwrap_or(arg))
        .filter(|program| {
            !reported.is_empty()
                && program
                    .to_lowercase()
                    .starts_with(&reported.to_lowercase())
        });
    program.unwrap_or(reported).to_string()
}

/// In-memory process table, mainly for tests and dry runs
#[derive(Clone, Debug, Default)]
pub struct FixedProbe {
    processes: Arc<Mutex<Vec<ProcessInfo>>>,
}

impl FixedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch(&self, name: &str) {
        self.launch_with_cmdline(name, name);
    }

    pub fn launch_with_cmdline(&self, name: &str, cmdline: &str) {
        self.table().push(ProcessInfo::new(name, cmdline));
    }

    pub fn terminate(&self, name: &str) {
        self.table()
            .retain(|p| normalize(&p.name) != normalize(name));
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Vec<ProcessInfo>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessProbe for FixedProbe {
    fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        Ok(self.table().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exe_suffix_and_case_are_ignored() {
        let m = ProcessMatcher::named("Resonite.exe");
        assert!(m.matches(&ProcessInfo::new("resonite", "")));
        assert!(m.matches(&ProcessInfo::new("RESONITE.EXE", "")));
        assert!(!m.matches(&ProcessInfo::new("resonite-headless.exe", "")));
    }

    #[test]
    fn cmdline_filter_narrows_generic_names() {
        let m = ProcessMatcher::named("java.exe").with_cmdline("slimevr");
        assert!(!m.matches(&ProcessInfo::new("java", "java -jar minecraft.jar")));
        assert!(m.matches(&ProcessInfo::new("java", "java -jar /opt/SlimeVR/slimevr.jar")));
    }

    #[test]
    fn truncated_and_wine_names_use_argv0() {
        assert_eq!(
            process_name(
                "resonite-headle",
                Some("/opt/resonite/resonite-headless.exe")
            ),
            "resonite-headless.exe"
        );
        assert_eq!(
            process_name(
                "Resonite.exe",
                Some(r"C:\Program Files\Steam\steamapps\common\Resonite\Resonite.exe")
            ),
            "Resonite.exe"
        );
        // interpreters keep their own name
        assert_eq!(process_name("java", Some("/usr/bin/java")), "java");
        assert_eq!(process_name("python3", Some("babble.py")), "python3");
        assert_eq!(process_name("kthreadd", None), "kthreadd");
    }

    #[test]
    fn system_probe_sees_this_process() {
        let exe = std::env::current_exe().unwrap();
        let exe_name = exe.file_name().unwrap().to_string_lossy().into_owned();
        let processes = SystemProbe.processes().unwrap();
        assert!(processes.iter().any(|p| p.cmdline.contains(&exe_name)));
    }

    #[test]
    fn check_running_reports_only_live_names() {
        let probe = FixedProbe::new();
        probe.launch("vrserver.exe");
        let matchers = [
            ProcessMatcher::named("vrserver.exe"),
            ProcessMatcher::named("vrmonitor.exe"),
        ];
        let running = check_running(&probe, &matchers).unwrap();
        assert_eq!(running.into_iter().collect::<Vec<_>>(), ["vrserver.exe"]);
        probe.terminate("vrserver");
        assert!(check_running(&probe, &matchers).unwrap().is_empty());
    }
}
