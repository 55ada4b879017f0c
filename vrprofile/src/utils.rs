use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use dialoguer::console::Term;

#[cfg(unix)]
pub fn current_user_home() -> anyhow::Result<PathBuf> {
    use uzers::{get_user_by_uid, os::unix::UserExt};

    let uid = uzers::get_current_uid();
    match get_user_by_uid(uid) {
        Some(user) => Ok(user.home_dir().to_path_buf()),
        None => anyhow::bail!("failed to get current user by uid {}", uid),
    }
}

#[cfg(not(unix))]
pub fn current_user_home() -> anyhow::Result<PathBuf> {
    match std::env::var_os("USERPROFILE") {
        Some(home) => Ok(PathBuf::from(home)),
        None => anyhow::bail!("failed to find the current user's profile directory"),
    }
}

/// First candidate that exists on disk
pub fn first_existing<I, P>(candidates: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    candidates
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .find(|p| p.exists())
}

pub fn format_duration_short(duration: Duration) -> String {
    let s = humantime::format_duration(duration).to_string();
    s.split(' ').take(2).collect::<Vec<_>>().join(" ")
}

pub fn format_age(time: SystemTime) -> String {
    let elapsed = SystemTime::now()
        .duration_since(time)
        .unwrap_or_else(|_| Duration::new(0, 0));
    // sub-second parts only add noise
    let elapsed = Duration::from_secs(elapsed.as_secs());
    if elapsed.is_zero() {
        "just now".to_string()
    } else {
        format!("{} ago", format_duration_short(elapsed))
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn enabled_indicator(term: &Term, enabled: bool) -> String {
    if enabled {
        term.style().green().bold().apply_to("●").to_string()
    } else {
        term.style().dim().apply_to("○").to_string()
    }
}
