use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures reported at the boundary of every profile operation
///
/// Module and store internals work with `anyhow::Error`; the engine turns
/// those into one of these kinds together with the profile and module the
/// failure belongs to.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("applications still running: {}", .names.join(", "))]
    AppsStillRunning { names: Vec<String> },

    #[error("failed to capture module `{module}` for profile `{profile}`")]
    CaptureFailed {
        profile: String,
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Modules listed in `applied` were already switched when `module` failed.
    #[error("failed to apply module `{module}` from profile `{profile}`{}", applied_suffix(.applied))]
    ApplyFailed {
        profile: String,
        module: String,
        applied: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to patch launcher configuration {path:?}")]
    PatchFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("a profile named `{name}` already exists")]
    NameConflict { name: String },

    /// The directory a deleted profile's managed pair returns to is in use.
    #[error("cannot restore `{profile}`, {path:?} already exists")]
    ExternalConflict { profile: String, path: PathBuf },

    #[error("invalid profile name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("profile `{name}` not found")]
    ProfileNotFound { name: String },

    #[error("unknown module `{id}`")]
    UnknownModule { id: String },

    #[error("invalid option `{key}` for module `{module}`")]
    InvalidOption {
        module: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("profile `{profile}` has no saved state for any enabled module")]
    NothingToApply { profile: String },

    #[error("no backup from a previous switch is available")]
    NoBackup,

    #[error("history index {index} out of range ({len} deleted profiles)")]
    HistoryIndex { index: usize, len: usize },

    #[error("data directory {path:?} is in use by another process")]
    Busy { path: PathBuf },

    #[error("failed to check running processes")]
    ProcessCheck(#[source] anyhow::Error),

    #[error("{context}")]
    Storage {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn storage(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Recovers an [`Error`] raised below an `anyhow` boundary, or wraps the
    /// failure with `fallback`.
    pub fn classify(err: anyhow::Error, fallback: impl FnOnce(anyhow::Error) -> Error) -> Error {
        match err.downcast::<Error>() {
            Ok(
                e @ (Error::AppsStillRunning { .. }
                | Error::PatchFailed { .. }
                | Error::ProcessCheck(_)),
            ) => e,
            Ok(other) => fallback(anyhow::Error::new(other)),
            Err(err) => fallback(err),
        }
    }
}

fn applied_suffix(applied: &[String]) -> String {
    if applied.is_empty() {
        String::new()
    } else {
        format!(" (already applied: {})", applied.join(", "))
    }
}
