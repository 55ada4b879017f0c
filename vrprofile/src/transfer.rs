use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use ignore::{
    WalkBuilder,
    overrides::{Override, OverrideBuilder},
};
use tempfile::TempDir;

use crate::statistics::Statistics;

pub const STAGING_PREFIX: &str = ".vrprofile-staging-";
const PAYLOAD: &str = "payload";

/// Private directory next to a publish target
///
/// Content is assembled under [`Staging::payload`] and becomes visible only
/// through [`Staging::commit`], a single rename. Dropping a staging area
/// without committing discards it, which leaves the target untouched.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    /// Creates a staging area on the same filesystem as `target`.
    pub fn adjacent_to(target: &Path) -> anyhow::Result<Self> {
        let parent = target
            .parent()
            .with_context(|| format!("{target:?} has no parent directory"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {parent:?}"))?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .with_context(|| format!("failed to create staging directory in {parent:?}"))?;
        log::debug!("staging {target:?} in {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn payload(&self) -> PathBuf {
        self.dir.path().join(PAYLOAD)
    }

    /// Creates the payload as an empty directory and returns its path.
    pub fn payload_dir(&self) -> anyhow::Result<PathBuf> {
        let payload = self.payload();
        fs::create_dir(&payload)
            .with_context(|| format!("failed to create staging payload {payload:?}"))?;
        Ok(payload)
    }

    /// Moves the current content of `target` into the staging area, so
    /// dropping it deletes that content.
    pub fn take(&self, target: &Path) -> anyhow::Result<()> {
        fs::rename(target, self.payload())
            .with_context(|| format!("failed to move {target:?} into staging"))
    }

    /// Publishes the payload at `target`, replacing what was there.
    ///
    /// The previous content ends up inside the staging area and is deleted
    /// with it.
    pub fn commit(self, target: &Path) -> anyhow::Result<()> {
        let payload = self.payload();
        match fs::symlink_metadata(target) {
            Ok(_) => exchange(&payload, target)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::rename(&payload, target)
                    .with_context(|| format!("failed to publish {payload:?} at {target:?}"))?
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read metadata of {target:?}"));
            }
        }
        log::debug!("published {target:?}");
        Ok(())
    }
}

/// Atomically swaps two paths that both exist.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn exchange(a: &Path, b: &Path) -> anyhow::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{AT_FDCWD, RenameFlags, renameat2};

    match renameat2(AT_FDCWD, a, AT_FDCWD, b, RenameFlags::RENAME_EXCHANGE) {
        Ok(()) => Ok(()),
        // filesystems without RENAME_EXCHANGE support
        Err(Errno::EINVAL) | Err(Errno::ENOSYS) | Err(Errno::EOPNOTSUPP) => {
            log::debug!("rename exchange unsupported for {b:?}, falling back");
            exchange_by_rename(a, b)
        }
        Err(e) => Err(e).with_context(|| format!("failed to exchange {a:?} and {b:?}")),
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn exchange(a: &Path, b: &Path) -> anyhow::Result<()> {
    exchange_by_rename(a, b)
}

/// Three renames; `b` is absent only between the first two.
fn exchange_by_rename(a: &Path, b: &Path) -> anyhow::Result<()> {
    let mut aside = a.as_os_str().to_owned();
    aside.push(".previous");
    let aside = PathBuf::from(aside);
    fs::rename(b, &aside).with_context(|| format!("failed to move {b:?} aside"))?;
    if let Err(e) = fs::rename(a, b) {
        if let Err(restore) = fs::rename(&aside, b) {
            log::error!("failed to move {aside:?} back to {b:?}: {restore}");
        }
        return Err(e).with_context(|| format!("failed to move {a:?} to {b:?}"));
    }
    fs::rename(&aside, a).with_context(|| format!("failed to move {aside:?} to {a:?}"))
}

/// Copies a file, symbolic link, or directory tree from `src` to `dst`.
///
/// `dst` must not exist. Entries matched by `exclude` are skipped.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    exclude: Option<&Override>,
    stats: &Statistics,
) -> anyhow::Result<()> {
    let metadata = fs::symlink_metadata(src)
        .with_context(|| format!("failed to read metadata of {src:?}"))?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {parent:?}"))?;
    }
    if !metadata.is_dir() {
        return copy_entry(src, dst, &metadata, stats);
    }

    let mut builder = WalkBuilder::new(src);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if let Some(over) = exclude {
        builder.overrides(over.clone());
    }
    for entry in builder.build() {
        let entry = entry.with_context(|| format!("failed to walk {src:?}"))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(src)
            .with_context(|| format!("{path:?} escaped {src:?}"))?;
        let target = dst.join(relative);
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("failed to read metadata of {path:?}"))?;
        if metadata.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create directory {target:?}"))?;
        } else {
            copy_entry(path, &target, &metadata, stats)?;
        }
    }
    Ok(())
}

fn copy_entry(
    src: &Path,
    dst: &Path,
    metadata: &fs::Metadata,
    stats: &Statistics,
) -> anyhow::Result<()> {
    if metadata.is_symlink() {
        let link = fs::read_link(src).with_context(|| format!("failed to read link {src:?}"))?;
        symlink(&link, dst).with_context(|| format!("failed to create link {dst:?}"))?;
    } else {
        let bytes =
            fs::copy(src, dst).with_context(|| format!("failed to copy {src:?} to {dst:?}"))?;
        if let Ok(modified) = metadata.modified() {
            File::options()
                .write(true)
                .open(dst)
                .and_then(|f| f.set_modified(modified))
                .with_context(|| format!("failed to set modification time of {dst:?}"))?;
        }
        stats.bytes.add(bytes);
    }
    log::trace!("copied {src:?} -> {dst:?}");
    stats.files.increase();
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(windows)]
fn symlink(link: &Path, dst: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link, dst)
}

/// Replaces a single file through a temporary sibling and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{path:?} has no parent directory"))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
    let mut file = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(parent)
        .with_context(|| format!("failed to create temporary file in {parent:?}"))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write temporary file for {path:?}"))?;
    file.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temporary file for {path:?}"))?;
    file.persist(path)
        .with_context(|| format!("failed to replace {path:?}"))?;
    Ok(())
}

/// Glob list relative to `root`, every entry turned into an exclusion.
pub fn globs_to_override<P: AsRef<Path>>(root: P, globs: &[String]) -> anyhow::Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for glob in globs {
        builder
            .add(&format!("!{glob}"))
            .with_context(|| format!("invalid exclude glob {glob:?}"))?;
    }
    builder.build().context("failed to build exclude globs")
}

/// Removes staging leftovers of an interrupted process directly under `dir`.
pub fn remove_stale_staging(dir: &Path) -> anyhow::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("failed to open directory {dir:?}")),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry of {dir:?}"))?;
        if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        let path = entry.path();
        log::warn!("removing stale staging area {path:?}");
        let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.with_context(|| format!("failed to remove {path:?}"))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn commit_replaces_existing_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("slot");
        write(&target.join("old.txt"), "old");

        let staging = Staging::adjacent_to(&target).unwrap();
        let payload = staging.payload_dir().unwrap();
        write(&payload.join("new.txt"), "new");
        staging.commit(&target).unwrap();

        assert!(!target.join("old.txt").exists());
        assert_eq!(fs::read_to_string(target.join("new.txt")).unwrap(), "new");
        // nothing but the published slot is left behind
        let names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["slot"]);
    }

    #[test]
    fn commit_replaces_file_with_file() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("settings.json");
        write(&target, "{}");
        let staging = Staging::adjacent_to(&target).unwrap();
        fs::write(staging.payload(), "{\"a\":1}").unwrap();
        staging.commit(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn dropped_staging_leaves_target_alone() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("slot");
        write(&target.join("keep.txt"), "keep");
        {
            let staging = Staging::adjacent_to(&target).unwrap();
            let payload = staging.payload_dir().unwrap();
            write(&payload.join("partial.txt"), "half");
        }
        assert_eq!(fs::read_to_string(target.join("keep.txt")).unwrap(), "keep");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn take_removes_target_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("gone");
        write(&target.join("a"), "a");
        let staging = Staging::adjacent_to(&target).unwrap();
        staging.take(&target).unwrap();
        assert!(!target.exists());
        drop(staging);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn exchange_by_rename_swaps() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        write(&a, "A");
        write(&b, "B");
        exchange_by_rename(&a, &b).unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "B");
        assert_eq!(fs::read_to_string(&b).unwrap(), "A");
    }

    #[test]
    fn copy_tree_copies_nested_content_and_honors_excludes() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src");
        write(&src.join("a.json"), "a");
        write(&src.join("nested/b.json"), "bb");
        write(&src.join("Logs/output.log"), "noise");
        let dst = root.path().join("dst");
        let stats = Statistics::default();
        let exclude = globs_to_override(&src, &["Logs/**".to_string()]).unwrap();

        copy_tree(&src, &dst, Some(&exclude), &stats).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.json")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested/b.json")).unwrap(), "bb");
        assert!(!dst.join("Logs/output.log").exists());
        assert_eq!(stats.files.get(), 2);
        assert_eq!(stats.bytes.get(), 3);
    }

    #[test]
    fn copy_tree_preserves_modification_time() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("file.yml");
        write(&src, "x: 1");
        let past = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(past)
            .unwrap();
        let dst = root.path().join("copy/file.yml");
        copy_tree(&src, &dst, None, &Statistics::default()).unwrap();
        assert_eq!(fs::metadata(&dst).unwrap().modified().unwrap(), past);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("profile.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn stale_staging_is_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join(format!("{STAGING_PREFIX}abc"));
        write(&stale.join("payload/x"), "x");
        write(&root.path().join("profile/keep"), "k");
        assert_eq!(remove_stale_staging(root.path()).unwrap(), 1);
        assert!(!stale.exists());
        assert!(root.path().join("profile/keep").exists());
    }
}
