//! File-tree transfer shared by copy-based modules.

use std::{fs, path::Path};

use crate::{
    module::{LivePath, ModuleContext, Snapshot, SlotState},
    transfer::{Staging, copy_tree, globs_to_override},
};

/// Copies every existing live path into `dest/<slot>`.
///
/// Paths missing on disk are recorded absent.
pub fn capture(
    module_id: &str,
    paths: &[LivePath],
    ctx: &ModuleContext,
    dest: &Path,
) -> anyhow::Result<Vec<SlotState>> {
    let globs = ctx.settings.excludes(module_id);
    let mut slots = Vec::with_capacity(paths.len());
    for live in paths {
        let present = live.exists();
        if present {
            let exclude = if globs.is_empty() || !live.path.is_dir() {
                None
            } else {
                Some(globs_to_override(&live.path, globs)?)
            };
            copy_tree(&live.path, &dest.join(&live.slot), exclude.as_ref(), ctx.statistics)?;
            log::debug!("captured {:?} into slot {}", live.path, live.slot);
        } else {
            log::warn!("{module_id}: {:?} does not exist, recording it absent", live.path);
        }
        slots.push(SlotState {
            slot: live.slot.clone(),
            present,
        });
    }
    Ok(slots)
}

enum Step<'a> {
    Replace(Staging, &'a LivePath),
    Remove(Staging, &'a LivePath),
}

/// Replaces the live paths with the content of `snapshot`.
///
/// Every path is staged before the first one is swapped in, so failures
/// while copying leave the live install as it was. Slots missing from the
/// manifest are left alone.
pub fn apply(paths: &[LivePath], ctx: &ModuleContext, snapshot: &Snapshot) -> anyhow::Result<()> {
    let files = snapshot.files_dir();
    let mut steps = Vec::with_capacity(paths.len());
    for live in paths {
        match snapshot.slot(&live.slot) {
            None => {
                log::debug!("slot {} not in snapshot, leaving {:?} alone", live.slot, live.path);
            }
            Some(state) if state.present => {
                let staging = Staging::adjacent_to(&live.path)?;
                copy_tree(&files.join(&live.slot), &staging.payload(), None, ctx.statistics)?;
                steps.push(Step::Replace(staging, live));
            }
            Some(_) => {
                if live.exists() {
                    steps.push(Step::Remove(Staging::adjacent_to(&live.path)?, live));
                }
            }
        }
    }

    for step in steps {
        match step {
            Step::Replace(staging, live) => {
                staging.commit(&live.path)?;
                log::debug!("restored {:?}", live.path);
            }
            Step::Remove(staging, live) => {
                staging.take(&live.path)?;
                ctx.statistics.removed.increase();
                log::debug!("removed {:?}, absent in snapshot", live.path);
            }
        }
    }
    Ok(())
}

/// Size of a live tree in bytes, symbolic links not followed.
pub fn tree_size(path: &Path) -> u64 {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !metadata.is_dir() {
        return metadata.len();
    }
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| tree_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}
