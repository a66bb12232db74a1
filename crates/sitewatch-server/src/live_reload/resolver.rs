//! Symlink-aware expansion of watch roots.
//!
//! A symlink's directory entry never changes when the file it points at is
//! edited, so watching a root that contains symlinks means also watching the
//! real paths behind them. The walk uses an explicit worklist with a visited
//! set of real directories, so circular links terminate.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A real filesystem path that must be observed for a watch root.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatchTarget {
    /// A directory observed recursively.
    Tree(PathBuf),
    /// A single file, observed through its parent directory.
    File(PathBuf),
}

impl WatchTarget {
    /// The real path of the target.
    pub fn path(&self) -> &Path {
        match self {
            Self::Tree(path) | Self::File(path) => path,
        }
    }

    /// Whether a change at `path` concerns this target.
    pub fn covers(&self, path: &Path) -> bool {
        match self {
            Self::Tree(root) => path.starts_with(root),
            Self::File(file) => path == file,
        }
    }

    /// Directory handed to the OS watcher, and whether to watch it recursively.
    pub(crate) fn observed_dir(&self) -> (&Path, bool) {
        match self {
            Self::Tree(root) => (root, true),
            Self::File(file) => (file.parent().unwrap_or(file), false),
        }
    }
}

/// Resolve a watch root into the set of real paths to observe.
///
/// Directories are watched as trees. Symlinked directories found inside are
/// followed to their real location and walked in turn; symlinked files add
/// their real target. Broken links are skipped and links leading back to an
/// already visited directory are treated as leaves. A root that is itself a
/// symlink also watches the link's own location.
///
/// # Errors
///
/// Returns an error if `root` does not exist or cannot be resolved.
pub fn resolve_watch_targets(root: &Path) -> io::Result<BTreeSet<WatchTarget>> {
    let mut targets = BTreeSet::new();

    if fs::symlink_metadata(root)?.file_type().is_symlink() {
        targets.insert(WatchTarget::File(link_location(root)?));
    }

    let real_root = fs::canonicalize(root)?;
    if !real_root.is_dir() {
        targets.insert(WatchTarget::File(real_root));
        return Ok(targets);
    }

    let mut visited = HashSet::from([real_root.clone()]);
    let mut pending = vec![real_root.clone()];
    targets.insert(WatchTarget::Tree(real_root));

    while let Some(dir) = pending.pop() {
        // Unreadable directories contribute nothing beyond their parent's watch
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                if visited.insert(path.clone()) {
                    pending.push(path);
                }
                continue;
            }

            if !file_type.is_symlink() {
                continue;
            }

            let Ok(target) = fs::canonicalize(&path) else {
                tracing::debug!(path = %path.display(), "Skipping broken symlink");
                continue;
            };

            if target.is_dir() {
                if visited.insert(target.clone()) {
                    targets.insert(WatchTarget::Tree(target.clone()));
                    pending.push(target);
                }
            } else {
                targets.insert(WatchTarget::File(target));
            }
        }
    }

    prune_covered(&mut targets);
    Ok(targets)
}

/// Drop targets already inside another tree, so the result does not depend
/// on directory iteration order.
fn prune_covered(targets: &mut BTreeSet<WatchTarget>) {
    let trees: Vec<PathBuf> = targets
        .iter()
        .filter_map(|target| match target {
            WatchTarget::Tree(path) => Some(path.clone()),
            WatchTarget::File(_) => None,
        })
        .collect();

    targets.retain(|target| {
        !trees
            .iter()
            .any(|tree| target.path() != tree && target.path().starts_with(tree))
    });
}

/// Absolute path of a symlink itself, without following it.
fn link_location(link: &Path) -> io::Result<PathBuf> {
    let parent = match link.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = link
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "symlink has no file name"))?;
    Ok(fs::canonicalize(parent)?.join(name))
}
