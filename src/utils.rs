use std::collections::BTreeSet;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ExecutionError;

/// Resolves a set of include patterns minus a set of exclude patterns
/// against `root_dir`.
///
/// Patterns are relative to `root_dir`. Only regular files are returned;
/// the result is deterministically sorted by absolute path.
pub fn xglob(
    include: &[String],
    exclude: &[String],
    root_dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, ExecutionError> {
    let included = glob_set(include, root_dir)?;
    let excluded = glob_set(exclude, root_dir)?;

    Ok(included.difference(&excluded).cloned().collect())
}

fn glob_set(
    patterns: &[String],
    root_dir: &Utf8Path,
) -> Result<BTreeSet<Utf8PathBuf>, ExecutionError> {
    let mut files = BTreeSet::new();

    for pattern in patterns {
        for entry in glob::glob(root_dir.join(pattern).as_str())? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    Ok(files)
}

/// Scoped switch of the process working directory.
///
/// The working directory is shared mutable process state; this guard stores
/// the previous directory and restores it when dropped, on every exit path.
pub struct WorkingDir {
    previous: PathBuf,
}

impl WorkingDir {
    pub fn enter(path: &Utf8Path) -> std::io::Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(path)?;
        Ok(WorkingDir { previous })
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

/// Serializes tests that touch the process working directory.
#[cfg(test)]
pub(crate) static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
