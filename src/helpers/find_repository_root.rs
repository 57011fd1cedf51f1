use std::path::{Path, PathBuf};

/// Walk up from `base_dir` until a directory containing `.git` is found.
///
/// Missing or unreadable directories (a hook may report a directory that was removed since)
/// yield `None`.
pub fn find_repository_root(base_dir: &Path) -> Option<PathBuf> {
    let current_dir = base_dir.canonicalize().ok()?;

    let root = current_dir
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf);

    if root.is_none() {
        log::trace!("No repository found above {}", current_dir.display());
    }

    root
}
