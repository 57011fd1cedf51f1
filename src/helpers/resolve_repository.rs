use std::path::Path;

use git2::Repository;
use lazy_static::lazy_static;

use super::find_repository_root;

lazy_static! {
    static ref REMOTE_REGEX: regex::Regex =
        regex::Regex::new(r"[:/](?P<owner>[^/:]+)/(?P<repository>[^/]+?)(?:\.git)?/?$").unwrap();
}

fn parse_remote_slug(remote_url: &str) -> Option<String> {
    let captures = REMOTE_REGEX.captures(remote_url)?;
    Some(format!(
        "{}/{}",
        captures.name("owner")?.as_str(),
        captures.name("repository")?.as_str()
    ))
}

/// Best-effort name of the repository `directory` belongs to.
///
/// Uses the `owner/repository` slug of the `origin` remote when there is one, the name of the
/// repository root directory otherwise. Returns `None` outside of a git repository.
pub fn resolve_repository(directory: &Path) -> Option<String> {
    let root = find_repository_root(directory)?;

    let origin_slug = Repository::open(&root)
        .map_err(|e| log::debug!("Failed to open repository at {}: {e}", root.display()))
        .ok()
        .and_then(|repository| {
            let remote = repository.find_remote("origin").ok()?;
            remote.url().and_then(parse_remote_slug)
        });

    origin_slug.or_else(|| {
        root.file_name()
            .map(|name| name.to_string_lossy().to_string())
    })
}
