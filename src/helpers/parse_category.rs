use lazy_static::lazy_static;

lazy_static! {
    /// Stripping order: privilege/detach wrappers, then the path of the executable, then
    /// everything after the first whitespace.
    static ref CATEGORY_REGEX: regex::Regex =
        regex::Regex::new(r"^(?:(?:sudo|nohup)\s+)*(?:\S*/)?(?P<category>[^/\s]+)").unwrap();
}

/// Normalize a raw command line into the name of the executable it runs.
///
/// `sudo`/`nohup` wrappers are dropped, then any directory prefix (`./`, `/usr/bin/`, ...),
/// and the first remaining token is returned. When nothing can be extracted, the trimmed
/// command is returned as-is.
pub fn parse_category(command: &str) -> String {
    let command = command.trim();

    CATEGORY_REGEX
        .captures(command)
        .and_then(|captures| captures.name("category"))
        .map(|category| category.as_str().to_string())
        .unwrap_or_else(|| command.to_string())
}
