//! Helpers for repository URLs. Keys in the directory cache and selection set are
//! normalized with [`normalize`].

/// Strips trailing separators so `.../trunk/` and `.../trunk` address the same node.
/// A bare scheme root such as `file:///` keeps its slashes.
pub fn normalize(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with(':') {
        return url.trim().to_string();
    }
    trimmed.to_string()
}

/// Joins `name` under `parent`, inserting exactly one separator.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Last path component, ignoring trailing separators.
pub fn file_name(url: &str) -> Option<&str> {
    let (trimmed, cut) = last_separator(url)?;
    let name = &trimmed[cut + 1..];
    if name.is_empty() { None } else { Some(name) }
}

/// Parent URL, or `None` when the URL has nothing above the scheme authority.
pub fn parent(url: &str) -> Option<String> {
    let (trimmed, cut) = last_separator(url)?;
    Some(trimmed[..cut].to_string())
}

fn last_separator(url: &str) -> Option<(&str, usize)> {
    let trimmed = url.trim_end_matches('/');
    let floor = trimmed.find("://").map(|i| i + 3).unwrap_or(0);
    let cut = trimmed[floor..].rfind('/')? + floor;
    if cut <= floor {
        return None;
    }
    Some((trimmed, cut))
}

/// True when `path` is `root` itself or lies below it.
pub fn is_within(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);
    path == root || path.starts_with(&join(&root, ""))
}
