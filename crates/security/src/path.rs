//! Path checks for write tools.
//!
//! Everything here is lexical: paths are cleaned with [`clean`] and
//! compared against allow-globs without touching the filesystem, so a
//! file that does not exist yet is judged the same way as one that does.

use std::path::PathBuf;

use globset::{GlobBuilder, GlobMatcher};

/// Lexically normalize a slash-separated path.
///
/// Collapses repeated separators, drops `.` segments and resolves `..`
/// against the preceding segment. Leading `..` segments of a relative path
/// are kept (so traversal out of the working directory stays visible);
/// `..` at the root of an absolute path is dropped. An empty result is `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".into();
    }

    let normalized = path.replace('\\', "/");
    let rooted = normalized.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".into(),
        (false, false) => joined,
    }
}

/// One compiled allow-path entry.
#[derive(Debug, Clone)]
struct AllowEntry {
    pattern: String,
    matcher: Option<GlobMatcher>,
    /// Set for patterns ending in `/**` or `/*`
    dir_prefix: Option<String>,
}

impl AllowEntry {
    fn new(raw: &str) -> Self {
        let pattern = clean(&expand_tilde(raw));

        // A bare wildcard means the whole workspace
        if pattern == "**" || pattern == "*" {
            return Self {
                pattern,
                matcher: None,
                dir_prefix: Some(".".into()),
            };
        }

        let matcher = match GlobBuilder::new(&pattern).literal_separator(true).build() {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid allow-path glob");
                None
            }
        };

        let dir_prefix = pattern
            .strip_suffix("/**")
            .or_else(|| pattern.strip_suffix("/*"))
            .map(str::to_string);

        Self {
            pattern,
            matcher,
            dir_prefix,
        }
    }

    fn matches(&self, cleaned: &str) -> bool {
        // Paths escaping the workspace or rooted elsewhere only match
        // patterns anchored the same way
        if anchor(cleaned) != anchor(&self.pattern) {
            return false;
        }

        if let Some(matcher) = &self.matcher
            && matcher.is_match(cleaned)
        {
            return true;
        }

        // Directory wildcards also cover the directory itself and anything
        // beneath it, but only on a separator boundary.
        match &self.dir_prefix {
            Some(dir) if dir == "." => true,
            Some(dir) => {
                cleaned == dir
                    || cleaned
                        .strip_prefix(dir.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Anchor {
    Absolute,
    Parent,
    Workspace,
}

fn anchor(cleaned: &str) -> Anchor {
    if cleaned.starts_with('/') {
        Anchor::Absolute
    } else if cleaned == ".." || cleaned.starts_with("../") {
        Anchor::Parent
    } else {
        Anchor::Workspace
    }
}

/// The compiled allow-path list for write tools.
#[derive(Debug, Clone, Default)]
pub struct PathAllowList {
    entries: Vec<AllowEntry>,
    workspace_root: Option<PathBuf>,
}

impl PathAllowList {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            entries: patterns.iter().map(|p| AllowEntry::new(p)).collect(),
            workspace_root: None,
        }
    }

    /// Absolute paths under `root` are judged relative to it, so that
    /// `/repo/src/main.rs` matches `./src/**` when the agent runs in `/repo`.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// No patterns means no restriction.
    pub fn is_unrestricted(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` may be written.
    pub fn allows(&self, path: &str) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let cleaned = self.relativize(&clean(&expand_tilde(path)));
        self.entries.iter().any(|entry| entry.matches(&cleaned))
    }

    fn relativize(&self, cleaned: &str) -> String {
        let Some(root) = &self.workspace_root else {
            return cleaned.to_string();
        };
        let root = clean(&root.to_string_lossy());
        if cleaned == root {
            return ".".into();
        }
        match cleaned.strip_prefix(root.as_str()) {
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
            _ => cleaned.to_string(),
        }
    }
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home.to_string_lossy(), 1);
    }
    path.to_string()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots() {
        assert_eq!(clean("./src/../../etc/passwd"), "../etc/passwd");
        assert_eq!(clean("src//lib/./mod.rs"), "src/lib/mod.rs");
        assert_eq!(clean("a/b/../../.."), "..");
        assert_eq!(clean("/../etc"), "/etc");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("./"), ".");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("../../x"), "../../x");
    }

    #[test]
    fn traversal_out_of_allowed_dir_is_rejected() {
        let list = PathAllowList::new(&["./src/**".into()]);
        assert!(list.allows("./src/main.rs"));
        assert!(list.allows("src/deep/nested/mod.rs"));
        assert!(!list.allows("./src/../../etc/passwd"));
        assert!(!list.allows("./src/../Cargo.toml"));
    }

    #[test]
    fn directory_prefix_requires_separator_boundary() {
        let list = PathAllowList::new(&["src/**".into()]);
        assert!(list.allows("src"));
        assert!(list.allows("src/x"));
        assert!(!list.allows("srcfoo/x"));
    }

    #[test]
    fn single_star_respects_separators_in_glob() {
        let list = PathAllowList::new(&["docs/*.md".into()]);
        assert!(list.allows("docs/README.md"));
        assert!(!list.allows("docs/sub/README.md"));
    }

    #[test]
    fn exact_file_pattern() {
        let list = PathAllowList::new(&["Cargo.toml".into()]);
        assert!(list.allows("./Cargo.toml"));
        assert!(!list.allows("Cargo.lock"));
    }

    #[test]
    fn empty_list_allows_everything() {
        let list = PathAllowList::new(&[]);
        assert!(list.is_unrestricted());
        assert!(list.allows("/etc/passwd"));
    }

    #[test]
    fn absolute_paths_under_workspace_are_relativized() {
        let list = PathAllowList::new(&["./src/**".into()]).with_workspace_root("/home/dev/repo");
        assert!(list.allows("/home/dev/repo/src/lib.rs"));
        assert!(!list.allows("/home/dev/repo/../other/src/lib.rs"));
        assert!(!list.allows("/home/dev/repository/src/lib.rs"));
    }

    #[test]
    fn workspace_wide_pattern() {
        let list = PathAllowList::new(&["./**".into()]);
        assert!(list.allows("anything/at/all.txt"));
        assert!(!list.allows("../outside.txt"));
        assert!(!list.allows("/etc/passwd"));
    }
}
