use serde::{Deserialize, Serialize};

/// One archive member as reported by a driver or library backend.
///
/// `path` is slash separated and relative to the archive root. Directory
/// entries carry a trailing `/` once emitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub size: u64,
    pub compressed_size: Option<u64>,
    pub checksum: Option<String>,
    pub method: Option<String>,
    pub version: Option<String>,
    /// Modification time as printed by the tool.
    pub timestamp: Option<String>,
    /// Symlink target.
    pub link: Option<String>,
    pub is_dir: bool,
    pub encrypted: bool,
    pub comment: Option<String>,
}

impl Entry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            size,
            ..Self::new(path)
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            ..Self::new(path)
        }
        .normalized()
    }

    /// Apply the directory invariant: a directory flag implies a trailing
    /// slash and a trailing slash implies the flag.
    pub fn normalized(mut self) -> Self {
        if self.path.ends_with('/') {
            self.is_dir = true;
        } else if self.is_dir && !self.path.is_empty() {
            self.path.push('/');
        }
        self
    }

    /// Last path component without the directory slash.
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Path of the containing directory with its trailing slash, or `""` for
    /// top-level entries.
    pub fn parent_path(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => &self.path[..=idx],
            None => "",
        }
    }

    /// First path component, with a slash if anything follows it.
    pub fn top_level(&self) -> &str {
        match self.path.find('/') {
            Some(idx) => &self.path[..=idx],
            None => &self.path,
        }
    }

    pub fn is_descendant_of(&self, dir: &str) -> bool {
        is_descendant(&self.path, dir)
    }
}

/// Whether `path` lies strictly below the directory `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    !dir.is_empty()
        && path.len() > dir.len() + 1
        && path.starts_with(dir)
        && path.as_bytes()[dir.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_gets_trailing_slash() {
        let entry = Entry::directory("bar");
        assert_eq!(entry.path, "bar/");
        assert!(entry.is_dir);

        let entry = Entry::new("baz/").normalized();
        assert!(entry.is_dir);
        assert_eq!(entry.path, "baz/");
    }

    #[test]
    fn empty_path_is_left_alone() {
        let mut entry = Entry::new("");
        entry.is_dir = true;
        assert_eq!(entry.normalized().path, "");
    }

    #[test]
    fn name_and_parent() {
        let entry = Entry::file("a/b/c.txt", 3);
        assert_eq!(entry.name(), "c.txt");
        assert_eq!(entry.parent_path(), "a/b/");
        assert_eq!(entry.top_level(), "a/");

        let dir = Entry::directory("a/b");
        assert_eq!(dir.name(), "b");
        assert_eq!(dir.parent_path(), "a/");

        let top = Entry::file("top.txt", 1);
        assert_eq!(top.parent_path(), "");
        assert_eq!(top.top_level(), "top.txt");
    }

    #[test]
    fn descendant_requires_separator() {
        assert!(is_descendant("a/x", "a/"));
        assert!(is_descendant("a/b/c", "a"));
        assert!(!is_descendant("ab/x", "a/"));
        assert!(!is_descendant("a/", "a/"));
        assert!(!is_descendant("a", ""));
    }
}
