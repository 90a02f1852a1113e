use crate::entry::{Entry, is_descendant};

/// Where one entry ends up after a move or copy inside the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedMove {
    pub from: String,
    pub to: String,
    pub is_dir: bool,
}

/// Number of selected entries not below another selected entry.
pub fn entries_without_children(entries: &[Entry]) -> usize {
    entries
        .iter()
        .filter(|entry| {
            !entries
                .iter()
                .any(|other| other.is_dir && entry.is_descendant_of(&other.path))
        })
        .count()
}

/// Compute new paths for `entries` moved or copied to `destination`.
///
/// Entries are processed in path order. Descendants of a moved directory
/// keep their position under its new path. With a single top-level entry,
/// `destination` is that entry's new full path (a rename); otherwise it is
/// the directory the entries are placed in, `""` being the archive root.
pub fn plan_moves(entries: &[Entry], destination: &str) -> Vec<PlannedMove> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    sorted.dedup_by(|a, b| a.path == b.path);

    let single = entries_without_children(entries) == 1;
    let dest_dir = if destination.is_empty() || destination.ends_with('/') {
        destination.to_string()
    } else {
        format!("{destination}/")
    };

    let mut plan = Vec::with_capacity(sorted.len());
    // Last moved directory, old and new path, both with a trailing slash.
    let mut last_folder = String::new();
    let mut folder_to = String::new();

    for entry in sorted {
        let path = entry.path.as_str();
        let to = if !last_folder.is_empty() && is_descendant(path, &last_folder) {
            format!("{folder_to}{}", &path[last_folder.len()..])
        } else {
            let mut to = match destination.trim_end_matches('/') {
                renamed if single && !renamed.is_empty() => renamed.to_string(),
                // A lone entry moved to the root keeps its name.
                _ if single => entry.name().to_string(),
                _ => format!("{dest_dir}{}", entry.name()),
            };
            if entry.is_dir {
                to.push('/');
                last_folder = path.to_string();
                folder_to = to.clone();
            } else {
                last_folder.clear();
            }
            to
        };
        plan.push(PlannedMove {
            from: path.to_string(),
            to,
            is_dir: entry.is_dir,
        });
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(paths: &[&str]) -> Vec<Entry> {
        paths.iter().map(|p| Entry::new(*p).normalized()).collect()
    }

    fn targets(plan: &[PlannedMove]) -> Vec<&str> {
        plan.iter().map(|m| m.to.as_str()).collect()
    }

    #[test]
    fn moves_folder_with_children_and_file() {
        let entries = selection(&["b", "a/x", "a/"]);
        assert_eq!(entries_without_children(&entries), 2);

        let plan = plan_moves(&entries, "D/");
        assert_eq!(targets(&plan), vec!["D/a/", "D/a/x", "D/b"]);
        assert_eq!(plan[0].from, "a/");
    }

    #[test]
    fn single_entry_is_renamed() {
        let plan = plan_moves(&selection(&["docs/readme.txt"]), "docs/README");
        assert_eq!(targets(&plan), vec!["docs/README"]);

        let plan = plan_moves(&selection(&["old/", "old/a", "old/sub/", "old/sub/b"]), "new/");
        assert_eq!(targets(&plan), vec!["new/", "new/a", "new/sub/", "new/sub/b"]);
    }

    #[test]
    fn moves_to_archive_root() {
        let plan = plan_moves(&selection(&["x/one", "x/two/"]), "");
        assert_eq!(targets(&plan), vec!["one", "two/"]);
    }

    #[test]
    fn lone_entry_moved_to_root_keeps_its_name() {
        let plan = plan_moves(&selection(&["x/one"]), "");
        assert_eq!(targets(&plan), vec!["one"]);

        let plan = plan_moves(&selection(&["x/d/", "x/d/f", "x/d/sub/", "x/d/sub/g"]), "/");
        assert_eq!(targets(&plan), vec!["d/", "d/f", "d/sub/", "d/sub/g"]);
        assert!(plan.iter().all(|m| !m.to.is_empty() && !m.to.starts_with('/')));
    }

    #[test]
    fn nested_folder_keeps_relative_layout() {
        let plan = plan_moves(&selection(&["p/q/", "p/q/r/", "p/q/r/s", "t"]), "dest");
        assert_eq!(targets(&plan), vec!["dest/q/", "dest/q/r/", "dest/q/r/s", "dest/t"]);
    }
}
