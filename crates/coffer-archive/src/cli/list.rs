use coffer_params::{ColumnGrammar, EntryField, KeyValueGrammar, ListGrammar};

use crate::entry::Entry;
use crate::event::ArchiveInfo;

/// Turns list output into entries, one line at a time.
///
/// At most one entry is emitted per line; whatever is still accumulating at
/// end of output comes out of [`ListParser::finish`].
pub trait ListParser: Send + Sync {
    fn parse_line(&mut self, line: &str) -> Option<Entry>;

    fn finish(&mut self) -> Option<Entry>;

    fn archive_info(&self) -> ArchiveInfo;
}

pub fn parser_for(grammar: &ListGrammar) -> Box<dyn ListParser> {
    match grammar {
        ListGrammar::KeyValue(grammar) => Box::new(KeyValueParser::new(grammar.clone())),
        ListGrammar::Columns(grammar) => Box::new(ColumnParser::new(grammar.clone())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Title,
    Header,
    ArchiveInfo,
    Comment,
    Entries,
}

/// Block-structured `Key = Value` listings such as `7z l -slt`.
pub struct KeyValueParser {
    grammar: KeyValueGrammar,
    phase: Phase,
    pending: Option<Entry>,
    info: ArchiveInfo,
    comment: Vec<String>,
}

impl KeyValueParser {
    pub fn new(grammar: KeyValueGrammar) -> Self {
        let phase = if grammar.title.is_some() {
            Phase::Title
        } else if grammar.header_end.is_some() {
            Phase::Header
        } else {
            Phase::ArchiveInfo
        };
        Self {
            grammar,
            phase,
            pending: None,
            info: ArchiveInfo::default(),
            comment: Vec::new(),
        }
    }

    fn split<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let separator = self.grammar.separator.as_str();
        match line.split_once(separator) {
            Some((key, value)) => Some((key.trim(), value)),
            // `Key =` with an empty value loses the separator's trailing space.
            None => line
                .trim_end()
                .strip_suffix(separator.trim_end())
                .map(|key| (key.trim(), "")),
        }
    }

    fn field(&self, key: &str) -> Option<EntryField> {
        self.grammar.fields.get(key).copied()
    }

    fn starts_entries(&self, line: &str) -> bool {
        match &self.grammar.entries_start {
            Some(start) => start.is_match(line),
            None => self
                .split(line)
                .is_some_and(|(key, _)| self.field(key) == Some(EntryField::Path)),
        }
    }

    fn close_comment(&mut self) {
        if self.phase != Phase::Comment {
            return;
        }
        while self.comment.last().is_some_and(|line| line.trim().is_empty()) {
            self.comment.pop();
        }
        if !self.comment.is_empty() {
            self.info.comment = Some(self.comment.join("\n"));
        }
        self.comment.clear();
    }

    fn enter_entries(&mut self, line: &str) -> Option<Entry> {
        self.close_comment();
        self.phase = Phase::Entries;
        // An explicit marker line carries no fields; an implicit start does.
        if self.grammar.entries_start.is_some() {
            None
        } else {
            self.parse_entry_line(line)
        }
    }

    fn parse_info_line(&mut self, line: &str) {
        let Some((key, value)) = self.split(line) else {
            return;
        };
        if self.grammar.archive_type_key.as_deref() == Some(key) {
            self.info.archive_type = Some(value.trim().to_string());
        } else if self.grammar.comment_key.as_deref() == Some(key) {
            self.phase = Phase::Comment;
            self.comment.push(value.to_string());
        }
    }

    fn parse_entry_line(&mut self, line: &str) -> Option<Entry> {
        let (key, value) = self.split(line)?;
        let mut emitted = None;
        match self.field(key) {
            Some(EntryField::Path) => {
                if self.pending.as_ref().is_some_and(|e| !e.path.is_empty()) {
                    emitted = self.pending.take();
                }
                self.pending = Some(Entry::new(value));
            }
            Some(field) => {
                if let Some(entry) = self.pending.as_mut() {
                    apply_field(entry, field, value);
                }
            }
            None => {}
        }
        if self.grammar.terminators.iter().any(|t| t == key) {
            // A terminator right after a flush has nothing left to close.
            if emitted.is_none() {
                emitted = self.pending.take();
            }
        }
        emitted.map(Entry::normalized)
    }
}

impl ListParser for KeyValueParser {
    fn parse_line(&mut self, line: &str) -> Option<Entry> {
        match self.phase {
            Phase::Title => {
                if self.grammar.title.as_ref().is_some_and(|re| re.is_match(line)) {
                    self.phase = if self.grammar.header_end.is_some() {
                        Phase::Header
                    } else {
                        Phase::ArchiveInfo
                    };
                }
                None
            }
            Phase::Header => {
                if self.grammar.header_end.as_ref().is_some_and(|re| re.is_match(line)) {
                    self.phase = Phase::ArchiveInfo;
                }
                None
            }
            Phase::ArchiveInfo => {
                if self.starts_entries(line) {
                    return self.enter_entries(line);
                }
                self.parse_info_line(line);
                None
            }
            Phase::Comment => {
                if self.starts_entries(line) {
                    return self.enter_entries(line);
                }
                self.comment.push(line.to_string());
                None
            }
            Phase::Entries => self.parse_entry_line(line),
        }
    }

    fn finish(&mut self) -> Option<Entry> {
        self.close_comment();
        self.pending
            .take()
            .filter(|entry| !entry.path.is_empty())
            .map(Entry::normalized)
    }

    fn archive_info(&self) -> ArchiveInfo {
        self.info.clone()
    }
}

/// One entry per matching line.
pub struct ColumnParser {
    grammar: ColumnGrammar,
}

impl ColumnParser {
    pub fn new(grammar: ColumnGrammar) -> Self {
        Self { grammar }
    }
}

impl ListParser for ColumnParser {
    fn parse_line(&mut self, line: &str) -> Option<Entry> {
        let caps = self.grammar.line.captures(line)?;
        let mut entry = Entry::default();
        for (name, field) in &self.grammar.fields {
            let Some(value) = caps.name(name) else {
                continue;
            };
            let value = value.as_str();
            match field {
                EntryField::Encrypted => {
                    entry.encrypted = !matches!(value.to_ascii_lowercase().as_str(), "-" | "no" | "0");
                }
                field => apply_field(&mut entry, *field, value),
            }
        }
        if entry.path.is_empty() {
            return None;
        }
        Some(entry.normalized())
    }

    fn finish(&mut self) -> Option<Entry> {
        None
    }

    fn archive_info(&self) -> ArchiveInfo {
        ArchiveInfo::default()
    }
}

fn is_yes(value: &str) -> bool {
    matches!(value.trim(), "+" | "Yes" | "yes" | "YES" | "true")
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_size(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// Store one tool field on an entry.
pub(crate) fn apply_field(entry: &mut Entry, field: EntryField, value: &str) {
    match field {
        EntryField::Path => entry.path = value.to_string(),
        EntryField::Size => entry.size = parse_size(value).unwrap_or(0),
        EntryField::CompressedSize => entry.compressed_size = parse_size(value),
        EntryField::Timestamp => entry.timestamp = non_empty(value),
        EntryField::Attributes => {
            // `D_ drwxr-xr-x`: DOS flags, then optional unix permissions.
            let mut tokens = value.split_whitespace();
            if tokens.next().is_some_and(|flags| flags.contains('D')) {
                entry.is_dir = true;
            }
            if let Some(permissions) = tokens.next() {
                apply_field(entry, EntryField::Permissions, permissions);
            }
        }
        EntryField::Permissions => {
            if value.starts_with('d') {
                entry.is_dir = true;
            }
            entry.permissions = non_empty(value);
        }
        EntryField::Owner => entry.owner = non_empty(value),
        EntryField::Group => entry.group = non_empty(value),
        EntryField::Checksum => entry.checksum = non_empty(value),
        EntryField::Method => entry.method = non_empty(value),
        EntryField::Version => entry.version = non_empty(value),
        EntryField::Encrypted => entry.encrypted = is_yes(value),
        EntryField::Comment => entry.comment = non_empty(value),
        EntryField::Link => entry.link = non_empty(value),
        EntryField::Directory => {
            if is_yes(value) {
                entry.is_dir = true;
            }
        }
        EntryField::Kind => {
            if value.trim().eq_ignore_ascii_case("directory") {
                entry.is_dir = true;
            }
        }
        EntryField::Ignore => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_params::Registry;

    const SEVENZIP_LISTING: &str = "\
7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21

Scanning the drive for archives:
1 file, 230 bytes (1 KiB)

Listing archive: demo.7z

--
Path = demo.7z
Type = 7z
Physical Size = 230
Comment = first line
second line

----------
Path = foo.txt
Size = 4
Packed Size = 8
Modified = 2020-01-01 10:00:00
Attributes = A_ -rw-r--r--
CRC = 8C736521
Encrypted = +
Method = LZMA2:12 7zAES
Block = 0

Path = bar
Size = 0
Packed Size = 0
Modified = 2020-01-01 10:00:00
Attributes = D_ drwxr-xr-x
CRC =
Encrypted = -
Method =
Block =
";

    fn builtin(format: &str) -> Box<dyn ListParser> {
        let table = Registry::builtin().by_format(format).unwrap();
        parser_for(table.list.as_ref().unwrap())
    }

    fn parse_all(parser: &mut dyn ListParser, text: &str) -> Vec<Entry> {
        let mut entries: Vec<_> = text.lines().filter_map(|l| parser.parse_line(l)).collect();
        entries.extend(parser.finish());
        entries
    }

    #[test]
    fn parses_7z_technical_listing() {
        let mut parser = builtin("7z");
        let entries = parse_all(parser.as_mut(), SEVENZIP_LISTING);

        assert_eq!(entries.len(), 2);
        let foo = &entries[0];
        assert_eq!(foo.path, "foo.txt");
        assert_eq!(foo.size, 4);
        assert_eq!(foo.compressed_size, Some(8));
        assert_eq!(foo.permissions.as_deref(), Some("-rw-r--r--"));
        assert_eq!(foo.checksum.as_deref(), Some("8C736521"));
        assert!(foo.encrypted);
        assert!(!foo.is_dir);

        let bar = &entries[1];
        assert_eq!(bar.path, "bar/");
        assert!(bar.is_dir);
        assert!(!bar.encrypted);
        assert_eq!(bar.checksum, None);

        let info = parser.archive_info();
        assert_eq!(info.archive_type.as_deref(), Some("7z"));
        assert_eq!(info.comment.as_deref(), Some("first line\nsecond line"));
    }

    #[test]
    fn archive_path_line_is_not_an_entry() {
        let mut parser = builtin("7z");
        let listing = "7-Zip 23.01\nListing archive: x.7z\n--\nPath = x.7z\nType = 7z\n";
        assert!(parse_all(parser.as_mut(), listing).is_empty());
    }

    #[test]
    fn pending_entry_flushes_on_next_path_and_at_end() {
        let mut parser = builtin("7z");
        let listing = "7-Zip\nListing archive: t.tar\n--\nType = tar\n----------\n\
                       Path = a\nSize = 1\n\nPath = b\nSize = 2\n";
        let entries = parse_all(parser.as_mut(), listing);
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b"]);
        assert_eq!(entries[1].size, 2);
    }

    #[test]
    fn parses_unrar_technical_listing() {
        let mut parser = builtin("rar");
        let listing = "\
UNRAR 6.24 freeware      Copyright (c) 1993-2023 Alexander Roshal

Archive: demo.rar
Details: RAR 5

        Name: docs
        Type: Directory
       mtime: 2021-03-04 05:06:07,000000000
  Attributes: drwxr-xr-x
     Host OS: Unix

        Name: docs/readme.txt
        Type: File
        Size: 12
 Packed size: 10
  Attributes: -rw-r--r--
       CRC32: 0A1B2C3D
 Compression: RAR 5.0(v50) -m3 -md=1M
";
        let entries = parse_all(parser.as_mut(), listing);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "docs/");
        assert_eq!(entries[1].path, "docs/readme.txt");
        assert_eq!(entries[1].size, 12);
        assert_eq!(entries[1].method.as_deref(), Some("RAR 5.0(v50) -m3 -md=1M"));
        assert_eq!(parser.archive_info().archive_type.as_deref(), Some("RAR 5"));
    }

    #[test]
    fn parses_zipinfo_columns() {
        let mut parser = builtin("zip");
        let listing = "\
Archive:  demo.zip
Zip file size: 318 bytes, number of entries: 2
-rw-r--r--  3.0 unx        4 TX stor 20200101.100000 foo.txt
drwxr-xr-x  3.0 unx        0 bx stor 20200101.100000 bar/
2 files, 4 bytes uncompressed, 4 bytes compressed:  0.0%
";
        let entries = parse_all(parser.as_mut(), listing);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "foo.txt");
        assert!(entries[0].encrypted);
        assert_eq!(entries[0].timestamp.as_deref(), Some("20200101.100000"));
        assert_eq!(entries[1].path, "bar/");
        assert!(entries[1].is_dir);
        assert!(!entries[1].encrypted);
    }

    #[test]
    fn attributes_and_flags() {
        let mut entry = Entry::new("x");
        apply_field(&mut entry, EntryField::Attributes, "D");
        assert!(entry.is_dir);
        assert_eq!(entry.permissions, None);

        let mut entry = Entry::new("y");
        apply_field(&mut entry, EntryField::Kind, "Directory");
        apply_field(&mut entry, EntryField::Encrypted, "Yes");
        assert!(entry.is_dir && entry.encrypted);

        let mut entry = Entry::new("z");
        apply_field(&mut entry, EntryField::Size, "not a number");
        apply_field(&mut entry, EntryField::Owner, "  ");
        assert_eq!(entry.size, 0);
        assert_eq!(entry.owner, None);
    }
}
