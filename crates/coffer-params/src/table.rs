use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mode::OperationMode;
use crate::pattern::{PatternSet, compile_one, compile_opt};

/// Immutable description of how to drive one archive format's tools.
///
/// Loaded once per format and shared read-only by every driver of that
/// format.
#[derive(Clone, Debug)]
pub struct ParameterTable {
    pub format: String,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
    /// Characters the tool treats specially in file-name arguments; each
    /// occurrence is prefixed with a backslash.
    pub escape: String,
    /// Pass directory entries without their trailing slash.
    pub strip_dir_slash: bool,
    pub success_exit_codes: Vec<i32>,
    pub switches: Switches,
    pub modes: BTreeMap<OperationMode, ModeSpec>,
    pub patterns: Patterns,
    pub overwrite: OverwriteKeys,
    pub list: Option<ListGrammar>,
}

/// Program candidates and argument template for one operation.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeSpec {
    pub programs: Vec<String>,
    pub args: Vec<String>,
}

impl ModeSpec {
    /// First candidate that exists: absolute or relative paths as given,
    /// bare names looked up on `PATH`.
    pub fn resolve_program(&self, mode: OperationMode) -> Result<PathBuf> {
        for candidate in &self.programs {
            let path = Path::new(candidate);
            if path.components().count() > 1 {
                if path.exists() {
                    return Ok(path.to_path_buf());
                }
                continue;
            }
            if let Ok(found) = which::which(candidate) {
                debug!(%mode, program = %found.display(), "resolved archiver program");
                return Ok(found);
            }
        }
        Err(Error::ProgramNotFound {
            mode,
            candidates: self.programs.clone(),
        })
    }
}

/// Switch templates; `{}` is replaced by the option value.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Switches {
    pub password: Vec<String>,
    pub header_encryption: Vec<String>,
    pub preserve_paths: Vec<String>,
    pub flatten_paths: Vec<String>,
    pub compression_level: Vec<String>,
    pub compression_method: Vec<String>,
    pub encryption_method: Vec<String>,
    pub volume_size: Vec<String>,
    pub comment_file: Vec<String>,
}

/// Letters written to the tool for each overwrite choice. `None` means the
/// tool cannot express the choice.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverwriteKeys {
    pub overwrite: Option<String>,
    pub overwrite_all: Option<String>,
    pub skip: Option<String>,
    pub autoskip: Option<String>,
    pub rename: Option<String>,
    pub cancel: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Patterns {
    pub password_prompt: PatternSet,
    pub wrong_password: PatternSet,
    pub overwrite_prompt: PatternSet,
    /// Captures `file`: the path the next overwrite prompt refers to.
    pub overwrite_file: PatternSet,
    pub rename_prompt: PatternSet,
    pub corrupt_archive: PatternSet,
    pub disk_full: PatternSet,
    pub fatal_error: PatternSet,
    /// Captures `percent`.
    pub progress: PatternSet,
    pub multi_volume: PatternSet,
    pub test_passed: PatternSet,
    /// Per-file extraction failures; reported as errors without stopping the
    /// tool.
    pub extraction_failed: PatternSet,
}

impl Patterns {
    /// Whether an unterminated output fragment must be handled right away
    /// because the tool is probably blocked waiting for input.
    pub fn is_blocking_prompt(&self, fragment: &str) -> bool {
        self.password_prompt.is_match(fragment)
            || self.wrong_password.is_match(fragment)
            || self.overwrite_prompt.is_match(fragment)
            || self.rename_prompt.is_match(fragment)
            || self.disk_full.is_match(fragment)
            || self.corrupt_archive.is_match(fragment)
    }
}

/// Entry attribute a list field or capture group feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryField {
    Path,
    Size,
    CompressedSize,
    Timestamp,
    /// DOS/unix attribute string such as `D....` or `D_ drwxr-xr-x`.
    Attributes,
    Permissions,
    Owner,
    Group,
    Checksum,
    Method,
    Version,
    Encrypted,
    Comment,
    Link,
    Directory,
    /// Entry type word such as `File`, `Directory` or `Symlink`.
    Kind,
    Ignore,
}

impl EntryField {
    const NAMED: [(&'static str, EntryField); 16] = [
        ("path", Self::Path),
        ("size", Self::Size),
        ("compressed_size", Self::CompressedSize),
        ("timestamp", Self::Timestamp),
        ("attributes", Self::Attributes),
        ("permissions", Self::Permissions),
        ("owner", Self::Owner),
        ("group", Self::Group),
        ("checksum", Self::Checksum),
        ("method", Self::Method),
        ("version", Self::Version),
        ("encrypted", Self::Encrypted),
        ("comment", Self::Comment),
        ("link", Self::Link),
        ("directory", Self::Directory),
        ("kind", Self::Kind),
    ];

    pub fn from_group_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, field)| *field)
    }
}

/// How list output is structured.
#[derive(Clone, Debug)]
pub enum ListGrammar {
    KeyValue(KeyValueGrammar),
    Columns(ColumnGrammar),
}

/// Block-structured `Key = Value` listings.
///
/// Phases: title, header, archive information (with an optional multi-line
/// comment) and per-entry fields repeating until the end of output.
#[derive(Clone, Debug)]
pub struct KeyValueGrammar {
    pub separator: String,
    pub title: Option<Regex>,
    pub header_end: Option<Regex>,
    /// When absent, the first key mapped to [`EntryField::Path`] after the
    /// header starts the entry section.
    pub entries_start: Option<Regex>,
    pub fields: HashMap<String, EntryField>,
    pub terminators: Vec<String>,
    pub archive_type_key: Option<String>,
    pub comment_key: Option<String>,
}

/// One entry per line, described by a regex with named groups whose names
/// are [`EntryField`] names.
#[derive(Clone, Debug)]
pub struct ColumnGrammar {
    pub line: Regex,
    pub fields: Vec<(String, EntryField)>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    format: String,
    #[serde(default)]
    mime_types: Vec<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    escape: String,
    #[serde(default = "default_true")]
    strip_dir_slash: bool,
    #[serde(default = "default_exit_codes")]
    success_exit_codes: Vec<i32>,
    #[serde(default)]
    switches: Switches,
    #[serde(default)]
    modes: BTreeMap<OperationMode, ModeSpec>,
    #[serde(default)]
    patterns: RawPatterns,
    #[serde(default)]
    overwrite: OverwriteKeys,
    list: Option<RawListGrammar>,
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPatterns {
    password_prompt: Vec<String>,
    wrong_password: Vec<String>,
    overwrite_prompt: Vec<String>,
    overwrite_file: Vec<String>,
    rename_prompt: Vec<String>,
    corrupt_archive: Vec<String>,
    disk_full: Vec<String>,
    fatal_error: Vec<String>,
    progress: Vec<String>,
    multi_volume: Vec<String>,
    test_passed: Vec<String>,
    extraction_failed: Vec<String>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawListGrammar {
    KeyValue {
        separator: String,
        title: Option<String>,
        header_end: Option<String>,
        entries_start: Option<String>,
        fields: HashMap<String, EntryField>,
        #[serde(default)]
        terminators: Vec<String>,
        archive_type_key: Option<String>,
        comment_key: Option<String>,
    },
    Columns {
        line: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

impl ParameterTable {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let raw: RawTable = toml::from_str(source)?;
        let patterns = raw.patterns.compile()?;
        let list = raw.list.map(RawListGrammar::compile).transpose()?;
        Ok(Self {
            format: raw.format,
            mime_types: raw.mime_types,
            extensions: raw
                .extensions
                .into_iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            escape: raw.escape,
            strip_dir_slash: raw.strip_dir_slash,
            success_exit_codes: raw.success_exit_codes,
            switches: raw.switches,
            modes: raw.modes,
            patterns,
            overwrite: raw.overwrite,
            list,
        })
    }

    pub fn supports(&self, mode: OperationMode) -> bool {
        self.modes.contains_key(&mode)
    }

    pub fn mode(&self, mode: OperationMode) -> Result<&ModeSpec> {
        self.modes.get(&mode).ok_or_else(|| Error::UnsupportedMode {
            format: self.format.clone(),
            mode,
        })
    }

    /// Length of the longest extension matching `path`, if any.
    pub fn extension_match(&self, path: &Path) -> Option<usize> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        self.extensions
            .iter()
            .filter(|ext| name.ends_with(&format!(".{ext}")))
            .map(|ext| ext.len())
            .max()
    }

    pub fn is_success_code(&self, code: Option<i32>) -> bool {
        code.is_some_and(|code| self.success_exit_codes.contains(&code))
    }
}

impl RawPatterns {
    fn compile(self) -> Result<Patterns> {
        Ok(Patterns {
            password_prompt: PatternSet::compile("password_prompt", &self.password_prompt)?,
            wrong_password: PatternSet::compile("wrong_password", &self.wrong_password)?,
            overwrite_prompt: PatternSet::compile("overwrite_prompt", &self.overwrite_prompt)?,
            overwrite_file: PatternSet::compile("overwrite_file", &self.overwrite_file)?,
            rename_prompt: PatternSet::compile("rename_prompt", &self.rename_prompt)?,
            corrupt_archive: PatternSet::compile("corrupt_archive", &self.corrupt_archive)?,
            disk_full: PatternSet::compile("disk_full", &self.disk_full)?,
            fatal_error: PatternSet::compile("fatal_error", &self.fatal_error)?,
            progress: PatternSet::compile("progress", &self.progress)?,
            multi_volume: PatternSet::compile("multi_volume", &self.multi_volume)?,
            test_passed: PatternSet::compile("test_passed", &self.test_passed)?,
            extraction_failed: PatternSet::compile("extraction_failed", &self.extraction_failed)?,
        })
    }
}

impl RawListGrammar {
    fn compile(self) -> Result<ListGrammar> {
        match self {
            Self::KeyValue {
                separator,
                title,
                header_end,
                entries_start,
                fields,
                terminators,
                archive_type_key,
                comment_key,
            } => Ok(ListGrammar::KeyValue(KeyValueGrammar {
                separator,
                title: compile_opt("list.title", title.as_deref())?,
                header_end: compile_opt("list.header_end", header_end.as_deref())?,
                entries_start: compile_opt("list.entries_start", entries_start.as_deref())?,
                fields,
                terminators,
                archive_type_key,
                comment_key,
            })),
            Self::Columns { line } => {
                let line = compile_one("list.line", &line)?;
                let fields = line
                    .capture_names()
                    .flatten()
                    .map(|name| {
                        EntryField::from_group_name(name)
                            .map(|field| (name.to_string(), field))
                            .ok_or_else(|| Error::UnknownField(name.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ListGrammar::Columns(ColumnGrammar { line, fields }))
            }
        }
    }
}
