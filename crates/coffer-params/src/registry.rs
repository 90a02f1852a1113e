use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::table::ParameterTable;

const BUILTIN_SOURCES: [(&str, &str); 3] = [
    ("7z", include_str!("../formats/7z.toml")),
    ("rar", include_str!("../formats/rar.toml")),
    ("zip", include_str!("../formats/zip.toml")),
];

static BUILTIN: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    for (name, source) in BUILTIN_SOURCES {
        match ParameterTable::from_toml_str(source) {
            Ok(table) => registry.insert(table),
            Err(e) => warn!(format = name, error = %e, "skipping invalid built-in table"),
        }
    }
    registry
});

/// Parameter tables keyed by format name.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    tables: BTreeMap<String, Arc<ParameterTable>>,
}

impl Registry {
    /// Tables shipped with the crate, parsed on first use.
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    /// Built-in tables plus every `*.toml` table in `dir`; tables from `dir`
    /// replace built-ins of the same format.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut registry = Self::builtin().clone();
        registry.load_dir(dir)?;
        Ok(registry)
    }

    pub fn insert(&mut self, table: ParameterTable) {
        debug!(format = %table.format, "registered parameter table");
        self.tables.insert(table.format.clone(), Arc::new(table));
    }

    /// Load every `*.toml` file in `dir`. Returns the number of tables added.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let read_err = |source| Error::Read {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let source = fs::read_to_string(path).map_err(|source| Error::Read {
                path: path.clone(),
                source,
            })?;
            self.insert(ParameterTable::from_toml_str(&source)?);
        }
        Ok(paths.len())
    }

    pub fn by_format(&self, format: &str) -> Result<Arc<ParameterTable>> {
        self.tables
            .get(format)
            .cloned()
            .ok_or_else(|| Error::UnknownFormat(format.to_string()))
    }

    /// The table whose extension matches the file name, preferring the
    /// longest match (`tar.7z` over `7z`).
    pub fn for_path(&self, path: impl AsRef<Path>) -> Result<Arc<ParameterTable>> {
        let path = path.as_ref();
        self.tables
            .values()
            .filter_map(|table| table.extension_match(path).map(|len| (len, table)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, table)| Arc::clone(table))
            .ok_or_else(|| Error::UnknownFormat(path.display().to_string()))
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
