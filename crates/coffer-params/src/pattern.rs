use regex::Regex;

use crate::error::{Error, Result};

/// An ordered list of regular expressions recognising one kind of tool output.
#[derive(Clone, Debug, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    pub fn compile(field: &str, sources: &[String]) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|source| {
                Regex::new(source).map_err(|e| Error::InvalidPattern {
                    field: field.to_string(),
                    pattern: source.clone(),
                    source: e,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(line))
    }

    /// Value of the named group in the first pattern that matches and
    /// captures it.
    pub fn capture(&self, line: &str, group: &str) -> Option<String> {
        self.patterns.iter().find_map(|re| {
            re.captures(line)
                .and_then(|caps| caps.name(group))
                .map(|m| m.as_str().to_string())
        })
    }
}

pub(crate) fn compile_one(field: &str, source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| Error::InvalidPattern {
        field: field.to_string(),
        pattern: source.to_string(),
        source: e,
    })
}

pub(crate) fn compile_opt(field: &str, source: Option<&str>) -> Result<Option<Regex>> {
    source.map(|s| compile_one(field, s)).transpose()
}
