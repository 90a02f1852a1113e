use std::path::PathBuf;

/// How entries land on disk during extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub preserve_paths: bool,
    /// Extraction triggered by dropping entries onto a directory.
    pub drag_and_drop: bool,
    pub always_use_temp_dir: bool,
    /// The archive is known to be encrypted; ask for a password up front.
    pub encrypted_archive_hint: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            preserve_paths: true,
            drag_and_drop: false,
            always_use_temp_dir: false,
            encrypted_archive_hint: false,
        }
    }
}

impl ExtractionOptions {
    pub fn preserve_paths(mut self, preserve: bool) -> Self {
        self.preserve_paths = preserve;
        self
    }

    pub fn drag_and_drop(mut self, enabled: bool) -> Self {
        self.drag_and_drop = enabled;
        self
    }

    pub fn always_use_temp_dir(mut self, enabled: bool) -> Self {
        self.always_use_temp_dir = enabled;
        self
    }

    pub fn encrypted_archive_hint(mut self, encrypted: bool) -> Self {
        self.encrypted_archive_hint = encrypted;
        self
    }

    /// Whether extraction goes through a hidden staging directory that is
    /// merged into the destination afterwards.
    pub fn uses_staging(&self) -> bool {
        self.drag_and_drop || self.always_use_temp_dir
    }
}

/// Settings for operations that write an archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompressionOptions {
    /// 0 (store) to 9 (maximum).
    pub level: Option<u8>,
    pub method: Option<String>,
    /// Split size in kilobytes.
    pub volume_size: Option<u64>,
    pub encryption_method: Option<String>,
    /// Base directory relative file arguments are resolved against.
    pub global_work_dir: Option<PathBuf>,
}

impl CompressionOptions {
    pub fn level(mut self, level: u8) -> Self {
        self.level = Some(level.min(9));
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn volume_size(mut self, kilobytes: u64) -> Self {
        self.volume_size = Some(kilobytes);
        self
    }

    pub fn encryption_method(mut self, method: impl Into<String>) -> Self {
        self.encryption_method = Some(method.into());
        self
    }

    pub fn global_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_work_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_defaults_preserve_paths() {
        let options = ExtractionOptions::default();
        assert!(options.preserve_paths);
        assert!(!options.uses_staging());
        assert!(options.drag_and_drop(true).uses_staging());
        assert!(ExtractionOptions::default().always_use_temp_dir(true).uses_staging());
    }

    #[test]
    fn compression_level_is_clamped() {
        let options = CompressionOptions::default().level(12).method("LZMA2");
        assert_eq!(options.level, Some(9));
        assert_eq!(options.method.as_deref(), Some("LZMA2"));
    }
}
