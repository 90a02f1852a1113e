use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::mode::OperationMode;
use crate::table::ParameterTable;

/// Values available to an argument template.
#[derive(Clone, Debug, Default)]
pub struct Substitutions {
    pub archive: PathBuf,
    /// Entry paths inside the archive, or file paths relative to the working
    /// directory for add.
    pub files: Vec<String>,
    pub password: Option<String>,
    pub encrypt_header: bool,
    pub preserve_paths: bool,
    pub compression_level: Option<u8>,
    pub compression_method: Option<String>,
    pub encryption_method: Option<String>,
    /// Volume size in kilobytes.
    pub volume_size: Option<u64>,
    /// Old/new entry path pairs for rename-based moves.
    pub destinations: Vec<(String, String)>,
    pub comment_file: Option<PathBuf>,
}

/// A fully expanded invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ParameterTable {
    /// Expand the template for `mode`, resolving the program on `PATH`.
    pub fn command_line(&self, mode: OperationMode, subs: &Substitutions) -> Result<CommandLine> {
        let spec = self.mode(mode)?;
        let program = spec.resolve_program(mode)?;
        Ok(CommandLine {
            program,
            args: self.expand_args(&spec.args, subs),
        })
    }

    /// Expand an argument template. Tokens occupy a whole argument and may
    /// expand to any number of arguments; everything else is passed verbatim.
    pub fn expand_args(&self, template: &[String], subs: &Substitutions) -> Vec<OsString> {
        let mut args = Vec::new();
        for arg in template {
            match arg.as_str() {
                "$Archive" => args.push(subs.archive.as_os_str().to_os_string()),
                "$Files" => args.extend(subs.files.iter().map(|f| self.file_arg(f).into())),
                "$Destinations" => {
                    for (from, to) in &subs.destinations {
                        args.push(self.file_arg(from).into());
                        args.push(self.file_arg(to).into());
                    }
                }
                "$Password" => {
                    if let Some(password) = subs.password.as_deref().filter(|p| !p.is_empty()) {
                        push_switch(&mut args, &self.switches.password, password);
                    }
                }
                "$HeaderEncryption" => {
                    if subs.encrypt_header && subs.password.is_some() {
                        push_switch(&mut args, &self.switches.header_encryption, "");
                    }
                }
                "$PreservePathSwitch" => {
                    let switch = if subs.preserve_paths {
                        &self.switches.preserve_paths
                    } else {
                        &self.switches.flatten_paths
                    };
                    push_switch(&mut args, switch, "");
                }
                "$CompressionLevel" => {
                    if let Some(level) = subs.compression_level {
                        push_switch(&mut args, &self.switches.compression_level, &level.to_string());
                    }
                }
                "$CompressionMethod" => {
                    if let Some(method) = non_empty(&subs.compression_method) {
                        push_switch(&mut args, &self.switches.compression_method, method);
                    }
                }
                "$EncryptionMethod" => {
                    if let Some(method) = non_empty(&subs.encryption_method) {
                        if subs.password.is_some() {
                            push_switch(&mut args, &self.switches.encryption_method, method);
                        }
                    }
                }
                "$VolumeSize" => {
                    if let Some(size) = subs.volume_size {
                        push_switch(&mut args, &self.switches.volume_size, &size.to_string());
                    }
                }
                "$CommentFile" => {
                    if let Some(path) = &subs.comment_file {
                        push_path_switch(&mut args, &self.switches.comment_file, path);
                    }
                }
                literal => args.push(literal.into()),
            }
        }
        args
    }

    /// Escape a file-name argument for the tool and drop a directory's
    /// trailing slash when the tool expects that.
    pub fn file_arg(&self, path: &str) -> String {
        let path = if self.strip_dir_slash && path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        };
        escape_file_name(path, &self.escape)
    }
}

/// Prefix every character listed in `special` with a backslash.
pub fn escape_file_name(name: &str, special: &str) -> String {
    if special.is_empty() {
        return name.to_string();
    }
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if special.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn push_switch(args: &mut Vec<OsString>, template: &[String], value: &str) {
    args.extend(template.iter().map(|part| part.replace("{}", value).into()));
}

fn push_path_switch(args: &mut Vec<OsString>, template: &[String], path: &Path) {
    for part in template {
        match part.split_once("{}") {
            Some((prefix, suffix)) => {
                let mut arg = OsString::from(prefix);
                arg.push(path.as_os_str());
                arg.push(suffix);
                args.push(arg);
            }
            None => args.push(part.into()),
        }
    }
}
