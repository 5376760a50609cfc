//! `#include:` expansion for documents.
//!
//! A line `#include:<relative path>` is replaced by the contents of that file
//! (resolved against the including file's directory), wrapped in banner
//! comments. Every file is included once; repeated include lines are dropped.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

/// Matches one include line; the capture is the referenced path.
pub const INCLUDE_PATTERN: &str = r"(?m)^#include:(.*)$";

/// Matches the `name "<template name>"` declaration of a document.
pub const NAME_PATTERN: &str = r#"(?m)^name\s*"(.*)""#;

const BANNER: &str =
    "###############################################################################";

/// Errors that can occur while preprocessing a document.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid include pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl PreprocessError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PreprocessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// One file pulled in by an include line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// Absolute path of the included file.
    pub path: PathBuf,
    /// Path exactly as written after `#include:`.
    pub reference: String,
}

fn read(path: &Path) -> Result<String, PreprocessError> {
    fs::read_to_string(path).map_err(|e| PreprocessError::io(path, e))
}

fn absolute(path: &Path) -> Result<PathBuf, PreprocessError> {
    fs::canonicalize(path).map_err(|e| PreprocessError::io(path, e))
}

/// Lists every file reachable through include lines, depth first, each once.
pub fn include_list(file: impl AsRef<Path>) -> Result<Vec<Include>, PreprocessError> {
    let pattern = Regex::new(INCLUDE_PATTERN)?;
    let root = absolute(file.as_ref())?;
    let mut includes = Vec::new();
    let mut visiting = vec![root.clone()];
    collect_includes(&pattern, &root, &mut includes, &mut visiting)?;
    Ok(includes)
}

fn collect_includes(
    pattern: &Regex,
    file: &Path,
    includes: &mut Vec<Include>,
    visiting: &mut Vec<PathBuf>,
) -> Result<(), PreprocessError> {
    let contents = read(file)?;
    let dir = file.parent().unwrap_or_else(|| Path::new("."));

    for capture in pattern.captures_iter(&contents) {
        let reference = capture[1].trim_end_matches('\r').to_string();
        let path = absolute(&dir.join(&reference))?;

        // Already listed, or an ancestor of this file: expanding again would loop.
        if includes.iter().any(|i| i.path == path) || visiting.contains(&path) {
            continue;
        }

        includes.push(Include {
            path: path.clone(),
            reference,
        });
        visiting.push(path.clone());
        collect_includes(pattern, &path, includes, visiting)?;
        visiting.pop();
    }

    Ok(())
}

/// Reads `file` and expands all of its includes.
pub fn preprocess(file: impl AsRef<Path>) -> Result<String, PreprocessError> {
    let file = file.as_ref();
    let mut document = read(file)?;

    for include in include_list(file)? {
        let contents = read(&include.path)?;
        let expanded = format!(
            "{BANNER}\n# BEGIN Include from {reference}\n{BANNER}\n{contents}{BANNER}\n# END Include from {reference}\n{BANNER}\n",
            reference = include.reference,
        );
        let line = format!("#include:{}", include.reference);
        document = document.replacen(&line, &expanded, 1);
    }

    let pattern = Regex::new(INCLUDE_PATTERN)?;
    Ok(pattern.replace_all(&document, "").into_owned())
}

/// The name a document declares, used to find it among uploaded templates.
pub fn template_name(source: &str) -> Result<Option<String>, PreprocessError> {
    let pattern = Regex::new(NAME_PATTERN)?;
    Ok(pattern
        .captures(source)
        .map(|c| c[1].to_string())
        .filter(|name| !name.is_empty()))
}
