//! Expands a test pattern into the documents it names.

use std::path::{Component, Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use thiserror::Error;

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Error)]
#[error("Invalid test pattern {pattern}: {source}")]
pub struct DiscoverError {
    pub pattern: String,
    #[source]
    pub source: ignore::Error,
}

/// Splits a pattern at its first component containing a glob character.
///
/// `tests/cats/**/*.cat.rb` becomes (`tests/cats`, `**/*.cat.rb`). A pattern
/// without glob characters has no glob part.
pub fn split_pattern(pattern: &str) -> (PathBuf, Option<String>) {
    let mut base = PathBuf::new();
    let mut glob: Vec<String> = Vec::new();

    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if glob.is_empty() && !text.contains(GLOB_CHARS) {
            match component {
                Component::CurDir if base.as_os_str().is_empty() => {}
                _ => base.push(component.as_os_str()),
            }
        } else {
            glob.push(text.into_owned());
        }
    }

    let glob = (!glob.is_empty()).then(|| glob.join("/"));
    (base, glob)
}

/// Lists the files matching `pattern`, sorted.
///
/// A literal file path yields itself, a literal directory every file below
/// it. Glob parts use gitignore syntax and are anchored at the literal
/// prefix. Hidden and ignored files are not skipped.
pub fn find_documents(pattern: &str) -> Result<Vec<PathBuf>, DiscoverError> {
    let (base, glob) = split_pattern(pattern);
    let relative = base.as_os_str().is_empty();
    let root = if relative { PathBuf::from(".") } else { base };

    if glob.is_none() && root.is_file() {
        return Ok(vec![root]);
    }
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut walker = WalkBuilder::new(&root);
    walker.standard_filters(false);

    if let Some(glob) = glob {
        let overrides = OverrideBuilder::new(&root)
            .add(&format!("/{}", glob))
            .and_then(|builder| builder.build())
            .map_err(|source| DiscoverError {
                pattern: pattern.to_string(),
                source,
            })?;
        walker.overrides(overrides);
    }

    let mut documents: Vec<PathBuf> = walker
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| {
            let path = entry.into_path();
            if relative {
                path.strip_prefix(".").map(Path::to_path_buf).unwrap_or(path)
            } else {
                path
            }
        })
        .collect();

    documents.sort();
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn names(root: &Path, paths: Vec<PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_split_pattern() {
        assert_eq!(
            split_pattern("tests/cats/**/*.cat.rb"),
            (PathBuf::from("tests/cats"), Some("**/*.cat.rb".to_string()))
        );
        assert_eq!(
            split_pattern("*.cat.rb"),
            (PathBuf::new(), Some("*.cat.rb".to_string()))
        );
        assert_eq!(
            split_pattern("./single.cat.rb"),
            (PathBuf::from("single.cat.rb"), None)
        );
    }

    #[test]
    fn test_glob_is_anchored_and_sorted() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.cat.rb");
        touch(temp.path(), "a.cat.rb");
        touch(temp.path(), "notes.txt");
        touch(temp.path(), "nested/c.cat.rb");

        let pattern = format!("{}/*.cat.rb", temp.path().display());
        let found = names(temp.path(), find_documents(&pattern).unwrap());
        assert_eq!(found, vec!["a.cat.rb", "b.cat.rb"]);

        let pattern = format!("{}/**/*.cat.rb", temp.path().display());
        let found = names(temp.path(), find_documents(&pattern).unwrap());
        assert_eq!(found, vec!["a.cat.rb", "b.cat.rb", "nested/c.cat.rb"]);
    }

    #[test]
    fn test_literal_paths() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "one.cat.rb");
        touch(temp.path(), "dir/two.cat.rb");

        let file = temp.path().join("one.cat.rb");
        assert_eq!(find_documents(&file.to_string_lossy()).unwrap(), vec![file]);

        let dir = temp.path().join("dir");
        let found = names(temp.path(), find_documents(&dir.to_string_lossy()).unwrap());
        assert_eq!(found, vec!["dir/two.cat.rb"]);

        let missing = temp.path().join("missing");
        assert!(find_documents(&missing.to_string_lossy()).unwrap().is_empty());
    }
}
