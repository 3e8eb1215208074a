use std::path::{Path, PathBuf};

use glob::glob;

use crate::PyzigErrorExt;
use crate::error::boxed;

/// A module AST document on disk, read eagerly.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

impl Script {
    pub fn new(path: PathBuf) -> Result<Self, Box<dyn PyzigErrorExt>> {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            boxed(MissingSourceError {
                path: path.clone(),
                reason: e.to_string(),
            })
        })?;
        Ok(Script { name, path, content })
    }

    /// Wrap in-memory text, e.g. a document piped on stdin.
    pub fn from_text(name: &str, content: String) -> Self {
        Script {
            name: name.to_string(),
            path: PathBuf::from(name),
            content,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// The module name used for synthesized identifiers: the file stem,
    /// stripped of a trailing `.py` when the AST file is `x.py.json`.
    pub fn module_name(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());
        stem.strip_suffix(".py").map(str::to_string).unwrap_or(stem)
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Script: {} at {:?}", self.name, self.path)
    }
}

/// Expand a glob pattern into the sorted list of matching files.
///
/// Unreadable entries are skipped with a warning; a malformed pattern is an
/// error.
pub fn discover_sources(pattern: &str) -> Result<Vec<PathBuf>, Box<dyn PyzigErrorExt>> {
    let entries = glob(pattern).map_err(|e| {
        boxed(MissingSourceError {
            path: PathBuf::from(pattern),
            reason: format!("invalid glob pattern: {}", e),
        })
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("skipping unreadable path {:?}: {}", e.path(), e),
        }
    }
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Clone)]
pub struct MissingSourceError {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for MissingSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing source at {:?}: {}", self.path, self.reason)
    }
}

impl std::error::Error for MissingSourceError {}

impl PyzigErrorExt for MissingSourceError {
    fn level(&self) -> crate::Level {
        crate::Level::Error
    }

    fn message(&self) -> String {
        format!("Missing source at {:?}: {}", self.path, self.reason)
    }

    fn issuer(&self) -> String {
        "pyzig.script".to_string()
    }

    fn span(&self) -> Option<crate::location::Span> {
        None
    }

    fn location(&self) -> Option<crate::location::Location> {
        None
    }
}
