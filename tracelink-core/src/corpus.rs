use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{ConfigError, ScanOptions};

/// Bytes inspected when deciding whether a file is binary
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// A text file taken from the scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the scan root, `/`-separated
    pub path: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Fatal errors while collecting the corpus
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("root directory does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("cannot read root directory {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no files found under {0}")]
    NoFiles(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Collects every readable text file under `root`, sorted by path.
///
/// Returns `ScanError::NoFiles` when nothing is collected; callers that accept
/// an empty corpus match on it.
pub fn collect_files(root: &Path, options: &ScanOptions) -> Result<Vec<SourceFile>, ScanError> {
    if !root.exists() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::RootNotDirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(|source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let excludes = build_exclude_set(&options.exclude)?;
    let exclude_dirs: BTreeSet<&str> = options.exclude_dirs.iter().map(|d| d.as_str()).collect();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !exclude_dirs.contains(name.as_ref())
        });

    let mut candidates: Vec<(PathBuf, String)> = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = relative_path(root, entry.path());
        if excludes.is_match(&rel_path) {
            debug!("Excluded {}", rel_path);
            continue;
        }

        match entry.metadata() {
            Ok(metadata) if metadata.len() > options.max_file_bytes => {
                debug!("Skipping {} ({} bytes)", rel_path, metadata.len());
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {}: {}", rel_path, e);
                continue;
            }
        }

        candidates.push((entry.into_path(), rel_path));
    }

    // Read in parallel; collect keeps walk order
    let files: Vec<SourceFile> = candidates
        .par_iter()
        .filter_map(|(path, rel_path)| read_text_file(path, rel_path))
        .collect();

    if files.is_empty() {
        return Err(ScanError::NoFiles(root.to_path_buf()));
    }

    debug!("Collected {} files under {}", files.len(), root.display());
    Ok(files)
}

fn build_exclude_set(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidGlob {
        pattern: patterns.join(", "),
        source,
    })
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_text_file(path: &Path, rel_path: &str) -> Option<SourceFile> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping unreadable file {}: {}", rel_path, e);
            return None;
        }
    };

    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        debug!("Skipping binary file {}", rel_path);
        return None;
    }

    let contents = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Some(SourceFile::new(rel_path, contents))
}
