use std::fs;
use std::path::{Component, Path};
use walkdir::WalkDir;

use crate::error::FilesystemError;
use crate::pipeline::{glob_matches, PipelineDefinition};
use crate::transform::{OutputUnit, SourceUnit};

/// Directories never treated as sources
const IGNORED_DIRECTORIES: &[&str] = &["node_modules", ".git", ".svn", ".hg"];

/// ENOSPC on Unix
const DISK_FULL: i32 = 28;

#[inline]
fn in_ignored_directory(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => name
            .to_str()
            .map(|name| IGNORED_DIRECTORIES.contains(&name))
            .unwrap_or(false),
        _ => false,
    })
}

/// Files matching the pipeline's entry glob, sorted by path
pub fn collect_sources(pipeline: &PipelineDefinition) -> Result<Vec<SourceUnit>, FilesystemError> {
    let pattern =
        glob::Pattern::new(&pipeline.source_glob).map_err(|source| FilesystemError::Pattern {
            pattern: pipeline.source_glob.clone(),
            source,
        })?;

    if !pipeline.source_base.exists() {
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(&pipeline.source_base)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&pipeline.source_base).unwrap_or(path);
        if in_ignored_directory(relative) || !glob_matches(&pattern, path) {
            continue;
        }

        sources.push(SourceUnit {
            path: path.to_path_buf(),
            relative: relative.to_path_buf(),
        });
    }

    Ok(sources)
}

/// Write a single file, creating parent directories as needed
pub fn write_file(path: &Path, contents: &[u8]) -> Result<u64, FilesystemError> {
    // Create parent directory if needed
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                if e.raw_os_error() == Some(DISK_FULL) {
                    return FilesystemError::DiskFull {
                        path: parent.to_path_buf(),
                    };
                }
                FilesystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                }
            })?;
        }
    }

    fs::write(path, contents).map_err(|e| {
        if e.raw_os_error() == Some(DISK_FULL) {
            return FilesystemError::DiskFull {
                path: path.to_path_buf(),
            };
        }
        FilesystemError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }
    })?;

    Ok(contents.len() as u64)
}

/// Write outputs below `dest`, returns (files_written, bytes_written)
pub fn write_outputs(dest: &Path, outputs: &[OutputUnit]) -> Result<(u64, u64), FilesystemError> {
    let mut files = 0u64;
    let mut bytes = 0u64;

    for output in outputs {
        bytes += write_file(&dest.join(&output.relative), &output.contents)?;
        files += 1;
    }

    Ok((files, bytes))
}

/// Remove a destination directory and everything in it.
/// Returns false when there was nothing to remove.
pub fn clean_directory(path: &Path) -> Result<bool, FilesystemError> {
    if !path.exists() {
        return Ok(false);
    }

    fs::remove_dir_all(path).map_err(|source| FilesystemError::RemoveFailed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(true)
}
