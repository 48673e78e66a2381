//! Filesystem side of promotion
//!
//! Surveys plate directories and copies them into the visit archive. Source
//! trees are only ever read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Image files found directly in a plate directory
#[derive(Debug, Clone)]
pub struct DirectorySurvey {
    /// Regular files, sorted by name
    pub files: Vec<PathBuf>,
    /// Newest modification time among the files, or of the directory itself
    /// when it holds none
    pub newest: SystemTime,
}

impl DirectorySurvey {
    pub fn count(&self) -> usize {
        self.files.len()
    }

    /// Time since the newest file arrived (zero if the clock is behind it)
    pub fn age(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.newest).unwrap_or_default()
    }
}

/// Immediate subdirectory names of a source root, sorted
pub fn list_plate_directories(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !follow(&entry.path())?.map_or(false, |m| m.is_dir()) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => {
                tracing::debug!(directory = ?name, "Skipping non UTF-8 directory name");
            }
        }
    }

    names.sort();
    Ok(names)
}

/// Metadata of `path` with symlinks followed; `None` for a dangling link
fn follow(path: &Path) -> io::Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Skipping dangling link");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Count the regular files in a plate directory and find the newest one
pub fn survey_directory(directory: &Path) -> io::Result<DirectorySurvey> {
    let mut files = Vec::new();
    let mut newest: Option<SystemTime> = None;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let Some(metadata) = follow(&entry.path())?.filter(|m| m.is_file()) else {
            continue;
        };

        let modified = metadata.modified()?;
        newest = Some(newest.map_or(modified, |n| n.max(modified)));
        files.push(entry.path());
    }

    let newest = match newest {
        Some(newest) => newest,
        None => fs::metadata(directory)?.modified()?,
    };

    files.sort();
    Ok(DirectorySurvey { files, newest })
}

/// Hidden sibling the copy is assembled in before it is renamed into place
pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.staging", name))
}

/// Recursively copy `source` to `destination`
///
/// Symlinks are followed; the archive receives their targets' contents.
///
/// The tree is written to a staging directory first and renamed once
/// complete, so `destination` either does not exist or holds the whole plate.
/// A staging directory left by an interrupted copy is discarded.
pub fn copy_tree_staged(source: &Path, destination: &Path) -> io::Result<u64> {
    let staging = staging_path(destination);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if staging.exists() {
        tracing::warn!(staging = %staging.display(), "Discarding interrupted copy");
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    let mut copied = 0u64;
    for entry in WalkDir::new(source).min_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map_or(false, |err| err.kind() == io::ErrorKind::NotFound) => {
                tracing::debug!(error = %e, "Skipping dangling link");
                continue;
            }
            Err(e) => return Err(io::Error::from(e)),
        };
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = staging.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    fs::rename(&staging, destination)?;
    Ok(copied)
}
