//! Write-then-rename helpers so a step never leaves a half-written artifact
//! that a later run would mistake for a materialized output.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".partial");
    path.with_file_name(name)
}

/// Creates the parent directory of `path` and returns the staging path.
pub(crate) fn prepare(path: &Path) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(partial_path(path))
}

pub(crate) fn commit(partial: &Path, path: &Path) -> io::Result<()> {
    fs::rename(partial, path)
}
