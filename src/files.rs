//! File helpers shared by the actions and the run manifest.
//!
//! Backups live next to the original as `<file>.distro-upgrader.bak`, so a
//! backup taken before the reboot is still found by the run after it. An
//! administrator's own `<file>.bak` is left alone.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

const BACKUP_SUFFIX: &str = ".distro-upgrader.bak";

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `path` to its backup location. A missing file is not backed up.
///
/// Returns whether a backup was written.
pub fn backup_file(path: &Path) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let backup = backup_path(path);
    fs::copy(path, &backup).with_context(|| {
        format!(
            "backing up '{}' to '{}'",
            path.display(),
            backup.display()
        )
    })?;
    Ok(true)
}

/// Move the backup of `path` back into place. A missing backup is a no-op.
///
/// Returns whether a backup was restored.
pub fn restore_file_from_backup(path: &Path) -> Result<bool> {
    let backup = backup_path(path);
    if !backup.is_file() {
        return Ok(false);
    }
    fs::rename(&backup, path).with_context(|| {
        format!(
            "restoring '{}' from '{}'",
            path.display(),
            backup.display()
        )
    })?;
    Ok(true)
}

/// Replace every occurrence of `from` with `to` in a file.
///
/// A missing file is left alone; the file is only rewritten when the content
/// changes.
pub fn replace_string(path: &Path, from: &str, to: &str) -> Result<()> {
    if !path.is_file() {
        return Ok(());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
    if !content.contains(from) {
        return Ok(());
    }
    fs::write(path, content.replace(from, to))
        .with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

/// Append text to a file, creating it if needed.
pub fn append_to_file(path: &Path, text: &str) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening '{}' for append", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("appending to '{}'", path.display()))?;
    Ok(())
}

/// Files directly inside `dir` whose names match any of the glob-like
/// patterns, compared case-insensitively. Only `*` wildcards are supported.
///
/// A missing directory yields no files. Results are sorted by path.
pub fn find_files_case_insensitive(dir: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_ascii_lowercase()).collect();
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("reading directory '{}'", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        if patterns.iter().any(|p| wildcard_match(p, &name)) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return true,
    };
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing JSON payload")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}
