//! Storage layer: YAML metadata documents, append-only metric logs, file
//! system helpers.
//!
//! Nothing here caches: every read goes back to disk, so concurrent readers
//! always observe the latest committed state.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::models::Metric;

/// Fixed filename of the metadata document inside an entity directory.
pub const META_DATA_FILE_NAME: &str = "meta.yaml";

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Names of directories directly under `root`, sorted.
pub fn list_subdirs(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Relative paths of all files under `root`, recursively, sorted.
///
/// Param/metric/tag keys may contain path separators and are stored as nested
/// files, so the key of each entry is exactly its path relative to `root`.
pub fn list_keys(root: &Path) -> Result<Vec<String>> {
    let mut keys = vec![];
    if root.exists() {
        collect_keys(root, root, &mut keys)?;
    }
    keys.sort();
    Ok(keys)
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

// ─── Metadata codec ──────────────────────────────────────────────────────────

/// Write `data` as the directory's metadata document.
///
/// Whole-file replace: the document is first written to a temp file in the
/// same directory and then renamed over the target, so a concurrent reader
/// never observes a half-written document.
pub fn save_meta<T: Serialize>(dir: &Path, data: &T) -> Result<()> {
    if !dir.is_dir() {
        return Err(StoreError::MissingConfig(format!(
            "Parent directory '{}' does not exist.",
            dir.display()
        )));
    }
    let content = serde_yaml::to_string(data)?;
    let tmp = dir.join(format!(".{}.tmp", META_DATA_FILE_NAME));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, dir.join(META_DATA_FILE_NAME))?;
    Ok(())
}

/// Read the directory's metadata document back. An absent or unparsable
/// document is a [`StoreError::MissingConfig`].
pub fn load_meta<T: DeserializeOwned>(dir: &Path) -> Result<T> {
    let path = dir.join(META_DATA_FILE_NAME);
    if !path.is_file() {
        return Err(StoreError::MissingConfig(format!(
            "Metadata file '{}' does not exist.",
            path.display()
        )));
    }
    let content = fs::read_to_string(&path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        StoreError::MissingConfig(format!("Malformed metadata file '{}': {e}", path.display()))
    })
}

// ─── Append-only metric log ──────────────────────────────────────────────────

/// Append one sample as a `<timestamp> <step> <value>` line. Existing lines
/// are never rewritten; duplicate samples are legal.
pub fn append_metric_line(metrics_dir: &Path, metric: &Metric) -> Result<()> {
    let path = metrics_dir.join(&metric.key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{} {} {}", metric.timestamp, metric.step, metric.value)?;
    Ok(())
}

/// Replay a metric log into its full sample history, in file order.
///
/// Two-field lines (`<timestamp> <value>`) predate step tracking and parse
/// with step 0.
pub fn read_metric_history(metrics_dir: &Path, key: &str) -> Result<Vec<Metric>> {
    let path = metrics_dir.join(key);
    if !path.is_file() {
        return Err(StoreError::ResourceDoesNotExist(format!(
            "Metric '{key}' not found"
        )));
    }
    let content = fs::read_to_string(&path)?;
    let mut samples = vec![];
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let sample = parse_metric_line(key, line).ok_or_else(|| {
            StoreError::MissingConfig(format!(
                "Malformed line '{line}' in metric file '{}'",
                path.display()
            ))
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

fn parse_metric_line(key: &str, line: &str) -> Option<Metric> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [timestamp, value] => Some(Metric::new(key, value.parse().ok()?, timestamp.parse().ok()?, 0)),
        [timestamp, step, value] => Some(Metric::new(
            key,
            value.parse().ok()?,
            timestamp.parse().ok()?,
            step.parse().ok()?,
        )),
        _ => None,
    }
}

/// The current value of a metric: the sample with the maximal
/// `(step, timestamp, value)` tuple, independent of insertion order.
pub fn max_metric(samples: Vec<Metric>) -> Option<Metric> {
    samples.into_iter().max_by(|a, b| {
        (a.step, a.timestamp)
            .cmp(&(b.step, b.timestamp))
            .then(a.value.total_cmp(&b.value))
    })
}

// ─── Key and path validation ─────────────────────────────────────────────────

/// Param/metric/tag keys are used verbatim as paths relative to their folder,
/// so the only constraint is filesystem-path ambiguity, not a charset.
pub fn validate_key(kind: &str, key: &str) -> Result<()> {
    validate_relative_path(key).map_err(|reason| {
        StoreError::InvalidParameterValue(format!("Invalid {kind} key '{key}': {reason}"))
    })
}

/// Check that `path` is a clean relative path: not absolute, no `.` or `..`
/// segments, already in normalized form, and not empty (which would collapse
/// to the containing root). Shared between the store's key validation and the
/// artifact repository's destination-path validation.
pub fn validate_relative_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("path resolves to the root itself".to_string());
    }
    let p = Path::new(path);
    let mut normalized = PathBuf::new();
    for component in p.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => return Err("path contains a '.' segment".to_string()),
            Component::ParentDir => return Err("path contains a '..' segment".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("path is absolute".to_string())
            }
        }
    }
    if normalized.as_os_str() != p.as_os_str() {
        return Err("path is not in normalized form".to_string());
    }
    Ok(())
}

/// Write a raw key/value file, creating containing directories for keys with
/// path separators. Overwrites an existing value.
pub fn write_kv(dir: &Path, key: &str, value: &str) -> Result<()> {
    let path = dir.join(key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, value)?;
    Ok(())
}

/// Read every key/value file under `dir` into a sorted mapping.
pub fn read_kv_dir(dir: &Path) -> Result<std::collections::BTreeMap<String, String>> {
    let mut out = std::collections::BTreeMap::new();
    for key in list_keys(dir)? {
        let value = fs::read_to_string(dir.join(&key))?;
        out.insert(key, value);
    }
    Ok(out)
}
