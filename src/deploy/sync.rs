//! Manifest-driven directory sync
//!
//! Copies a build output tree into the deploy directory and keeps a manifest
//! of every file it wrote. On the next run the files listed in the manifest
//! are deleted first, so files that disappeared from the build output also
//! disappear from the deploy branch, while files the tool never wrote (a
//! `CNAME`, other projects' docs) are left alone.
//!
//! All relative paths are resolved against an explicit root, never against
//! the process working directory.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::{DeployError, DeployResult};

/// Default manifest file name, stored inside the deploy directory
pub const MANIFEST_FILE: &str = ".docs-deploy-files";

/// Files written and deleted by one sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Destination paths written this run, followed by the manifest itself
    pub added: Vec<PathBuf>,
    /// Destination paths deleted this run and not written again
    pub removed: Vec<PathBuf>,
}

/// Glob patterns for paths that are never synced.
///
/// Patterns are matched against paths relative to the source (for copies)
/// or to the destination (for manifest entries). A pattern matching a
/// directory excludes everything below it.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> DeployResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let normalized = normalize_pattern(pattern.as_ref());
            if normalized.is_empty() {
                continue;
            }
            let glob = Glob::new(&normalized).map_err(|source| DeployError::InvalidGlob {
                pattern: pattern.as_ref().to_string(),
                source,
            })?;
            builder.add(glob);
            kept.push(normalized);
        }
        let set = builder.build().map_err(|source| DeployError::InvalidGlob {
            pattern: kept.join(", "),
            source,
        })?;
        Ok(Self { set, patterns: kept })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `relative` or any of its ancestors matches a pattern
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let relative = normalize_path(relative);
        relative
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .any(|p| self.set.is_match(p))
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Strip `./` prefixes and trailing separators so patterns line up with relative paths
fn normalize_pattern(pattern: &str) -> String {
    let mut p = pattern.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.trim_end_matches('/').to_string()
}

/// Drop `.` components
fn normalize_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Read a manifest. `Ok(None)` when it does not exist yet.
pub fn read_manifest(path: &Path) -> DeployResult<Option<Vec<PathBuf>>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(
            text.lines()
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DeployError::Io(e)),
    }
}

/// Replace the manifest with `entries` joined by `\n` (no trailing newline).
///
/// The new content is written to a temporary file next to the manifest and
/// renamed over it.
pub fn write_manifest(path: &Path, entries: &[PathBuf]) -> DeployResult<()> {
    let content = entries
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| DeployError::Io(e.error))?;
    Ok(())
}

/// Sync `src` into `dst`, tracking the written files in `manifest`.
///
/// `src`, `dst` and `manifest` are resolved against `root` when relative.
/// The returned paths are `dst` joined with the path relative to `src`, in
/// the same form as `dst` was given, so they can be handed straight to git
/// running in `root`.
///
/// `src` may be a single file, in which case it is copied into `dst`.
pub fn sync(
    root: &Path,
    src: &Path,
    dst: &Path,
    manifest: &Path,
    exclude: &ExcludeSet,
) -> DeployResult<SyncPlan> {
    let abs_src = root.join(src);
    let abs_dst = root.join(dst);
    let abs_manifest = root.join(manifest);

    if !abs_src.exists() {
        return Err(DeployError::InvalidInput(format!(
            "Source `{}` does not exist",
            abs_src.display()
        )));
    }

    let mut removed = remove_previous(root, dst, &abs_manifest, exclude)?;

    let (src_root, entries) = collect_entries(&abs_src, exclude)?;

    fs::create_dir_all(&abs_dst)?;

    let mut added = Vec::new();
    for (relative, is_dir) in entries {
        let target = dst.join(&relative);
        let abs_target = root.join(&target);
        if is_dir {
            fs::create_dir_all(&abs_target)?;
            continue;
        }
        if let Some(parent) = abs_target.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_file(&src_root.join(&relative), &abs_target)?;
        removed.retain(|r| !same_path(r, &target));
        added.push(target);
    }

    write_manifest(&abs_manifest, &added)?;
    info!(
        "Synced {} files into {} ({} removed)",
        added.len(),
        dst.display(),
        removed.len()
    );

    added.push(manifest.to_path_buf());
    Ok(SyncPlan { added, removed })
}

/// Delete the files listed in the previous manifest, returning the ones deleted
fn remove_previous(
    root: &Path,
    dst: &Path,
    abs_manifest: &Path,
    exclude: &ExcludeSet,
) -> DeployResult<Vec<PathBuf>> {
    let Some(previous) = read_manifest(abs_manifest)? else {
        info!(
            "{} doesn't exist. Not removing any files.",
            abs_manifest.display()
        );
        return Ok(Vec::new());
    };

    let mut removed = Vec::new();
    for entry in previous {
        if !is_inside(&entry, dst) {
            warn!(
                "Manifest entry {} is outside {}, skipping",
                entry.display(),
                dst.display()
            );
            continue;
        }
        if let Ok(relative) = normalize_path(&entry).strip_prefix(normalize_path(dst))
            && exclude.is_excluded(relative)
        {
            debug!("Keeping excluded {}", entry.display());
            continue;
        }

        let abs_entry = root.join(&entry);
        match fs::symlink_metadata(&abs_entry) {
            Ok(meta) if meta.is_dir() => {
                warn!("Manifest entry {} is a directory, skipping", entry.display());
            }
            Ok(_) => {
                fs::remove_file(&abs_entry)?;
                removed.push(entry);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File {} doesn't exist.", entry.display());
            }
            Err(e) => return Err(DeployError::Io(e)),
        }
    }
    Ok(removed)
}

/// Non-excluded entries under `abs_src` as `(path relative to the returned root, is_dir)`,
/// sorted by relative path.
fn collect_entries(
    abs_src: &Path,
    exclude: &ExcludeSet,
) -> DeployResult<(PathBuf, Vec<(PathBuf, bool)>)> {
    if !abs_src.is_dir() {
        let src_root = abs_src.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = abs_src
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| DeployError::InvalidInput(format!("Invalid source {}", abs_src.display())))?;
        let entries = if exclude.is_excluded(&name) {
            Vec::new()
        } else {
            vec![(name, false)]
        };
        return Ok((src_root, entries));
    }

    let mut entries = Vec::new();
    let walker = WalkDir::new(abs_src).min_depth(1).into_iter().filter_entry(|e| {
        e.path()
            .strip_prefix(abs_src)
            .map(|rel| !exclude.is_excluded(rel))
            .unwrap_or(true)
    });
    for entry in walker {
        let entry = entry.map_err(|e| {
            DeployError::Io(std::io::Error::other(format!("walking {}: {e}", abs_src.display())))
        })?;
        let relative = entry
            .path()
            .strip_prefix(abs_src)
            .map_err(|e| DeployError::InvalidInput(e.to_string()))?
            .to_path_buf();
        entries.push((relative, entry.file_type().is_dir()));
    }
    entries.sort_by(|a, b| a.0.as_os_str().cmp(b.0.as_os_str()));
    Ok((abs_src.to_path_buf(), entries))
}

/// Copy a file, keeping its permissions and modification time
fn copy_file(from: &Path, to: &Path) -> DeployResult<()> {
    fs::copy(from, to)?;

    let modified = fs::metadata(from).and_then(|m| m.modified());
    let applied = modified.and_then(|time| {
        fs::OpenOptions::new()
            .write(true)
            .open(to)
            .and_then(|f| f.set_modified(time))
    });
    if let Err(e) = applied {
        // Read-only copies cannot be reopened for writing; the content is what matters
        debug!("Could not preserve modification time of {}: {e}", to.display());
    }
    Ok(())
}

/// Recursively copy a directory (or a single file) to `to`
pub fn copy_tree(from: &Path, to: &Path) -> DeployResult<()> {
    if !from.is_dir() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        return copy_file(from, to);
    }

    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            DeployError::Io(std::io::Error::other(format!("walking {}: {e}", from.display())))
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| DeployError::InvalidInput(e.to_string()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Whether `entry` lies below `dst` without `..` components.
///
/// An absolute entry is only accepted for an absolute `dst`.
fn is_inside(entry: &Path, dst: &Path) -> bool {
    let climbs = entry.components().any(|c| c == Component::ParentDir);
    !climbs
        && entry.has_root() == dst.has_root()
        && normalize_path(entry).starts_with(normalize_path(dst))
}

fn same_path(a: &Path, b: &Path) -> bool {
    normalize_path(a) == normalize_path(b)
}
