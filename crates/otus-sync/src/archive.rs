//! Tar/gzip construction, extraction, and mirror-style pruning (§4.2).

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use otus_ignore::{is_protected, CompiledPatterns};
use tar::{Builder, HeaderMode};
use walkdir::WalkDir;

use crate::error::{SyncError, SyncResult};

/// Result of building a push tar: the bytes and how many file entries
/// (not directories) were written.
pub struct BuiltTar {
    /// Gzip-compressed tar bytes.
    pub data: Vec<u8>,
    /// Number of regular files written into the archive.
    pub files_written: usize,
}

/// Build a gzipped tar of `workspace_root`, CWD-relative, with portable
/// (deterministic) headers and no mtimes, skipping protected and
/// ignore-matched paths (§4.2 "Push (to_sandbox)").
///
/// # Errors
/// Returns [`SyncError::Io`] on filesystem failure.
pub fn build_push_tar(
    workspace_root: &Path,
    patterns: &CompiledPatterns,
    ignore_file_name: &str,
) -> SyncResult<BuiltTar> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(gz);
    builder.mode(HeaderMode::Deterministic);

    let mut files_written = 0usize;

    // `filter_entry` prunes descent into a matched directory outright
    // (WalkDir never recurses past an entry the predicate rejects), so an
    // excluded directory's whole subtree is skipped the way `tar
    // --exclude` treats it, rather than relying on per-entry checks that
    // a bare `globset` literal (anchored to the full candidate) would
    // otherwise miss for descendants (end-to-end scenario 2).
    let walker = WalkDir::new(workspace_root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry
                .path()
                .strip_prefix(workspace_root)
                .unwrap_or(entry.path());
            !patterns.is_excluded_or_protected(relative, ignore_file_name)
        });

    for entry in walker {
        let entry = entry.map_err(|e| SyncError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(workspace_root)
            .unwrap_or(entry.path());

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, entry.path())
                .map_err(SyncError::Io)?;
        } else if entry.file_type().is_file() {
            let mut file = fs::File::open(entry.path()).map_err(SyncError::Io)?;
            builder
                .append_file(relative, &mut file)
                .map_err(SyncError::Io)?;
            files_written += 1;
        }
    }

    let gz = builder.into_inner().map_err(SyncError::Io)?;
    let data = gz.finish().map_err(SyncError::Io)?;

    Ok(BuiltTar {
        data,
        files_written,
    })
}

/// The set of relative paths present in an extracted tar, including
/// implicit parent directories, used by the pull's prune phase.
pub type SnapshotSet = BTreeSet<PathBuf>;

/// Extract a gzipped tar received from the guest over `dest_root`
/// (§4.2 "Pull (from_sandbox)").
///
/// Returns the snapshot set of every relative path the archive contained
/// (files, directories, and their implicit ancestors). On any I/O or
/// format failure the caller must NOT run the prune phase — this
/// function itself performs no deletion, only extraction, so a partial
/// write here never removes host data.
///
/// # Errors
/// Returns [`SyncError::MalformedTar`] if the gzip/tar stream cannot be
/// parsed, or [`SyncError::Io`] on extraction failure.
pub fn extract_pull_tar(data: &[u8], dest_root: &Path) -> SyncResult<SnapshotSet> {
    let decoder = GzDecoder::new(data);
    let mut archive = tar::Archive::new(decoder);
    let mut snapshot = SnapshotSet::new();

    let entries = archive
        .entries()
        .map_err(|e| SyncError::MalformedTar(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SyncError::MalformedTar(e.to_string()))?;
        let relative = entry
            .path()
            .map_err(|e| SyncError::MalformedTar(e.to_string()))?
            .to_path_buf();

        register_with_ancestors(&mut snapshot, &relative);

        entry
            .unpack_in(dest_root)
            .map_err(|e| SyncError::Io(e))?;
    }

    Ok(snapshot)
}

fn register_with_ancestors(snapshot: &mut SnapshotSet, relative: &Path) {
    let mut current = PathBuf::new();
    for component in relative.components() {
        current.push(component);
        snapshot.insert(current.clone());
    }
}

/// Walk the host workspace and delete any file or directory not present
/// in `snapshot`, except protected paths, excluded paths, and directories
/// that transitively contain excluded/protected descendants (§4.2
/// "Pull" reconciliation, §8 invariant 5).
///
/// # Errors
/// Returns [`SyncError::Io`] on filesystem failure.
pub fn prune_not_in_snapshot(
    workspace_root: &Path,
    snapshot: &SnapshotSet,
    patterns: &CompiledPatterns,
    ignore_file_name: &str,
) -> SyncResult<()> {
    // Deepest paths first so files are removed before their parent
    // directories are considered.
    let mut entries: Vec<_> = WalkDir::new(workspace_root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|e| std::cmp::Reverse(e.depth()));

    for entry in entries {
        let relative = entry
            .path()
            .strip_prefix(workspace_root)
            .unwrap_or(entry.path())
            .to_path_buf();

        if patterns.is_excluded_or_protected(&relative, ignore_file_name) {
            continue;
        }

        if snapshot.contains(&relative) {
            continue;
        }

        if entry.file_type().is_dir() {
            if has_protected_or_excluded_descendant(entry.path(), workspace_root, patterns, ignore_file_name) {
                continue;
            }
            // Directory may already be non-empty-but-all-children-removed by
            // this same pass (we go deepest-first), so remove_dir is safe;
            // if other children remain (e.g. kept because excluded) leave it.
            let _ = fs::remove_dir(entry.path());
        } else {
            fs::remove_file(entry.path()).map_err(SyncError::Io)?;
        }
    }

    Ok(())
}

fn has_protected_or_excluded_descendant(
    dir: &Path,
    workspace_root: &Path,
    patterns: &CompiledPatterns,
    ignore_file_name: &str,
) -> bool {
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
        let relative = entry
            .path()
            .strip_prefix(workspace_root)
            .unwrap_or(entry.path());
        if patterns.is_excluded_or_protected(relative, ignore_file_name) {
            return true;
        }
    }
    false
}

/// Read an entire file into memory (small helper used by callers building
/// a single-shot tar payload).
pub fn read_to_vec(path: &Path) -> SyncResult<Vec<u8>> {
    let mut buf = Vec::new();
    fs::File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}
