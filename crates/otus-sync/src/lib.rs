//! Bidirectional workspace synchroniser: ignore-aware tar push/pull and
//! mirror-style reconciliation between the host and a sandbox's
//! `/workspace` (§4.2).

mod archive;
mod error;
mod sync;

pub use archive::{build_push_tar, extract_pull_tar, prune_not_in_snapshot, BuiltTar, SnapshotSet};
pub use error::{SyncError, SyncResult};
pub use sync::{sync_from_sandbox, sync_to_sandbox, PullReport, PushReport, SYNC_TIMEOUT};

#[cfg(test)]
mod tests {
    use super::*;
    use otus_ignore::IgnorePatterns;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scenario_2_tar_exclude_listing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), b"hi").unwrap();
        fs::write(dir.path().join("test.tmp"), b"tmp").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/package.json"), b"{}").unwrap();

        let patterns = IgnorePatterns::parse("*.tmp\nnode_modules\n");
        let compiled = patterns.compile().unwrap();

        let built = build_push_tar(dir.path(), &compiled, ".otusignore").unwrap();
        assert_eq!(built.files_written, 1);

        let decoder = flate2::read::GzDecoder::new(built.data.as_slice());
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["README.md".to_string()]);
    }

    #[test]
    fn scenario_6_mirror_pull_reconciliation() {
        let host = TempDir::new().unwrap();
        fs::write(host.path().join("a.py"), b"old").unwrap();
        fs::write(host.path().join("b.py"), b"to be removed").unwrap();
        fs::create_dir(host.path().join(".git")).unwrap();
        fs::write(host.path().join(".git/cfg"), b"cfg").unwrap();

        // Build the "guest" tar: a.py (modified) and c.py (created).
        let guest = TempDir::new().unwrap();
        fs::write(guest.path().join("a.py"), b"new").unwrap();
        fs::write(guest.path().join("c.py"), b"created").unwrap();
        let patterns = IgnorePatterns::parse(".git\n");
        let compiled = patterns.compile().unwrap();
        let built = build_push_tar(guest.path(), &compiled, ".otusignore").unwrap();

        let snapshot = extract_pull_tar(&built.data, host.path()).unwrap();
        prune_not_in_snapshot(host.path(), &snapshot, &compiled, ".otusignore").unwrap();

        assert_eq!(fs::read_to_string(host.path().join("a.py")).unwrap(), "new");
        assert_eq!(fs::read_to_string(host.path().join("c.py")).unwrap(), "created");
        assert!(!host.path().join("b.py").exists());
        assert_eq!(fs::read_to_string(host.path().join(".git/cfg")).unwrap(), "cfg");
    }

    #[test]
    fn push_then_pull_round_trip_is_byte_equal() {
        let workspace = TempDir::new().unwrap();
        fs::write(workspace.path().join("main.rs"), b"fn main() {}").unwrap();
        fs::create_dir(workspace.path().join("src")).unwrap();
        fs::write(workspace.path().join("src/lib.rs"), b"pub fn f() {}").unwrap();

        let patterns = IgnorePatterns::empty();
        let compiled = patterns.compile().unwrap();
        let built = build_push_tar(workspace.path(), &compiled, ".otusignore").unwrap();

        let restored_root = TempDir::new().unwrap();
        let snapshot = extract_pull_tar(&built.data, restored_root.path()).unwrap();
        prune_not_in_snapshot(restored_root.path(), &snapshot, &compiled, ".otusignore").unwrap();

        assert_eq!(
            fs::read(workspace.path().join("main.rs")).unwrap(),
            fs::read(restored_root.path().join("main.rs")).unwrap()
        );
        assert_eq!(
            fs::read(workspace.path().join("src/lib.rs")).unwrap(),
            fs::read(restored_root.path().join("src/lib.rs")).unwrap()
        );
    }
}
