//! Fresh nodes directory per configure run.
//!
//! Each configure creates `nodes.<unix-seconds>` under the data root and
//! points the `nodes` symlink at it. Earlier runs stay on disk untouched.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use chutney_topology::NODES_DIR;

use crate::error::{RenderError, Result};

/// First free `nodes.<secs>` or `nodes.<secs>.<n>` path.
fn unique_dir(data_root: &Path, secs: u64) -> PathBuf {
    let base = data_root.join(format!("{NODES_DIR}.{secs}"));
    let mut candidate = base.clone();
    let mut n = 0;
    while candidate.symlink_metadata().is_ok() {
        n += 1;
        candidate = PathBuf::from(format!("{}.{}", base.display(), n));
    }
    candidate
}

/// Create a new uniquely named nodes directory and repoint the `nodes`
/// symlink at it. A legacy real `nodes` directory is moved aside first.
pub fn create_nodes_dir(data_root: &Path, now: SystemTime) -> Result<PathBuf> {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    fs::create_dir_all(data_root).map_err(|e| RenderError::io(data_root, e))?;

    let link = data_root.join(NODES_DIR);
    if let Ok(meta) = link.symlink_metadata() {
        if !meta.file_type().is_symlink() {
            let aside = unique_dir(data_root, secs.saturating_sub(1));
            info!(from = %link.display(), to = %aside.display(), "moving aside old nodes directory");
            fs::rename(&link, &aside).map_err(|e| RenderError::io(&link, e))?;
        }
    }

    let fresh = unique_dir(data_root, secs);
    info!(dir = %fresh.display(), link = %link.display(), "creating nodes directory");
    fs::create_dir_all(&fresh).map_err(|e| RenderError::io(&fresh, e))?;

    match fs::remove_file(&link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RenderError::io(&link, e)),
    }
    let target = fresh.canonicalize().map_err(|e| RenderError::io(&fresh, e))?;
    symlink(&target, &link).map_err(|e| RenderError::NodesDir {
        path: link.clone(),
        reason: e.to_string(),
    })?;
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn repoints_link_and_keeps_old_runs() {
        let root = tempfile::tempdir().unwrap();
        let first = create_nodes_dir(root.path(), at(1000)).unwrap();
        fs::write(first.join("marker"), "x").unwrap();

        let second = create_nodes_dir(root.path(), at(1000)).unwrap();
        assert_eq!(second, root.path().join("nodes.1000.1"));
        assert!(first.join("marker").exists());

        let link = root.path().join(NODES_DIR);
        assert_eq!(
            fs::read_link(&link).unwrap(),
            second.canonicalize().unwrap()
        );
    }

    #[test]
    fn legacy_directory_is_moved_aside() {
        let root = tempfile::tempdir().unwrap();
        let legacy = root.path().join(NODES_DIR);
        fs::create_dir(&legacy).unwrap();
        fs::write(legacy.join("torrc"), "old").unwrap();

        let fresh = create_nodes_dir(root.path(), at(2000)).unwrap();
        assert_eq!(fresh, root.path().join("nodes.2000"));
        assert_eq!(
            fs::read_to_string(root.path().join("nodes.1999").join("torrc")).unwrap(),
            "old"
        );
        assert!(legacy.symlink_metadata().unwrap().file_type().is_symlink());
    }
}
