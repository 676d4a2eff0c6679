//! Pid and lock file handling.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

use crate::backend::LaunchSpec;
use crate::error::{ProcessError, Result};

/// Pid recorded in `path`, if the file exists and holds one.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(text) => match text.trim().parse() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!(path = %path.display(), "ignoring malformed pid file");
                Ok(None)
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProcessError::io(path, e)),
    }
}

pub fn write_pid(path: &Path, pid: u32) -> Result<()> {
    fs::write(path, format!("{pid}\n")).map_err(|e| ProcessError::io(path, e))
}

/// After the process is gone: move the pid file aside so nothing signals the
/// pid again, and drop a stale lock file. Missing files are fine.
pub fn retire(spec: &LaunchSpec) -> Result<()> {
    if spec.pid_file.exists() {
        debug!(nick = %spec.nick, "renaming stale pid file");
        fs::rename(&spec.pid_file, &spec.old_pid_file)
            .map_err(|e| ProcessError::io(&spec.pid_file, e))?;
    }
    match fs::remove_file(&spec.lock_file) {
        Ok(()) => {
            debug!(nick = %spec.nick, "removed stale lock file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProcessError::io(&spec.lock_file, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_or_missing_pid_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        assert_eq!(read_pid(&path).unwrap(), None);

        fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid(&path).unwrap(), None);

        write_pid(&path, 1234).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(1234));
    }
}
