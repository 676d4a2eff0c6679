//! Backend that runs real daemons on this host.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::backend::{ExitStatus, LaunchSpec, Liveness, ProcessBackend, SignalKind};
use crate::error::{ProcessError, Result};

/// Spawns daemons with tokio and signals them with nix.
///
/// Children are kept so exits can be reaped and reported with their status.
/// Processes started by an earlier invocation are probed by pid only.
#[derive(Debug, Default)]
pub struct LocalBackend {
    children: Mutex<HashMap<u32, Child>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<SignalKind> for Signal {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Reload => Signal::SIGHUP,
            SignalKind::Interrupt => Signal::SIGINT,
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        }
    }
}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::Code(code),
        (None, Some(sig)) => ExitStatus::Signaled(sig),
        (None, None) => ExitStatus::Unknown,
    }
}

impl ProcessBackend for LocalBackend {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let spawn_err = |source| ProcessError::Spawn {
            nick: spec.nick.clone(),
            program: spec.program.clone(),
            source,
        };

        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.output_log)
            .map_err(|e| ProcessError::io(&spec.output_log, e))?;
        let err = out
            .try_clone()
            .map_err(|e| ProcessError::io(&spec.output_log, e))?;

        // Own process group: a terminal interrupt aimed at the controller
        // must not reach the daemons.
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0)
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id().ok_or_else(|| {
            spawn_err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "process exited before its pid was read",
            ))
        })?;
        debug!(nick = %spec.nick, pid, program = %spec.program.display(), "spawned");

        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pid, child);
        Ok(pid)
    }

    fn signal(&self, spec: &LaunchSpec, pid: u32, kind: SignalKind) -> Result<()> {
        match kill(Pid::from_raw(pid as i32), Signal::from(kind)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::Signal {
                nick: spec.nick.clone(),
                pid,
                reason: e.to_string(),
            }),
        }
    }

    fn probe(&self, pid: u32) -> Liveness {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(child) = children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => Liveness::Alive,
                Ok(Some(status)) => {
                    children.remove(&pid);
                    Liveness::Exited(exit_status(status))
                }
                Err(_) => {
                    children.remove(&pid);
                    Liveness::Gone
                }
            };
        }
        drop(children);

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
            Err(_) => Liveness::Gone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chutney_topology::NodeId;
    use std::path::Path;
    use std::time::Duration;

    fn spec(dir: &Path, program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            node: NodeId(0),
            nick: "test000a".to_string(),
            launch_phase: 1,
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            dir: dir.to_path_buf(),
            pid_file: dir.join("pid"),
            old_pid_file: dir.join("pid.old"),
            lock_file: dir.join("lock"),
            output_log: dir.join("stdout.log"),
        }
    }

    #[tokio::test]
    async fn reaps_exited_children() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let pid = backend
            .launch(&spec(dir.path(), "sh", &["-c", "echo hi; exit 3"]))
            .unwrap();

        let mut status = backend.probe(pid);
        for _ in 0..50 {
            if status != Liveness::Alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = backend.probe(pid);
        }
        assert_eq!(status, Liveness::Exited(ExitStatus::Code(3)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("stdout.log")).unwrap(),
            "hi\n"
        );
    }

    #[tokio::test]
    async fn signals_running_children() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let s = spec(dir.path(), "sleep", &["30"]);
        let pid = backend.launch(&s).unwrap();
        assert_eq!(backend.probe(pid), Liveness::Alive);

        backend.signal(&s, pid, SignalKind::Kill).unwrap();
        let mut status = backend.probe(pid);
        for _ in 0..50 {
            if status != Liveness::Alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = backend.probe(pid);
        }
        assert_eq!(status, Liveness::Exited(ExitStatus::Signaled(9)));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let dir = tempfile::tempdir().unwrap();
        let err = LocalBackend::new()
            .launch(&spec(dir.path(), "/nonexistent/daemon", &[]))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
