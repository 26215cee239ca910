//! # Pidfile collaborator.
//!
//! A pidfile holds one decimal pid followed by a newline. [`FsPidfile`] refuses
//! to overwrite a file whose recorded pid is a live process other than the
//! caller, and reclaims a stale one. Parent directories are never created: a
//! missing directory is a claim failure.
//!
//! ```text
//! write(path, pid):
//!   .path.new.*  ── complete file ──► hard_link(path)        (EEXIST: someone holds it)
//!                                        │ exists
//!                                        ▼
//!                   holder live ──► refuse
//!                   holder stale ──► rename(path, .path.stale.*) ──► link again (once)
//! ```
//!
//! Linking and renaming are atomic, so of two concurrent claimants at most one
//! succeeds, and a reader never sees a half-written file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

static SIDE_FILES: AtomicU64 = AtomicU64::new(0);

/// Pidfile operations used by the identity guard.
pub trait Pidfile: Send {
    /// Writes `pid` to `path`. Returns `false` if the file could not be claimed.
    fn write(&self, path: &Path, pid: Pid) -> bool;

    /// Removes `path`; a missing file is not an error.
    fn remove(&self, path: &Path);

    /// Reads the pid recorded in `path`, if any.
    fn read(&self, path: &Path) -> Option<Pid>;
}

/// Filesystem pidfile with stale-holder detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPidfile;

impl FsPidfile {
    /// Unique sibling of `path` (same directory, so links and renames stay local).
    fn side_path(path: &Path, tag: &str, pid: Pid) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let seq = SIDE_FILES.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!(".{name}.{tag}.{pid}.{seq}"))
    }

    fn create(path: &Path, pid: Pid) -> io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{pid}")?;
        file.sync_all()
    }

    /// Links a fully written file into place; `AlreadyExists` if `path` is taken.
    fn publish(path: &Path, pid: Pid) -> io::Result<()> {
        let staged = Self::side_path(path, "new", pid);
        let linked = Self::create(&staged, pid).and_then(|()| std::fs::hard_link(&staged, path));
        let _ = std::fs::remove_file(&staged);
        linked
    }

    /// Moves the file at `path` aside. Returns `false` (and puts the file back)
    /// when it no longer records `stale`.
    fn evict(&self, path: &Path, stale: Option<Pid>, pid: Pid) -> io::Result<bool> {
        let aside = Self::side_path(path, "stale", pid);
        match std::fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        }

        let moved = self.read(&aside);
        let evicted = moved == stale;
        if !evicted {
            let _ = std::fs::hard_link(&aside, path);
        }
        let _ = std::fs::remove_file(&aside);
        Ok(evicted)
    }
}

impl Pidfile for FsPidfile {
    fn write(&self, path: &Path, pid: Pid) -> bool {
        for attempt in 0..2 {
            let err = match Self::publish(path, pid) {
                Ok(()) => return true,
                Err(e) => e,
            };
            if err.kind() != io::ErrorKind::AlreadyExists || attempt > 0 {
                warn!(path = %path.display(), error = %err, "cannot write pidfile");
                return false;
            }

            let holder = self.read(path);
            match holder {
                Some(holder) if holder == pid => return true,
                Some(holder) if is_alive(holder) => {
                    warn!(path = %path.display(), holder = %holder, "pidfile held by a live process");
                    return false;
                }
                _ => debug!(path = %path.display(), holder = ?holder, "reclaiming stale pidfile"),
            }

            match self.evict(path, holder, pid) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(path = %path.display(), "pidfile claimed concurrently");
                    return false;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot reclaim stale pidfile");
                    return false;
                }
            }
        }
        false
    }

    fn remove(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "pidfile removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove pidfile"),
        }
    }

    fn read(&self, path: &Path) -> Option<Pid> {
        let text = std::fs::read_to_string(path).ok()?;
        let raw = text.trim().parse::<i32>().ok()?;
        (raw > 0).then(|| Pid::from_raw(raw))
    }
}

/// Liveness probe: `kill(pid, 0)`. EPERM means the process exists.
pub fn is_alive(pid: Pid) -> bool {
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.pid");
        let me = Pid::this();

        assert!(FsPidfile.write(&path, me));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{me}\n"));
        assert_eq!(FsPidfile.read(&path), Some(me));

        FsPidfile.remove(&path);
        assert!(!path.exists());
        FsPidfile.remove(&path);
    }

    #[test]
    fn test_stale_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");

        let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
        let dead = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();
        std::fs::write(&path, format!("{dead}\n")).unwrap();

        assert!(FsPidfile.write(&path, Pid::this()));
        assert_eq!(FsPidfile.read(&path), Some(Pid::this()));
    }

    #[test]
    fn test_live_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("held.pid");
        let mut child = std::process::Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let holder = Pid::from_raw(child.id() as i32);
        std::fs::write(&path, format!("{holder}\n")).unwrap();

        assert!(!FsPidfile.write(&path, Pid::this()));
        assert_eq!(FsPidfile.read(&path), Some(holder));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        use std::sync::{Arc, Barrier};

        let dir = tempfile::tempdir().unwrap();
        let mut sleepers: Vec<_> = (0..2)
            .map(|_| std::process::Command::new("/bin/sleep").arg("30").spawn().unwrap())
            .collect();
        let pids: Vec<Pid> = sleepers
            .iter()
            .map(|c| Pid::from_raw(c.id() as i32))
            .collect();

        for round in 0..200 {
            let path = dir.path().join(format!("race-{round}.pid"));
            let barrier = Arc::new(Barrier::new(2));
            let claims: Vec<_> = pids
                .iter()
                .map(|&pid| {
                    let path = path.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        (pid, FsPidfile.write(&path, pid))
                    })
                })
                .collect();
            let winners: Vec<Pid> = claims
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&(_, won)| won)
                .map(|(pid, _)| pid)
                .collect();

            assert_eq!(winners.len(), 1, "round {round}: {winners:?}");
            assert_eq!(FsPidfile.read(&path), Some(winners[0]));
        }

        for sleeper in &mut sleepers {
            sleeper.kill().unwrap();
            sleeper.wait().unwrap();
        }
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_reclaim_by_same_pid_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mine.pid");
        assert!(FsPidfile.write(&path, Pid::this()));
        assert!(FsPidfile.write(&path, Pid::this()));
        assert_eq!(FsPidfile.read(&path), Some(Pid::this()));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/worker.pid");
        assert!(!FsPidfile.write(&path, Pid::this()));
        assert!(!path.exists());
    }
}
