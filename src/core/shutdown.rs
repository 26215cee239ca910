//! # Process outcomes and the single exit routine.
//!
//! Neither controller exits the process. Each returns an [`Outcome`] to `main`,
//! which hands it to [`exit`]: low descriptors are pointed at `/dev/null`, then
//! the process exits with [`Outcome::exit_code`].
//!
//! | Outcome             | Code | When                                        |
//! |---------------------|------|---------------------------------------------|
//! | `Clean`             | 0    | terminate requested, teardown complete      |
//! | `IdentityUnclaimed` | 0    | pidfile already held or not writable        |
//! | `WorkerLost`        | 1    | worker died with respawn disabled           |
//! | `Fatal`             | 2    | allocation, configuration or launch failure |

use std::fmt;
use std::os::fd::AsRawFd;

use nix::unistd::dup2;

/// How a supervisor or worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    IdentityUnclaimed,
    WorkerLost,
    Fatal,
}

impl Outcome {
    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Clean | Outcome::IdentityUnclaimed => 0,
            Outcome::WorkerLost => 1,
            Outcome::Fatal => 2,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Clean => "clean",
            Outcome::IdentityUnclaimed => "identity_unclaimed",
            Outcome::WorkerLost => "worker_lost",
            Outcome::Fatal => "fatal",
        }
    }

    /// Keeps the more severe of two outcomes.
    pub fn escalate(self, other: Outcome) -> Outcome {
        if other.exit_code() > self.exit_code() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Points stdin, stdout and stderr at `/dev/null`.
pub fn close_std_fds() -> std::io::Result<()> {
    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for fd in 0..=2 {
        dup2(null.as_raw_fd(), fd)?;
    }
    Ok(())
}

/// Exits the process with `outcome`'s status.
pub fn exit(outcome: Outcome) -> ! {
    let _ = close_std_fds();
    std::process::exit(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Clean.exit_code(), 0);
        assert_eq!(Outcome::IdentityUnclaimed.exit_code(), 0);
        assert_eq!(Outcome::WorkerLost.exit_code(), 1);
        assert_eq!(Outcome::Fatal.exit_code(), 2);
    }

    #[test]
    fn test_escalate_keeps_most_severe() {
        assert_eq!(Outcome::Clean.escalate(Outcome::WorkerLost), Outcome::WorkerLost);
        assert_eq!(Outcome::Fatal.escalate(Outcome::Clean), Outcome::Fatal);
        assert_eq!(Outcome::WorkerLost.escalate(Outcome::Fatal), Outcome::Fatal);
    }
}
