mod common;

use std::process::Command;
use std::time::Duration;

use nix::unistd::Pid;
use procvisor::{
    Config, Launch, LaunchError, Launched, Outcome, RespawnPolicy, Supervisor, WorkerHandle,
};

use common::Capture;

struct CrashingLauncher {
    launched: u64,
}

impl Launch for CrashingLauncher {
    fn launch(&mut self) -> Result<Launched, LaunchError> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .map_err(|source| LaunchError::Spawn { source })?;
        self.launched += 1;
        Ok(Launched::Parent(WorkerHandle::new(
            Pid::from_raw(child.id() as i32),
            self.launched,
        )))
    }
}

#[test]
fn test_disabled_policy_terminates_with_failure() {
    let cfg = Config {
        respawn: RespawnPolicy::disabled(),
        grace: Duration::from_secs(5),
        ..Config::default()
    };
    let sup = Supervisor::new(cfg, CrashingLauncher { launched: 0 }).unwrap();

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || sup.run());

    assert_eq!(outcome, Outcome::WorkerLost);
    assert_ne!(outcome.exit_code(), 0);

    let text = logs.text();
    assert!(text.contains("died: Exiting"));
    assert!(!text.contains("Respawning"));
    assert!(text.contains("supervisor stopped"));
}
