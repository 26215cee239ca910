mod common;

use std::process::Command;
use std::time::Duration;

use nix::unistd::Pid;
use procvisor::{
    Config, ControlEvent, Launch, LaunchError, Launched, Outcome, RespawnPolicy, Supervisor,
    WorkerHandle,
};

use common::Capture;

struct ShellLauncher {
    script: &'static str,
    launched: u64,
}

impl Launch for ShellLauncher {
    fn launch(&mut self) -> Result<Launched, LaunchError> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(self.script)
            .spawn()
            .map_err(|source| LaunchError::Spawn { source })?;
        self.launched += 1;
        Ok(Launched::Parent(WorkerHandle::new(
            Pid::from_raw(child.id() as i32),
            self.launched,
        )))
    }
}

fn supervisor(script: &'static str, respawn: RespawnPolicy) -> Supervisor<ShellLauncher> {
    let cfg = Config {
        respawn,
        grace: Duration::from_secs(5),
        ..Config::default()
    };
    Supervisor::new(cfg, ShellLauncher { script, launched: 0 }).unwrap()
}

#[test]
fn test_reload_after_terminate_is_ignored() {
    let sup = supervisor("sleep 30", RespawnPolicy::default());
    let queue = sup.queue();
    queue.publish(ControlEvent::terminate());
    queue.publish(ControlEvent::reload());

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || sup.run());

    assert_eq!(outcome, Outcome::Clean);
    let text = logs.text();
    assert!(text.contains("reload ignored while stopping"));
    assert!(!text.contains("forwarding reload to worker"));
}

#[test]
fn test_reload_without_live_worker_is_ignored() {
    // The worker dies at once; the respawn stays pending long enough for
    // the reload to find no worker.
    let sup = supervisor("exit 0", RespawnPolicy::after(Duration::from_secs(5)));
    let queue = sup.queue();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        queue.publish(ControlEvent::reload());
        std::thread::sleep(Duration::from_millis(200));
        queue.publish(ControlEvent::terminate());
    });

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || sup.run());

    assert_eq!(outcome, Outcome::Clean);
    let text = logs.text();
    assert!(text.contains("died: Respawning"));
    assert!(text.contains("reload ignored: no live worker"));
    assert!(text.contains("launches=1"));
}
