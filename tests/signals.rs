use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use procvisor::{EventKind, RunLoop, SignalRouter};

#[test]
fn test_disabled_routes_drop_signals_until_reinstalled() {
    let mut rl = RunLoop::create().unwrap();

    let routes = SignalRouter::operator(&rl).unwrap();
    assert!(routes.is_active());
    routes.disable();

    kill(Pid::this(), Signal::SIGHUP).unwrap();
    assert!(rl.next_event_within(Duration::from_millis(300)).is_none());

    let routes = SignalRouter::operator(&rl).unwrap();
    kill(Pid::this(), Signal::SIGHUP).unwrap();
    let ev = rl.next_event_within(Duration::from_secs(5)).unwrap();
    assert_eq!(ev.kind, EventKind::Reload);

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    let ev = rl.next_event_within(Duration::from_secs(5)).unwrap();
    assert_eq!(ev.kind, EventKind::Terminate);

    routes.disable();
    assert!(rl.destroy().is_empty());
}
