mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nix::unistd::Pid;
use procvisor::engine::{ConfigStore, Engine, EngineContext, EngineError, TomlConfigParser};
use procvisor::logging::LogSink;
use procvisor::pidfile::{FsPidfile, Pidfile};
use procvisor::{
    is_reloading, Config, ControlHandle, IdentityGuard, LifecycleController, Outcome,
    SupervisorState,
};

use common::Capture;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Alloc { generation: u64, routing: bool, reloading: bool },
    Release(u64),
    Started { generation: u64, pidfile: Option<Pid>, reloading: bool },
}

/// Asks for two reloads, then terminates from its third generation.
struct RecordingEngine {
    steps: Arc<Mutex<Vec<Step>>>,
    control: ControlHandle,
    pidfile: PathBuf,
    next: AtomicU64,
}

struct Generation {
    number: u64,
    interval: Option<i64>,
}

#[async_trait]
impl Engine for RecordingEngine {
    type State = Generation;

    fn name(&self) -> &str {
        "recording"
    }

    fn allocate(&self) -> Result<Generation, EngineError> {
        let number = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.steps.lock().unwrap().push(Step::Alloc {
            generation: number,
            routing: self.control.routing_enabled(),
            reloading: is_reloading(),
        });
        Ok(Generation {
            number,
            interval: None,
        })
    }

    fn complete(&self, state: &mut Generation, store: &ConfigStore) -> Result<(), EngineError> {
        state.interval = store.get("interval_ms").and_then(toml::Value::as_integer);
        match state.interval {
            Some(_) => Ok(()),
            None => Err(EngineError::new("interval_ms missing")),
        }
    }

    async fn startup(&self, state: Arc<Generation>, ctx: EngineContext) -> Result<(), EngineError> {
        self.steps.lock().unwrap().push(Step::Started {
            generation: state.number,
            pidfile: FsPidfile.read(&self.pidfile),
            reloading: is_reloading(),
        });
        if ctx.epoch.get() < 3 {
            ctx.control.request_reload();
        } else {
            ctx.control.request_terminate();
        }
        ctx.token.cancelled().await;
        Ok(())
    }

    fn release(&self, state: Arc<Generation>) {
        self.steps.lock().unwrap().push(Step::Release(state.number));
    }
}

#[test]
fn test_reload_builds_next_generation_before_releasing() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let config_file = dir.path().join("engine.toml");
    std::fs::write(&config_file, "interval_ms = 300\n").unwrap();

    let cfg = Config {
        config_file,
        pidfile: pidfile.clone(),
        no_syslog: true,
        dump_config: true,
        ..Config::default()
    };

    let steps = Arc::new(Mutex::new(Vec::new()));
    let control = ControlHandle::new();
    let engine = RecordingEngine {
        steps: Arc::clone(&steps),
        control: control.clone(),
        pidfile: pidfile.clone(),
        next: AtomicU64::new(0),
    };
    let identity = IdentityGuard::new(cfg.clone(), FsPidfile, LogSink::new());
    let mut worker =
        LifecycleController::new(cfg, engine, TomlConfigParser, identity).with_control(control);

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || worker.execute());

    assert_eq!(outcome, Outcome::Clean);
    assert_eq!(worker.state(), SupervisorState::Stopped);
    assert_eq!(worker.reloads(), 2);
    assert_eq!(worker.epoch().get(), 3);
    assert_eq!(worker.loops_built(), 3);
    assert!(!pidfile.exists());

    let me = Some(Pid::this());
    let steps = steps.lock().unwrap().clone();
    assert_eq!(
        steps,
        vec![
            Step::Alloc { generation: 1, routing: true, reloading: false },
            Step::Started { generation: 1, pidfile: me, reloading: false },
            Step::Alloc { generation: 2, routing: false, reloading: true },
            Step::Release(1),
            Step::Started { generation: 2, pidfile: me, reloading: false },
            Step::Alloc { generation: 3, routing: false, reloading: true },
            Step::Release(2),
            Step::Started { generation: 3, pidfile: me, reloading: false },
            Step::Release(3),
        ]
    );

    let text = logs.text();
    assert_eq!(text.matches("Reload finished in").count(), 2);
    assert!(text.contains("worker stopped"));
}
