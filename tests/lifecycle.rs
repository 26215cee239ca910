mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use procvisor::engine::{ConfigStore, Engine, EngineContext, EngineError, TomlConfigParser};
use procvisor::logging::LogSink;
use procvisor::{Config, FsPidfile, IdentityGuard, LifecycleController, Outcome, SupervisorState};

use common::Capture;

/// Counts allocations; optionally refuses them.
struct CountingEngine {
    allocations: Arc<AtomicU32>,
    refuse: bool,
}

#[async_trait]
impl Engine for CountingEngine {
    type State = ();

    fn name(&self) -> &str {
        "counting"
    }

    fn allocate(&self) -> Result<(), EngineError> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(EngineError::new("out of memory"));
        }
        Ok(())
    }

    fn complete(&self, _state: &mut (), _store: &ConfigStore) -> Result<(), EngineError> {
        Ok(())
    }

    async fn startup(&self, _state: Arc<()>, ctx: EngineContext) -> Result<(), EngineError> {
        ctx.control.request_terminate();
        ctx.token.cancelled().await;
        Ok(())
    }
}

fn worker(
    cfg: Config,
    refuse: bool,
) -> (
    LifecycleController<CountingEngine, TomlConfigParser, FsPidfile>,
    Arc<AtomicU32>,
) {
    let allocations = Arc::new(AtomicU32::new(0));
    let engine = CountingEngine {
        allocations: Arc::clone(&allocations),
        refuse,
    };
    let identity = IdentityGuard::new(cfg.clone(), FsPidfile, LogSink::new());
    (
        LifecycleController::new(cfg, engine, TomlConfigParser, identity),
        allocations,
    )
}

#[test]
fn test_unclaimed_pidfile_exits_quietly_without_run_loop() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        pidfile: dir.path().join("no/such/dir/worker.pid"),
        config_file: dir.path().join("engine.toml"),
        no_syslog: true,
        ..Config::default()
    };
    let (mut worker, allocations) = worker(cfg, false);

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || worker.execute());

    assert_eq!(outcome, Outcome::IdentityUnclaimed);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(worker.state(), SupervisorState::Stopped);
    assert_eq!(worker.loops_built(), 0);
    assert_eq!(allocations.load(Ordering::SeqCst), 0);
    assert!(logs.text().contains("identity not claimed"));
}

#[test]
fn test_allocation_failure_is_fatal_and_releases_identity() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let cfg = Config {
        pidfile: pidfile.clone(),
        config_file: dir.path().join("engine.toml"),
        no_syslog: true,
        ..Config::default()
    };
    let (mut worker, allocations) = worker(cfg, true);

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || worker.execute());

    assert_eq!(outcome, Outcome::Fatal);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(worker.state(), SupervisorState::Stopped);
    assert_eq!(allocations.load(Ordering::SeqCst), 1);
    assert!(!pidfile.exists());
    assert!(logs.text().contains("worker startup failed"));
}

#[test]
fn test_unopenable_log_file_still_runs_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let cfg = Config {
        pidfile: pidfile.clone(),
        config_file: dir.path().join("engine.toml"),
        log_file: Some(dir.path().join("missing/dir/w.log")),
        no_syslog: true,
        ..Config::default()
    };
    let (mut worker, allocations) = worker(cfg, false);

    let logs = Capture::default();
    let outcome = tracing::subscriber::with_default(logs.subscriber(), || worker.execute());

    assert_eq!(outcome, Outcome::Clean);
    assert_eq!(worker.loops_built(), 1);
    assert_eq!(allocations.load(Ordering::SeqCst), 1);
    assert!(!pidfile.exists());
    assert!(logs.text().contains("log file unavailable"));
}
