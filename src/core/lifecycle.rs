//! # LifecycleController: the worker's start, reload and stop sequences.
//!
//! One long-lived controller per worker process owns the state, the reload
//! epoch, the current runtime-state generation and the current run loop.
//! Transitions run on the owner thread, one event at a time.
//!
//! ## State machine
//! ```text
//! execute()
//!   ├─ identity.claim() ── Err ──────────────────────────────► Outcome::IdentityUnclaimed
//!   ▼
//! STARTING: loop + child routes + operator routes, build generation 1
//!   │  (any failure) ──────────────────────────────────────► STOPPING(Fatal)
//!   ▼
//! RUNNING ◄──────────────────────────────────────┐
//!   │ Reload                                     │
//!   ▼                                            │
//! RELOADING                                      │
//!   1. reloading flag on                         │
//!   2. operator routes off, child routes off     │
//!   3. destroy loop (engine N cancelled)         │
//!   4. fresh loop, child routes on               │
//!   5. build N+1 (N still held)                  │
//!   6. release N                                 │
//!   7. reloading flag off, operator routes on ───┘  "Reload finished in N usec"
//!   │ (any failure) ───────────────────────────────────────► STOPPING(Fatal)
//!   │
//! RUNNING ── Terminate ────────────────────────────────────► STOPPING(Clean)
//!
//! STOPPING: routes off → pidfile → buffer, engine, store → loop → log channel
//! ```
//!
//! ## Rules
//! - Signal routing is the first thing disabled and the last thing re-enabled
//!   around any teardown.
//! - Generation N+1 is fully built before generation N is released.
//! - A `Terminate` pending at loop teardown is carried into the new loop; extra
//!   `Reload`s are dropped.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::control::ControlHandle;
use crate::core::identity::IdentityGuard;
use crate::core::runloop::RunLoop;
use crate::core::shutdown::Outcome;
use crate::core::signals::{ChildTable, SignalRouter, SignalRoutes};
use crate::core::state::{self, ReloadEpoch, ReloadingGuard, SupervisorState};
use crate::engine::{ConfigParser, ConfigStore, Engine, EngineContext, RuntimeState};
use crate::error::StartupError;
use crate::events::{ControlEvent, EventKind};
use crate::pidfile::Pidfile;

/// Worker-side lifecycle driver.
pub struct LifecycleController<E: Engine, C: ConfigParser, P: Pidfile> {
    cfg: Config,
    engine: Arc<E>,
    parser: C,
    identity: IdentityGuard<P>,

    state: SupervisorState,
    epoch: ReloadEpoch,
    runtime: Option<RuntimeState<E::State>>,

    run_loop: Option<RunLoop>,
    operator: Option<SignalRoutes>,
    child_routes: Option<SignalRoutes>,
    children: ChildTable,
    control: ControlHandle,

    loops_built: u64,
    reloads: u64,
}

impl<E: Engine, C: ConfigParser, P: Pidfile> LifecycleController<E, C, P> {
    /// Creates a controller in `Starting`; nothing is claimed or allocated yet.
    pub fn new(cfg: Config, engine: E, parser: C, identity: IdentityGuard<P>) -> Self {
        Self {
            cfg,
            engine: Arc::new(engine),
            parser,
            identity,
            state: SupervisorState::Starting,
            epoch: ReloadEpoch::ZERO,
            runtime: None,
            run_loop: None,
            operator: None,
            child_routes: None,
            children: ChildTable::new(),
            control: ControlHandle::new(),
            loops_built: 0,
            reloads: 0,
        }
    }

    /// Uses `control` as the controller's request handle.
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Generation currently served (`ZERO` before the first build).
    pub fn epoch(&self) -> ReloadEpoch {
        self.epoch
    }

    /// Number of run loops created so far.
    pub fn loops_built(&self) -> u64 {
        self.loops_built
    }

    /// Number of completed reloads.
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// Request handle following the current run loop.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Children of the worker whose exits are routed to its loop.
    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    /// Runs the worker to completion.
    pub fn execute(&mut self) -> Outcome {
        state::clear_reloading();

        if let Err(e) = self.identity.claim() {
            warn!(label = e.as_label(), error = %e, "identity not claimed, exiting");
            self.identity.release();
            self.state = SupervisorState::Stopped;
            return Outcome::IdentityUnclaimed;
        }

        let outcome = match self.boot() {
            Ok(()) => self.serve(),
            Err(e) => {
                error!(label = e.as_label(), error = %e, "worker startup failed");
                Outcome::Fatal
            }
        };
        self.stop(outcome)
    }

    fn boot(&mut self) -> Result<(), StartupError> {
        if let Err(e) = SignalRouter::ignore_broken_pipe() {
            warn!(error = %e, "cannot ignore SIGPIPE");
        }
        let rl = self.fresh_loop()?;
        self.operator = Some(SignalRouter::operator(&rl).map_err(StartupError::Signals)?);
        self.control.set_routing(true);

        let first = self.epoch.next();
        let generation = self.build(&rl, first)?;
        self.runtime = Some(generation);
        self.epoch = first;
        self.run_loop = Some(rl);

        self.state = SupervisorState::Running;
        info!(engine = self.engine.name(), epoch = %self.epoch, "worker started");
        Ok(())
    }

    fn serve(&mut self) -> Outcome {
        loop {
            let Some(ev) = self.run_loop.as_mut().and_then(RunLoop::next_event) else {
                error!("run loop lost its queue");
                return Outcome::Fatal;
            };

            match ev.kind {
                EventKind::Reload => {
                    if let Err(e) = self.reload() {
                        error!(label = e.as_label(), error = %e, "reload failed");
                        return Outcome::Fatal;
                    }
                }
                EventKind::Terminate => {
                    info!(seq = ev.seq, "terminate requested");
                    return Outcome::Clean;
                }
                EventKind::Child => {
                    debug!(pid = ?ev.pid, exit = ?ev.exit, "child notification");
                }
                EventKind::Respawn | EventKind::GraceExpired => {
                    debug!(kind = ev.kind.as_label(), "event not handled by the worker");
                }
            }
        }
    }

    fn reload(&mut self) -> Result<(), StartupError> {
        let started = Instant::now();
        let reloading = ReloadingGuard::set();
        self.state = SupervisorState::Reloading;
        info!(epoch = %self.epoch, "Reloading");

        self.disable_routing();

        let carried = match self.run_loop.take() {
            Some(rl) => carry_over(rl.destroy()),
            None => Vec::new(),
        };

        let rl = self.fresh_loop()?;
        let queue = rl.queue();
        for ev in carried {
            queue.publish(ev);
        }

        let next = self.epoch.next();
        let generation = self.build(&rl, next)?;
        if let Some(old) = self.runtime.replace(generation) {
            self.release_generation(old);
        }
        self.epoch = next;
        self.run_loop = Some(rl);

        drop(reloading);
        if let Some(rl) = self.run_loop.as_ref() {
            self.operator = Some(SignalRouter::operator(rl).map_err(StartupError::Signals)?);
            self.control.set_routing(true);
        }

        self.reloads += 1;
        self.state = SupervisorState::Running;
        let usec = started.elapsed().as_micros() as u64;
        info!(epoch = %self.epoch, usec, "Reload finished in {usec} usec");
        Ok(())
    }

    fn stop(&mut self, outcome: Outcome) -> Outcome {
        self.state = SupervisorState::Stopping;
        info!(outcome = %outcome, epoch = %self.epoch, "stopping worker");

        self.disable_routing();
        self.identity.release_token();
        if let Some(generation) = self.runtime.take() {
            self.release_generation(generation);
        }
        if let Some(rl) = self.run_loop.take() {
            let pending = rl.destroy();
            if !pending.is_empty() {
                debug!(pending = pending.len(), "events dropped at stop");
            }
        }
        info!(outcome = %outcome, "worker stopped");
        self.identity.release();

        self.state = SupervisorState::Stopped;
        outcome
    }

    /// Operator routes first, then child routes.
    fn disable_routing(&mut self) {
        if let Some(routes) = self.operator.take() {
            routes.disable();
        }
        self.control.set_routing(false);
        if let Some(routes) = self.child_routes.take() {
            routes.disable();
        }
        self.control.detach();
    }

    /// New loop with child routes armed and the control handle attached.
    fn fresh_loop(&mut self) -> Result<RunLoop, StartupError> {
        let rl = RunLoop::create().map_err(StartupError::RunLoop)?;
        self.loops_built += 1;
        self.child_routes =
            Some(SignalRouter::children(&rl, &self.children).map_err(StartupError::Signals)?);
        self.control.attach(rl.queue());
        Ok(rl)
    }

    /// Allocates, parses, completes and schedules one generation on `rl`.
    fn build(
        &self,
        rl: &RunLoop,
        epoch: ReloadEpoch,
    ) -> Result<RuntimeState<E::State>, StartupError> {
        let mut store = ConfigStore::new();
        let mut engine_state = self.engine.allocate().map_err(StartupError::Allocate)?;
        let buffer = vec![0u8; self.cfg.buffer_len().unwrap_or(0)];

        self.parser
            .parse_into(self.cfg.config_path(), &mut store)?;
        self.engine
            .complete(&mut engine_state, &store)
            .map_err(StartupError::Complete)?;
        if self.cfg.dump_config {
            self.engine.dump(&engine_state);
        }

        let engine_state = Arc::new(engine_state);
        let ctx = EngineContext {
            token: rl.token(),
            control: self.control.clone(),
            epoch,
        };
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&engine_state);
        rl.spawn("engine", async move {
            if let Err(e) = engine.startup(shared, ctx).await {
                error!(engine = engine.name(), epoch = %epoch, error = %e, "engine stopped with error");
            }
        });
        debug!(epoch = %epoch, keys = store.len(), "runtime state built");

        Ok(RuntimeState {
            epoch,
            store,
            engine: engine_state,
            buffer,
        })
    }

    /// Releases in reverse acquisition order: buffer, engine state, store.
    fn release_generation(&self, generation: RuntimeState<E::State>) {
        let RuntimeState {
            epoch,
            store,
            engine,
            buffer,
        } = generation;
        drop(buffer);
        self.engine.release(engine);
        drop(store);
        debug!(epoch = %epoch, "runtime state released");
    }
}

/// Events that survive a loop teardown: at most one `Terminate`.
fn carry_over(pending: Vec<ControlEvent>) -> Vec<ControlEvent> {
    let mut carried: Vec<ControlEvent> = Vec::new();
    for ev in pending {
        match ev.kind {
            EventKind::Terminate if !carried.iter().any(ControlEvent::is_terminate) => {
                carried.push(ev);
            }
            EventKind::Reload => info!(seq = ev.seq, "duplicate reload request dropped"),
            kind => debug!(kind = kind.as_label(), seq = ev.seq, "pending event dropped with run loop"),
        }
    }
    carried
}
