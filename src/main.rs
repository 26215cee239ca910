//! procvisor binary: supervisor and worker in one executable.
//!
//! The same binary runs both roles. The supervisor re-executes itself with
//! `PROCVISOR_ROLE=worker`; the single `launch()` call below tells the two apart.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use procvisor::engine::{IdleEngine, TomlConfigParser};
use procvisor::logging::{self, ChannelSpec, LogSink};
use procvisor::{
    Config, FsPidfile, IdentityGuard, Launch, Launched, LifecycleController, Outcome,
    ProcessLauncher, RespawnPolicy, Role, Supervisor, WorkerView,
};

/// procvisor - single-worker daemon supervisor
#[derive(Parser, Debug)]
#[command(name = "procvisor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short = 'f', long, default_value = "/etc/procvisor/procvisor.toml")]
    config: PathBuf,

    /// Pidfile written by the worker
    #[arg(short, long, default_value = "/run/procvisor.pid")]
    pidfile: PathBuf,

    /// Instance name (qualifies log ident and log file)
    #[arg(short, long)]
    instance: Option<String>,

    /// Network namespace (qualifies log ident and log file)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Append log records to this file (qualified per role)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Syslog facility (daemon, user, local0..local7)
    #[arg(short = 'S', long, default_value = "daemon", value_parser = parse_facility)]
    facility: libc::c_int,

    /// Echo log records on the console
    #[arg(short = 'l', long)]
    log_console: bool,

    /// Do not log to syslog
    #[arg(long)]
    no_syslog: bool,

    /// Dump the parsed configuration after each build
    #[arg(short, long)]
    dump_conf: bool,

    /// Exit instead of respawning a dead worker
    #[arg(long)]
    no_respawn: bool,

    /// Seconds between worker death and respawn
    #[arg(long, default_value_t = 1)]
    respawn_delay: u64,

    /// Seconds between watchdog ticks
    #[arg(long, default_value_t = 60)]
    watchdog_interval: u64,

    /// Seconds to wait for the worker to stop before killing it
    #[arg(long, default_value_t = 10)]
    grace: u64,

    /// Run the worker with realtime scheduling
    #[arg(short, long)]
    realtime: bool,
}

fn parse_facility(name: &str) -> Result<libc::c_int, String> {
    logging::facility_from_name(name).ok_or_else(|| format!("unknown syslog facility: {name}"))
}

impl Args {
    fn into_config(self) -> Config {
        let respawn = if self.no_respawn {
            RespawnPolicy::disabled()
        } else {
            RespawnPolicy::after(Duration::from_secs(self.respawn_delay))
        };

        Config {
            config_file: self.config,
            pidfile: self.pidfile,
            instance_name: self.instance,
            network_namespace: self.namespace,
            log_file: self.log_file,
            facility: self.facility,
            log_console: self.log_console,
            no_syslog: self.no_syslog,
            dump_config: self.dump_conf,
            respawn,
            watchdog_interval: Duration::from_secs(self.watchdog_interval),
            grace: Duration::from_secs(self.grace),
            realtime: self.realtime,
            ..Config::default()
        }
    }
}

fn main() {
    let cfg = Args::parse().into_config();
    let sink = LogSink::new();
    logging::init(cfg.log_console, sink.clone());

    let outcome = run(cfg, sink);
    procvisor::exit(outcome);
}

fn run(cfg: Config, sink: LogSink) -> Outcome {
    let mut launcher = match ProcessLauncher::from_env() {
        Ok(launcher) => launcher.with_log_sink(sink.clone()),
        Err(e) => {
            error!(label = e.as_label(), error = %e, "cannot prepare worker launch");
            return Outcome::Fatal;
        }
    };
    if !launcher.is_worker() {
        open_supervisor_channel(&cfg, &sink);
    }

    match launcher.launch() {
        Ok(Launched::Parent(first)) => run_supervisor(cfg, launcher, first, &sink),
        Ok(Launched::Worker(view)) => run_worker(cfg, view, sink),
        Err(e) => {
            error!(label = e.as_label(), error = %e, "cannot launch worker");
            sink.close();
            Outcome::Fatal
        }
    }
}

fn open_supervisor_channel(cfg: &Config, sink: &LogSink) {
    let spec = ChannelSpec {
        ident: cfg.log_ident(),
        syslog: !cfg.no_syslog,
        console: cfg.log_console,
        facility: cfg.facility,
        file: cfg.log_file_for(Role::Supervisor),
    };
    if let Err(e) = sink.open(&spec) {
        error!(label = e.as_label(), error = %e, "supervisor log channel unavailable");
    }
}

fn run_supervisor(
    cfg: Config,
    launcher: ProcessLauncher,
    first: procvisor::WorkerHandle,
    sink: &LogSink,
) -> Outcome {
    let outcome = match Supervisor::new(cfg, launcher) {
        Ok(sup) => sup.run_with(first),
        Err(e) => {
            error!(label = e.as_label(), error = %e, "cannot start supervisor");
            Outcome::Fatal
        }
    };
    sink.close();
    outcome
}

fn run_worker(cfg: Config, view: WorkerView, sink: LogSink) -> Outcome {
    if view.is_orphaned() {
        info!("supervisor gone, worker not started");
        return Outcome::Clean;
    }

    let identity = IdentityGuard::new(cfg.clone(), FsPidfile, sink);
    let mut worker = LifecycleController::new(cfg, IdleEngine, TomlConfigParser, identity);
    worker.execute()
}
