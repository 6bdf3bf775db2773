use crate::config::SupervisorConfig;
use crate::discovery::{self, Discovered, ServiceDescriptor, SkipReason};
use crate::error::{CorralError, Result};
use crate::health::{self, ProbeTarget};
use crate::logs::LogManager;
use crate::process::monitor::ResourceMonitor;
use crate::process::ports::PortAllocator;
use crate::process::restart::{RestartPolicy, RestartTracker};
use crate::process::signals::{self, Delivery};
use crate::process::spawner::{spawn_service, SpawnOptions, SpawnedProcess};
use crate::process::types::{
    BulkResult, CrashReport, ManagedProcess, ProcessRecord, ProcessStatus, ServiceStatus,
    StopOutcome,
};
use crate::state::PidTable;
use nix::sys::signal::Signal;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;

/// Interval between liveness polls while starting or stopping
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for a process group to vanish after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Tolerance when matching a persisted start time against the OS
const START_TIME_SLACK_SECS: i64 = 5;

/// Services found by a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub services: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Outcome of reconciling the PID table with the OS on startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Live processes taken over from a previous daemon
    pub adopted: Vec<String>,
    /// Entries whose process was gone; marked crashed and dropped
    pub stale: Vec<String>,
}

/// A running service as seen by the observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningService {
    pub name: String,
    pub pid: u32,
    pub port: u16,
}

/// Single owner of every service's process record.
///
/// All mutation goes through `&mut self`; the daemon keeps one instance
/// behind a mutex so IPC commands and probe cycles are serialized.
pub struct Supervisor {
    config: SupervisorConfig,
    allocator: PortAllocator,
    spawn_options: SpawnOptions,
    services: BTreeMap<String, ServiceDescriptor>,
    processes: BTreeMap<String, ManagedProcess>,
    /// Every port assignment handed out, persisted with the PID table
    ports: BTreeMap<String, u16>,
    /// Records loaded from the PID table, waiting for `reconcile`
    loaded: BTreeMap<String, ProcessRecord>,
    restart_policy: RestartPolicy,
    trackers: HashMap<String, RestartTracker>,
    table: PidTable,
    logs: Option<LogManager>,
    monitor: ResourceMonitor,
    reported_skips: HashSet<(String, SkipReason)>,
}

impl Supervisor {
    /// Create a supervisor, loading the PID table at `table_path`.
    ///
    /// An unreadable table is logged and ignored; the supervisor starts with
    /// no records and overwrites it on the next save.
    pub fn new(config: SupervisorConfig, table_path: &Path, logs: Option<LogManager>) -> Self {
        let table = PidTable::new(table_path);
        let (loaded, ports) = match table.load() {
            Ok(file) => (file.records, file.ports),
            Err(e) => {
                tracing::error!("Ignoring unreadable PID table {}: {}", table_path.display(), e);
                (BTreeMap::new(), BTreeMap::new())
            }
        };

        let spawn_options = SpawnOptions {
            host: config.host.clone(),
            host_var: config.host_env.clone(),
            port_var: config.port_env.clone(),
            extra_env: config.env.clone(),
            capture_output: logs.is_some(),
        };

        Self {
            allocator: PortAllocator::new(config.base_port),
            restart_policy: RestartPolicy::from_config(&config.restart),
            config,
            spawn_options,
            services: BTreeMap::new(),
            processes: BTreeMap::new(),
            ports,
            loaded,
            trackers: HashMap::new(),
            table,
            logs,
            monitor: ResourceMonitor::new(),
            reported_skips: HashSet::new(),
        }
    }

    /// Scan the services root and (re)assign ports.
    ///
    /// Skipped directories are logged once per distinct reason. Running
    /// services keep the port they were started with.
    pub fn discover(&mut self) -> Result<DiscoveryReport> {
        let found = discovery::scan(
            &self.config.services_root,
            &self.config.entrypoints,
            &self.config.disabled,
        )?;

        let mut report = DiscoveryReport::default();
        let mut services = Vec::new();
        for item in found {
            match item {
                Discovered::Service(service) => services.push(service),
                Discovered::Skip { name, path, reason } => {
                    if self.reported_skips.insert((name.clone(), reason.clone())) {
                        let error = CorralError::DiscoveryError(format!(
                            "skipping {}: {}",
                            path.display(),
                            reason
                        ));
                        tracing::warn!("{}", error);
                    }
                    report.skipped.push((name, reason));
                }
            }
        }

        let names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let reserved: BTreeMap<String, u16> = self
            .processes
            .iter()
            .filter(|(_, managed)| managed.record.status.is_active())
            .map(|(name, managed)| (name.clone(), managed.record.port))
            .collect();
        let assigned = self.allocator.assign(&names, &self.ports, &reserved)?;

        self.services = services
            .into_iter()
            .map(|mut service| {
                service.port = assigned.get(&service.name).copied().unwrap_or(0);
                (service.name.clone(), service)
            })
            .collect();
        self.ports.extend(assigned);

        tracing::info!(
            "Discovered {} service(s), skipped {}",
            names.len(),
            report.skipped.len()
        );
        report.services = names;
        self.persist();
        Ok(report)
    }

    /// Check records loaded from the PID table against live OS processes.
    ///
    /// Live processes are adopted as running. Entries whose PID is gone, or
    /// now belongs to a process started at a different time, are marked
    /// crashed, logged and removed.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (name, mut record) in std::mem::take(&mut self.loaded) {
            self.ports.insert(name.clone(), record.port);

            if record.status.is_active() && self.is_same_process(&record) {
                tracing::info!("Adopted {} (pid {}) from previous run", name, record.pid);
                record.status = ProcessStatus::Running;
                self.processes.insert(name.clone(), ManagedProcess::adopted(record));
                report.adopted.push(name);
            } else {
                tracing::warn!(
                    "Process {} (pid {}) recorded as {} is gone; marked crashed and removed",
                    name,
                    record.pid,
                    record.status
                );
                report.stale.push(name);
            }
        }

        self.persist();
        report
    }

    fn is_same_process(&mut self, record: &ProcessRecord) -> bool {
        if !signals::pid_alive(record.pid) {
            return false;
        }
        match self.monitor.start_time(record.pid) {
            Some(started) => {
                let recorded = record.started_at.timestamp();
                (started as i64 - recorded).abs() <= START_TIME_SLACK_SECS
            }
            None => false,
        }
    }

    /// Start a known, enabled service that is not running.
    ///
    /// The record is `starting` until the process has stayed alive for the
    /// startup grace period (and, if configured, accepts connections on its
    /// port). A process that exits or never becomes live within the startup
    /// timeout is killed, and no record is left behind.
    ///
    /// # Returns
    /// * `Ok(ProcessRecord)` - The running record
    /// * `Err(CorralError::StartError)` - Spawn failed or startup timed out
    pub async fn start(&mut self, name: &str) -> Result<ProcessRecord> {
        let service = self
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| CorralError::ServiceNotFound(name.to_string()))?;

        if !service.enabled {
            return Err(CorralError::StartError(
                name.to_string(),
                "service is disabled".to_string(),
            ));
        }

        if self
            .processes
            .get(name)
            .is_some_and(|p| p.record.status.is_active())
        {
            return Err(CorralError::AlreadyRunning(name.to_string()));
        }

        let previous = self.processes.remove(name);
        let restarts = previous.as_ref().map(|p| p.record.restarts).unwrap_or(0);

        let mut spawned = match spawn_service(&service, &self.spawn_options) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.restore(name, previous);
                return Err(e);
            }
        };

        if let (Some(logs), Some(child)) = (&self.logs, spawned.child_mut()) {
            if let Err(e) = logs.attach(name, child).await {
                tracing::warn!("Output of {} will not be captured: {}", name, e);
            }
        }

        let mut record = ProcessRecord::new(name.to_string(), spawned.pid, service.port);
        record.restarts = restarts;
        self.processes
            .insert(name.to_string(), ManagedProcess::adopted(record.clone()));
        self.persist();

        if let Err(e) = self.await_startup(&service, &mut spawned).await {
            tracing::error!("{}", e);
            self.processes.remove(name);
            discard(spawned).await;
            self.restore(name, previous);
            return Err(e);
        }

        record.status = ProcessStatus::Running;
        if let Some(managed) = self.processes.get_mut(name) {
            managed.child = spawned.disarm();
            managed.mark_running();
        }
        self.persist();

        tracing::info!(
            "Started {} (pid {}) on port {}",
            name,
            record.pid,
            record.port
        );
        Ok(record)
    }

    async fn await_startup(&self, service: &ServiceDescriptor, spawned: &mut SpawnedProcess) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let begun = Instant::now();
        let deadline = begun + timeout;
        let live_after = begun + self.config.startup_grace().min(timeout);

        loop {
            if let Some(child) = spawned.child_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        return Err(CorralError::StartError(
                            service.name.clone(),
                            format!("exited during startup ({})", describe_exit(status)),
                        ))
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Err(CorralError::StartError(
                            service.name.clone(),
                            format!("failed to poll process: {}", e),
                        ))
                    }
                }
            }

            let now = Instant::now();
            if now >= live_after
                && (!self.config.wait_for_port
                    || health::port_open(&self.config.host, service.port, POLL_INTERVAL).await)
            {
                return Ok(());
            }

            if now >= deadline {
                return Err(CorralError::StartError(
                    service.name.clone(),
                    format!("not live within {:?}", timeout),
                ));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn restore(&mut self, name: &str, previous: Option<ManagedProcess>) {
        if let Some(mut previous) = previous {
            previous.restart_due = None;
            self.processes.insert(name.to_string(), previous);
        }
        self.persist();
    }

    /// Stop a service. Stopping a service with no live process is a no-op.
    ///
    /// # Returns
    /// * `Ok(StopOutcome)` - Stopped now, or was already stopped
    /// * `Err(CorralError::StopError)` - The process survived SIGTERM and SIGKILL
    pub async fn stop(&mut self, name: &str, graceful: bool) -> Result<StopOutcome> {
        if !self.services.contains_key(name) && !self.processes.contains_key(name) {
            return Err(CorralError::ServiceNotFound(name.to_string()));
        }

        self.stop_many(vec![name.to_string()], graceful)
            .await
            .pop()
            .map(|(_, result)| result)
            .unwrap_or(Ok(StopOutcome::AlreadyStopped))
    }

    /// Stop several services sharing one shutdown deadline.
    ///
    /// Every group is signalled first, then waited on, then stragglers are
    /// force-killed, so total time is bounded by one timeout rather than one
    /// per service.
    async fn stop_many(
        &mut self,
        names: Vec<String>,
        graceful: bool,
    ) -> Vec<(String, Result<StopOutcome>)> {
        let mut results = Vec::new();
        let mut signalled = Vec::new();
        let first = if graceful { Signal::SIGTERM } else { Signal::SIGKILL };

        for name in names {
            let Some(managed) = self.processes.get_mut(&name) else {
                results.push((name, Ok(StopOutcome::AlreadyStopped)));
                continue;
            };

            if !managed.record.status.is_active() {
                self.processes.remove(&name);
                results.push((name, Ok(StopOutcome::AlreadyStopped)));
                continue;
            }

            managed.mark_stopping();
            managed.restart_due = None;
            let pid = managed.pid();
            tracing::info!("Stopping {} (pid {}) with {}", name, pid, first);

            match signals::signal_group(pid, first) {
                Ok(Delivery::Delivered) | Ok(Delivery::Gone) => signalled.push(name),
                Err(e) => {
                    managed.mark_running();
                    results.push((name.clone(), Err(CorralError::StopError(name, e.to_string()))));
                }
            }
        }
        self.persist();

        let wait = if graceful {
            self.config.shutdown_timeout()
        } else {
            KILL_WAIT
        };
        let deadline = Instant::now() + wait;

        let mut survivors = Vec::new();
        for name in signalled {
            let Some(managed) = self.processes.get_mut(&name) else {
                continue;
            };
            match wait_for_exit(managed.pid(), managed.child.as_mut(), deadline).await {
                Some(code) => {
                    self.finish_stop(&name, code);
                    results.push((name, Ok(StopOutcome::Stopped { exit_code: code })));
                }
                None => survivors.push(name),
            }
        }

        if !survivors.is_empty() {
            let deadline = Instant::now() + KILL_WAIT;
            for name in &survivors {
                if let Some(managed) = self.processes.get(name) {
                    tracing::warn!(
                        "{} did not exit within {:?}, sending SIGKILL",
                        name,
                        wait
                    );
                    let _ = signals::signal_group(managed.pid(), Signal::SIGKILL);
                }
            }

            for name in survivors {
                let Some(managed) = self.processes.get_mut(&name) else {
                    continue;
                };
                match wait_for_exit(managed.pid(), managed.child.as_mut(), deadline).await {
                    Some(code) => {
                        self.finish_stop(&name, code);
                        results.push((name, Ok(StopOutcome::Stopped { exit_code: code })));
                    }
                    None => {
                        managed.mark_running();
                        let error = CorralError::StopError(
                            name.clone(),
                            "process survived SIGTERM and SIGKILL".to_string(),
                        );
                        tracing::error!("{}", error);
                        results.push((name, Err(error)));
                    }
                }
            }
        }

        self.persist();
        results
    }

    fn finish_stop(&mut self, name: &str, exit_code: Option<i32>) {
        if let Some(managed) = self.processes.remove(name) {
            // Leftover members of the group get no second chance
            if signals::group_alive(managed.pid()) {
                let _ = signals::signal_group(managed.pid(), Signal::SIGKILL);
            }
            tracing::info!(
                "Stopped {} (pid {}, exit {})",
                name,
                managed.pid(),
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            );
        }
    }

    /// Stop then start, as one operation under the caller's exclusive borrow
    pub async fn restart(&mut self, name: &str, graceful: bool) -> Result<ProcessRecord> {
        if !self.services.contains_key(name) {
            return Err(CorralError::ServiceNotFound(name.to_string()));
        }

        let restarts = self.processes.get(name).map(|p| p.record.restarts);
        self.stop(name, graceful).await?;
        let record = self.start(name).await?;

        match restarts {
            Some(count) => Ok(self.bump_restarts(name, count + 1).unwrap_or(record)),
            None => Ok(record),
        }
    }

    fn bump_restarts(&mut self, name: &str, count: usize) -> Option<ProcessRecord> {
        let managed = self.processes.get_mut(name)?;
        managed.record.restarts = count;
        let record = managed.record.clone();
        self.persist();
        Some(record)
    }

    /// Status rows for one service or all known services, with a live
    /// CPU/memory snapshot for running ones
    pub async fn status(&mut self, name: Option<&str>) -> Result<Vec<ServiceStatus>> {
        let names: Vec<String> = match name {
            Some(name) => {
                if !self.services.contains_key(name) && !self.processes.contains_key(name) {
                    return Err(CorralError::ServiceNotFound(name.to_string()));
                }
                vec![name.to_string()]
            }
            None => self
                .services
                .keys()
                .chain(self.processes.keys())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        let pids: Vec<u32> = names
            .iter()
            .filter_map(|n| self.processes.get(n))
            .filter(|p| p.record.status.is_active())
            .map(|p| p.pid())
            .collect();
        let snapshots = self.monitor.sample_settled(&pids).await;

        Ok(names
            .into_iter()
            .map(|name| {
                let descriptor = self.services.get(&name);
                let enabled = descriptor.map(|d| d.enabled).unwrap_or(true);
                let port = descriptor
                    .map(|d| d.port)
                    .or_else(|| self.ports.get(&name).copied())
                    .unwrap_or(0);

                match self.processes.get(&name) {
                    Some(managed) => {
                        let record = &managed.record;
                        let active = record.status.is_active();
                        let snapshot = snapshots.get(&record.pid).filter(|_| active);
                        ServiceStatus {
                            name,
                            status: record.status,
                            pid: active.then_some(record.pid),
                            port: record.port,
                            uptime_secs: record.uptime_secs(),
                            cpu_percent: snapshot.map(|s| s.cpu_percent).unwrap_or(0.0),
                            memory_percent: snapshot.map(|s| s.memory_percent).unwrap_or(0.0),
                            restarts: record.restarts,
                            last_exit_code: record.last_exit_code,
                            enabled,
                        }
                    }
                    None => ServiceStatus {
                        name,
                        status: ProcessStatus::Stopped,
                        pid: None,
                        port,
                        uptime_secs: 0,
                        cpu_percent: 0.0,
                        memory_percent: 0.0,
                        restarts: 0,
                        last_exit_code: None,
                        enabled,
                    },
                }
            })
            .collect())
    }

    /// Start every enabled service that is not already running
    pub async fn start_all(&mut self) -> Vec<BulkResult> {
        let names: Vec<String> = self
            .services
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.name.clone())
            .filter(|n| !self.is_active(n))
            .collect();

        let mut results = Vec::new();
        for name in names {
            let result = self.start(&name).await;
            results.push(bulk(name, result.map(|r| format!("started (pid {})", r.pid))));
        }
        results
    }

    /// Stop every tracked service
    pub async fn stop_all(&mut self, graceful: bool) -> Vec<BulkResult> {
        let names: Vec<String> = self.processes.keys().cloned().collect();
        self.stop_many(names, graceful)
            .await
            .into_iter()
            .map(|(name, result)| bulk(name, result.map(describe_stop)))
            .collect()
    }

    /// Restart every enabled service; stopped ones are simply started
    pub async fn restart_all(&mut self, graceful: bool) -> Vec<BulkResult> {
        let names: Vec<String> = self
            .services
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.name.clone())
            .collect();

        let stopped = self.stop_many(names.clone(), graceful).await;
        let mut failed: HashMap<String, CorralError> = HashMap::new();
        for (name, result) in stopped {
            if let Err(e) = result {
                failed.insert(name, e);
            }
        }

        let mut results = Vec::new();
        for name in names {
            if let Some(e) = failed.remove(&name) {
                results.push(bulk(name, Err(e)));
                continue;
            }
            let result = self.start(&name).await;
            results.push(bulk(name, result.map(|r| format!("restarted (pid {})", r.pid))));
        }
        results
    }

    /// Find running services whose process is gone and mark them crashed.
    ///
    /// Called once per probe cycle. Each crash schedules at most one restart
    /// under the restart policy; [`Supervisor::run_due_restarts`] performs it.
    pub fn detect_crashes(&mut self) -> Vec<CrashReport> {
        let mut crashed = Vec::new();

        for (name, managed) in self.processes.iter_mut() {
            if managed.record.status != ProcessStatus::Running {
                continue;
            }

            let exit = match managed.child.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => Some(exit_code(status)),
                    Ok(None) => None,
                    Err(_) => Some(None),
                },
                None => (!signals::pid_alive(managed.pid())).then_some(None),
            };

            if let Some(code) = exit {
                tracing::warn!(
                    "{} (pid {}) exited unexpectedly ({})",
                    name,
                    managed.pid(),
                    code.map_or_else(|| "exit code unknown".to_string(), |c| format!("code {}", c))
                );
                // The rest of its group must not outlive it
                let _ = signals::signal_group(managed.pid(), Signal::SIGKILL);
                managed.mark_crashed(code);
                crashed.push((name.clone(), managed.pid(), code));
            }
        }

        let reports: Vec<CrashReport> = crashed
            .into_iter()
            .map(|(service, pid, exit_code)| {
                let restart_scheduled = self.schedule_restart(&service);
                CrashReport {
                    service,
                    pid,
                    exit_code,
                    restart_scheduled,
                }
            })
            .collect();

        if !reports.is_empty() {
            self.persist();
        }
        reports
    }

    /// Treat a service the health prober reports as down like a crash: its
    /// process group is killed and the record marked crashed.
    ///
    /// `pid` is the process that failed its checks. A report about a process
    /// that has since been replaced is ignored.
    pub async fn mark_down(&mut self, name: &str, pid: u32) -> Option<CrashReport> {
        let managed = self.processes.get_mut(name)?;
        if managed.record.status != ProcessStatus::Running || managed.pid() != pid {
            return None;
        }

        tracing::warn!("{} (pid {}) is down; killing its process group", name, pid);
        let _ = signals::signal_group(pid, Signal::SIGKILL);
        let code = wait_for_exit(pid, managed.child.as_mut(), Instant::now() + KILL_WAIT)
            .await
            .flatten();
        managed.mark_crashed(code);

        let restart_scheduled = self.schedule_restart(name);
        self.persist();
        Some(CrashReport {
            service: name.to_string(),
            pid,
            exit_code: code,
            restart_scheduled,
        })
    }

    fn schedule_restart(&mut self, name: &str) -> bool {
        let tracker = self.trackers.entry(name.to_string()).or_default();
        tracker.prune(self.restart_policy.window_secs);

        if !self.restart_policy.should_restart(tracker) {
            if self.restart_policy.enabled {
                tracing::error!(
                    "{} crashed {} times within {}s; not restarting",
                    name,
                    tracker.count_recent_restarts(self.restart_policy.window_secs),
                    self.restart_policy.window_secs
                );
            }
            return false;
        }

        let delay = self.restart_policy.delay(tracker);
        if let Some(managed) = self.processes.get_mut(name) {
            managed.restart_due = Some(Instant::now() + delay);
            tracing::info!("Restarting {} in {:?}", name, delay);
            return true;
        }
        false
    }

    /// Restart crashed services whose backoff has elapsed.
    ///
    /// A failed restart leaves the service crashed; it is not retried until
    /// the next crash or an explicit start.
    pub async fn run_due_restarts(&mut self) -> Vec<(String, Result<ProcessRecord>)> {
        let now = Instant::now();
        let due: Vec<String> = self
            .processes
            .iter()
            .filter(|(_, p)| p.record.status == ProcessStatus::Crashed)
            .filter(|(_, p)| p.restart_due.is_some_and(|at| at <= now))
            .map(|(name, _)| name.clone())
            .collect();

        let mut results = Vec::new();
        for name in due {
            let restarts = match self.processes.get_mut(&name) {
                Some(managed) => {
                    managed.restart_due = None;
                    managed.record.restarts
                }
                None => continue,
            };

            self.trackers.entry(name.clone()).or_default().record_restart();
            let result = match self.start(&name).await {
                Ok(record) => Ok(self.bump_restarts(&name, restarts + 1).unwrap_or(record)),
                Err(e) => {
                    tracing::error!("Automatic restart of {} failed: {}", name, e);
                    Err(e)
                }
            };
            results.push((name, result));
        }
        results
    }

    /// Services currently running, for the probe and metrics loops
    pub fn running(&self) -> Vec<RunningService> {
        self.processes
            .values()
            .filter(|p| p.record.status == ProcessStatus::Running)
            .map(|p| RunningService {
                name: p.record.service.clone(),
                pid: p.pid(),
                port: p.record.port,
            })
            .collect()
    }

    /// Health probe targets for every running service
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.running()
            .into_iter()
            .map(|r| ProbeTarget {
                service: r.name,
                pid: r.pid,
                host: self.config.host.clone(),
                port: r.port,
            })
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn record(&self, name: &str) -> Option<&ProcessRecord> {
        self.processes.get(name).map(|p| &p.record)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.services.contains_key(name) || self.processes.contains_key(name)
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Whether the PID table could not be written on the last attempt
    pub fn persistence_degraded(&self) -> bool {
        self.table.is_degraded()
    }

    fn is_active(&self, name: &str) -> bool {
        self.processes
            .get(name)
            .is_some_and(|p| p.record.status.is_active())
    }

    fn persist(&mut self) {
        let records = self
            .processes
            .iter()
            .map(|(name, managed)| (name.clone(), managed.record.clone()))
            .collect();
        if let Err(e) = self.table.save(records, self.ports.clone()) {
            tracing::debug!("PID table not persisted: {}", e);
        }
    }
}

/// Kill and reap a process whose startup was abandoned
async fn discard(spawned: SpawnedProcess) {
    let pid = spawned.pid;
    let _ = signals::signal_group(pid, Signal::SIGKILL);
    if let Some(mut child) = spawned.disarm() {
        let _ = tokio::time::timeout(KILL_WAIT, child.wait()).await;
    }
}

/// Wait until the process exits or `deadline` passes.
///
/// # Returns
/// * `Some(exit_code)` - The process is gone; the code is known only for own children
/// * `None` - Still alive at the deadline
async fn wait_for_exit(pid: u32, child: Option<&mut Child>, deadline: Instant) -> Option<Option<i32>> {
    let remaining = deadline.saturating_duration_since(Instant::now());

    match child {
        Some(child) => match tokio::time::timeout(remaining, child.wait()).await {
            Ok(Ok(status)) => Some(exit_code(status)),
            Ok(Err(_)) => Some(None),
            Err(_) => None,
        },
        None => loop {
            if !signals::pid_alive(pid) {
                return Some(None);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        },
    }
}

/// Exit code, with death by signal N reported as 128 + N like a shell
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|s| 128 + s))
}

fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        _ => "unknown status".to_string(),
    }
}

fn describe_stop(outcome: StopOutcome) -> String {
    match outcome {
        StopOutcome::Stopped { .. } => "stopped".to_string(),
        StopOutcome::AlreadyStopped => "already stopped".to_string(),
    }
}

fn bulk(service: String, result: Result<String>) -> BulkResult {
    match result {
        Ok(message) => BulkResult {
            service,
            ok: true,
            message,
        },
        Err(e) => BulkResult {
            service,
            ok: false,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests;
