// Daemon runtime - wires the supervisor, observers and IPC server together

use crate::alerts::{AlertDispatcher, AlertEvaluator, AlertLog, WebhookSink};
use crate::config::CorralConfig;
use crate::error::{CorralError, Result};
use crate::health::{HealthProber, HealthReport, HealthStatus};
use crate::ipc::{Command, IpcServer, ResponseData, SkippedService};
use crate::logs::LogManager;
use crate::metrics::MetricsCollector;
use crate::process::{CrashReport, Supervisor};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Crash detection and scheduled restarts run on this tick
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// The corrald process: one supervisor plus its observers
pub struct Daemon {
    shared: Arc<Shared>,
    tracker: TaskTracker,
}

struct Shared {
    config: CorralConfig,
    supervisor: Mutex<Supervisor>,
    prober: Mutex<HealthProber>,
    metrics: Mutex<MetricsCollector>,
    evaluator: Mutex<AlertEvaluator>,
    dispatcher: AlertDispatcher,
    logs: LogManager,
    shutdown: CancellationToken,
}

impl Daemon {
    pub async fn new(config: CorralConfig) -> Result<Self> {
        let logs = LogManager::new(&config.logs).await?;
        let supervisor = Supervisor::new(
            config.supervisor.clone(),
            &config.pid_table_path(),
            Some(logs.clone()),
        );
        let tracker = TaskTracker::new();

        let mut dispatcher = AlertDispatcher::new(
            AlertLog::with_max_size(config.alert_log_path(), config.logs.max_size_bytes()?),
            config.alerts.sink_timeout(),
            tracker.clone(),
        );
        if let Some(url) = &config.alerts.sink_url {
            dispatcher = dispatcher.with_sink(Arc::new(WebhookSink::new(
                url.clone(),
                config.alerts.sink_timeout(),
            )?));
        }

        let shared = Shared {
            supervisor: Mutex::new(supervisor),
            prober: Mutex::new(HealthProber::new(&config.health)?),
            metrics: Mutex::new(MetricsCollector::new(&config.metrics)),
            evaluator: Mutex::new(AlertEvaluator::new(&config.alerts)),
            dispatcher,
            logs,
            shutdown: CancellationToken::new(),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            tracker,
        })
    }

    /// Token that stops the daemon when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Adopt survivors of a previous run, discover services, sweep old logs
    /// and optionally start the fleet.
    pub async fn bootstrap(&self) -> Result<()> {
        let shared = &self.shared;
        let mut supervisor = shared.supervisor.lock().await;

        let reconciled = supervisor.reconcile();
        if !reconciled.adopted.is_empty() || !reconciled.stale.is_empty() {
            tracing::info!(
                "Reconciled PID table: {} adopted, {} stale",
                reconciled.adopted.len(),
                reconciled.stale.len()
            );
        }

        supervisor.discover()?;

        match shared.logs.sweep().await {
            Ok(report) if !report.deleted.is_empty() => {
                tracing::info!("Removed {} expired log file(s)", report.deleted.len())
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Log sweep failed: {}", e),
        }

        if shared.config.supervisor.start_on_boot {
            for result in supervisor.start_all().await {
                if !result.ok {
                    tracing::error!("{}: {}", result.service, result.message);
                }
            }
        }

        Ok(())
    }

    /// Serve IPC and run the observer loops until the shutdown token is
    /// cancelled, then shut down in order.
    pub async fn run(self) -> Result<()> {
        let shared = self.shared.clone();
        let token = shared.shutdown.clone();
        let server = IpcServer::bind(shared.config.socket_path())?;

        self.watch_signals()?;

        self.tracker.spawn({
            let shared = shared.clone();
            let token = token.clone();
            async move { shared.supervise_loop(token).await }
        });

        if shared.config.health.enabled {
            self.tracker.spawn({
                let shared = shared.clone();
                let token = token.clone();
                async move { shared.probe_loop(token).await }
            });
        }

        self.tracker.spawn({
            let shared = shared.clone();
            let token = token.clone();
            async move { shared.metrics_loop(token).await }
        });

        self.tracker.spawn({
            let shared = shared.clone();
            let token = token.clone();
            async move { shared.flush_loop(token).await }
        });

        self.tracker.spawn({
            let shared = shared.clone();
            let token = token.clone();
            async move { shared.sweep_loop(token).await }
        });

        self.tracker.spawn({
            let handler_shared = shared.clone();
            let token = token.clone();
            let tracker = self.tracker.clone();
            async move {
                let handler = move |command: Command| {
                    let shared = handler_shared.clone();
                    async move { shared.handle(command).await }
                };
                if let Err(e) = server.run(handler, token, tracker).await {
                    tracing::error!("IPC server error: {}", e);
                }
            }
        });

        tracing::info!("corrald running");
        token.cancelled().await;
        tracing::info!("Shutting down");

        let ceiling = shared.config.supervisor.shutdown_ceiling();
        self.tracker.close();
        if tokio::time::timeout(ceiling, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks still busy after {:?}; continuing", ceiling);
        }

        shared.shutdown_services().await;
        tracing::info!("Daemon stopped");
        Ok(())
    }

    /// Execute one IPC command
    pub async fn handle(&self, command: Command) -> Result<ResponseData> {
        self.shared.handle(command).await
    }

    fn watch_signals(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            CorralError::SignalError(format!("Failed to install SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            CorralError::SignalError(format!("Failed to install SIGINT handler: {}", e))
        })?;

        let token = self.shared.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
                _ = token.cancelled() => return,
            }
            token.cancel();
        });
        Ok(())
    }
}

impl Shared {
    async fn handle(&self, command: Command) -> Result<ResponseData> {
        if command.is_mutating() {
            tracing::info!("Command: {:?}", command);
        } else {
            tracing::debug!("Command: {:?}", command);
        }

        match command {
            Command::Start { service } => {
                let record = self.supervisor.lock().await.start(&service).await?;
                self.prober.lock().await.forget(&service);
                Ok(ResponseData::Started(record))
            }
            Command::Stop { service, graceful } => {
                let outcome = self.supervisor.lock().await.stop(&service, graceful).await?;
                self.prober.lock().await.forget(&service);
                Ok(ResponseData::Stopped { service, outcome })
            }
            Command::Restart { service, graceful } => {
                let record = self
                    .supervisor
                    .lock()
                    .await
                    .restart(&service, graceful)
                    .await?;
                self.prober.lock().await.forget(&service);
                Ok(ResponseData::Restarted(record))
            }
            Command::Status { service } => {
                let rows = self
                    .supervisor
                    .lock()
                    .await
                    .status(service.as_deref())
                    .await?;
                Ok(ResponseData::Status(rows))
            }
            Command::Health { service, check_now } => self.health(service, check_now).await,
            Command::Metrics { service, limit } => {
                self.ensure_known(&service).await?;
                let samples = self.metrics.lock().await.history(&service, limit);
                Ok(ResponseData::Metrics { service, samples })
            }
            Command::Alerts { limit } => {
                let alerts = self.dispatcher.log().recent(limit).await?;
                Ok(ResponseData::Alerts(alerts))
            }
            Command::Logs { service, lines } => {
                self.ensure_known(&service).await?;
                let lines = self.logs.tail(&service, lines).await?;
                Ok(ResponseData::Logs { service, lines })
            }
            Command::LogFiles { service } => {
                let files = self
                    .logs
                    .stats()?
                    .into_iter()
                    .filter(|f| service.as_ref().map_or(true, |s| &f.service == s))
                    .collect();
                Ok(ResponseData::LogFiles(files))
            }
            Command::StartAll => Ok(ResponseData::Bulk(
                self.supervisor.lock().await.start_all().await,
            )),
            Command::StopAll { graceful } => Ok(ResponseData::Bulk(
                self.supervisor.lock().await.stop_all(graceful).await,
            )),
            Command::RestartAll { graceful } => Ok(ResponseData::Bulk(
                self.supervisor.lock().await.restart_all(graceful).await,
            )),
            Command::Discover => {
                let report = self.supervisor.lock().await.discover()?;
                Ok(ResponseData::Discovered {
                    services: report.services,
                    skipped: report
                        .skipped
                        .into_iter()
                        .map(|(name, reason)| SkippedService {
                            name,
                            reason: reason.to_string(),
                        })
                        .collect(),
                })
            }
            Command::Shutdown => {
                self.shutdown.cancel();
                Ok(ResponseData::Success("Shutdown initiated".to_string()))
            }
        }
    }

    async fn health(&self, service: Option<String>, check_now: bool) -> Result<ResponseData> {
        let Some(name) = service else {
            return Ok(ResponseData::Health(self.prober.lock().await.reports()));
        };
        self.ensure_known(&name).await?;

        if !check_now {
            let latest = self.prober.lock().await.latest(&name).cloned();
            return Ok(ResponseData::Health(latest.into_iter().collect()));
        }

        let target = self
            .supervisor
            .lock()
            .await
            .probe_targets()
            .into_iter()
            .find(|t| t.service == name)
            .ok_or_else(|| CorralError::ProbeError(name.clone(), "service is not running".to_string()))?;

        let (checker, failures) = {
            let prober = self.prober.lock().await;
            let failures = prober
                .latest(&name)
                .map(|r| r.consecutive_failures)
                .unwrap_or(0);
            (prober.checker(), failures)
        };
        let outcome = checker.check(&target).await;

        Ok(ResponseData::Health(vec![HealthReport {
            service: name,
            pid: Some(target.pid),
            status: outcome.status,
            response_time_ms: outcome.response_time_ms,
            message: outcome.message,
            consecutive_failures: failures,
            checked_at: Utc::now(),
        }]))
    }

    async fn ensure_known(&self, service: &str) -> Result<()> {
        if self.supervisor.lock().await.is_known(service) {
            Ok(())
        } else {
            Err(CorralError::ServiceNotFound(service.to_string()))
        }
    }

    async fn supervise_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(SUPERVISE_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let (crashes, restarted) = {
                let mut supervisor = self.supervisor.lock().await;
                let crashes = supervisor.detect_crashes();
                let restarted = supervisor.run_due_restarts().await;
                (crashes, restarted)
            };

            self.on_crashes(crashes).await;
            for (service, result) in restarted {
                if result.is_ok() {
                    self.prober.lock().await.forget(&service);
                }
            }
        }
    }

    async fn probe_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let targets = self.supervisor.lock().await.probe_targets();
            if targets.is_empty() {
                continue;
            }

            let reports = self.prober.lock().await.probe_all(targets).await;
            {
                let mut metrics = self.metrics.lock().await;
                for report in &reports {
                    metrics.record_health(report);
                }
            }

            let down: Vec<(String, u32)> = reports
                .into_iter()
                .filter(|r| r.status == HealthStatus::Down)
                .filter_map(|r| Some((r.service, r.pid?)))
                .collect();
            if down.is_empty() {
                continue;
            }

            let mut crashes = Vec::new();
            {
                let mut supervisor = self.supervisor.lock().await;
                for (service, pid) in down {
                    crashes.extend(supervisor.mark_down(&service, pid).await);
                }
            }
            self.on_crashes(crashes).await;
        }
    }

    async fn metrics_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let running = self.supervisor.lock().await.running();
            let samples = self.metrics.lock().await.collect(&running).await;

            if !self.config.alerts.enabled || samples.is_empty() {
                continue;
            }
            let alerts = {
                let mut evaluator = self.evaluator.lock().await;
                samples
                    .iter()
                    .flat_map(|(service, sample)| evaluator.evaluate(service, sample))
                    .collect::<Vec<_>>()
            };
            self.dispatcher.dispatch(alerts).await;
        }
    }

    async fn flush_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics.flush_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Nothing to flush at startup
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.metrics.lock().await.flush(&self.config.metrics_dir());
        }
    }

    async fn sweep_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.logs.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Bootstrap already swept
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.logs.sweep().await {
                Ok(report) => tracing::debug!(
                    "Log sweep removed {} file(s), kept {}",
                    report.deleted.len(),
                    report.retained
                ),
                Err(e) => tracing::warn!("Log sweep failed: {}", e),
            }
        }
    }

    async fn on_crashes(&self, crashes: Vec<CrashReport>) {
        if crashes.is_empty() {
            return;
        }

        {
            let mut prober = self.prober.lock().await;
            for crash in &crashes {
                prober.forget(&crash.service);
            }
        }

        if !self.config.alerts.enabled {
            return;
        }
        let alerts = {
            let mut evaluator = self.evaluator.lock().await;
            crashes
                .iter()
                .filter_map(|crash| evaluator.crashed(&crash.service))
                .collect::<Vec<_>>()
        };
        self.dispatcher.dispatch(alerts).await;
    }

    async fn shutdown_services(&self) {
        if self.config.supervisor.shutdown_on_exit {
            let deadline = Instant::now() + self.config.supervisor.shutdown_ceiling();
            let mut supervisor = self.supervisor.lock().await;
            match tokio::time::timeout_at(deadline, supervisor.stop_all(true)).await {
                Ok(results) => {
                    for result in results.iter().filter(|r| !r.ok) {
                        tracing::error!("{}: {}", result.service, result.message);
                    }
                }
                Err(_) => tracing::error!(
                    "Services still stopping after {:?}; leaving the rest running",
                    self.config.supervisor.shutdown_ceiling()
                ),
            }
        } else {
            tracing::info!("Leaving services running for the next daemon to adopt");
        }

        self.metrics.lock().await.flush(&self.config.metrics_dir());
        self.logs.flush_all().await;
    }
}
