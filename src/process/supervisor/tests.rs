use super::*;
use crate::state::PidTableFile;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_service(root: &Path, name: &str, script: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("run.sh"), script).unwrap();
}

fn create_test_config(root: &Path) -> SupervisorConfig {
    let mut config = SupervisorConfig {
        services_root: root.join("services"),
        state_dir: root.join("state"),
        base_port: 18000,
        startup_timeout_secs: 5,
        startup_grace_ms: 100,
        shutdown_timeout_secs: 2,
        ..SupervisorConfig::default()
    };
    config.restart.enabled = true;
    config.restart.delay_secs = 0;
    config
}

fn table_path(root: &Path) -> PathBuf {
    root.join("state").join("pids.json")
}

async fn supervisor_with(temp_dir: &TempDir, services: &[(&str, &str)]) -> Supervisor {
    let root = temp_dir.path();
    for (name, script) in services {
        write_service(&root.join("services"), name, script);
    }
    let mut supervisor = Supervisor::new(create_test_config(root), &table_path(root), None);
    supervisor.discover().unwrap();
    supervisor
}

fn load_table(root: &Path) -> PidTableFile {
    PidTable::new(table_path(root)).load().unwrap()
}

#[tokio::test]
async fn test_discover_assigns_ports_in_name_order() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor =
        supervisor_with(&temp_dir, &[("beta", "exec sleep 30\n"), ("alpha", "exec sleep 30\n")]).await;

    assert_eq!(supervisor.descriptor("alpha").unwrap().port, 18000);
    assert_eq!(supervisor.descriptor("beta").unwrap().port, 18001);

    // A second pass keeps the assignments
    let report = supervisor.discover().unwrap();
    assert_eq!(report.services, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(supervisor.descriptor("beta").unwrap().port, 18001);
}

#[tokio::test]
async fn test_discover_reports_skips() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("services").join("empty")).unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let report = supervisor.discover().unwrap();
    assert_eq!(report.services, vec!["web".to_string()]);
    assert_eq!(
        report.skipped,
        vec![("empty".to_string(), SkipReason::NoEntrypoint)]
    );
}

#[tokio::test]
async fn test_running_service_keeps_port_when_old_owner_returns() {
    let temp_dir = TempDir::new().unwrap();
    let services = temp_dir.path().join("services");
    let mut supervisor = supervisor_with(&temp_dir, &[("alpha", "exec sleep 30\n")]).await;
    assert_eq!(supervisor.descriptor("alpha").unwrap().port, 18000);

    // alpha goes away and charlie inherits its port
    fs::remove_dir_all(services.join("alpha")).unwrap();
    write_service(&services, "charlie", "exec sleep 30\n");
    supervisor.discover().unwrap();
    let charlie = supervisor.start("charlie").await.unwrap();
    assert_eq!(charlie.port, 18000);

    // alpha comes back with its old assignment still on file
    write_service(&services, "alpha", "exec sleep 30\n");
    supervisor.discover().unwrap();

    assert_eq!(supervisor.descriptor("charlie").unwrap().port, 18000);
    assert_eq!(supervisor.record("charlie").unwrap().port, 18000);
    assert_ne!(supervisor.descriptor("alpha").unwrap().port, 18000);

    supervisor.stop("charlie", true).await.unwrap();
}

#[tokio::test]
async fn test_start_and_status() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let record = supervisor.start("web").await.unwrap();
    assert_eq!(record.status, ProcessStatus::Running);
    assert_eq!(record.port, 18000);
    assert!(signals::pid_alive(record.pid));

    let status = supervisor.status(Some("web")).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].status, ProcessStatus::Running);
    assert_eq!(status[0].pid, Some(record.pid));

    let table = load_table(temp_dir.path());
    assert_eq!(table.records["web"].pid, record.pid);
    assert_eq!(table.records["web"].status, ProcessStatus::Running);

    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    supervisor.start("web").await.unwrap();
    let result = supervisor.start("web").await;
    assert!(matches!(result, Err(CorralError::AlreadyRunning(name)) if name == "web"));

    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_start_unknown_service() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[]).await;

    let result = supervisor.start("ghost").await;
    assert!(matches!(result, Err(CorralError::ServiceNotFound(_))));
}

#[tokio::test]
async fn test_start_disabled_service() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_service(&root.join("services"), "web", "exec sleep 30\n");
    let mut config = create_test_config(root);
    config.disabled = vec!["web".to_string()];

    let mut supervisor = Supervisor::new(config, &table_path(root), None);
    supervisor.discover().unwrap();

    let result = supervisor.start("web").await;
    assert!(matches!(result, Err(CorralError::StartError(_, _))));
    assert!(supervisor.start_all().await.is_empty());
}

#[tokio::test]
async fn test_start_failure_leaves_no_record() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("broken", "exit 3\n")]).await;

    let result = supervisor.start("broken").await;
    assert!(matches!(result, Err(CorralError::StartError(name, _)) if name == "broken"));
    assert!(supervisor.record("broken").is_none());
    assert!(load_table(temp_dir.path()).records.is_empty());

    let status = supervisor.status(Some("broken")).await.unwrap();
    assert_eq!(status[0].status, ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_start_waits_for_port() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_service(&root.join("services"), "silent", "exec sleep 30\n");
    let mut config = create_test_config(root);
    config.wait_for_port = true;
    config.startup_timeout_secs = 1;

    let mut supervisor = Supervisor::new(config, &table_path(root), None);
    supervisor.discover().unwrap();

    // Alive but never listening
    let result = supervisor.start("silent").await;
    assert!(matches!(result, Err(CorralError::StartError(_, _))));
    assert!(supervisor.record("silent").is_none());
}

#[tokio::test]
async fn test_stop_removes_record() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let record = supervisor.start("web").await.unwrap();
    let outcome = supervisor.stop("web", true).await.unwrap();

    // SIGTERM: 128 + 15
    assert_eq!(outcome, StopOutcome::Stopped { exit_code: Some(143) });
    assert!(supervisor.record("web").is_none());
    assert!(!signals::group_alive(record.pid));
    assert!(load_table(temp_dir.path()).records.is_empty());
}

#[tokio::test]
async fn test_stop_twice_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    supervisor.start("web").await.unwrap();
    supervisor.stop("web", true).await.unwrap();

    let outcome = supervisor.stop("web", true).await.unwrap();
    assert_eq!(outcome, StopOutcome::AlreadyStopped);
}

#[tokio::test]
async fn test_stop_escalates_to_sigkill() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_service(
        &root.join("services"),
        "stubborn",
        "trap '' TERM\nwhile true; do sleep 1; done\n",
    );
    let mut config = create_test_config(root);
    config.shutdown_timeout_secs = 1;

    let mut supervisor = Supervisor::new(config, &table_path(root), None);
    supervisor.discover().unwrap();
    let record = supervisor.start("stubborn").await.unwrap();

    let outcome = supervisor.stop("stubborn", true).await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped { exit_code: Some(137) });
    assert!(!signals::group_alive(record.pid));
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let first = supervisor.start("web").await.unwrap();
    let second = supervisor.restart("web", true).await.unwrap();

    assert_ne!(first.pid, second.pid);
    assert_eq!(second.port, first.port);
    assert_eq!(second.restarts, 1);
    assert!(!signals::pid_alive(first.pid));

    let table = load_table(temp_dir.path());
    assert_eq!(table.records.len(), 1);
    assert_eq!(table.records["web"].pid, second.pid);

    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_crash_triggers_single_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let first = supervisor.start("web").await.unwrap();
    signals::signal_group(first.pid, Signal::SIGKILL).unwrap();

    let mut crashes = Vec::new();
    for _ in 0..50 {
        crashes = supervisor.detect_crashes();
        if !crashes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].service, "web");
    assert_eq!(crashes[0].exit_code, Some(137));
    assert!(crashes[0].restart_scheduled);
    assert_eq!(supervisor.record("web").unwrap().status, ProcessStatus::Crashed);

    // Crashed records are not reported twice
    assert!(supervisor.detect_crashes().is_empty());

    let restarted = supervisor.run_due_restarts().await;
    assert_eq!(restarted.len(), 1);
    let record = restarted[0].1.as_ref().unwrap();
    assert_ne!(record.pid, first.pid);
    assert_eq!(record.restarts, 1);

    assert!(supervisor.run_due_restarts().await.is_empty());
    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_crash_without_restart_policy() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_service(&root.join("services"), "web", "exec sleep 30\n");
    let mut config = create_test_config(root);
    config.restart.enabled = false;

    let mut supervisor = Supervisor::new(config, &table_path(root), None);
    supervisor.discover().unwrap();
    let record = supervisor.start("web").await.unwrap();
    signals::signal_group(record.pid, Signal::SIGKILL).unwrap();

    let mut crashes = Vec::new();
    for _ in 0..50 {
        crashes = supervisor.detect_crashes();
        if !crashes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(crashes.len(), 1);
    assert!(!crashes[0].restart_scheduled);
    assert!(supervisor.run_due_restarts().await.is_empty());

    // A crashed service can still be started by hand
    let again = supervisor.start("web").await.unwrap();
    assert_eq!(again.status, ProcessStatus::Running);
    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_mark_down_kills_and_schedules_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let record = supervisor.start("web").await.unwrap();
    let report = supervisor.mark_down("web", record.pid).await.unwrap();

    assert_eq!(report.pid, record.pid);
    assert!(report.restart_scheduled);
    assert!(!signals::pid_alive(record.pid));
    assert_eq!(supervisor.record("web").unwrap().status, ProcessStatus::Crashed);

    let restarted = supervisor.run_due_restarts().await;
    assert!(restarted[0].1.is_ok());
    supervisor.stop("web", true).await.unwrap();
}

#[tokio::test]
async fn test_down_report_for_replaced_process_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor = supervisor_with(&temp_dir, &[("web", "exec sleep 30\n")]).await;

    let first = supervisor.start("web").await.unwrap();
    supervisor.stop("web", true).await.unwrap();
    let second = supervisor.start("web").await.unwrap();
    assert_ne!(first.pid, second.pid);

    // Failures counted against the old process must not touch the new one
    assert!(supervisor.mark_down("web", first.pid).await.is_none());
    assert!(signals::pid_alive(second.pid));
    let record = supervisor.record("web").unwrap();
    assert_eq!(record.status, ProcessStatus::Running);
    assert_eq!(record.pid, second.pid);

    assert!(supervisor.mark_down("web", second.pid).await.is_some());
    assert!(!signals::pid_alive(second.pid));
}

#[tokio::test]
async fn test_bulk_operations() {
    let temp_dir = TempDir::new().unwrap();
    let mut supervisor =
        supervisor_with(&temp_dir, &[("api", "exec sleep 30\n"), ("web", "exec sleep 30\n")]).await;

    let started = supervisor.start_all().await;
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|r| r.ok));
    assert_eq!(supervisor.running().len(), 2);

    let restarted = supervisor.restart_all(true).await;
    assert!(restarted.iter().all(|r| r.ok));

    let stopped = supervisor.stop_all(true).await;
    assert_eq!(stopped.len(), 2);
    assert!(stopped.iter().all(|r| r.ok));
    assert!(supervisor.running().is_empty());
}

#[tokio::test]
async fn test_reconcile_adopts_live_and_drops_stale() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_service(&root.join("services"), "live", "exec sleep 30\n");
    write_service(&root.join("services"), "stale", "exec sleep 30\n");

    let mut live = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let mut dead = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = dead.id();
    dead.wait().unwrap();

    let mut records = BTreeMap::new();
    let mut live_record = ProcessRecord::new("live".to_string(), live.id(), 18005);
    live_record.status = ProcessStatus::Running;
    records.insert("live".to_string(), live_record);
    let mut stale_record = ProcessRecord::new("stale".to_string(), dead_pid, 18006);
    stale_record.status = ProcessStatus::Running;
    records.insert("stale".to_string(), stale_record);
    PidTable::new(table_path(root))
        .save(records, BTreeMap::new())
        .unwrap();

    let mut supervisor = Supervisor::new(create_test_config(root), &table_path(root), None);
    let report = supervisor.reconcile();
    assert_eq!(report.adopted, vec!["live".to_string()]);
    assert_eq!(report.stale, vec!["stale".to_string()]);

    // The adopted service keeps its port through discovery
    supervisor.discover().unwrap();
    assert_eq!(supervisor.descriptor("live").unwrap().port, 18005);
    assert_eq!(supervisor.record("live").unwrap().status, ProcessStatus::Running);
    assert!(supervisor.record("stale").is_none());

    let table = load_table(root);
    assert!(table.records.contains_key("live"));
    assert!(!table.records.contains_key("stale"));

    let _ = live.kill();
    let _ = live.wait();
}

#[tokio::test]
async fn test_unreadable_table_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("state")).unwrap();
    fs::write(table_path(root), "{ not json").unwrap();

    let mut supervisor = Supervisor::new(create_test_config(root), &table_path(root), None);
    let report = supervisor.reconcile();
    assert!(report.adopted.is_empty());
    assert!(report.stale.is_empty());
    assert!(load_table(root).records.is_empty());
}
