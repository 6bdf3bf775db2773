use corral::logs::{active_path, rotated_path, LogFileKind, LogManager, RotationPolicy, ARCHIVE_DIR};
use std::fs::{self, File};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::process::Command;

fn small_policy() -> RotationPolicy {
    RotationPolicy {
        max_size: 64,
        backup_count: 2,
        compress: true,
    }
}

#[tokio::test]
async fn test_captured_output_rotates_and_archives() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let manager = LogManager::with_policy(dir, small_policy(), 7).await.unwrap();

    // 40 lines of 16 bytes each cross the 64 byte limit many times
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg("i=0; while [ $i -lt 40 ]; do printf 'line-%010d\\n' $i; i=$((i+1)); done")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    manager.attach("worker", &mut child).await.unwrap();
    child.wait().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.flush_all().await;

    assert!(active_path(dir, "worker").exists());
    assert!(rotated_path(dir, "worker", 1).exists());
    assert!(rotated_path(dir, "worker", 2).exists());
    assert!(!rotated_path(dir, "worker", 3).exists());

    let files = manager.stats().unwrap();
    assert!(files.iter().all(|f| f.service == "worker"));
    assert_eq!(
        files.iter().filter(|f| f.kind == LogFileKind::Rotated).count(),
        2
    );
    assert!(files.iter().any(|f| f.kind == LogFileKind::Archived));
    assert!(dir.join(ARCHIVE_DIR).is_dir());

    // The newest line is always reachable through the tail
    let tail = manager.tail("worker", 3).await.unwrap();
    assert_eq!(tail.last().map(String::as_str), Some("line-0000000039"));
}

#[tokio::test]
async fn test_sweep_removes_only_expired_rotated_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let manager = LogManager::with_policy(dir, small_policy(), 7).await.unwrap();

    fs::write(active_path(dir, "api"), "current\n").unwrap();
    fs::write(rotated_path(dir, "api", 1), "recent\n").unwrap();
    fs::write(rotated_path(dir, "api", 2), "old\n").unwrap();

    let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
    for path in [active_path(dir, "api"), rotated_path(dir, "api", 2)] {
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();
    }

    let report = manager.sweep().await.unwrap();
    assert_eq!(report.deleted, vec![rotated_path(dir, "api", 2)]);
    assert_eq!(report.retained, 1);

    // Active files are kept however old they are
    assert!(active_path(dir, "api").exists());
    assert!(rotated_path(dir, "api", 1).exists());
}

#[tokio::test]
async fn test_dotted_service_names_are_swept_and_listed() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let manager = LogManager::with_policy(dir, small_policy(), 7).await.unwrap();

    fs::write(active_path(dir, "app.logger"), "current\n").unwrap();
    fs::write(rotated_path(dir, "app.logger", 1), "old\n").unwrap();

    let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
    File::options()
        .write(true)
        .open(rotated_path(dir, "app.logger", 1))
        .unwrap()
        .set_modified(ten_days_ago)
        .unwrap();

    let files = manager.stats().unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.service == "app.logger"));
    assert!(files.iter().any(|f| f.kind == LogFileKind::Rotated));

    let report = manager.sweep().await.unwrap();
    assert_eq!(report.deleted, vec![rotated_path(dir, "app.logger", 1)]);
    assert!(active_path(dir, "app.logger").exists());
}

#[tokio::test]
async fn test_log_tree_listing_ignores_foreign_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let manager = LogManager::with_policy(dir, small_policy(), 7).await.unwrap();

    fs::write(active_path(dir, "web"), "x\n").unwrap();
    fs::write(dir.join("notes.txt"), "not a log").unwrap();
    fs::write(dir.join("web.log.bak"), "not rotated").unwrap();

    let files = manager.stats().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].kind, LogFileKind::Active);
    assert_eq!(files[0].size, 2);
}
