use crate::error::{CorralError, Result};
use crate::logs::writer::{active_path, rotated_path};
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Read the last `lines` lines of a single file
///
/// # Arguments
/// * `file_path` - Path to the log file
/// * `lines` - Number of lines to keep from the end
///
/// # Returns
/// * `Ok(Vec<String>)` - Up to `lines` lines, oldest first; empty if the file is missing
/// * `Err(CorralError)` - Failed to read the file
pub async fn read_last_lines(file_path: &Path, lines: usize) -> Result<Vec<String>> {
    if lines == 0 || !file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(file_path)
        .await
        .map_err(|e| CorralError::LogError(format!("Failed to open log file: {}", e)))?;

    let mut reader = BufReader::new(file);
    let mut window: VecDeque<String> = VecDeque::with_capacity(lines.min(1024));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| CorralError::LogError(format!("Failed to read log line: {}", e)))?;
        if read == 0 {
            break;
        }

        // Service output is not guaranteed to be UTF-8
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();

        if window.len() == lines {
            window.pop_front();
        }
        window.push_back(line);
    }

    Ok(window.into_iter().collect())
}

/// Tail a service's log across the active file and its rotated files.
///
/// Files are read newest first until enough lines are collected; the result
/// is in chronological order.
pub async fn tail_service(dir: &Path, service: &str, lines: usize, backups: usize) -> Result<Vec<String>> {
    let mut collected: Vec<String> = Vec::new();

    let mut files = vec![active_path(dir, service)];
    files.extend((1..=backups).map(|i| rotated_path(dir, service, i)));

    for path in files {
        if collected.len() >= lines {
            break;
        }
        let needed = lines - collected.len();
        let mut chunk = read_last_lines(&path, needed).await?;
        chunk.append(&mut collected);
        collected = chunk;
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_last_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("api.log");
        fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        assert_eq!(read_last_lines(&path, 2).await.unwrap(), vec!["three", "four"]);
        assert_eq!(read_last_lines(&path, 10).await.unwrap().len(), 4);
        assert!(read_last_lines(&path, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let lines = read_last_lines(&temp_dir.path().join("none.log"), 5)
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_read_handles_invalid_utf8_and_missing_newline() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("api.log");
        fs::write(&path, b"ok\n\xff\xfebad\nlast").unwrap();

        let lines = read_last_lines(&path, 3).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("bad"));
        assert_eq!(lines[2], "last");
    }

    #[tokio::test]
    async fn test_tail_spans_rotated_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(rotated_path(temp_dir.path(), "api", 2), "a\nb\n").unwrap();
        fs::write(rotated_path(temp_dir.path(), "api", 1), "c\nd\n").unwrap();
        fs::write(active_path(temp_dir.path(), "api"), "e\n").unwrap();

        let lines = tail_service(temp_dir.path(), "api", 4, 5).await.unwrap();
        assert_eq!(lines, vec!["b", "c", "d", "e"]);

        let all = tail_service(temp_dir.path(), "api", 100, 5).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
    }
}
