// Output formatting and display for CLI

use crate::alerts::{Alert, Severity};
use crate::daemon::DaemonStatus;
use crate::health::{HealthReport, HealthStatus};
use crate::ipc::{ResponseData, SkippedService};
use crate::logs::{LogFileInfo, LogFileKind};
use crate::metrics::{MetricSample, ServiceReport};
use crate::process::{BulkResult, ProcessRecord, ProcessStatus, ServiceStatus, StopOutcome};
use chrono::{DateTime, Local, Utc};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started(record) => {
            println!("{}", "✓ Service started successfully".green().bold());
            print_record(record);
        }

        ResponseData::Stopped { service, outcome } => match outcome {
            StopOutcome::Stopped { exit_code } => {
                println!(
                    "{}",
                    format!("✓ Service {} stopped successfully", service)
                        .green()
                        .bold()
                );
                if let Some(code) = exit_code {
                    println!("  {}: {}", "Exit code".bold(), code);
                }
            }
            StopOutcome::AlreadyStopped => {
                println!("{}", format!("Service {} was not running", service).yellow());
            }
        },

        ResponseData::Restarted(record) => {
            println!(
                "{}",
                format!("✓ Service {} restarted successfully", record.service)
                    .green()
                    .bold()
            );
            print_record(record);
        }

        ResponseData::Status(services) => match services.as_slice() {
            [] => println!("{}", "No services discovered".yellow()),
            [single] => print_detailed_status(single),
            _ => print_status_table(services),
        },

        ResponseData::Health(reports) => {
            if reports.is_empty() {
                println!("{}", "No health results yet".yellow());
            } else {
                print_health_table(reports);
            }
        }

        ResponseData::Metrics { service, samples } => {
            if samples.is_empty() {
                println!("{}", format!("No metrics recorded for {}", service).yellow());
            } else {
                print_metrics_table(service, samples);
            }
        }

        ResponseData::Alerts(alerts) => {
            if alerts.is_empty() {
                println!("{}", "No alerts".green());
            } else {
                print_alerts(alerts);
            }
        }

        ResponseData::Logs { service, lines } => {
            print_logs(service, lines);
        }

        ResponseData::LogFiles(files) => {
            if files.is_empty() {
                println!("{}", "No log files".yellow());
            } else {
                print_log_files(files);
            }
        }

        ResponseData::Bulk(results) => print_bulk(results),

        ResponseData::Discovered { services, skipped } => print_discovery(services, skipped),

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_daemon_status(status: &DaemonStatus) {
    match status.pid {
        Some(pid) if status.responsive => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
        }
        Some(pid) => {
            println!(
                "{}",
                "⚠ Daemon process exists but its socket does not answer"
                    .yellow()
                    .bold()
            );
            println!("  {}: {}", "PID".bold(), pid);
        }
        None => println!("{}", "✗ Daemon is not running".red().bold()),
    }
    println!("  {}: {}", "PID file".bold(), status.pid_file.display());
    println!("  {}: {}", "Socket".bold(), status.socket.display());
}

fn print_record(record: &ProcessRecord) {
    println!("  {}: {}", "Service".bold(), record.service.cyan());
    println!("  {}: {}", "PID".bold(), record.pid);
    println!("  {}: {}", "Port".bold(), record.port);
}

/// Print a formatted table of services
fn print_status_table(services: &[ServiceStatus]) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Service")]
        name: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Port")]
        port: u16,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: usize,
    }

    let rows: Vec<StatusRow> = services
        .iter()
        .map(|s| StatusRow {
            name: if s.enabled {
                truncate(&s.name, 24)
            } else {
                format!("{} (disabled)", truncate(&s.name, 24))
            },
            status: format_status_colored(&s.status),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            port: s.port,
            cpu: format!("{:.1}%", s.cpu_percent),
            memory: format!("{:.1}%", s.memory_percent),
            uptime: format_duration(&Duration::from_secs(s.uptime_secs)),
            restarts: s.restarts,
        })
        .collect();

    let running = services
        .iter()
        .filter(|s| s.status == ProcessStatus::Running)
        .count();

    println!("\n{}\n", styled(Table::new(rows)));
    println!(
        "{}",
        format!("Total: {} service(s), {} running", services.len(), running)
            .dimmed()
            .italic()
    );
}

/// Print detailed status view for a single service
fn print_detailed_status(service: &ServiceStatus) {
    println!("\n{}", "Service Details".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), service.name.cyan());
    println!(
        "  {:<15} {}",
        "Status:".bold(),
        format_status_colored(&service.status)
    );
    if let Some(pid) = service.pid {
        println!("  {:<15} {}", "PID:".bold(), pid);
    }
    println!("  {:<15} {}", "Port:".bold(), service.port);
    println!("  {:<15} {:.1}%", "CPU Usage:".bold(), service.cpu_percent);
    println!("  {:<15} {:.1}%", "Memory:".bold(), service.memory_percent);
    println!(
        "  {:<15} {}",
        "Uptime:".bold(),
        format_duration(&Duration::from_secs(service.uptime_secs))
    );
    println!("  {:<15} {}", "Restarts:".bold(), service.restarts);
    if let Some(code) = service.last_exit_code {
        println!("  {:<15} {}", "Last Exit:".bold(), code);
    }
    if !service.enabled {
        println!("  {:<15} {}", "Enabled:".bold(), "no".bright_black());
    }
    println!();
}

fn print_health_table(reports: &[HealthReport]) {
    #[derive(Tabled)]
    struct HealthRow {
        #[tabled(rename = "Service")]
        service: String,
        #[tabled(rename = "Health")]
        status: String,
        #[tabled(rename = "Response")]
        response: String,
        #[tabled(rename = "Failures")]
        failures: u32,
        #[tabled(rename = "Checked")]
        checked: String,
        #[tabled(rename = "Message")]
        message: String,
    }

    let rows: Vec<HealthRow> = reports
        .iter()
        .map(|r| HealthRow {
            service: r.service.clone(),
            status: format_health_colored(&r.status),
            response: r
                .response_time_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            failures: r.consecutive_failures,
            checked: format_time(&r.checked_at),
            message: r
                .message
                .as_deref()
                .map(|m| truncate(m, 40))
                .unwrap_or_default(),
        })
        .collect();

    println!("\n{}\n", styled(Table::new(rows)));
}

fn print_metrics_table(service: &str, samples: &[MetricSample]) {
    #[derive(Tabled)]
    struct MetricRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Response")]
        response: String,
        #[tabled(rename = "Health")]
        health: String,
    }

    let rows: Vec<MetricRow> = samples
        .iter()
        .map(|s| MetricRow {
            time: format_time(&s.timestamp),
            cpu: format!("{:.1}%", s.cpu_percent),
            memory: format!("{:.1}%", s.memory_percent),
            response: s
                .response_time_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            health: format_health_colored(&s.health),
        })
        .collect();

    println!("\n{}", format!("Metrics for {}", service).bold().underline());
    println!("\n{}\n", styled(Table::new(rows)));
}

fn print_alerts(alerts: &[Alert]) {
    for alert in alerts {
        let severity = match alert.severity {
            Severity::Warning => alert.severity.to_string().yellow().bold(),
            Severity::Critical => alert.severity.to_string().red().bold(),
        };
        println!(
            "{} {:<8} {} {}",
            format!("[{}]", format_time(&alert.timestamp)).dimmed(),
            severity,
            alert.service.cyan(),
            alert.message
        );
    }
}

/// Print the per-service summary table followed by each service's newest alerts
pub fn print_report(hours: u32, reports: &[ServiceReport]) {
    if reports.is_empty() {
        println!("{}", format!("No metrics or alerts in the last {}h", hours).yellow());
        return;
    }

    #[derive(Tabled)]
    struct ReportRow {
        #[tabled(rename = "Service")]
        service: String,
        #[tabled(rename = "Samples")]
        samples: usize,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "CPU avg/max")]
        cpu: String,
        #[tabled(rename = "Memory avg/max")]
        memory: String,
        #[tabled(rename = "Alerts")]
        alerts: usize,
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            service: r.service.clone(),
            samples: r.samples,
            uptime: format_percent(r.uptime_percent),
            cpu: format!("{} / {}", format_percent(r.avg_cpu), format_percent(r.max_cpu)),
            memory: format!(
                "{} / {}",
                format_percent(r.avg_memory),
                format_percent(r.max_memory)
            ),
            alerts: r.alert_count,
        })
        .collect();

    println!("\n{}", format!("Report for the last {}h", hours).bold().underline());
    println!("\n{}", styled(Table::new(rows)));

    for report in reports.iter().filter(|r| !r.recent_alerts.is_empty()) {
        println!("\n{}", format!("Recent alerts for {}", report.service).bold());
        print_alerts(&report.recent_alerts);
    }
    println!();
}

/// Print log lines as written by the service
fn print_logs(service: &str, lines: &[String]) {
    if lines.is_empty() {
        println!("{}", format!("No logs available for {}", service).yellow());
        return;
    }

    println!("\n{}", format!("Logs for {}", service).bold().underline());
    println!();

    for line in lines {
        println!("{}", line);
    }

    println!();
}

fn print_log_files(files: &[LogFileInfo]) {
    #[derive(Tabled)]
    struct FileRow {
        #[tabled(rename = "Service")]
        service: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Modified")]
        modified: String,
        #[tabled(rename = "Path")]
        path: String,
    }

    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            service: f.service.clone(),
            kind: match f.kind {
                LogFileKind::Active => "active".green().to_string(),
                LogFileKind::Rotated => "rotated".to_string(),
                LogFileKind::Archived => "archived".bright_black().to_string(),
            },
            size: format_size(f.size),
            modified: format_time(&f.modified),
            path: f.path.display().to_string(),
        })
        .collect();

    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("\n{}\n", styled(Table::new(rows)));
    println!(
        "{}",
        format!("Total: {} file(s), {}", files.len(), format_size(total))
            .dimmed()
            .italic()
    );
}

fn print_bulk(results: &[BulkResult]) {
    if results.is_empty() {
        println!("{}", "Nothing to do".yellow());
        return;
    }

    for result in results {
        let mark = if result.ok {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        println!("{} {:<24} {}", mark, result.service.cyan(), result.message);
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        println!(
            "{}",
            format!("{} of {} failed", failed, results.len()).red()
        );
    }
}

fn print_discovery(services: &[String], skipped: &[SkippedService]) {
    println!(
        "{}",
        format!("✓ Discovered {} service(s)", services.len())
            .green()
            .bold()
    );
    for service in services {
        println!("  {}", service.cyan());
    }
    if !skipped.is_empty() {
        println!("\n{}", "Skipped:".yellow().bold());
        for skip in skipped {
            println!("  {:<24} {}", skip.name, skip.reason.dimmed());
        }
    }
}

fn styled(mut table: Table) -> Table {
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table
}

/// Format a process status with color coding
fn format_status_colored(status: &ProcessStatus) -> String {
    match status {
        ProcessStatus::Running => status.to_string().green().to_string(),
        ProcessStatus::Starting => status.to_string().yellow().to_string(),
        ProcessStatus::Stopping => status.to_string().yellow().to_string(),
        ProcessStatus::Stopped => status.to_string().bright_black().to_string(),
        ProcessStatus::Crashed => status.to_string().red().bold().to_string(),
    }
}

fn format_health_colored(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Unknown => status.to_string().bright_black().to_string(),
        HealthStatus::Unhealthy | HealthStatus::Unreachable => {
            status.to_string().yellow().to_string()
        }
        HealthStatus::Down => status.to_string().red().bold().to_string(),
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = (*time).into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format a file size in human-readable format
fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "-".to_string())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(10 * 1024 * 1024), "10.0MB");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(Some(75.0)), "75.0%");
        assert_eq!(format_percent(None), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé-service", 8), "ünïcö...");
    }
}
