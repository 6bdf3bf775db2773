use std::collections::{HashMap, HashSet};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of one process at one refresh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    pub pid: u32,
    /// CPU usage since the previous refresh, in percent of one core
    pub cpu_percent: f32,
    /// Resident memory as a percentage of total system memory
    pub memory_percent: f32,
    pub memory_bytes: u64,
    /// Process start time in seconds since the epoch
    pub start_time: u64,
}

/// Resource sampler backed by sysinfo.
///
/// CPU usage in sysinfo is relative to the previous refresh of the same
/// `System`, so each consumer that needs interval-normalised CPU owns its
/// own monitor.
pub struct ResourceMonitor {
    system: System,
    /// PIDs that have been refreshed at least once
    seen: HashSet<u32>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system,
            seen: HashSet::new(),
        }
    }

    /// Refresh the given PIDs and return a snapshot for each one that exists.
    ///
    /// PIDs seen for the first time report the CPU usage since their start,
    /// which sysinfo reports as 0.
    pub fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ResourceSnapshot> {
        if pids.is_empty() {
            return HashMap::new();
        }

        let sys_pids: Vec<Pid> = pids.iter().map(|&p| Pid::from_u32(p)).collect();
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sys_pids),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let total_memory = self.system.total_memory();
        let mut snapshots = HashMap::new();

        for &pid in pids {
            let Some(process) = self.system.process(Pid::from_u32(pid)) else {
                self.seen.remove(&pid);
                continue;
            };
            if matches!(process.status(), sysinfo::ProcessStatus::Zombie) {
                self.seen.remove(&pid);
                continue;
            }

            let memory_bytes = process.memory();
            let memory_percent = if total_memory > 0 {
                (memory_bytes as f64 / total_memory as f64 * 100.0) as f32
            } else {
                0.0
            };

            self.seen.insert(pid);
            snapshots.insert(
                pid,
                ResourceSnapshot {
                    pid,
                    cpu_percent: process.cpu_usage(),
                    memory_percent,
                    memory_bytes,
                    start_time: process.start_time(),
                },
            );
        }

        snapshots
    }

    /// Like [`ResourceMonitor::sample`], but PIDs not seen before get a
    /// priming refresh first so their CPU figure covers a real interval.
    pub async fn sample_settled(&mut self, pids: &[u32]) -> HashMap<u32, ResourceSnapshot> {
        if pids.iter().any(|pid| !self.seen.contains(pid)) {
            self.sample(pids);
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        }
        self.sample(pids)
    }

    /// Start time of a live, non-zombie process, in seconds since the epoch
    pub fn start_time(&mut self, pid: u32) -> Option<u64> {
        self.sample(&[pid]).get(&pid).map(|s| s.start_time)
    }

    /// Forget PIDs that are no longer tracked
    pub fn retain(&mut self, pids: &[u32]) {
        self.seen.retain(|pid| pids.contains(pid));
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_own_process() {
        let mut monitor = ResourceMonitor::new();
        let pid = std::process::id();

        let snapshots = monitor.sample(&[pid]);
        let snapshot = snapshots.get(&pid).expect("own process should be visible");

        assert_eq!(snapshot.pid, pid);
        assert!(snapshot.memory_bytes > 0);
        assert!(snapshot.memory_percent > 0.0 && snapshot.memory_percent <= 100.0);
        assert!(snapshot.start_time > 0);
    }

    #[test]
    fn test_sample_missing_pid() {
        let mut monitor = ResourceMonitor::new();
        // PIDs are capped well below this on Linux
        let snapshots = monitor.sample(&[u32::MAX - 1]);
        assert!(snapshots.is_empty());
    }

    #[test]
    fn test_sample_empty() {
        let mut monitor = ResourceMonitor::new();
        assert!(monitor.sample(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_sample_settled_primes_new_pids() {
        let mut monitor = ResourceMonitor::new();
        let pid = std::process::id();

        let snapshots = monitor.sample_settled(&[pid]).await;
        assert!(snapshots.contains_key(&pid));
        assert!(monitor.seen.contains(&pid));

        monitor.retain(&[]);
        assert!(monitor.seen.is_empty());
    }

    #[test]
    fn test_start_time() {
        let mut monitor = ResourceMonitor::new();
        assert!(monitor.start_time(std::process::id()).is_some());
    }
}
