use std::sync::Arc;
use std::time::Duration;

use crate::lib::worker::types::{PoolCounters, PoolSummary, SystemStats};
use serde::{Serialize, ser::SerializeStruct};
use sysinfo::{Disks, System};
use tracing::info;

impl Serialize for SystemStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("SystemStats", 13)?;
        state.serialize_field("cpu_usage", &format!("{:.2}%", self.cpu_usage))?;
        state.serialize_field("total_memory", &format!("{} MB", self.total_memory))?;
        state.serialize_field("used_memory", &format!("{} MB", self.used_memory))?;
        state.serialize_field("total_swap", &format!("{} MB", self.total_swap))?;
        state.serialize_field("used_swap", &format!("{} MB", self.used_swap))?;
        state.serialize_field("system_name", &self.system_name)?;
        state.serialize_field("hostname", &self.hostname)?;
        state.serialize_field("total_cpus", &self.total_cpus)?;
        state.serialize_field("disk_usage", &format!("{:.2}%", self.disk_usage))?;
        state.serialize_field("queued", &self.pool.queued)?;
        state.serialize_field("done", &self.pool.done)?;
        state.serialize_field("failed", &self.pool.failed)?;
        state.serialize_field("skipped", &self.pool.skipped)?;
        state.end()
    }
}

fn mebibytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// Share of all mounted disk space in use, in percent.
fn disk_usage(disks: &Disks) -> f32 {
    let (used, total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        let size = disk.total_space();
        (used + size.saturating_sub(disk.available_space()), total + size)
    });
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

pub fn get_stats(sysinfo: &System, pool: PoolSummary) -> SystemStats {
    let unknown = || "Unknown".to_string();
    SystemStats {
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory: mebibytes(sysinfo.total_memory()),
        used_memory: mebibytes(sysinfo.used_memory()),
        total_swap: mebibytes(sysinfo.total_swap()),
        used_swap: mebibytes(sysinfo.used_swap()),
        system_name: System::name().unwrap_or_else(unknown),
        hostname: System::host_name().unwrap_or_else(unknown),
        total_cpus: sysinfo.cpus().len() as u64,
        disk_usage: disk_usage(&Disks::new_with_refreshed_list()),
        pool,
    }
}

/// Logs host load next to the pool's progress until aborted.
pub async fn collect_stats(counters: Arc<PoolCounters>, every: Duration) {
    let mut sysinfo = System::new();
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    // the first tick fires immediately and has no CPU baseline yet
    ticker.tick().await;
    sysinfo.refresh_cpu_usage();

    loop {
        ticker.tick().await;
        sysinfo.refresh_cpu_usage();
        sysinfo.refresh_memory();
        let stats = get_stats(&sysinfo, counters.snapshot());
        match serde_json::to_string(&stats) {
            Ok(json) => info!(stats = %json, "pool progress"),
            Err(e) => info!(error = %e, "cannot serialize stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_serialize_with_units_and_counters() {
        let stats = SystemStats {
            cpu_usage: 12.5,
            total_memory: 2048,
            used_memory: 1024,
            total_swap: 0,
            used_swap: 0,
            system_name: "Linux".into(),
            hostname: "builder".into(),
            total_cpus: 8,
            disk_usage: 50.0,
            pool: PoolSummary {
                queued: 10,
                done: 4,
                failed: 1,
                skipped: 2,
            },
        };

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["cpu_usage"], "12.50%");
        assert_eq!(value["used_memory"], "1024 MB");
        assert_eq!(value["disk_usage"], "50.00%");
        assert_eq!(value["done"], 4);
        assert_eq!(value["skipped"], 2);
    }

    #[test]
    fn memory_is_reported_in_whole_mebibytes() {
        assert_eq!(mebibytes(3 * 1024 * 1024 + 512), 3);
        assert_eq!(mebibytes(1024), 0);
    }

    #[test]
    fn no_disks_means_no_usage() {
        assert_eq!(disk_usage(&Disks::new()), 0.0);
    }

    #[test]
    fn host_stats_are_plausible() {
        let mut sysinfo = System::new();
        sysinfo.refresh_memory();
        let stats = get_stats(&sysinfo, PoolSummary::default());
        assert!(stats.used_memory <= stats.total_memory);
        assert!((0.0..=100.0).contains(&stats.disk_usage));
    }
}
