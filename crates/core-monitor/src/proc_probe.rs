//! Best-effort `/proc` probe for Linux hosts.
//!
//! Every accessor swallows IO and parse failures into `None`, which the
//! sampler turns into an omitted field. CPU usage needs two `/proc/stat`
//! readings, so the first call returns `None` and primes the window.

use std::fs;

use crate::{DiskCounters, NetCounters, StatsProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

/// Reads `/proc/stat`, `/proc/meminfo`, `/proc/diskstats` and
/// `/proc/net/dev`. GPU usage has no portable procfs surface and stays
/// unavailable here.
#[derive(Debug, Default)]
pub struct ProcStatsProbe {
    prev_cpu: Option<CpuTimes>,
}

impl ProcStatsProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_cpu_times() -> Option<CpuTimes> {
        let stat = fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            return None;
        }
        // user nice system idle iowait irq softirq steal ...
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        Some(CpuTimes {
            total: values.iter().sum(),
            idle,
        })
    }
}

impl StatsProbe for ProcStatsProbe {
    fn cpu_percent(&mut self) -> Option<f64> {
        let current = Self::read_cpu_times()?;
        let prev = self.prev_cpu.replace(current)?;
        let total = current.total.saturating_sub(prev.total);
        let idle = current.idle.saturating_sub(prev.idle);
        if total == 0 {
            return Some(0.0);
        }
        Some((1.0 - idle as f64 / total as f64) * 100.0)
    }

    fn memory_percent(&mut self) -> Option<f64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let mut total = None;
        let mut available = None;
        for line in meminfo.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("MemTotal:") => total = fields.next()?.parse::<f64>().ok(),
                Some("MemAvailable:") => available = fields.next()?.parse::<f64>().ok(),
                _ => {}
            }
            if total.is_some() && available.is_some() {
                break;
            }
        }
        let (total, available) = (total?, available?);
        if total <= 0.0 {
            return None;
        }
        Some((1.0 - available / total) * 100.0)
    }

    fn disk_counters(&mut self) -> Option<DiskCounters> {
        const SECTOR_BYTES: u64 = 512;
        let diskstats = fs::read_to_string("/proc/diskstats").ok()?;
        let mut counters = DiskCounters::default();
        let mut seen_device = false;
        for line in diskstats.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let name = fields[2];
            // Whole physical devices only; partitions and virtual devices
            // would double-count.
            if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-") {
                continue;
            }
            if name.ends_with(|c: char| c.is_ascii_digit())
                && (name.starts_with("sd") || name.starts_with("vd") || name.starts_with("hd"))
            {
                continue;
            }
            let (Ok(sectors_read), Ok(sectors_written)) =
                (fields[5].parse::<u64>(), fields[9].parse::<u64>())
            else {
                continue;
            };
            counters.read_bytes += sectors_read * SECTOR_BYTES;
            counters.write_bytes += sectors_written * SECTOR_BYTES;
            seen_device = true;
        }
        seen_device.then_some(counters)
    }

    fn net_counters(&mut self) -> Option<NetCounters> {
        let netdev = fs::read_to_string("/proc/net/dev").ok()?;
        let mut counters = NetCounters::default();
        let mut seen_interface = false;
        for line in netdev.lines().skip(2) {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            if name.trim() == "lo" {
                continue;
            }
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() < 9 {
                continue;
            }
            let (Ok(recv), Ok(sent)) = (fields[0].parse::<u64>(), fields[8].parse::<u64>())
            else {
                continue;
            };
            counters.bytes_recv += recv;
            counters.bytes_sent += sent;
            seen_interface = true;
        }
        seen_interface.then_some(counters)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn cpu_needs_two_readings_then_reports_a_percentage() {
        let mut probe = ProcStatsProbe::new();
        assert_eq!(probe.cpu_percent(), None, "first reading primes the window");
        if let Some(cpu) = probe.cpu_percent() {
            assert!((0.0..=100.0).contains(&cpu), "cpu {cpu} out of range");
        }
    }

    #[test]
    fn memory_reports_a_percentage() {
        let mut probe = ProcStatsProbe::new();
        let memory = probe.memory_percent().expect("meminfo readable on linux");
        assert!((0.0..=100.0).contains(&memory), "memory {memory} out of range");
    }

    #[test]
    fn counters_are_cumulative_and_monotonic_within_a_test() {
        let mut probe = ProcStatsProbe::new();
        if let (Some(a), Some(b)) = (probe.net_counters(), probe.net_counters()) {
            assert!(b.bytes_recv >= a.bytes_recv);
            assert!(b.bytes_sent >= a.bytes_sent);
        }
        if let (Some(a), Some(b)) = (probe.disk_counters(), probe.disk_counters()) {
            assert!(b.read_bytes >= a.read_bytes);
            assert!(b.write_bytes >= a.write_bytes);
        }
    }
}
