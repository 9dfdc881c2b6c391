//! System monitor: probe abstraction, the sampler that turns raw counters
//! into readings, and the periodic event source feeding the runtime channel.
//!
//! The probe is a capability: each accessor returns `Option` and a `None`
//! simply omits that field from the published reading; values are never
//! faked. Disk and network deliver cumulative byte counters; the sampler
//! keeps the previous counters and check time and converts deltas into KB/s,
//! yielding 0 for a zero or negative delta and never dividing by zero.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use core_events::{AsyncEventSource, Event, StatsReading};

pub mod proc_probe;

pub use proc_probe::ProcStatsProbe;

/// Cumulative disk transfer counters in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Cumulative network transfer counters in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetCounters {
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

/// Raw host-machine readings. Every accessor is best-effort.
pub trait StatsProbe: Send {
    fn cpu_percent(&mut self) -> Option<f64>;
    fn memory_percent(&mut self) -> Option<f64>;
    fn gpu_percent(&mut self) -> Option<f64> {
        None
    }
    fn disk_counters(&mut self) -> Option<DiskCounters> {
        None
    }
    fn net_counters(&mut self) -> Option<NetCounters> {
        None
    }
}

/// Converts probe output into [`StatsReading`]s, maintaining the previous
/// disk/net counters for rate windows.
pub struct SystemSampler {
    probe: Box<dyn StatsProbe>,
    prev_disk: Option<(DiskCounters, Instant)>,
    prev_net: Option<(NetCounters, Instant)>,
}

impl SystemSampler {
    pub fn new(probe: Box<dyn StatsProbe>) -> Self {
        Self {
            probe,
            prev_disk: None,
            prev_net: None,
        }
    }

    /// Produce one reading at `now`. Returns `None` (and logs) when cpu or
    /// memory is unavailable; a partial subsystem set is fine.
    pub fn sample(&mut self, now: Instant) -> Option<StatsReading> {
        let cpu = self.probe.cpu_percent();
        let memory = self.probe.memory_percent();
        let (Some(cpu), Some(memory)) = (cpu, memory) else {
            tracing::debug!(
                target: "monitor",
                cpu = cpu.is_some(),
                memory = memory.is_some(),
                "cpu/memory unavailable, skipping sample"
            );
            return None;
        };

        let disk_kbps = self.probe.disk_counters().map(|counters| {
            let rate = match self.prev_disk {
                Some((prev, at)) => {
                    let transferred = (counters.read_bytes.saturating_sub(prev.read_bytes))
                        + (counters.write_bytes.saturating_sub(prev.write_bytes));
                    rate_kbps(transferred, now.saturating_duration_since(at))
                }
                None => 0.0,
            };
            self.prev_disk = Some((counters, now));
            rate
        });

        let network_kbps = self.probe.net_counters().map(|counters| {
            let rate = match self.prev_net {
                Some((prev, at)) => {
                    let transferred = (counters.bytes_recv.saturating_sub(prev.bytes_recv))
                        + (counters.bytes_sent.saturating_sub(prev.bytes_sent));
                    rate_kbps(transferred, now.saturating_duration_since(at))
                }
                None => 0.0,
            };
            self.prev_net = Some((counters, now));
            rate
        });

        Some(StatsReading {
            cpu,
            memory,
            gpu: self.probe.gpu_percent(),
            disk_kbps,
            network_kbps,
        })
    }
}

fn rate_kbps(transferred_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    transferred_bytes as f64 / 1024.0 / secs
}

/// Periodic producer publishing `Event::Stats` on the runtime channel.
pub struct StatsEventSource {
    sampler: SystemSampler,
    period: Duration,
}

impl StatsEventSource {
    pub fn new(sampler: SystemSampler, period: Duration) -> Self {
        Self { sampler, period }
    }
}

impl AsyncEventSource for StatsEventSource {
    fn name(&self) -> &'static str {
        "stats_monitor"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let mut sampler = self.sampler;
        let period = self.period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Some(reading) = sampler.sample(Instant::now()) {
                    tracing::trace!(
                        target: "monitor",
                        cpu = reading.cpu,
                        memory = reading.memory,
                        "stats sampled"
                    );
                    if tx.send(Event::Stats(reading)).await.is_err() {
                        break;
                    }
                } else if tx.is_closed() {
                    break;
                }
            }
        })
    }
}
