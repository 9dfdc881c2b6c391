//! Interaction history and frequency tracking.
//!
//! Per (interaction kind, zone) the tracker keeps an ordered list of unix
//! timestamps and a parallel count. Tracking applies a retention sweep (24 h
//! by default) so the history never grows unbounded, and frequency over a
//! reference window classifies into a coarse pattern used by behavior logic.
//!
//! Time never comes from the clock in here: `now` is always an explicit unix
//! seconds parameter, supplied by the runtime (and by tests, which therefore
//! never sleep). Persistence is a JSON document; the loader treats missing,
//! empty, or corrupt input as an empty history rather than an error.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_events::InteractionKind;

pub const DEFAULT_RETENTION_SECS: f64 = 86_400.0;
pub const DEFAULT_PATTERN_PERIOD_HOURS: f64 = 1.0;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown interaction kind {0:?}")]
    UnknownKind(String),
    #[error("failed to encode interaction history: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write interaction history: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of how often the user pokes a given zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionPattern {
    Rare,
    Occasional,
    Regular,
    Frequent,
    Excessive,
}

/// Events-per-hour bounds separating the patterns. A frequency equal to a
/// bound classifies as the bound's pattern (`<=` at each step).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternThresholds {
    pub rare: f64,
    pub occasional: f64,
    pub regular: f64,
    pub frequent: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            rare: 1.0,
            occasional: 5.0,
            regular: 15.0,
            frequent: 30.0,
        }
    }
}

impl PatternThresholds {
    pub fn classify(&self, frequency_per_hour: f64) -> InteractionPattern {
        if frequency_per_hour <= self.rare {
            InteractionPattern::Rare
        } else if frequency_per_hour <= self.occasional {
            InteractionPattern::Occasional
        } else if frequency_per_hour <= self.regular {
            InteractionPattern::Regular
        } else if frequency_per_hour <= self.frequent {
            InteractionPattern::Frequent
        } else {
            InteractionPattern::Excessive
        }
    }
}

type ZoneSeries = HashMap<String, Vec<f64>>;
type ZoneCounts = HashMap<String, u64>;

/// Serialized form of the tracker state. Field names are the stable internal
/// format; readers tolerate any of them being absent.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedHistory {
    #[serde(default)]
    interaction_history: HashMap<String, ZoneSeries>,
    #[serde(default)]
    interaction_counts: HashMap<String, ZoneCounts>,
    #[serde(default)]
    last_updated: f64,
}

pub struct InteractionTracker {
    history: HashMap<InteractionKind, ZoneSeries>,
    counts: HashMap<InteractionKind, ZoneCounts>,
    retention_secs: f64,
    pattern_period_hours: f64,
    thresholds: PatternThresholds,
}

impl Default for InteractionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionTracker {
    pub fn new() -> Self {
        Self::with_tuning(
            DEFAULT_RETENTION_SECS,
            DEFAULT_PATTERN_PERIOD_HOURS,
            PatternThresholds::default(),
        )
    }

    pub fn with_tuning(
        retention_secs: f64,
        pattern_period_hours: f64,
        thresholds: PatternThresholds,
    ) -> Self {
        Self {
            history: HashMap::new(),
            counts: HashMap::new(),
            retention_secs: retention_secs.max(0.0),
            pattern_period_hours,
            thresholds,
        }
    }

    /// Record one interaction at `now` (unix seconds) and sweep expired
    /// entries for every cell.
    pub fn track(&mut self, kind: InteractionKind, zone_id: &str, now: f64) {
        self.history
            .entry(kind)
            .or_default()
            .entry(zone_id.to_string())
            .or_default()
            .push(now);
        *self
            .counts
            .entry(kind)
            .or_default()
            .entry(zone_id.to_string())
            .or_default() += 1;
        tracing::debug!(target: "tracker", kind = %kind, zone = zone_id, "interaction tracked");
        self.apply_decay(now);
    }

    /// String-kind entry point for callers on the wire boundary.
    pub fn track_named(&mut self, kind: &str, zone_id: &str, now: f64) -> Result<(), TrackerError> {
        let kind = InteractionKind::from_name(kind)
            .ok_or_else(|| TrackerError::UnknownKind(kind.to_string()))?;
        self.track(kind, zone_id, now);
        Ok(())
    }

    /// Drop timestamps older than the retention window and rebuild the
    /// affected counts.
    fn apply_decay(&mut self, now: f64) {
        let cutoff = now - self.retention_secs;
        for (kind, zones) in &mut self.history {
            let counts = self.counts.entry(*kind).or_default();
            for (zone_id, series) in zones.iter_mut() {
                let before = series.len();
                series.retain(|ts| *ts > cutoff);
                if series.len() != before {
                    counts.insert(zone_id.clone(), series.len() as u64);
                    tracing::debug!(
                        target: "tracker",
                        kind = %kind,
                        zone = zone_id.as_str(),
                        removed = before - series.len(),
                        "decay swept expired interactions"
                    );
                }
            }
        }
    }

    fn series(&self, kind: InteractionKind, zone_id: &str) -> Option<&Vec<f64>> {
        self.history.get(&kind)?.get(zone_id)
    }

    /// Total recorded count, or the count within `[now - window, now]`.
    pub fn count(
        &self,
        kind: InteractionKind,
        zone_id: &str,
        window_secs: Option<f64>,
        now: f64,
    ) -> u64 {
        match window_secs {
            None => self
                .counts
                .get(&kind)
                .and_then(|zones| zones.get(zone_id))
                .copied()
                .unwrap_or(0),
            Some(window) => {
                let cutoff = now - window;
                self.series(kind, zone_id)
                    .map(|series| series.iter().filter(|ts| **ts >= cutoff).count() as u64)
                    .unwrap_or(0)
            }
        }
    }

    /// Events per hour over the trailing `hours` window. Non-positive `hours`
    /// yields 0 rather than dividing by zero.
    pub fn frequency_per_hour(
        &self,
        kind: InteractionKind,
        zone_id: &str,
        hours: f64,
        now: f64,
    ) -> f64 {
        if hours <= 0.0 {
            return 0.0;
        }
        let count = self.count(kind, zone_id, Some(hours * 3600.0), now);
        count as f64 / hours
    }

    /// Classify over the configured reference period (default one hour).
    pub fn classify_pattern(
        &self,
        kind: InteractionKind,
        zone_id: &str,
        now: f64,
    ) -> InteractionPattern {
        let frequency = self.frequency_per_hour(kind, zone_id, self.pattern_period_hours, now);
        self.thresholds.classify(frequency)
    }

    pub fn last_timestamp(&self, kind: InteractionKind, zone_id: &str) -> Option<f64> {
        self.series(kind, zone_id)?
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, ts| {
                Some(acc.map_or(ts, |best| best.max(ts)))
            })
    }

    pub fn timestamps_in_window(
        &self,
        kind: InteractionKind,
        zone_id: &str,
        window_secs: Option<f64>,
        now: f64,
    ) -> Vec<f64> {
        let Some(series) = self.series(kind, zone_id) else {
            return Vec::new();
        };
        match window_secs {
            None => series.clone(),
            Some(window) => {
                let cutoff = now - window;
                series.iter().copied().filter(|ts| *ts > cutoff).collect()
            }
        }
    }

    pub fn kinds(&self) -> Vec<InteractionKind> {
        self.history.keys().copied().collect()
    }

    pub fn zones(&self, kind: Option<InteractionKind>) -> Vec<String> {
        match kind {
            Some(kind) => self
                .history
                .get(&kind)
                .map(|zones| zones.keys().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut zones: Vec<String> = self
                    .history
                    .values()
                    .flat_map(|z| z.keys().cloned())
                    .collect();
                zones.sort();
                zones.dedup();
                zones
            }
        }
    }

    /// Clear recorded data, optionally scoped by kind and/or zone.
    pub fn clear(&mut self, kind: Option<InteractionKind>, zone_id: Option<&str>) {
        match (kind, zone_id) {
            (None, None) => {
                self.history.clear();
                self.counts.clear();
                tracing::info!(target: "tracker", "all interaction data cleared");
            }
            (Some(kind), None) => {
                self.history.remove(&kind);
                self.counts.remove(&kind);
            }
            (Some(kind), Some(zone)) => {
                if let Some(zones) = self.history.get_mut(&kind) {
                    zones.remove(zone);
                }
                if let Some(zones) = self.counts.get_mut(&kind) {
                    zones.remove(zone);
                }
            }
            (None, Some(zone)) => {
                for zones in self.history.values_mut() {
                    zones.remove(zone);
                }
                for zones in self.counts.values_mut() {
                    zones.remove(zone);
                }
            }
        }
    }

    /// Serialize the full state to a byte sink.
    pub fn save_to(&self, writer: impl Write, now: f64) -> Result<(), TrackerError> {
        let persisted = PersistedHistory {
            interaction_history: self
                .history
                .iter()
                .map(|(kind, zones)| (kind.name().to_string(), zones.clone()))
                .collect(),
            interaction_counts: self
                .counts
                .iter()
                .map(|(kind, zones)| (kind.name().to_string(), zones.clone()))
                .collect(),
            last_updated: now,
        };
        serde_json::to_writer_pretty(writer, &persisted)?;
        tracing::info!(target: "tracker", "interaction history persisted");
        Ok(())
    }

    /// Restore tracker state from a byte stream with default tuning.
    pub fn load_from(reader: impl Read) -> Self {
        Self::load_into(reader, Self::new())
    }

    /// Restore tracker state from a byte stream into a tuned (empty) tracker.
    /// Empty or undecodable input (and unknown kind names inside it) degrade
    /// to empty state; this never fails.
    pub fn load_into(mut reader: impl Read, mut template: InteractionTracker) -> Self {
        let mut raw = String::new();
        if let Err(err) = reader.read_to_string(&mut raw) {
            tracing::warn!(target: "tracker", %err, "interaction history unreadable, starting fresh");
            return template;
        }
        if raw.trim().is_empty() {
            tracing::info!(target: "tracker", "interaction history empty, starting fresh");
            return template;
        }
        let persisted: PersistedHistory = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::warn!(target: "tracker", %err, "interaction history corrupt, starting fresh");
                return template;
            }
        };

        for (name, zones) in persisted.interaction_history {
            let Some(kind) = InteractionKind::from_name(&name) else {
                tracing::warn!(target: "tracker", kind = name.as_str(), "dropping unknown kind from history");
                continue;
            };
            template.history.insert(kind, zones);
        }
        for (name, zones) in persisted.interaction_counts {
            let Some(kind) = InteractionKind::from_name(&name) else {
                continue;
            };
            template.counts.insert(kind, zones);
        }
        // Persisted counts may predate a decay sweep; make them consistent
        // with the loaded series.
        for (kind, zones) in &template.history {
            let counts = template.counts.entry(*kind).or_default();
            for (zone_id, series) in zones {
                counts.insert(zone_id.clone(), series.len() as u64);
            }
        }
        tracing::info!(target: "tracker", kinds = template.history.len(), "interaction history loaded");
        template
    }

    pub fn is_empty(&self) -> bool {
        self.history.values().all(|zones| zones.values().all(Vec::is_empty))
    }
}
