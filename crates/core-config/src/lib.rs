//! Configuration loading and parsing.
//!
//! `wisp.toml` is discovered in the working directory first, then the
//! platform config dir. Every section and field is optional with serde
//! defaults, unknown fields are tolerated, and a file that fails to parse
//! falls back to defaults so a stray edit never prevents startup. Semantic
//! validation (threshold ordering) belongs to the consuming types; this
//! crate only shapes the data.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Parsed `wisp.toml`, all sections defaulted.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Load-classification thresholds. CPU/memory/gpu in percent; disk and
/// network in the sampler's KB/s unit.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ThresholdConfig {
    #[serde(default = "ThresholdConfig::default_cpu_light")]
    pub cpu_light: f64,
    #[serde(default = "ThresholdConfig::default_cpu_moderate")]
    pub cpu_moderate: f64,
    #[serde(default = "ThresholdConfig::default_cpu_heavy")]
    pub cpu_heavy: f64,
    #[serde(default = "ThresholdConfig::default_cpu_very_heavy")]
    pub cpu_very_heavy: f64,
    #[serde(default = "ThresholdConfig::default_cpu_critical")]
    pub cpu_critical: f64,
    #[serde(default = "ThresholdConfig::default_mem_warning")]
    pub mem_warning: f64,
    #[serde(default = "ThresholdConfig::default_mem_critical")]
    pub mem_critical: f64,
    #[serde(default)]
    pub gpu: Option<SubsystemConfig>,
    #[serde(default)]
    pub disk: Option<SubsystemConfig>,
    #[serde(default)]
    pub network: Option<SubsystemConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SubsystemConfig {
    pub busy: f64,
    pub very_busy: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_light: Self::default_cpu_light(),
            cpu_moderate: Self::default_cpu_moderate(),
            cpu_heavy: Self::default_cpu_heavy(),
            cpu_very_heavy: Self::default_cpu_very_heavy(),
            cpu_critical: Self::default_cpu_critical(),
            mem_warning: Self::default_mem_warning(),
            mem_critical: Self::default_mem_critical(),
            gpu: None,
            disk: None,
            network: None,
        }
    }
}

impl ThresholdConfig {
    const fn default_cpu_light() -> f64 {
        20.0
    }
    const fn default_cpu_moderate() -> f64 {
        40.0
    }
    const fn default_cpu_heavy() -> f64 {
        60.0
    }
    const fn default_cpu_very_heavy() -> f64 {
        80.0
    }
    const fn default_cpu_critical() -> f64 {
        95.0
    }
    const fn default_mem_warning() -> f64 {
        70.0
    }
    const fn default_mem_critical() -> f64 {
        90.0
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "MonitorConfig::default_period_ms")]
    pub period_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period_ms: Self::default_period_ms(),
        }
    }
}

impl MonitorConfig {
    const fn default_period_ms() -> u64 {
        1000
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalendarConfig {
    #[serde(default = "CalendarConfig::default_period_ms")]
    pub period_ms: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            period_ms: Self::default_period_ms(),
        }
    }
}

impl CalendarConfig {
    const fn default_period_ms() -> u64 {
        60_000
    }
}

/// Per-state interaction timeouts plus the sweep cadence that enforces them.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct InteractionConfig {
    #[serde(default = "InteractionConfig::default_clicked_ms")]
    pub clicked_ms: u64,
    #[serde(default = "InteractionConfig::default_petted_ms")]
    pub petted_ms: u64,
    #[serde(default = "InteractionConfig::default_hover_ms")]
    pub hover_ms: u64,
    #[serde(default = "InteractionConfig::default_generic_ms")]
    pub generic_ms: u64,
    #[serde(default = "InteractionConfig::default_sweep_ms")]
    pub sweep_ms: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            clicked_ms: Self::default_clicked_ms(),
            petted_ms: Self::default_petted_ms(),
            hover_ms: Self::default_hover_ms(),
            generic_ms: Self::default_generic_ms(),
            sweep_ms: Self::default_sweep_ms(),
        }
    }
}

impl InteractionConfig {
    const fn default_clicked_ms() -> u64 {
        500
    }
    const fn default_petted_ms() -> u64 {
        1500
    }
    const fn default_hover_ms() -> u64 {
        800
    }
    const fn default_generic_ms() -> u64 {
        5000
    }
    const fn default_sweep_ms() -> u64 {
        200
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct StateConfig {
    #[serde(default = "StateConfig::default_history_cap")]
    pub history_cap: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_cap: Self::default_history_cap(),
        }
    }
}

impl StateConfig {
    const fn default_history_cap() -> usize {
        128
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "TrackerConfig::default_retention_sec")]
    pub retention_sec: f64,
    #[serde(default = "TrackerConfig::default_pattern_period_hours")]
    pub pattern_period_hours: f64,
    #[serde(default = "TrackerConfig::default_rare")]
    pub rare: f64,
    #[serde(default = "TrackerConfig::default_occasional")]
    pub occasional: f64,
    #[serde(default = "TrackerConfig::default_regular")]
    pub regular: f64,
    #[serde(default = "TrackerConfig::default_frequent")]
    pub frequent: f64,
    #[serde(default = "TrackerConfig::default_storage_file")]
    pub storage_file: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_sec: Self::default_retention_sec(),
            pattern_period_hours: Self::default_pattern_period_hours(),
            rare: Self::default_rare(),
            occasional: Self::default_occasional(),
            regular: Self::default_regular(),
            frequent: Self::default_frequent(),
            storage_file: Self::default_storage_file(),
        }
    }
}

impl TrackerConfig {
    const fn default_retention_sec() -> f64 {
        86_400.0
    }
    const fn default_pattern_period_hours() -> f64 {
        1.0
    }
    const fn default_rare() -> f64 {
        1.0
    }
    const fn default_occasional() -> f64 {
        5.0
    }
    const fn default_regular() -> f64 {
        15.0
    }
    const fn default_frequent() -> f64 {
        30.0
    }
    fn default_storage_file() -> String {
        "interaction_history.json".to_string()
    }
}

/// Loaded configuration plus provenance.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file content when one was read.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path following platform conventions: prefer a local
/// `wisp.toml` before the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("wisp.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("wisp").join("wisp.toml");
    }
    PathBuf::from("wisp.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config loaded");
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(err) => {
                // A broken config never prevents startup.
                warn!(target: "config", path = %path.display(), %err, "config parse failed, using defaults");
                Ok(Config::default())
            }
        }
    } else {
        info!(target: "config", path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}
