//! Pet state vocabulary and arbitration: the closed `PetState` enumeration,
//! its category partition, load-classification thresholds, and the
//! priority-stratified state machine in [`machine`].
//!
//! Category priority is fixed: Interaction > SpecialDate > System > Time.
//! Interaction is top priority unconditionally; a held interaction state
//! masks even `MemoryCritical` until it clears.

use core_events::StatsReading;
use thiserror::Error;

pub mod machine;

pub use machine::{CategorySnapshot, HistoryEntry, PetStateMachine};

/// One of the four input categories feeding the state machine. Every
/// `PetState` belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCategory {
    System,
    Time,
    SpecialDate,
    Interaction,
}

impl StateCategory {
    /// Categories in descending arbitration priority.
    pub const PRIORITY: [StateCategory; 4] = [
        StateCategory::Interaction,
        StateCategory::SpecialDate,
        StateCategory::System,
        StateCategory::Time,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StateCategory::System => "system",
            StateCategory::Time => "time",
            StateCategory::SpecialDate => "special_date",
            StateCategory::Interaction => "interaction",
        }
    }
}

/// The closed enumeration of pet states driving animation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PetState {
    // System
    Idle,
    LightLoad,
    ModerateLoad,
    HeavyLoad,
    VeryHeavyLoad,
    CpuCritical,
    MemoryWarning,
    MemoryCritical,
    GpuBusy,
    GpuVeryBusy,
    DiskBusy,
    DiskVeryBusy,
    NetworkBusy,
    NetworkVeryBusy,
    // Time
    Morning,
    Noon,
    Afternoon,
    Evening,
    Night,
    // Special dates
    NewYear,
    SpringFestival,
    Valentine,
    Birthday,
    Lichun,
    Festival,
    // Interaction
    Clicked,
    Dragged,
    Hover,
    Petted,
    Happy,
    Sad,
    Angry,
    Play,
}

impl PetState {
    pub const ALL: [PetState; 33] = [
        PetState::Idle,
        PetState::LightLoad,
        PetState::ModerateLoad,
        PetState::HeavyLoad,
        PetState::VeryHeavyLoad,
        PetState::CpuCritical,
        PetState::MemoryWarning,
        PetState::MemoryCritical,
        PetState::GpuBusy,
        PetState::GpuVeryBusy,
        PetState::DiskBusy,
        PetState::DiskVeryBusy,
        PetState::NetworkBusy,
        PetState::NetworkVeryBusy,
        PetState::Morning,
        PetState::Noon,
        PetState::Afternoon,
        PetState::Evening,
        PetState::Night,
        PetState::NewYear,
        PetState::SpringFestival,
        PetState::Valentine,
        PetState::Birthday,
        PetState::Lichun,
        PetState::Festival,
        PetState::Clicked,
        PetState::Dragged,
        PetState::Hover,
        PetState::Petted,
        PetState::Happy,
        PetState::Sad,
        PetState::Angry,
        PetState::Play,
    ];

    /// Category membership is a compile-time property of the state.
    pub fn category(self) -> StateCategory {
        use PetState::*;
        match self {
            Idle | LightLoad | ModerateLoad | HeavyLoad | VeryHeavyLoad | CpuCritical
            | MemoryWarning | MemoryCritical | GpuBusy | GpuVeryBusy | DiskBusy | DiskVeryBusy
            | NetworkBusy | NetworkVeryBusy => StateCategory::System,
            Morning | Noon | Afternoon | Evening | Night => StateCategory::Time,
            NewYear | SpringFestival | Valentine | Birthday | Lichun | Festival => {
                StateCategory::SpecialDate
            }
            Clicked | Dragged | Hover | Petted | Happy | Sad | Angry | Play => {
                StateCategory::Interaction
            }
        }
    }

    /// Stable identifier used on the wire (`StateChanged` payloads) and in
    /// animation catalogs.
    pub fn name(self) -> &'static str {
        use PetState::*;
        match self {
            Idle => "idle",
            LightLoad => "light_load",
            ModerateLoad => "moderate_load",
            HeavyLoad => "heavy_load",
            VeryHeavyLoad => "very_heavy_load",
            CpuCritical => "cpu_critical",
            MemoryWarning => "memory_warning",
            MemoryCritical => "memory_critical",
            GpuBusy => "gpu_busy",
            GpuVeryBusy => "gpu_very_busy",
            DiskBusy => "disk_busy",
            DiskVeryBusy => "disk_very_busy",
            NetworkBusy => "network_busy",
            NetworkVeryBusy => "network_very_busy",
            Morning => "morning",
            Noon => "noon",
            Afternoon => "afternoon",
            Evening => "evening",
            Night => "night",
            NewYear => "new_year",
            SpringFestival => "spring_festival",
            Valentine => "valentine",
            Birthday => "birthday",
            Lichun => "lichun",
            Festival => "festival",
            Clicked => "clicked",
            Dragged => "dragged",
            Hover => "hover",
            Petted => "petted",
            Happy => "happy",
            Sad => "sad",
            Angry => "angry",
            Play => "play",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Severity rank within the System category (higher outranks lower);
    /// `None` for states of other categories. The classification in
    /// [`Thresholds::classify`] only ever produces a state whose rank is the
    /// highest one its reading qualifies for.
    pub fn system_rank(self) -> Option<u8> {
        use PetState::*;
        match self {
            MemoryCritical => Some(8),
            CpuCritical => Some(7),
            MemoryWarning => Some(6),
            VeryHeavyLoad | GpuVeryBusy | DiskVeryBusy | NetworkVeryBusy => Some(5),
            HeavyLoad => Some(4),
            GpuBusy | DiskBusy | NetworkBusy | ModerateLoad => Some(3),
            LightLoad => Some(2),
            Idle => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for PetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("cpu thresholds must be strictly increasing ({0} out of order)")]
    CpuOrder(&'static str),
    #[error("memory warning threshold must be strictly below critical")]
    MemoryOrder,
    #[error("{0} busy threshold must be strictly below very_busy")]
    SubsystemOrder(&'static str),
}

/// Busy / very-busy pair for an optional subsystem (gpu, disk, network).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsystemThresholds {
    pub busy: f64,
    pub very_busy: f64,
}

/// Load-classification thresholds. CPU and memory are percentages; gpu is a
/// percentage; disk/network share the unit of the delivered reading (KB/s).
/// They live on the state machine and may be tuned at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub cpu_light: f64,
    pub cpu_moderate: f64,
    pub cpu_heavy: f64,
    pub cpu_very_heavy: f64,
    pub cpu_critical: f64,
    pub mem_warning: f64,
    pub mem_critical: f64,
    pub gpu: Option<SubsystemThresholds>,
    pub disk: Option<SubsystemThresholds>,
    pub network: Option<SubsystemThresholds>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_light: 20.0,
            cpu_moderate: 40.0,
            cpu_heavy: 60.0,
            cpu_very_heavy: 80.0,
            cpu_critical: 95.0,
            mem_warning: 70.0,
            mem_critical: 90.0,
            gpu: None,
            disk: None,
            network: None,
        }
    }
}

impl Thresholds {
    /// Reject non-monotonic threshold sequences. Called at machine
    /// construction and whenever thresholds are replaced.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let cpu = [
            ("cpu_light", self.cpu_light),
            ("cpu_moderate", self.cpu_moderate),
            ("cpu_heavy", self.cpu_heavy),
            ("cpu_very_heavy", self.cpu_very_heavy),
            ("cpu_critical", self.cpu_critical),
        ];
        for pair in cpu.windows(2) {
            if pair[0].1 >= pair[1].1 {
                return Err(ThresholdError::CpuOrder(pair[1].0));
            }
        }
        if self.mem_warning >= self.mem_critical {
            return Err(ThresholdError::MemoryOrder);
        }
        for (name, sub) in [
            ("gpu", self.gpu),
            ("disk", self.disk),
            ("network", self.network),
        ] {
            if let Some(sub) = sub
                && sub.busy >= sub.very_busy
            {
                return Err(ThresholdError::SubsystemOrder(name));
            }
        }
        Ok(())
    }

    /// Map a reading to a single System-category state, highest severity
    /// first. Boundary values classify upward (`>=` everywhere), so a cpu
    /// reading exactly at `cpu_critical` is `CpuCritical` and memory exactly
    /// at `mem_warning` is `MemoryWarning`.
    pub fn classify(&self, reading: &StatsReading) -> PetState {
        if reading.memory >= self.mem_critical {
            return PetState::MemoryCritical;
        }
        if reading.cpu >= self.cpu_critical {
            return PetState::CpuCritical;
        }
        if reading.memory >= self.mem_warning {
            return PetState::MemoryWarning;
        }
        if let Some(state) = self.subsystem_state(reading, |sub| sub.very_busy, true) {
            return state;
        }
        if reading.cpu >= self.cpu_very_heavy {
            return PetState::VeryHeavyLoad;
        }
        if reading.cpu >= self.cpu_heavy {
            return PetState::HeavyLoad;
        }
        if let Some(state) = self.subsystem_state(reading, |sub| sub.busy, false) {
            return state;
        }
        if reading.cpu >= self.cpu_moderate {
            return PetState::ModerateLoad;
        }
        if reading.cpu >= self.cpu_light {
            return PetState::LightLoad;
        }
        PetState::Idle
    }

    /// First subsystem (gpu over disk over network) whose reading reaches the
    /// selected bound. A subsystem participates only when both its thresholds
    /// and its reading are present.
    fn subsystem_state(
        &self,
        reading: &StatsReading,
        bound: impl Fn(&SubsystemThresholds) -> f64,
        very: bool,
    ) -> Option<PetState> {
        let lanes = [
            (self.gpu, reading.gpu, PetState::GpuBusy, PetState::GpuVeryBusy),
            (
                self.disk,
                reading.disk_kbps,
                PetState::DiskBusy,
                PetState::DiskVeryBusy,
            ),
            (
                self.network,
                reading.network_kbps,
                PetState::NetworkBusy,
                PetState::NetworkVeryBusy,
            ),
        ];
        for (thresholds, value, busy, very_busy) in lanes {
            if let (Some(sub), Some(value)) = (thresholds, value)
                && value >= bound(&sub)
            {
                return Some(if very { very_busy } else { busy });
            }
        }
        None
    }
}
