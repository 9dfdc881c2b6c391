//! The arbiter: four category slots, priority resolution, bounded history,
//! and `StateChanged` emission.
//!
//! All mutation goes through the `update_*` methods, each of which performs
//! slot write → `current` recomputation → event dispatch as one
//! uninterrupted sequence on the caller's thread. The machine holds the bus
//! but no references to any adapter; adapters hold the machine.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Instant, SystemTime};

use core_events::bus::{BusPayload, EventBus};
use core_events::{StateChange, StatsReading};

use crate::{PetState, StateCategory, ThresholdError, Thresholds};

pub const DEFAULT_HISTORY_CAP: usize = 128;

/// One arbitration slot. Holds the proposed state for its category (if any)
/// and the instant it was last written.
#[derive(Debug, Clone, Copy, Default)]
struct CategorySlot {
    state: Option<PetState>,
    set_at: Option<Instant>,
}

/// A recorded transition of `current`, newest first in the history ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub prev: PetState,
    pub new: PetState,
    /// The category whose slot write caused the transition.
    pub cause: StateCategory,
    pub at: SystemTime,
}

/// Read-only view of the four slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySnapshot {
    pub system: Option<PetState>,
    pub time: Option<PetState>,
    pub special_date: Option<PetState>,
    pub interaction: Option<PetState>,
}

impl CategorySnapshot {
    pub fn get(&self, category: StateCategory) -> Option<PetState> {
        match category {
            StateCategory::System => self.system,
            StateCategory::Time => self.time,
            StateCategory::SpecialDate => self.special_date,
            StateCategory::Interaction => self.interaction,
        }
    }
}

pub struct PetStateMachine {
    bus: Rc<EventBus>,
    thresholds: Thresholds,
    system: CategorySlot,
    time: CategorySlot,
    special_date: CategorySlot,
    interaction: CategorySlot,
    current: PetState,
    history: VecDeque<HistoryEntry>,
    history_cap: usize,
}

impl PetStateMachine {
    pub fn new(bus: Rc<EventBus>, thresholds: Thresholds) -> Result<Self, ThresholdError> {
        Self::with_history_cap(bus, thresholds, DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(
        bus: Rc<EventBus>,
        thresholds: Thresholds,
        history_cap: usize,
    ) -> Result<Self, ThresholdError> {
        thresholds.validate()?;
        tracing::info!(
            target: "state",
            cpu_critical = thresholds.cpu_critical,
            mem_critical = thresholds.mem_critical,
            history_cap,
            "state machine initialized"
        );
        Ok(Self {
            bus,
            thresholds,
            system: CategorySlot::default(),
            time: CategorySlot::default(),
            special_date: CategorySlot::default(),
            interaction: CategorySlot::default(),
            current: PetState::Idle,
            history: VecDeque::new(),
            history_cap: history_cap.max(1),
        })
    }

    /// Replace the System slot. Returns whether `current` changed.
    pub fn update_system(&mut self, state: PetState) -> bool {
        debug_assert_eq!(state.category(), StateCategory::System);
        self.apply(StateCategory::System, Some(state))
    }

    /// Replace the Time slot. Returns whether `current` changed.
    pub fn update_time(&mut self, state: PetState) -> bool {
        debug_assert_eq!(state.category(), StateCategory::Time);
        self.apply(StateCategory::Time, Some(state))
    }

    /// Set or clear the SpecialDate slot. Returns whether `current` changed.
    pub fn set_special_date(&mut self, state: Option<PetState>) -> bool {
        if let Some(state) = state {
            debug_assert_eq!(state.category(), StateCategory::SpecialDate);
        }
        self.apply(StateCategory::SpecialDate, state)
    }

    /// Set or clear the Interaction slot. Returns whether `current` changed.
    pub fn update_interaction(&mut self, state: Option<PetState>) -> bool {
        if let Some(state) = state {
            debug_assert_eq!(state.category(), StateCategory::Interaction);
        }
        self.apply(StateCategory::Interaction, state)
    }

    /// Convenience: classify a raw reading through the thresholds and update
    /// the System slot with the result.
    pub fn update_from_reading(&mut self, reading: &StatsReading) -> bool {
        let state = self.thresholds.classify(reading);
        self.update_system(state)
    }

    pub fn current(&self) -> PetState {
        self.current
    }

    pub fn snapshot(&self) -> CategorySnapshot {
        CategorySnapshot {
            system: self.system.state,
            time: self.time.state,
            special_date: self.special_date.state,
            interaction: self.interaction.state,
        }
    }

    /// Transition history, newest first, bounded by the configured cap.
    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Replace the thresholds (runtime tuning). Rejects unordered sets and
    /// leaves the previous thresholds in place on error.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<(), ThresholdError> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        tracing::info!(target: "state", "thresholds replaced");
        Ok(())
    }

    fn slot_mut(&mut self, category: StateCategory) -> &mut CategorySlot {
        match category {
            StateCategory::System => &mut self.system,
            StateCategory::Time => &mut self.time,
            StateCategory::SpecialDate => &mut self.special_date,
            StateCategory::Interaction => &mut self.interaction,
        }
    }

    fn slot(&self, category: StateCategory) -> &CategorySlot {
        match category {
            StateCategory::System => &self.system,
            StateCategory::Time => &self.time,
            StateCategory::SpecialDate => &self.special_date,
            StateCategory::Interaction => &self.interaction,
        }
    }

    /// Highest-priority non-empty slot, falling back to `Idle`.
    fn resolve(&self) -> PetState {
        for category in StateCategory::PRIORITY {
            if let Some(state) = self.slot(category).state {
                return state;
            }
        }
        PetState::Idle
    }

    fn apply(&mut self, category: StateCategory, state: Option<PetState>) -> bool {
        let slot = self.slot_mut(category);
        slot.state = state;
        slot.set_at = state.map(|_| Instant::now());

        let prev = self.current;
        let new = self.resolve();
        if new == prev {
            return false;
        }
        self.current = new;

        let at = SystemTime::now();
        self.history.push_front(HistoryEntry {
            prev,
            new,
            cause: category,
            at,
        });
        self.history.truncate(self.history_cap);

        tracing::info!(
            target: "state",
            prev = prev.name(),
            new = new.name(),
            cause = category.name(),
            "state changed"
        );
        self.bus.publish(BusPayload::StateChanged(StateChange {
            prev: prev.name(),
            new: new.name(),
            category_changed: prev.category() != new.category(),
            at,
        }));
        true
    }
}
