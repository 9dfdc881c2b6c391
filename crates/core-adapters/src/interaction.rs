//! User interactions → transient Interaction-category states with per-state
//! timeouts.
//!
//! Timeouts are deadlines stored on the adapter, not one-shot timers: every
//! mapped interaction arms a deadline (short for `Clicked`/`Petted`/`Hover`,
//! the generic timeout otherwise) and a single periodic sweep clears the slot
//! once its deadline has passed, but only while the slot still holds the
//! state that armed it, so a sweep racing a newer interaction is a no-op.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use core_events::bus::{BusPayload, EventBus, EventKind, HandlerToken};
use core_events::{InteractionKind, PointerPhase, UserInteraction};
use core_state::PetState;
use core_tracker::InteractionPattern;

use crate::SharedMachine;

/// Per-state clear delays, all tunable from config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionTimeouts {
    pub clicked: Duration,
    pub petted: Duration,
    pub hover: Duration,
    pub generic: Duration,
}

impl Default for InteractionTimeouts {
    fn default() -> Self {
        Self {
            clicked: Duration::from_millis(500),
            petted: Duration::from_millis(1500),
            hover: Duration::from_millis(800),
            generic: Duration::from_millis(5000),
        }
    }
}

impl InteractionTimeouts {
    fn for_state(&self, state: PetState) -> Duration {
        match state {
            PetState::Clicked => self.clicked,
            PetState::Petted => self.petted,
            PetState::Hover => self.hover,
            _ => self.generic,
        }
    }
}

/// Mapping key: kind, optionally qualified by zone. Zone-qualified entries
/// win over generic ones.
type MappingKey = (InteractionKind, Option<String>);

struct AdapterState {
    machine: SharedMachine,
    mapping: HashMap<MappingKey, PetState>,
    pattern_mapping: HashMap<InteractionPattern, PetState>,
    timeouts: InteractionTimeouts,
    current: Option<PetState>,
    deadline: Option<Instant>,
    last_interaction: Option<Instant>,
}

impl AdapterState {
    fn lookup(&self, kind: InteractionKind, zone_id: &str) -> Option<PetState> {
        self.mapping
            .get(&(kind, Some(zone_id.to_string())))
            .or_else(|| self.mapping.get(&(kind, None)))
            .copied()
    }

    fn clear_if_machine_holds(&mut self, expected: PetState) {
        let holds = self.machine.borrow().snapshot().interaction == Some(expected);
        if holds {
            self.machine.borrow_mut().update_interaction(None);
            tracing::debug!(
                target: "adapters.interaction",
                state = expected.name(),
                "interaction state cleared"
            );
        }
        self.current = None;
        self.deadline = None;
    }
}

pub struct InteractionStateAdapter {
    bus: Rc<EventBus>,
    state: Rc<RefCell<AdapterState>>,
    token: HandlerToken,
}

impl InteractionStateAdapter {
    pub fn attach(
        bus: Rc<EventBus>,
        machine: SharedMachine,
        timeouts: InteractionTimeouts,
    ) -> Self {
        let state = Rc::new(RefCell::new(AdapterState {
            machine,
            mapping: default_mapping(),
            pattern_mapping: default_pattern_mapping(),
            timeouts,
            current: None,
            deadline: None,
            last_interaction: None,
        }));

        let handler_state = Rc::clone(&state);
        let token = bus.register(EventKind::UserInteraction, move |event| {
            let BusPayload::Interaction(interaction) = &event.payload else {
                return;
            };
            Self::handle(&handler_state, interaction, Instant::now());
        });

        tracing::info!(target: "adapters.interaction", "interaction state adapter attached");
        Self { bus, state, token }
    }

    fn handle(state: &Rc<RefCell<AdapterState>>, interaction: &UserInteraction, now: Instant) {
        let mut state = state.borrow_mut();

        // A release while dragging drops the Dragged state immediately; the
        // release itself may still map to a new state below.
        if interaction.phase == Some(PointerPhase::Release)
            && state.current == Some(PetState::Dragged)
        {
            tracing::debug!(target: "adapters.interaction", "release while dragged, clearing");
            state.clear_if_machine_holds(PetState::Dragged);
        }

        let Some(target) = state.lookup(interaction.kind, &interaction.zone_id) else {
            // Unmapped interactions only refresh the activity clock so the
            // generic timeout does not fire under an attentive user.
            tracing::debug!(
                target: "adapters.interaction",
                kind = %interaction.kind,
                zone = interaction.zone_id.as_str(),
                "no state mapping for interaction"
            );
            state.last_interaction = Some(now);
            return;
        };

        state.machine.borrow_mut().update_interaction(Some(target));
        state.current = Some(target);
        state.last_interaction = Some(now);
        let timeout = state.timeouts.for_state(target);
        state.deadline = Some(now + timeout);
        tracing::debug!(
            target: "adapters.interaction",
            kind = %interaction.kind,
            zone = interaction.zone_id.as_str(),
            state = target.name(),
            timeout_ms = timeout.as_millis() as u64,
            "interaction state set"
        );
    }

    /// Deterministic entry point used by tests and embedders that bypass the bus.
    pub fn handle_at(&self, interaction: &UserInteraction, now: Instant) {
        Self::handle(&self.state, interaction, now);
    }

    /// Clear expired interaction state. Idempotent: if the slot moved on
    /// since the deadline was armed, only local bookkeeping is dropped.
    pub fn sweep(&self, now: Instant) {
        let mut state = self.state.borrow_mut();
        let (Some(current), Some(deadline)) = (state.current, state.deadline) else {
            return;
        };
        if now < deadline {
            return;
        }
        tracing::debug!(
            target: "adapters.interaction",
            state = current.name(),
            "interaction timeout expired"
        );
        state.clear_if_machine_holds(current);
    }

    /// Clear the interaction state unconditionally (used on shutdown).
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(current) = state.current {
            state.clear_if_machine_holds(current);
        }
    }

    pub fn current_state(&self) -> Option<PetState> {
        self.state.borrow().current
    }

    pub fn last_interaction(&self) -> Option<Instant> {
        self.state.borrow().last_interaction
    }

    /// Extend or override the kind → state table at runtime. `zone_id = None`
    /// registers a generic mapping; zone-qualified entries take precedence.
    pub fn register_mapping(
        &self,
        kind: InteractionKind,
        zone_id: Option<&str>,
        state: PetState,
    ) {
        debug_assert_eq!(state.category(), core_state::StateCategory::Interaction);
        tracing::debug!(
            target: "adapters.interaction",
            kind = %kind,
            zone = zone_id.unwrap_or("*"),
            state = state.name(),
            "interaction mapping registered"
        );
        self.state
            .borrow_mut()
            .mapping
            .insert((kind, zone_id.map(str::to_string)), state);
    }

    /// Interaction-frequency pattern → state, best effort.
    pub fn state_for_pattern(&self, pattern: InteractionPattern) -> Option<PetState> {
        self.state.borrow().pattern_mapping.get(&pattern).copied()
    }

    /// Push the pattern-mapped state into the machine (used when tracking
    /// classifies a burst as excessive and the pet should visibly sulk).
    pub fn apply_pattern(&self, pattern: InteractionPattern, now: Instant) -> bool {
        let Some(target) = self.state_for_pattern(pattern) else {
            return false;
        };
        let mut state = self.state.borrow_mut();
        if state.current == Some(target) {
            return false;
        }
        state.machine.borrow_mut().update_interaction(Some(target));
        state.current = Some(target);
        state.last_interaction = Some(now);
        state.deadline = Some(now + state.timeouts.generic);
        true
    }

    pub fn detach(self) {
        self.clear();
        self.bus.unregister(self.token);
        tracing::info!(target: "adapters.interaction", "interaction state adapter detached");
    }
}

fn default_mapping() -> HashMap<MappingKey, PetState> {
    HashMap::from([
        ((InteractionKind::Click, None), PetState::Clicked),
        ((InteractionKind::DoubleClick, None), PetState::Clicked),
        ((InteractionKind::Drag, None), PetState::Dragged),
        ((InteractionKind::Hover, None), PetState::Hover),
    ])
}

fn default_pattern_mapping() -> HashMap<InteractionPattern, PetState> {
    HashMap::from([
        (InteractionPattern::Occasional, PetState::Happy),
        (InteractionPattern::Regular, PetState::Happy),
        (InteractionPattern::Frequent, PetState::Happy),
        (InteractionPattern::Excessive, PetState::Angry),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_state::{PetStateMachine, Thresholds};
    use core_events::StatsReading;

    fn setup() -> (Rc<EventBus>, SharedMachine, InteractionStateAdapter) {
        let bus = Rc::new(EventBus::new());
        let machine: SharedMachine = Rc::new(RefCell::new(
            PetStateMachine::new(Rc::clone(&bus), Thresholds::default()).unwrap(),
        ));
        let adapter = InteractionStateAdapter::attach(
            Rc::clone(&bus),
            Rc::clone(&machine),
            InteractionTimeouts::default(),
        );
        (bus, machine, adapter)
    }

    fn click(zone: &str) -> UserInteraction {
        UserInteraction::new(InteractionKind::Click, zone).with_phase(PointerPhase::Press)
    }

    #[test]
    fn click_sets_clicked_then_times_out() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(&click("head"), t0);
        assert_eq!(machine.borrow().current(), PetState::Clicked);

        // Not expired yet at 400 ms.
        adapter.sweep(t0 + Duration::from_millis(400));
        assert_eq!(machine.borrow().current(), PetState::Clicked);

        // Expired at 600 ms.
        adapter.sweep(t0 + Duration::from_millis(600));
        assert_eq!(machine.borrow().current(), PetState::Idle);
        assert_eq!(adapter.current_state(), None);
    }

    #[test]
    fn per_state_timeouts_differ() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(
            &UserInteraction::new(InteractionKind::Hover, "head"),
            t0,
        );
        assert_eq!(machine.borrow().current(), PetState::Hover);
        adapter.sweep(t0 + Duration::from_millis(700));
        assert_eq!(machine.borrow().current(), PetState::Hover);
        adapter.sweep(t0 + Duration::from_millis(900));
        assert_eq!(machine.borrow().current(), PetState::Idle);
    }

    #[test]
    fn newer_interaction_rearms_the_deadline() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(&click("head"), t0);
        adapter.handle_at(&click("head"), t0 + Duration::from_millis(400));
        // The first deadline (t0 + 500ms) has passed, but the second click
        // re-armed it.
        adapter.sweep(t0 + Duration::from_millis(600));
        assert_eq!(machine.borrow().current(), PetState::Clicked);
        adapter.sweep(t0 + Duration::from_millis(1000));
        assert_eq!(machine.borrow().current(), PetState::Idle);
    }

    #[test]
    fn sweep_is_idempotent_when_slot_moved_on() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(&click("head"), t0);
        // Something else rewrote the slot directly.
        machine
            .borrow_mut()
            .update_interaction(Some(PetState::Play));
        adapter.sweep(t0 + Duration::from_millis(600));
        // The sweep must not clear a state it did not arm.
        assert_eq!(machine.borrow().current(), PetState::Play);
        assert_eq!(adapter.current_state(), None, "local bookkeeping dropped");
    }

    #[test]
    fn release_clears_dragged_immediately() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(
            &UserInteraction::new(InteractionKind::Drag, "body")
                .with_phase(PointerPhase::Move),
            t0,
        );
        assert_eq!(machine.borrow().current(), PetState::Dragged);

        // A drop outside zones maps to nothing but still clears Dragged.
        adapter.handle_at(
            &UserInteraction::new(InteractionKind::Drop, "no_zone_release")
                .with_phase(PointerPhase::Release),
            t0 + Duration::from_millis(100),
        );
        assert_eq!(machine.borrow().current(), PetState::Idle);
    }

    #[test]
    fn unmapped_interaction_only_refreshes_activity() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(
            &UserInteraction::new(InteractionKind::RightClick, "head"),
            t0,
        );
        assert_eq!(machine.borrow().current(), PetState::Idle);
        assert_eq!(adapter.current_state(), None);
        assert!(adapter.last_interaction().is_some());
    }

    #[test]
    fn zone_qualified_mapping_wins_over_generic() {
        let (_bus, machine, adapter) = setup();
        adapter.register_mapping(InteractionKind::Hover, Some("head"), PetState::Petted);

        let t0 = Instant::now();
        adapter.handle_at(&UserInteraction::new(InteractionKind::Hover, "head"), t0);
        assert_eq!(machine.borrow().current(), PetState::Petted);

        adapter.handle_at(&UserInteraction::new(InteractionKind::Hover, "body"), t0);
        assert_eq!(machine.borrow().current(), PetState::Hover);
    }

    #[test]
    fn interaction_masks_memory_critical_until_timeout() {
        let (_bus, machine, adapter) = setup();
        let t0 = Instant::now();

        adapter.handle_at(&click("head"), t0);
        machine
            .borrow_mut()
            .update_from_reading(&StatsReading::new(10.0, 95.0));
        assert_eq!(machine.borrow().current(), PetState::Clicked);

        adapter.sweep(t0 + Duration::from_millis(600));
        assert_eq!(machine.borrow().current(), PetState::MemoryCritical);
    }

    #[test]
    fn excessive_pattern_maps_to_angry() {
        let (_bus, machine, adapter) = setup();
        assert_eq!(
            adapter.state_for_pattern(InteractionPattern::Excessive),
            Some(PetState::Angry)
        );
        assert_eq!(adapter.state_for_pattern(InteractionPattern::Rare), None);

        assert!(adapter.apply_pattern(InteractionPattern::Excessive, Instant::now()));
        assert_eq!(machine.borrow().current(), PetState::Angry);
        assert!(!adapter.apply_pattern(InteractionPattern::Excessive, Instant::now()));
    }

    #[test]
    fn bus_dispatch_reaches_the_adapter() {
        let (bus, machine, _adapter) = setup();
        bus.publish(BusPayload::Interaction(click("head")));
        assert_eq!(machine.borrow().current(), PetState::Clicked);
    }
}
