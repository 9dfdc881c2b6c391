//! End-to-end arbitration scenarios: pointer events route through zones onto
//! the bus, adapters feed the machine, and `StateChanged` fan-out is observed
//! exactly as an animation/UI consumer would see it.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use kurbo::Point;

use core_adapters::{
    InteractionStateAdapter, InteractionTimeouts, SystemStateAdapter, TimeStateBridge,
};
use core_events::bus::{BusPayload, EventBus, EventKind};
use core_events::{
    InteractionKind, PointerButton, PointerEvent, PointerPhase, StatsReading, UserInteraction,
};
use core_state::{PetState, PetStateMachine, Thresholds};
use core_zones::{InteractionZone, PointerRouter, ZoneRegistry, ZoneShape};

struct Harness {
    bus: Rc<EventBus>,
    machine: Rc<RefCell<PetStateMachine>>,
    interaction: InteractionStateAdapter,
    _system: SystemStateAdapter,
    registry: ZoneRegistry,
    router: PointerRouter,
    transitions: Rc<RefCell<Vec<(String, String)>>>,
}

impl Harness {
    fn new() -> Self {
        let bus = Rc::new(EventBus::new());
        let machine = Rc::new(RefCell::new(
            PetStateMachine::new(Rc::clone(&bus), Thresholds::default()).unwrap(),
        ));
        let interaction = InteractionStateAdapter::attach(
            Rc::clone(&bus),
            Rc::clone(&machine),
            InteractionTimeouts::default(),
        );
        let system = SystemStateAdapter::attach(Rc::clone(&bus), Rc::clone(&machine));

        let transitions: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let transitions = Rc::clone(&transitions);
            bus.register(EventKind::StateChanged, move |event| {
                if let BusPayload::StateChanged(change) = &event.payload {
                    transitions
                        .borrow_mut()
                        .push((change.prev.to_string(), change.new.to_string()));
                }
            });
        }

        let mut registry = ZoneRegistry::new();
        registry
            .add(InteractionZone::new(
                "head",
                ZoneShape::circle(Point::new(100.0, 100.0), 50.0).unwrap(),
            ))
            .unwrap();
        registry
            .add(InteractionZone::new(
                "body",
                ZoneShape::rect(Point::new(50.0, 150.0), 100.0, 120.0).unwrap(),
            ))
            .unwrap();

        Self {
            bus,
            machine,
            interaction,
            _system: system,
            registry,
            router: PointerRouter::new(),
            transitions,
        }
    }

    /// Route a pointer event and publish whatever interactions it produced,
    /// exactly as the runtime loop does.
    fn pointer(&mut self, phase: PointerPhase, button: PointerButton, x: f64, y: f64) {
        let produced = self.router.route(
            &mut self.registry,
            PointerEvent { phase, button, x, y },
        );
        for interaction in produced {
            self.bus.publish(BusPayload::Interaction(interaction));
        }
    }

    fn current(&self) -> PetState {
        self.machine.borrow().current()
    }
}

#[test]
fn idle_click_then_auto_clear() {
    let h = Harness::new();
    let t0 = Instant::now();
    assert_eq!(h.current(), PetState::Idle);

    h.bus.publish(BusPayload::Interaction(
        UserInteraction::new(InteractionKind::Click, "head").with_phase(PointerPhase::Press),
    ));
    assert_eq!(h.current(), PetState::Clicked);
    assert_eq!(
        *h.transitions.borrow(),
        vec![("idle".to_string(), "clicked".to_string())]
    );

    // 600 ms later the clicked timeout has expired.
    h.interaction.sweep(t0 + Duration::from_millis(600));
    assert_eq!(h.current(), PetState::Idle);
    assert_eq!(h.transitions.borrow().len(), 2);
    assert_eq!(
        h.transitions.borrow()[1],
        ("clicked".to_string(), "idle".to_string())
    );
}

#[test]
fn memory_critical_waits_for_interaction_to_clear() {
    let h = Harness::new();
    let t0 = Instant::now();

    h.bus.publish(BusPayload::Interaction(
        UserInteraction::new(InteractionKind::Click, "head").with_phase(PointerPhase::Press),
    ));
    assert_eq!(h.current(), PetState::Clicked);

    // Memory critical arrives while the click is held: interaction is top
    // priority, so the visible state stays Clicked.
    h.bus
        .publish(BusPayload::Stats(StatsReading::new(10.0, 95.0)));
    assert_eq!(h.current(), PetState::Clicked);
    assert_eq!(
        h.machine.borrow().snapshot().system,
        Some(PetState::MemoryCritical)
    );

    // After the clicked timeout the critical state surfaces.
    h.interaction.sweep(t0 + Duration::from_millis(600));
    assert_eq!(h.current(), PetState::MemoryCritical);
}

#[test]
fn hover_enter_then_leave_times_out_to_idle() {
    let mut h = Harness::new();
    let t0 = Instant::now();

    // Mouse enters the head circle.
    h.pointer(PointerPhase::Move, PointerButton::None, 100.0, 100.0);
    assert_eq!(h.current(), PetState::Hover);
    assert!(h.registry.get("head").unwrap().active);

    // Mouse leaves every zone; the hover marker drops immediately, the
    // visible state decays on the 800 ms timeout.
    h.pointer(PointerPhase::Move, PointerButton::None, 300.0, 300.0);
    assert!(!h.registry.get("head").unwrap().active);
    assert_eq!(h.current(), PetState::Hover);

    h.interaction.sweep(t0 + Duration::from_millis(700));
    assert_eq!(h.current(), PetState::Hover, "not expired yet");
    h.interaction.sweep(t0 + Duration::from_millis(900));
    assert_eq!(h.current(), PetState::Idle);
}

#[test]
fn drag_release_outside_zones_clears_immediately() {
    let mut h = Harness::new();

    h.pointer(PointerPhase::Press, PointerButton::Left, 100.0, 100.0);
    assert_eq!(h.current(), PetState::Clicked);

    h.pointer(PointerPhase::Move, PointerButton::None, 200.0, 120.0);
    assert_eq!(h.current(), PetState::Dragged);

    // Release far away from every zone: the router posts a Drop against
    // "no_zone_release" and the adapter clears Dragged on the release phase.
    h.pointer(PointerPhase::Release, PointerButton::Left, 400.0, 400.0);
    assert_eq!(h.current(), PetState::Idle);
}

#[test]
fn time_and_interaction_compose_across_the_bus() {
    let h = Harness::new();
    let t0 = Instant::now();
    let _bridge = TimeStateBridge::attach(Rc::clone(&h.bus), Rc::clone(&h.machine));

    h.bus.publish(BusPayload::PeriodChanged(core_events::PeriodChange {
        old: None,
        new: "evening",
        at: std::time::SystemTime::now(),
    }));
    assert_eq!(h.current(), PetState::Evening);

    h.bus.publish(BusPayload::Interaction(
        UserInteraction::new(InteractionKind::Click, "head").with_phase(PointerPhase::Press),
    ));
    assert_eq!(h.current(), PetState::Clicked);

    h.interaction.sweep(t0 + Duration::from_millis(600));
    assert_eq!(h.current(), PetState::Evening, "falls back to the time state");
}
