//! Animation binding interface.
//!
//! The core never plays animations. It exposes a catalog lookup
//! (state → handle) and a binder that tracks which handle the external
//! engine should be showing. When the engine reports a one-shot animation
//! finished, the binder re-evaluates the machine and re-dispatches the live
//! background state so consumers fall back from e.g. `Clicked` to whatever
//! category state is still held.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::SystemTime;

use core_events::bus::{BusPayload, EventBus, EventKind, HandlerToken};
use core_events::StateChange;
use core_state::{PetState, PetStateMachine};

/// Opaque handle the animation engine resolves to an actual clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationHandle {
    pub name: String,
    /// One-shot handles report completion via `animation_finished`;
    /// looping handles play until the next state change.
    pub looping: bool,
}

impl AnimationHandle {
    pub fn looping(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            looping: true,
        }
    }

    pub fn one_shot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            looping: false,
        }
    }
}

/// State → animation lookup implemented by the embedding theme.
pub trait AnimationCatalog {
    fn animation_for(&self, state: PetState) -> Option<AnimationHandle>;
}

/// Complete deterministic catalog: every state resolves, transient
/// interaction states as one-shots, everything else looping. Stands in until
/// a real theme supplies clips.
pub struct PlaceholderCatalog {
    table: HashMap<PetState, AnimationHandle>,
}

impl Default for PlaceholderCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderCatalog {
    pub fn new() -> Self {
        let table = PetState::ALL
            .into_iter()
            .map(|state| {
                let one_shot = matches!(
                    state,
                    PetState::Clicked | PetState::Petted | PetState::Play
                );
                let name = format!("placeholder/{}", state.name());
                let handle = if one_shot {
                    AnimationHandle::one_shot(name)
                } else {
                    AnimationHandle::looping(name)
                };
                (state, handle)
            })
            .collect();
        Self { table }
    }
}

impl AnimationCatalog for PlaceholderCatalog {
    fn animation_for(&self, state: PetState) -> Option<AnimationHandle> {
        self.table.get(&state).cloned()
    }
}

/// Tracks the binding between the current pet state and the handle the
/// engine should play.
pub struct AnimationBinder {
    bus: Rc<EventBus>,
    machine: Rc<RefCell<PetStateMachine>>,
    catalog: Rc<dyn AnimationCatalog>,
    current: Rc<RefCell<Option<(PetState, AnimationHandle)>>>,
    token: HandlerToken,
}

impl AnimationBinder {
    pub fn attach(
        bus: Rc<EventBus>,
        machine: Rc<RefCell<PetStateMachine>>,
        catalog: Rc<dyn AnimationCatalog>,
    ) -> Self {
        let current: Rc<RefCell<Option<(PetState, AnimationHandle)>>> =
            Rc::new(RefCell::new(None));

        let handler_catalog = Rc::clone(&catalog);
        let handler_current = Rc::clone(&current);
        let token = bus.register(EventKind::StateChanged, move |event| {
            let BusPayload::StateChanged(change) = &event.payload else {
                return;
            };
            let Some(state) = PetState::from_name(change.new) else {
                tracing::warn!(target: "anim", state = change.new, "unknown state name");
                return;
            };
            match handler_catalog.animation_for(state) {
                Some(handle) => {
                    tracing::debug!(
                        target: "anim",
                        state = state.name(),
                        animation = handle.name.as_str(),
                        looping = handle.looping,
                        "animation bound"
                    );
                    *handler_current.borrow_mut() = Some((state, handle));
                }
                None => {
                    tracing::debug!(target: "anim", state = state.name(), "no animation for state");
                    *handler_current.borrow_mut() = None;
                }
            }
        });

        Self {
            bus,
            machine,
            catalog,
            current,
            token,
        }
    }

    /// The binding the engine should currently play.
    pub fn current(&self) -> Option<(PetState, AnimationHandle)> {
        self.current.borrow().clone()
    }

    pub fn animation_for(&self, state: PetState) -> Option<AnimationHandle> {
        self.catalog.animation_for(state)
    }

    /// Called by the animation engine when a one-shot completed. If the
    /// finished state is no longer current, re-dispatch the live state so
    /// every consumer falls back together.
    pub fn animation_finished(&self, state: PetState) {
        let live = self.machine.borrow().current();
        if live == state {
            tracing::debug!(
                target: "anim",
                state = state.name(),
                "one-shot finished but state still current"
            );
            return;
        }
        tracing::debug!(
            target: "anim",
            finished = state.name(),
            live = live.name(),
            "re-dispatching live state after one-shot"
        );
        self.bus.publish(BusPayload::StateChanged(StateChange {
            prev: state.name(),
            new: live.name(),
            category_changed: state.category() != live.category(),
            at: SystemTime::now(),
        }));
    }

    pub fn detach(self) {
        self.bus.unregister(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_state::Thresholds;

    fn setup() -> (Rc<EventBus>, Rc<RefCell<PetStateMachine>>, AnimationBinder) {
        let bus = Rc::new(EventBus::new());
        let machine = Rc::new(RefCell::new(
            PetStateMachine::new(Rc::clone(&bus), Thresholds::default()).unwrap(),
        ));
        let binder = AnimationBinder::attach(
            Rc::clone(&bus),
            Rc::clone(&machine),
            Rc::new(PlaceholderCatalog::new()),
        );
        (bus, machine, binder)
    }

    #[test]
    fn placeholder_catalog_covers_every_state() {
        let catalog = PlaceholderCatalog::new();
        for state in PetState::ALL {
            let handle = catalog.animation_for(state).expect("complete catalog");
            assert!(handle.name.contains(state.name()));
        }
        assert!(!catalog.animation_for(PetState::Clicked).unwrap().looping);
        assert!(catalog.animation_for(PetState::Idle).unwrap().looping);
    }

    #[test]
    fn state_changes_update_the_binding() {
        let (_bus, machine, binder) = setup();
        assert!(binder.current().is_none());

        machine
            .borrow_mut()
            .update_interaction(Some(PetState::Clicked));
        let (state, handle) = binder.current().expect("binding set");
        assert_eq!(state, PetState::Clicked);
        assert_eq!(handle.name, "placeholder/clicked");
    }

    #[test]
    fn one_shot_finish_falls_back_to_live_state() {
        let (_bus, machine, binder) = setup();

        machine.borrow_mut().update_time(PetState::Night);
        machine
            .borrow_mut()
            .update_interaction(Some(PetState::Clicked));
        assert_eq!(binder.current().unwrap().0, PetState::Clicked);

        // Interaction cleared while the one-shot was still playing: the
        // machine already re-dispatched, but suppose the engine finishes late.
        machine.borrow_mut().update_interaction(None);
        assert_eq!(binder.current().unwrap().0, PetState::Night);

        binder.animation_finished(PetState::Clicked);
        assert_eq!(binder.current().unwrap().0, PetState::Night);
    }

    #[test]
    fn finish_of_still_current_state_is_a_no_op() {
        let (_bus, machine, binder) = setup();
        machine
            .borrow_mut()
            .update_interaction(Some(PetState::Play));
        binder.animation_finished(PetState::Play);
        assert_eq!(binder.current().unwrap().0, PetState::Play);
    }
}
