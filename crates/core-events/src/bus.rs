//! Synchronous typed event bus.
//!
//! All in-core fan-out goes through this bus: producers dispatch, consumers
//! register per-kind handlers. Dispatch is synchronous on the calling thread
//! and handlers run in registration order. A handler may mark the event
//! handled to stop propagation. The handler list is snapshotted before
//! iteration, so unregistering (even from inside a handler) is safe for the
//! dispatch already in flight. A panicking handler is caught and logged and
//! the remaining handlers still run.
//!
//! The bus is deliberately single-threaded (`Rc` handlers, no locks); callers
//! that cross threads marshal through the runtime event channel first.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use crate::{
    BUS_DISPATCHES, BUS_HANDLER_PANICS, PeriodChange, SpecialDateFired, StateChange, StatsReading,
    UserInteraction, WindowPosition,
};

/// Discriminator for the closed set of bus event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SystemStatsUpdated,
    UserInteraction,
    TimePeriodChanged,
    SpecialDate,
    StateChanged,
    WindowPositionChanged,
    SceneChange,
}

/// Typed payload carried by a bus event.
#[derive(Debug, Clone, PartialEq)]
pub enum BusPayload {
    Stats(StatsReading),
    Interaction(UserInteraction),
    PeriodChanged(PeriodChange),
    SpecialDate(SpecialDateFired),
    StateChanged(StateChange),
    WindowPosition(WindowPosition),
    SceneChange { scene: String },
}

impl BusPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            BusPayload::Stats(_) => EventKind::SystemStatsUpdated,
            BusPayload::Interaction(_) => EventKind::UserInteraction,
            BusPayload::PeriodChanged(_) => EventKind::TimePeriodChanged,
            BusPayload::SpecialDate(_) => EventKind::SpecialDate,
            BusPayload::StateChanged(_) => EventKind::StateChanged,
            BusPayload::WindowPosition(_) => EventKind::WindowPositionChanged,
            BusPayload::SceneChange { .. } => EventKind::SceneChange,
        }
    }
}

/// An event in flight. Handlers receive `&mut` access so they can mark it handled.
#[derive(Debug)]
pub struct BusEvent {
    pub payload: BusPayload,
    pub at: SystemTime,
    handled: bool,
}

impl BusEvent {
    pub fn new(payload: BusPayload) -> Self {
        Self {
            payload,
            at: SystemTime::now(),
            handled: false,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Stop propagation to handlers registered after the current one.
    pub fn set_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

/// Opaque registration token returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken {
    kind: EventKind,
    id: u64,
}

type Handler = Rc<dyn Fn(&mut BusEvent)>;

struct Entry {
    id: u64,
    handler: Handler,
}

/// Synchronous publish/subscribe channel. Constructed explicitly and shared
/// by `Rc`; there is no global instance.
pub struct EventBus {
    handlers: RefCell<HashMap<EventKind, Vec<Entry>>>,
    next_id: Cell<u64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    /// Register a handler for one event kind. Handlers fire in registration order.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> HandlerToken
    where
        F: Fn(&mut BusEvent) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.handlers.borrow_mut().entry(kind).or_default().push(Entry {
            id,
            handler: Rc::new(handler),
        });
        tracing::debug!(target: "bus", kind = ?kind, id, "handler registered");
        HandlerToken { kind, id }
    }

    /// Remove a previously registered handler. Returns whether it was found.
    /// Safe to call during a dispatch; the in-flight snapshot still runs.
    pub fn unregister(&self, token: HandlerToken) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let Some(list) = handlers.get_mut(&token.kind) else {
            tracing::warn!(target: "bus", kind = ?token.kind, "unregister for kind with no handlers");
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != token.id);
        let removed = list.len() != before;
        if removed {
            tracing::debug!(target: "bus", kind = ?token.kind, id = token.id, "handler unregistered");
        } else {
            tracing::warn!(target: "bus", kind = ?token.kind, id = token.id, "unregister of unknown handler");
        }
        removed
    }

    /// Dispatch an event to all handlers of its kind, in registration order.
    /// Re-entrant dispatch from inside a handler is permitted.
    pub fn dispatch(&self, event: &mut BusEvent) {
        BUS_DISPATCHES.fetch_add(1, Ordering::Relaxed);
        // Snapshot before iterating so handler-list mutation during dispatch
        // cannot invalidate this pass.
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.borrow();
            match handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|e| Rc::clone(&e.handler)).collect(),
                None => {
                    tracing::trace!(target: "bus", kind = ?event.kind(), "no handlers for kind");
                    return;
                }
            }
        };

        for handler in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                BUS_HANDLER_PANICS.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "bus",
                    kind = ?event.kind(),
                    "handler panicked; continuing with remaining handlers"
                );
            }
            if event.is_handled() {
                tracing::trace!(target: "bus", kind = ?event.kind(), "event marked handled, stopping propagation");
                break;
            }
        }
    }

    /// Convenience wrapper: build the event and dispatch it.
    pub fn publish(&self, payload: BusPayload) {
        let mut event = BusEvent::new(payload);
        self.dispatch(&mut event);
    }

    /// Number of registered handlers, optionally filtered by kind.
    pub fn handler_count(&self, kind: Option<EventKind>) -> usize {
        let handlers = self.handlers.borrow();
        match kind {
            Some(kind) => handlers.get(&kind).map_or(0, Vec::len),
            None => handlers.values().map(Vec::len).sum(),
        }
    }

    /// Drop handlers, optionally only for one kind.
    pub fn clear_handlers(&self, kind: Option<EventKind>) {
        let mut handlers = self.handlers.borrow_mut();
        match kind {
            Some(kind) => {
                handlers.remove(&kind);
                tracing::info!(target: "bus", kind = ?kind, "handlers cleared for kind");
            }
            None => {
                handlers.clear();
                tracing::info!(target: "bus", "all handlers cleared");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InteractionKind;
    use std::rc::Rc;

    fn interaction_payload() -> BusPayload {
        BusPayload::Interaction(UserInteraction::new(InteractionKind::Click, "head"))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            bus.register(EventKind::UserInteraction, move |_| {
                order.borrow_mut().push(tag);
            });
        }

        bus.publish(interaction_payload());
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn handled_event_stops_propagation() {
        let bus = EventBus::new();
        let reached = Rc::new(Cell::new(false));

        bus.register(EventKind::UserInteraction, |event| {
            event.set_handled();
        });
        {
            let reached = Rc::clone(&reached);
            bus.register(EventKind::UserInteraction, move |_| {
                reached.set(true);
            });
        }

        bus.publish(interaction_payload());
        assert!(!reached.get(), "second handler must not run after set_handled");
    }

    #[test]
    fn unregister_removes_handler() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0u32));
        let token = {
            let count = Rc::clone(&count);
            bus.register(EventKind::UserInteraction, move |_| {
                count.set(count.get() + 1);
            })
        };

        bus.publish(interaction_payload());
        assert!(bus.unregister(token));
        assert!(!bus.unregister(token), "double unregister reports failure");
        bus.publish(interaction_payload());
        assert_eq!(count.get(), 1);
        assert_eq!(bus.handler_count(Some(EventKind::UserInteraction)), 0);
    }

    #[test]
    fn unregister_during_dispatch_is_safe_for_current_pass() {
        let bus = Rc::new(EventBus::new());
        let second_ran = Rc::new(Cell::new(false));
        let token_cell: Rc<RefCell<Option<HandlerToken>>> = Rc::new(RefCell::new(None));

        {
            let bus = Rc::clone(&bus);
            let token_cell = Rc::clone(&token_cell);
            bus.clone().register(EventKind::UserInteraction, move |_| {
                if let Some(token) = token_cell.borrow_mut().take() {
                    bus.unregister(token);
                }
            });
        }
        let token = {
            let second_ran = Rc::clone(&second_ran);
            bus.register(EventKind::UserInteraction, move |_| {
                second_ran.set(true);
            })
        };
        *token_cell.borrow_mut() = Some(token);

        // First dispatch: the snapshot still includes the second handler even
        // though the first one unregisters it mid-flight.
        bus.publish(interaction_payload());
        assert!(second_ran.get());

        second_ran.set(false);
        bus.publish(interaction_payload());
        assert!(!second_ran.get(), "unregistered handler must not run on later dispatches");
    }

    #[test]
    fn panicking_handler_does_not_abort_dispatch() {
        let bus = EventBus::new();
        let reached = Rc::new(Cell::new(false));

        bus.register(EventKind::UserInteraction, |_| {
            panic!("handler blew up");
        });
        {
            let reached = Rc::clone(&reached);
            bus.register(EventKind::UserInteraction, move |_| {
                reached.set(true);
            });
        }

        bus.publish(interaction_payload());
        assert!(reached.get(), "handlers after a panic must still run");
    }

    #[test]
    fn reentrant_dispatch_of_other_kind_is_permitted() {
        let bus = Rc::new(EventBus::new());
        let inner_ran = Rc::new(Cell::new(false));

        {
            let inner_ran = Rc::clone(&inner_ran);
            bus.register(EventKind::SceneChange, move |_| {
                inner_ran.set(true);
            });
        }
        {
            let bus = Rc::clone(&bus);
            bus.clone().register(EventKind::UserInteraction, move |_| {
                bus.publish(BusPayload::SceneChange {
                    scene: "nested".to_string(),
                });
            });
        }

        bus.publish(interaction_payload());
        assert!(inner_ran.get());
    }

    #[test]
    fn payload_kind_mapping_is_total() {
        assert_eq!(interaction_payload().kind(), EventKind::UserInteraction);
        assert_eq!(
            BusPayload::Stats(StatsReading::new(1.0, 2.0)).kind(),
            EventKind::SystemStatsUpdated
        );
        assert_eq!(
            BusPayload::SceneChange {
                scene: "tray".to_string()
            }
            .kind(),
            EventKind::SceneChange
        );
    }
}
