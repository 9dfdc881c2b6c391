//! Time signals → Time/SpecialDate-category states.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{NaiveDateTime, Timelike};

use core_calendar::{CalendarSystem, TimePeriod};
use core_events::bus::{BusPayload, EventBus, EventKind, HandlerToken};
use core_state::PetState;

use crate::SharedMachine;

/// Complete, one-to-one period mapping.
pub fn state_for_period(period: TimePeriod) -> PetState {
    match period {
        TimePeriod::Morning => PetState::Morning,
        TimePeriod::Noon => PetState::Noon,
        TimePeriod::Afternoon => PetState::Afternoon,
        TimePeriod::Evening => PetState::Evening,
        TimePeriod::Night => PetState::Night,
    }
}

/// Subscribes to `TimePeriodChanged` and `SpecialDate` and forwards mapped
/// states into the machine. The special-date mapping is best effort: an
/// unmapped name logs a warning and changes nothing.
pub struct TimeStateBridge {
    bus: Rc<EventBus>,
    machine: SharedMachine,
    special_mapping: Rc<RefCell<HashMap<String, PetState>>>,
    period_token: HandlerToken,
    special_token: HandlerToken,
}

impl TimeStateBridge {
    pub fn attach(bus: Rc<EventBus>, machine: SharedMachine) -> Self {
        let special_mapping = Rc::new(RefCell::new(default_special_mapping()));

        let period_machine = Rc::clone(&machine);
        let period_token = bus.register(EventKind::TimePeriodChanged, move |event| {
            let BusPayload::PeriodChanged(change) = &event.payload else {
                return;
            };
            let Some(period) = TimePeriod::from_name(change.new) else {
                tracing::warn!(
                    target: "adapters.time",
                    period = change.new,
                    "unknown period name on the bus"
                );
                return;
            };
            let state = state_for_period(period);
            if period_machine.borrow_mut().update_time(state) {
                tracing::info!(
                    target: "adapters.time",
                    state = state.name(),
                    "time state updated"
                );
            }
        });

        let special_machine = Rc::clone(&machine);
        let handler_mapping = Rc::clone(&special_mapping);
        let special_token = bus.register(EventKind::SpecialDate, move |event| {
            let BusPayload::SpecialDate(fired) = &event.payload else {
                return;
            };
            let mapped = handler_mapping.borrow().get(&fired.name).copied();
            match mapped {
                Some(state) => {
                    special_machine.borrow_mut().set_special_date(Some(state));
                    tracing::info!(
                        target: "adapters.time",
                        name = fired.name.as_str(),
                        state = state.name(),
                        "special date state set"
                    );
                }
                None => {
                    tracing::warn!(
                        target: "adapters.time",
                        name = fired.name.as_str(),
                        "special date has no state mapping"
                    );
                }
            }
        });

        tracing::info!(target: "adapters.time", "time state bridge attached");
        Self {
            bus,
            machine,
            special_mapping,
            period_token,
            special_token,
        }
    }

    /// One-shot startup sync: current period plus any special date already in
    /// effect today (the calendar's triggered set is not consulted, so a
    /// restart on a festival day still shows the festival).
    pub fn sync_now(&self, calendar: &CalendarSystem, now: NaiveDateTime) {
        let period = TimePeriod::from_hour(now.hour());
        let state = state_for_period(period);
        self.machine.borrow_mut().update_time(state);
        tracing::info!(
            target: "adapters.time",
            period = period.name(),
            "initial time state synced"
        );

        let today = now.date();
        let mapping = self.special_mapping.borrow();
        let current = calendar
            .special_dates_on(today)
            .into_iter()
            .find_map(|spec| mapping.get(&spec.name).copied());
        if let Some(state) = current {
            self.machine.borrow_mut().set_special_date(Some(state));
            tracing::info!(
                target: "adapters.time",
                state = state.name(),
                "initial special date synced"
            );
        }
    }

    /// Clear the special-date slot once the calendar reports the day ended.
    pub fn reconcile_special(&self, calendar: &CalendarSystem, now: NaiveDateTime) {
        let today = now.date();
        let slot_held = self.machine.borrow().snapshot().special_date.is_some();
        if slot_held && calendar.active_special_dates(today).is_empty() {
            self.machine.borrow_mut().set_special_date(None);
            tracing::info!(target: "adapters.time", "special date ended, slot cleared");
        }
    }

    /// Extend or override the special-date name → state mapping.
    pub fn register_special_mapping(&self, name: impl Into<String>, state: PetState) {
        debug_assert_eq!(state.category(), core_state::StateCategory::SpecialDate);
        self.special_mapping.borrow_mut().insert(name.into(), state);
    }

    pub fn detach(self) {
        self.bus.unregister(self.period_token);
        self.bus.unregister(self.special_token);
        tracing::info!(target: "adapters.time", "time state bridge detached");
    }
}

fn default_special_mapping() -> HashMap<String, PetState> {
    let festival = [
        "lantern_festival",
        "dragon_boat",
        "qixi",
        "mid_autumn",
        "double_ninth",
        "laba",
        "lunar_new_year_eve",
        "labor_day",
        "children_day",
        "national_day",
        "programmers_day",
        "halloween",
        "april_fools",
        "christmas_eve",
        "christmas",
    ];
    let mut mapping: HashMap<String, PetState> = festival
        .into_iter()
        .map(|name| (name.to_string(), PetState::Festival))
        .collect();
    mapping.insert("new_year".to_string(), PetState::NewYear);
    mapping.insert("spring_festival".to_string(), PetState::SpringFestival);
    mapping.insert("valentine".to_string(), PetState::Valentine);
    mapping.insert("birthday".to_string(), PetState::Birthday);
    mapping.insert("lichun".to_string(), PetState::Lichun);
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_calendar::SpecialDateSpec;
    use core_state::{PetStateMachine, Thresholds};
    use std::time::SystemTime;

    fn setup() -> (Rc<EventBus>, SharedMachine, TimeStateBridge) {
        let bus = Rc::new(EventBus::new());
        let machine: SharedMachine = Rc::new(RefCell::new(
            PetStateMachine::new(Rc::clone(&bus), Thresholds::default()).unwrap(),
        ));
        let bridge = TimeStateBridge::attach(Rc::clone(&bus), Rc::clone(&machine));
        (bus, machine, bridge)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn period_events_update_the_time_slot() {
        let (bus, machine, _bridge) = setup();
        bus.publish(BusPayload::PeriodChanged(core_events::PeriodChange {
            old: Some("morning"),
            new: "noon",
            at: SystemTime::now(),
        }));
        assert_eq!(machine.borrow().current(), PetState::Noon);
        assert_eq!(machine.borrow().snapshot().time, Some(PetState::Noon));
    }

    #[test]
    fn every_period_maps_one_to_one() {
        let seen: Vec<PetState> = [
            TimePeriod::Morning,
            TimePeriod::Noon,
            TimePeriod::Afternoon,
            TimePeriod::Evening,
            TimePeriod::Night,
        ]
        .into_iter()
        .map(state_for_period)
        .collect();
        let mut unique = seen.clone();
        unique.dedup();
        assert_eq!(seen.len(), unique.len());
        for state in seen {
            assert_eq!(state.category(), core_state::StateCategory::Time);
        }
    }

    #[test]
    fn mapped_special_dates_set_the_slot() {
        let (bus, machine, _bridge) = setup();
        bus.publish(BusPayload::SpecialDate(core_events::SpecialDateFired {
            name: "valentine".to_string(),
            description: "hearts".to_string(),
            lead_offset: 0,
            is_lunar: false,
            at: SystemTime::now(),
        }));
        assert_eq!(machine.borrow().current(), PetState::Valentine);
    }

    #[test]
    fn unmapped_special_dates_change_nothing() {
        let (bus, machine, _bridge) = setup();
        bus.publish(BusPayload::SpecialDate(core_events::SpecialDateFired {
            name: "some_new_holiday".to_string(),
            description: "???".to_string(),
            lead_offset: 0,
            is_lunar: false,
            at: SystemTime::now(),
        }));
        assert_eq!(machine.borrow().current(), PetState::Idle);
        assert_eq!(machine.borrow().snapshot().special_date, None);
    }

    #[test]
    fn runtime_mapping_extension_applies() {
        let (bus, machine, bridge) = setup();
        bridge.register_special_mapping("some_new_holiday", PetState::Festival);
        bus.publish(BusPayload::SpecialDate(core_events::SpecialDateFired {
            name: "some_new_holiday".to_string(),
            description: "now known".to_string(),
            lead_offset: 0,
            is_lunar: false,
            at: SystemTime::now(),
        }));
        assert_eq!(machine.borrow().current(), PetState::Festival);
    }

    #[test]
    fn sync_now_sets_period_and_present_special_date() {
        let (bus, machine, bridge) = setup();
        let calendar = CalendarSystem::with_dates(
            Rc::clone(&bus),
            None,
            vec![SpecialDateSpec::solar_festival("valentine", 2, 14, "hearts")],
        );

        bridge.sync_now(&calendar, at(2025, 2, 14, 9));
        assert_eq!(machine.borrow().snapshot().time, Some(PetState::Morning));
        assert_eq!(
            machine.borrow().snapshot().special_date,
            Some(PetState::Valentine)
        );
        assert_eq!(machine.borrow().current(), PetState::Valentine);
    }

    #[test]
    fn reconcile_clears_the_slot_after_the_day() {
        let (bus, machine, bridge) = setup();
        let mut calendar = CalendarSystem::with_dates(
            Rc::clone(&bus),
            None,
            vec![SpecialDateSpec::solar_festival("valentine", 2, 14, "hearts")],
        );

        calendar.tick(at(2025, 2, 14, 9));
        assert_eq!(machine.borrow().current(), PetState::Valentine);

        // Same day: still active.
        bridge.reconcile_special(&calendar, at(2025, 2, 14, 22));
        assert_eq!(machine.borrow().current(), PetState::Valentine);

        // Next day's tick prunes the active set, then reconcile clears.
        calendar.tick(at(2025, 2, 15, 9));
        bridge.reconcile_special(&calendar, at(2025, 2, 15, 9));
        assert_eq!(machine.borrow().snapshot().special_date, None);
    }
}
