//! System stats → System-category state.

use std::rc::Rc;

use core_events::bus::{BusPayload, EventBus, EventKind, HandlerToken};
use core_events::StatsReading;
use core_state::{ThresholdError, Thresholds};

use crate::SharedMachine;

/// Listens for `SystemStatsUpdated`, validates the reading, and pushes the
/// threshold classification into the machine. Malformed readings are logged
/// and ignored; the System slot keeps its last good state.
pub struct SystemStateAdapter {
    bus: Rc<EventBus>,
    machine: SharedMachine,
    token: HandlerToken,
}

impl SystemStateAdapter {
    pub fn attach(bus: Rc<EventBus>, machine: SharedMachine) -> Self {
        let handler_machine = Rc::clone(&machine);
        let token = bus.register(EventKind::SystemStatsUpdated, move |event| {
            let BusPayload::Stats(reading) = &event.payload else {
                return;
            };
            Self::on_stats(&handler_machine, reading);
        });
        tracing::info!(target: "adapters.system", "system state adapter attached");
        Self {
            bus,
            machine,
            token,
        }
    }

    fn on_stats(machine: &SharedMachine, reading: &StatsReading) {
        if !reading_is_sane(reading) {
            tracing::warn!(
                target: "adapters.system",
                cpu = reading.cpu,
                memory = reading.memory,
                "malformed reading dropped"
            );
            return;
        }
        let changed = machine.borrow_mut().update_from_reading(reading);
        if changed {
            let current = machine.borrow().current();
            tracing::info!(
                target: "adapters.system",
                state = current.name(),
                cpu = reading.cpu,
                memory = reading.memory,
                "system state updated"
            );
        }
    }

    /// Runtime threshold tuning, proxied to the machine.
    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<(), ThresholdError> {
        self.machine.borrow_mut().set_thresholds(thresholds)
    }

    pub fn detach(self) {
        self.bus.unregister(self.token);
        tracing::info!(target: "adapters.system", "system state adapter detached");
    }
}

/// Percentage fields must be finite and in range; rate fields must be finite
/// and non-negative.
fn reading_is_sane(reading: &StatsReading) -> bool {
    let percent_ok = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
    let rate_ok = |v: f64| v.is_finite() && v >= 0.0;
    percent_ok(reading.cpu)
        && percent_ok(reading.memory)
        && reading.gpu.is_none_or(percent_ok)
        && reading.disk_kbps.is_none_or(rate_ok)
        && reading.network_kbps.is_none_or(rate_ok)
}
