//! Core event types and channel helpers for Wisp.
//!
//! Two event layers live here. The [`bus`] module is the synchronous typed
//! publish/subscribe channel used for all in-core fan-out (stats → adapters,
//! state changes → animation/UI). This module holds the *runtime* layer: the
//! `Event` enum drained by the binary's single consumer loop, the bounded
//! channel policy, and the `AsyncEventSource` registry that periodic
//! producers (stats sampler, calendar tick, interaction sweep) plug into.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::time::SystemTime;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

pub mod bus;

pub use bus::{BusEvent, BusPayload, EventBus, EventKind, HandlerToken};

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// The runtime loop uses a bounded mpsc channel sized by `EVENT_CHANNEL_CAP`. Producers are all
// periodic (seconds or sub-second cadence) and the consumer drains synchronously, so the bound is
// generous; if a producer ever observes a full channel it parks on `send().await` rather than
// dropping. A closed channel terminates the producer task.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 1024;

// Minimal atomic telemetry, inspectable from tests or periodic logs.
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static BUS_DISPATCHES: AtomicU64 = AtomicU64::new(0);
pub static BUS_HANDLER_PANICS: AtomicU64 = AtomicU64::new(0);

/// Top-level event enum consumed by the central runtime loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A fresh system reading from the monitor sampler.
    Stats(StatsReading),
    /// A raw pointer event from the embedding shell, routed through zone
    /// hit-testing before it becomes a `UserInteraction` bus event.
    Pointer(PointerEvent),
    /// Periodic tick for one of the slow-cadence subsystems.
    Tick(TickKind),
    Shutdown,
}

/// Which subsystem a periodic tick drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Period-change detection and special-date scanning (default 60 s).
    Calendar,
    /// Interaction-timeout sweep (default 200 ms).
    InteractionSweep,
}

// -------------------------------------------------------------------------------------------------
// Async Event Sources
// -------------------------------------------------------------------------------------------------
// Each periodic producer owns one background task pushing `Event`s into the shared channel. A
// source must terminate promptly when the channel closes; the bounded channel supplies natural
// backpressure. The registry spawns them all at startup and hands the JoinHandles to the caller
// for the shutdown sequence.

/// Trait implemented by any async event producer. Implementors usually hold configuration and
/// spawn one background task that pushes `Event`s into the shared channel.
pub trait AsyncEventSource: Send + 'static {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning a JoinHandle. Implementors should
    /// stop when `tx.send(..).await` returns Err (channel closed) or on their own internal stop
    /// condition. They should avoid busy loops by awaiting timers or external IO futures.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources; spawns them all at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    /// Spawn all registered sources, returning their JoinHandles. The supplied `Sender`
    /// reference stays owned by the caller; each source receives its own clone. During shutdown
    /// the caller should drop its final `Sender` clone before awaiting the returned handles so
    /// the sources observe the closed channel and exit cooperatively.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Built-in periodic tick source. Emits `Event::Tick(kind)` every configured interval.
pub struct TickEventSource {
    interval: std::time::Duration,
    kind: TickKind,
}

impl TickEventSource {
    pub fn new(interval: std::time::Duration, kind: TickKind) -> Self {
        Self { interval, kind }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        match self.kind {
            TickKind::Calendar => "calendar_tick",
            TickKind::InteractionSweep => "interaction_sweep",
        }
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        let kind = self.kind;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick(kind)).await.is_err() {
                    break;
                }
            }
        })
    }
}

// -------------------------------------------------------------------------------------------------
// Shared vocabulary
// -------------------------------------------------------------------------------------------------

/// One sampled view of host-machine load. `cpu` and `memory` are percentages;
/// the optional subsystems are omitted (never faked) when the underlying probe
/// is unavailable. Disk and network are delivered as KB/s rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReading {
    pub cpu: f64,
    pub memory: f64,
    pub gpu: Option<f64>,
    pub disk_kbps: Option<f64>,
    pub network_kbps: Option<f64>,
}

impl StatsReading {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu,
            memory,
            gpu: None,
            disk_kbps: None,
            network_kbps: None,
        }
    }
}

/// Raw pointer input delivered by the embedding shell. Positions are in the
/// pet window's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub button: PointerButton,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerPhase {
    Press,
    Release,
    Move,
    DoubleClick,
}

impl PointerPhase {
    /// Stable wire name, carried on `UserInteraction` events so adapters can
    /// distinguish e.g. a release-click from a press-click.
    pub fn name(self) -> &'static str {
        match self {
            PointerPhase::Press => "press",
            PointerPhase::Release => "release",
            PointerPhase::Move => "move",
            PointerPhase::DoubleClick => "doubleclick",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
    /// Move events carry no button.
    None,
}

/// The closed set of interaction kinds understood by the core. Custom kinds
/// share one discriminant; the zone/adapters layers key extensions by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    Drag,
    Drop,
    Custom,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 7] = [
        InteractionKind::Click,
        InteractionKind::DoubleClick,
        InteractionKind::RightClick,
        InteractionKind::Hover,
        InteractionKind::Drag,
        InteractionKind::Drop,
        InteractionKind::Custom,
    ];

    /// Stable identifier used in persisted history and on the wire.
    pub fn name(self) -> &'static str {
        match self {
            InteractionKind::Click => "click",
            InteractionKind::DoubleClick => "double_click",
            InteractionKind::RightClick => "right_click",
            InteractionKind::Hover => "hover",
            InteractionKind::Drag => "drag",
            InteractionKind::Drop => "drop",
            InteractionKind::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Per-zone mask of supported interaction kinds.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InteractionKindSet: u8 {
        const CLICK        = 1 << 0;
        const DOUBLE_CLICK = 1 << 1;
        const RIGHT_CLICK  = 1 << 2;
        const HOVER        = 1 << 3;
        const DRAG         = 1 << 4;
        const DROP         = 1 << 5;
        const CUSTOM       = 1 << 6;
    }
}

impl InteractionKindSet {
    pub fn from_kind(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Click => Self::CLICK,
            InteractionKind::DoubleClick => Self::DOUBLE_CLICK,
            InteractionKind::RightClick => Self::RIGHT_CLICK,
            InteractionKind::Hover => Self::HOVER,
            InteractionKind::Drag => Self::DRAG,
            InteractionKind::Drop => Self::DROP,
            InteractionKind::Custom => Self::CUSTOM,
        }
    }

    pub fn supports(self, kind: InteractionKind) -> bool {
        self.contains(Self::from_kind(kind))
    }
}

/// A user interaction produced by zone hit-testing, as it travels on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInteraction {
    pub kind: InteractionKind,
    pub zone_id: String,
    /// The raw pointer phase that produced this interaction, when there was one.
    pub phase: Option<PointerPhase>,
    pub position: Option<(f64, f64)>,
}

impl UserInteraction {
    pub fn new(kind: InteractionKind, zone_id: impl Into<String>) -> Self {
        Self {
            kind,
            zone_id: zone_id.into(),
            phase: None,
            position: None,
        }
    }

    pub fn with_phase(mut self, phase: PointerPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some((x, y));
        self
    }
}

/// Period-of-day transition. Carries period *names* so this crate stays a
/// leaf; the calendar crate owns the enum and maps both ways.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodChange {
    pub old: Option<&'static str>,
    pub new: &'static str,
    pub at: SystemTime,
}

/// A special date firing, possibly ahead of its occurrence by `lead_offset` days.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialDateFired {
    pub name: String,
    pub description: String,
    pub lead_offset: u32,
    pub is_lunar: bool,
    pub at: SystemTime,
}

/// The arbitration result changed. Carries state *names*; `core-state` maps
/// names back to `PetState` for consumers that need the enum.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub prev: &'static str,
    pub new: &'static str,
    pub category_changed: bool,
    pub at: SystemTime,
}

/// The pet window moved or resized (published by the embedding shell).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Helper result type for channel creation and wiring code.
pub type EventResult<T> = anyhow::Result<T>;


#[cfg(test)]
mod tests_async_sources {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MockOnceSource;

    impl AsyncEventSource for MockOnceSource {
        fn name(&self) -> &'static str {
            "mock_once"
        }
        fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            tokio::spawn(async move {
                let _ = tx.send(Event::Shutdown).await;
            })
        }
    }

    #[tokio::test]
    async fn registry_spawns_and_emits() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(MockOnceSource);
        reg.register(TickEventSource::new(
            Duration::from_millis(10),
            TickKind::InteractionSweep,
        ));
        let handles = reg.spawn_all(&tx);

        let mut got_shutdown = false;
        let mut got_tick = false;
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(200) && (!got_shutdown || !got_tick) {
            if let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await
            {
                match ev {
                    Event::Shutdown => got_shutdown = true,
                    Event::Tick(TickKind::InteractionSweep) => got_tick = true,
                    _ => {}
                }
            }
        }
        assert!(got_shutdown, "expected mock source to emit");
        assert!(got_tick, "expected tick source to emit sweep ticks");

        drop(tx);
        drop(rx);
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_millis(50), handle).await;
        }
    }

    #[tokio::test]
    async fn tick_source_exits_on_channel_drop() {
        let (tx, rx) = mpsc::channel::<Event>(1);
        let mut reg = EventSourceRegistry::new();
        reg.register(TickEventSource::new(
            Duration::from_millis(5),
            TickKind::Calendar,
        ));
        let handles = reg.spawn_all(&tx);

        drop(tx);
        drop(rx);

        for handle in handles {
            tokio::time::timeout(Duration::from_millis(100), handle)
                .await
                .expect("source task did not observe channel closure")
                .expect("source task should exit cleanly");
        }
    }
}
