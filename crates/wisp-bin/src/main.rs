//! Wisp entrypoint: wiring, the runtime drain loop, and staged shutdown.
use anyhow::Result;
use chrono::Local;
use clap::Parser;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;

use core_adapters::{
    InteractionStateAdapter, InteractionTimeouts, SharedMachine, SystemStateAdapter,
    TimeStateBridge,
};
use core_anim::{AnimationBinder, PlaceholderCatalog};
use core_calendar::CalendarSystem;
use core_config::{Config, ConfigFile};
use core_events::bus::{BusPayload, EventBus};
use core_events::{
    EVENT_CHANNEL_CAP, Event, EventSourceRegistry, InteractionKindSet, PointerEvent,
    TickEventSource, TickKind, UserInteraction,
};
use core_monitor::{ProcStatsProbe, StatsEventSource, SystemSampler};
use core_state::{PetStateMachine, SubsystemThresholds, Thresholds};
use core_tracker::{InteractionPattern, InteractionTracker, PatternThresholds};
use core_zones::{InteractionZone, PointerRouter, ZoneRegistry, ZoneShape};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "wisp", version, about = "Wisp desktop companion core")]
struct Args {
    /// Optional configuration file path (overrides discovery of `wisp.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Directory for persisted state (interaction history). Defaults to the
    /// platform data dir.
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownReason {
    Signal,
    ChannelClosed,
}

impl ShutdownReason {
    fn as_str(self) -> &'static str {
        match self {
            ShutdownReason::Signal => "signal",
            ShutdownReason::ChannelClosed => "channel_closed",
        }
    }
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("wisp.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "wisp.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global tracing subscriber already installed; drop guard so writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn thresholds_from_config(file: &ConfigFile) -> Thresholds {
    let sub = |cfg: Option<core_config::SubsystemConfig>| {
        cfg.map(|c| SubsystemThresholds {
            busy: c.busy,
            very_busy: c.very_busy,
        })
    };
    Thresholds {
        cpu_light: file.thresholds.cpu_light,
        cpu_moderate: file.thresholds.cpu_moderate,
        cpu_heavy: file.thresholds.cpu_heavy,
        cpu_very_heavy: file.thresholds.cpu_very_heavy,
        cpu_critical: file.thresholds.cpu_critical,
        mem_warning: file.thresholds.mem_warning,
        mem_critical: file.thresholds.mem_critical,
        gpu: sub(file.thresholds.gpu),
        disk: sub(file.thresholds.disk),
        network: sub(file.thresholds.network),
    }
}

fn timeouts_from_config(file: &ConfigFile) -> InteractionTimeouts {
    InteractionTimeouts {
        clicked: Duration::from_millis(file.interaction.clicked_ms),
        petted: Duration::from_millis(file.interaction.petted_ms),
        hover: Duration::from_millis(file.interaction.hover_ms),
        generic: Duration::from_millis(file.interaction.generic_ms),
    }
}

fn tracker_from_config(file: &ConfigFile) -> InteractionTracker {
    InteractionTracker::with_tuning(
        file.tracker.retention_sec,
        file.tracker.pattern_period_hours,
        PatternThresholds {
            rare: file.tracker.rare,
            occasional: file.tracker.occasional,
            regular: file.tracker.regular,
            frequent: file.tracker.frequent,
        },
    )
}

/// The default pet layout: a hoverable head and a draggable body.
fn default_zones() -> Result<ZoneRegistry> {
    let mut registry = ZoneRegistry::new();
    registry.add(
        InteractionZone::new(
            "head",
            ZoneShape::circle(kurbo::Point::new(100.0, 60.0), 40.0)?,
        )
        .with_supported(
            InteractionKindSet::CLICK
                | InteractionKindSet::DOUBLE_CLICK
                | InteractionKindSet::RIGHT_CLICK
                | InteractionKindSet::HOVER,
        ),
    )?;
    registry.add(
        InteractionZone::new(
            "body",
            ZoneShape::rect(kurbo::Point::new(40.0, 100.0), 120.0, 140.0)?,
        )
        .with_supported(
            InteractionKindSet::CLICK
                | InteractionKindSet::HOVER
                | InteractionKindSet::DRAG
                | InteractionKindSet::DROP,
        ),
    )?;
    Ok(registry)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

struct PetRuntime {
    bus: Rc<EventBus>,
    machine: SharedMachine,
    registry: ZoneRegistry,
    router: PointerRouter,
    tracker: InteractionTracker,
    calendar: CalendarSystem,
    system_adapter: Option<SystemStateAdapter>,
    interaction: Option<InteractionStateAdapter>,
    bridge: Option<TimeStateBridge>,
    binder: Option<AnimationBinder>,
    history_path: PathBuf,
    rx: mpsc::Receiver<Event>,
    tx: Option<mpsc::Sender<Event>>,
    source_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl PetRuntime {
    fn new(
        config: &Config,
        data_dir: &Path,
        rx: mpsc::Receiver<Event>,
        tx: mpsc::Sender<Event>,
    ) -> Result<Self> {
        let file = &config.file;
        let bus = Rc::new(EventBus::new());

        let thresholds = thresholds_from_config(file);
        let machine: SharedMachine = Rc::new(RefCell::new(PetStateMachine::with_history_cap(
            Rc::clone(&bus),
            thresholds,
            file.state.history_cap,
        )?));

        let history_path = data_dir.join(&file.tracker.storage_file);
        let tracker = match std::fs::File::open(&history_path) {
            Ok(reader) => InteractionTracker::load_into(reader, tracker_from_config(file)),
            Err(err) => {
                info!(
                    target: "runtime",
                    path = %history_path.display(),
                    %err,
                    "no interaction history to load"
                );
                tracker_from_config(file)
            }
        };

        let system_adapter = SystemStateAdapter::attach(Rc::clone(&bus), Rc::clone(&machine));
        let interaction = InteractionStateAdapter::attach(
            Rc::clone(&bus),
            Rc::clone(&machine),
            timeouts_from_config(file),
        );
        let bridge = TimeStateBridge::attach(Rc::clone(&bus), Rc::clone(&machine));
        let binder = AnimationBinder::attach(
            Rc::clone(&bus),
            Rc::clone(&machine),
            Rc::new(PlaceholderCatalog::new()),
        );

        // The lunar backend is an injected capability; the stock binary ships
        // without one and the calendar degrades to solar festivals.
        let mut calendar = CalendarSystem::new(Rc::clone(&bus), None);

        let now = Local::now().naive_local();
        bridge.sync_now(&calendar, now);
        calendar.tick(now);

        Ok(Self {
            bus,
            machine,
            registry: default_zones()?,
            router: PointerRouter::new(),
            tracker,
            calendar,
            system_adapter: Some(system_adapter),
            interaction: Some(interaction),
            bridge: Some(bridge),
            binder: Some(binder),
            history_path,
            rx,
            tx: Some(tx),
            source_handles: Vec::new(),
        })
    }

    fn spawn_sources(&mut self, config: &ConfigFile) {
        let Some(tx) = self.tx.as_ref().cloned() else {
            return;
        };
        let mut registry = EventSourceRegistry::new();
        registry.register(StatsEventSource::new(
            SystemSampler::new(Box::new(ProcStatsProbe::new())),
            Duration::from_millis(config.monitor.period_ms),
        ));
        registry.register(TickEventSource::new(
            Duration::from_millis(config.calendar.period_ms),
            TickKind::Calendar,
        ));
        registry.register(TickEventSource::new(
            Duration::from_millis(config.interaction.sweep_ms),
            TickKind::InteractionSweep,
        ));
        self.source_handles = registry.spawn_all(&tx);

        // Ctrl-C translates into a runtime shutdown event.
        let signal_tx = tx.clone();
        self.source_handles.push(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = signal_tx.send(Event::Shutdown).await;
            }
        }));
    }

    async fn run(&mut self) -> Result<()> {
        let span = tracing::debug_span!(target: "runtime", "event_loop");
        let _enter = span.enter();

        let mut reason = ShutdownReason::ChannelClosed;
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Stats(reading) => {
                    self.bus.publish(BusPayload::Stats(reading));
                }
                Event::Pointer(pointer) => self.handle_pointer(pointer),
                Event::Tick(TickKind::Calendar) => {
                    let now = Local::now().naive_local();
                    self.calendar.tick(now);
                    if let Some(bridge) = &self.bridge {
                        bridge.reconcile_special(&self.calendar, now);
                    }
                }
                Event::Tick(TickKind::InteractionSweep) => {
                    if let Some(interaction) = &self.interaction {
                        interaction.sweep(Instant::now());
                    }
                }
                Event::Shutdown => {
                    info!(target: "runtime", "shutdown requested");
                    reason = ShutdownReason::Signal;
                    break;
                }
            }
        }

        self.rx.close();
        self.finalize_shutdown(reason).await;
        Ok(())
    }

    fn handle_pointer(&mut self, pointer: PointerEvent) {
        let produced = self.router.route(&mut self.registry, pointer);
        for interaction in produced {
            self.track_interaction(&interaction);
            self.bus.publish(BusPayload::Interaction(interaction));
        }
    }

    fn track_interaction(&mut self, interaction: &UserInteraction) {
        let now = unix_now();
        self.tracker
            .track(interaction.kind, &interaction.zone_id, now);
        let pattern = self
            .tracker
            .classify_pattern(interaction.kind, &interaction.zone_id, now);
        if pattern == InteractionPattern::Excessive
            && let Some(adapter) = &self.interaction
            && adapter.apply_pattern(pattern, Instant::now())
        {
            info!(
                target: "runtime",
                kind = %interaction.kind,
                zone = interaction.zone_id.as_str(),
                "excessive interaction pattern"
            );
        }
    }

    async fn finalize_shutdown(&mut self, reason: ShutdownReason) {
        info!(target: "runtime.shutdown", reason = reason.as_str(), "begin");

        self.persist_history();

        if let Some(interaction) = self.interaction.take() {
            interaction.detach();
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.detach();
        }
        if let Some(adapter) = self.system_adapter.take() {
            adapter.detach();
        }
        if let Some(binder) = self.binder.take() {
            binder.detach();
        }

        if let Some(tx) = self.tx.take() {
            trace!(
                target: "runtime.shutdown",
                reason = reason.as_str(),
                "dropping_runtime_sender"
            );
            drop(tx);
        }

        while let Some(handle) = self.source_handles.pop() {
            match tokio::time::timeout(Duration::from_millis(200), handle).await {
                Ok(Ok(_)) => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_stopped"
                ),
                Ok(Err(err)) if err.is_cancelled() => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_cancelled"
                ),
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "event_source_task_error"
                ),
                Err(_) => warn!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_timeout"
                ),
            }
        }

        info!(target: "runtime.shutdown", reason = reason.as_str(), "complete");
    }

    fn persist_history(&self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::File::create(&self.history_path) {
            Ok(file) => {
                if let Err(err) = self.tracker.save_to(file, unix_now()) {
                    warn!(target: "runtime", %err, "interaction history not persisted");
                }
            }
            Err(err) => {
                warn!(
                    target: "runtime",
                    path = %self.history_path.display(),
                    %err,
                    "interaction history file not writable"
                );
            }
        }
    }
}

fn resolve_data_dir(args: &Args) -> PathBuf {
    if let Some(dir) = &args.data_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .map(|dir| dir.join("wisp"))
        .unwrap_or_else(|| PathBuf::from(".wisp"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();

    info!(target: "runtime", "startup");
    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    let data_dir = resolve_data_dir(&args);

    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let mut runtime = PetRuntime::new(&config, &data_dir, rx, tx)?;
    runtime.spawn_sources(&config.file);

    info!(
        target: "runtime.startup",
        state = runtime.machine.borrow().current().name(),
        zones = runtime.registry.len(),
        history = %runtime.history_path.display(),
        config_override = args.config.is_some(),
        "bootstrap_complete"
    );

    runtime.run().await
}
