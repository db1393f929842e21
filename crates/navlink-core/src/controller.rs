//! The lifecycle controller: orchestrates the tracking state machine.
//!
//! One controller instance is constructed at application start and handed
//! to every collaborator that needs tool or tracking access. It owns the
//! tool registry, the worker handle, the device claim, and the position
//! history store.
//!
//! `set_state` walks the state machine one asynchronous step at a time.
//! Hardware work happens on the worker thread; its completion events are
//! applied here, on the orchestrating thread, by [`LifecycleController::pump`].
//! Applying a completion either advances the walk toward the pending
//! target or, on failure, halts it with a warning and leaves the last
//! known-good state in place. At most one step is ever in flight.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{ConfigError, Settings, TrackerConfig};
use crate::device::DeviceAccess;
use crate::dominant::DominantToolSelector;
use crate::error::TrackingError;
use crate::events::{EventHub, TrackingEvent};
use crate::history::PositionHistoryStore;
use crate::playback::{PlaybackClock, PlaybackSession};
use crate::registry::ToolRegistry;
use crate::state::TrackingState;
use crate::tool::{Capability, PositionHistory, Tool, ToolHandle, TrackedTool, MANUAL_TOOL_UID};
use crate::worker::{DiscoveredTool, TrackerBackendFactory, TrackerWorker, WorkerEvent};

/// Orchestrates the tracking-device lifecycle.
pub struct LifecycleController {
    state: TrackingState,
    pending_target: Option<TrackingState>,
    in_flight: bool,
    settings: Settings,
    registry: ToolRegistry,
    selector: DominantToolSelector,
    history: PositionHistoryStore,
    device: Box<dyn DeviceAccess>,
    device_claimed: bool,
    factory: Box<dyn TrackerBackendFactory>,
    worker: Option<TrackerWorker>,
    completions: Option<Receiver<WorkerEvent>>,
    events: EventHub,
    playback: Option<PlaybackSession>,
    reference_uid: Option<String>,
    tooltip_offset: f64,
    reconfigure_after_deconfigure: bool,
}

impl LifecycleController {
    /// Create a controller in state `none`, with the manual tool dominant.
    #[must_use]
    pub fn new(
        settings: Settings,
        factory: Box<dyn TrackerBackendFactory>,
        device: Box<dyn DeviceAccess>,
    ) -> Self {
        let history = PositionHistoryStore::new(&settings.logging_folder);
        let selector = DominantToolSelector::new(settings.auto_select_dominant_tool);
        Self {
            state: TrackingState::None,
            pending_target: None,
            in_flight: false,
            settings,
            registry: ToolRegistry::new(),
            selector,
            history,
            device,
            device_claimed: false,
            factory,
            worker: None,
            completions: None,
            events: EventHub::new(),
            playback: None,
            reference_uid: None,
            tooltip_offset: 0.0,
            reconfigure_after_deconfigure: false,
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribe to outbound notifications.
    pub fn subscribe(&mut self) -> std::sync::mpsc::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    /// The current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TrackingState {
        self.state
    }

    /// Whether the controller is at least configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.state >= TrackingState::Configured
    }

    /// Whether the controller is at least initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state >= TrackingState::Initialized
    }

    /// Whether live tracking is running.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.state >= TrackingState::Tracking
    }

    /// The tool registry.
    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Look up a tool; `"active"` resolves to the dominant tool.
    #[must_use]
    pub fn get_tool(&self, uid: &str) -> Option<ToolHandle> {
        self.registry.get(uid)
    }

    /// The current dominant tool. Never absent.
    #[must_use]
    pub fn dominant_tool(&self) -> ToolHandle {
        self.registry.dominant()
    }

    /// The manual tool.
    #[must_use]
    pub fn manual_tool(&self) -> Arc<Tool> {
        self.registry.manual().clone()
    }

    /// The reference tool from the active configuration, if any.
    #[must_use]
    pub fn reference_tool(&self) -> Option<ToolHandle> {
        self.reference_uid
            .as_deref()
            .and_then(|uid| self.registry.get(uid))
    }

    /// Whether playback mode is active.
    #[must_use]
    pub const fn is_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// The active settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Request a walk of the state machine toward `target`.
    ///
    /// Asynchronous: the walk advances as worker completions are pumped.
    /// `set_state(current)` is a no-op. A second request while a step is
    /// in flight is rejected to keep transitions strictly sequential.
    pub fn set_state(&mut self, target: TrackingState) -> Result<(), TrackingError> {
        if self.in_flight {
            return Err(TrackingError::TransitionInFlight {
                current: self.state,
            });
        }
        if target == self.state {
            return Ok(());
        }
        self.pending_target = Some(target);
        self.step();
        Ok(())
    }

    /// Drive one or more steps toward the pending target. Synchronous
    /// steps (deconfigure) loop here; asynchronous steps set `in_flight`
    /// and return until their completion is pumped.
    fn step(&mut self) {
        loop {
            let Some(target) = self.pending_target else {
                return;
            };
            if target == self.state {
                self.pending_target = None;
                return;
            }
            if self.in_flight {
                return;
            }

            let advanced_synchronously = if target > self.state {
                match self.state {
                    TrackingState::None => self.start_configure(),
                    TrackingState::Configured => self.start_initialize(),
                    TrackingState::Initialized => self.start_tracking_change(true),
                    TrackingState::Tracking => false,
                }
            } else {
                match self.state {
                    TrackingState::Tracking => self.start_tracking_change(false),
                    TrackingState::Initialized => self.start_uninitialize(),
                    TrackingState::Configured => {
                        self.deconfigure_now();
                        true
                    }
                    TrackingState::None => false,
                }
            };

            if !advanced_synchronously {
                return;
            }
        }
    }

    /// Parse the configuration and spawn the worker. Fails closed: on any
    /// problem the state stays `none` and a warning is published.
    ///
    /// Returns false (the step is asynchronous or halted).
    fn start_configure(&mut self) -> bool {
        let Some(path) = self.settings.config_file.clone() else {
            self.halt_walk("no tracker configuration file is set");
            return false;
        };
        if !path.is_file() {
            self.halt_walk(&format!(
                "configuration file [{}] is not valid, cannot configure",
                path.display()
            ));
            return false;
        }

        let config = match TrackerConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                self.halt_walk(&TrackingError::Configuration(e).to_string());
                return false;
            }
        };

        let backend = self.factory.create(&config.tracker, &config.tools);
        match TrackerWorker::spawn(backend) {
            Ok((worker, completions)) => {
                self.worker = Some(worker);
                self.completions = Some(completions);
                self.in_flight = true;
            }
            Err(e) => self.halt_walk(&e.to_string()),
        }
        false
    }

    /// Claim the device and ask the worker to initialize. A failed claim
    /// halts the walk at `configured`.
    fn start_initialize(&mut self) -> bool {
        if !self.device_claimed {
            match self.device.claim() {
                Ok(device) => {
                    info!(device = %device.display(), "device claim acquired");
                    self.device_claimed = true;
                }
                Err(e) => {
                    self.halt_walk(&format!("initialization of tracking failed: {e}"));
                    return false;
                }
            }
        }
        self.send_to_worker(|worker| worker.initialize(true));
        false
    }

    fn start_uninitialize(&mut self) -> bool {
        self.send_to_worker(|worker| worker.initialize(false));
        false
    }

    fn start_tracking_change(&mut self, on: bool) -> bool {
        self.send_to_worker(move |worker| worker.track(on));
        false
    }

    fn send_to_worker(
        &mut self,
        op: impl FnOnce(&TrackerWorker) -> Result<(), TrackingError>,
    ) {
        match &self.worker {
            Some(worker) => match op(worker) {
                Ok(()) => self.in_flight = true,
                Err(e) => self.halt_walk(&e.to_string()),
            },
            None => self.halt_walk(&TrackingError::WorkerUnavailable.to_string()),
        }
    }

    /// Tear the tracker connection down. Synchronous; the bounded worker
    /// shutdown wait is the only forceful path, sanctioned here only.
    fn deconfigure_now(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.shutdown(self.settings.worker_shutdown_timeout) {
                warn!(error = %e, "worker shutdown escalated");
                self.emit(TrackingEvent::Warning(e.to_string()));
            }
        }
        self.completions = None;

        if self.device_claimed {
            self.device.release();
            self.device_claimed = false;
        }

        self.registry.remove_real_tools();
        self.reference_uid = None;
        // remove_real_tools already fell back to the manual tool as
        // dominant; make sure it is visible again.
        if self.registry.manual().set_visible(true) {
            self.emit(TrackingEvent::ToolVisibility {
                uid: MANUAL_TOOL_UID.to_string(),
                visible: true,
            });
        }

        self.state = TrackingState::None;
        info!("tracker deconfigured");
        self.emit(TrackingEvent::Deconfigured);
        self.emit(TrackingEvent::StateChanged(TrackingState::None));

        if self.reconfigure_after_deconfigure {
            self.reconfigure_after_deconfigure = false;
            self.pending_target = Some(TrackingState::Configured);
        }
    }

    /// Halt the current walk with a user-visible warning, leaving the
    /// state untouched.
    fn halt_walk(&mut self, reason: &str) {
        warn!("{reason}");
        self.pending_target = None;
        self.emit(TrackingEvent::Warning(reason.to_string()));
    }

    // ------------------------------------------------------------------
    // Completion pump
    // ------------------------------------------------------------------

    /// Apply every pending worker completion. Returns how many were
    /// applied. All externally visible mutation happens here, on the
    /// calling (orchestrating) thread.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let event = match &self.completions {
                Some(completions) => completions.try_recv().ok(),
                None => None,
            };
            let Some(event) = event else {
                break;
            };
            self.apply_completion(event);
            applied += 1;
        }
        applied
    }

    /// Pump until no step is in flight and no target is pending, or the
    /// timeout elapses. Returns true if the controller went idle.
    pub fn pump_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if !self.in_flight && self.pending_target.is_none() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let event = match &self.completions {
                Some(completions) => {
                    completions.recv_timeout(Duration::from_millis(10)).ok()
                }
                None => None,
            };
            if let Some(event) = event {
                self.apply_completion(event);
            }
        }
    }

    fn apply_completion(&mut self, event: WorkerEvent) {
        self.in_flight = false;
        match event {
            WorkerEvent::Configured(Ok(tools)) => self.on_configured(tools),
            WorkerEvent::Configured(Err(reason)) => {
                // Fail closed: drop the worker, stay at none.
                if let Some(mut worker) = self.worker.take() {
                    let _ = worker.shutdown(self.settings.worker_shutdown_timeout);
                }
                self.completions = None;
                self.halt_walk(&format!("failed to configure tracking: {reason}"));
            }
            WorkerEvent::Initialized(true) => {
                self.state = TrackingState::Initialized;
                info!("tracker initialized");
                self.emit(TrackingEvent::StateChanged(self.state));
                self.emit(TrackingEvent::Initialized);
            }
            WorkerEvent::Initialized(false) => {
                self.state = TrackingState::Configured;
                info!("tracker uninitialized");
                self.emit(TrackingEvent::StateChanged(self.state));
                self.emit(TrackingEvent::Uninitialized);
            }
            WorkerEvent::Tracking(true) => {
                self.state = TrackingState::Tracking;
                info!("tracking started");
                self.emit(TrackingEvent::StateChanged(self.state));
                self.emit(TrackingEvent::TrackingStarted);
            }
            WorkerEvent::Tracking(false) => {
                self.state = TrackingState::Initialized;
                info!("tracking stopped");
                self.emit(TrackingEvent::StateChanged(self.state));
                self.emit(TrackingEvent::TrackingStopped);
                if let Err(e) = self.save_position_history() {
                    warn!(error = %e, "saving position history at tracking stop failed");
                }
            }
            WorkerEvent::Error(reason) => {
                // Halt the walk at the last state that still holds.
                warn!(reason, "tracker operation failed");
                self.emit(TrackingEvent::Warning(format!("tracker error: {reason}")));
                self.pending_target = None;
            }
        }
        self.step();
    }

    /// Populate the registry from the discovered tools: all of them appear
    /// together with the `Configured` notification.
    fn on_configured(&mut self, discovered: Vec<DiscoveredTool>) {
        let mut tools = Vec::with_capacity(discovered.len());
        for item in discovered {
            if item.is_reference {
                self.reference_uid = Some(item.uid.clone());
            }
            tools.push(Arc::new(Tool::new(item.uid, item.name, item.capabilities)));
        }

        // Diagnostic aid: imbue the manual tool with the physical
        // properties of the first real, non-reference tool.
        if self.settings.manual_tool_mirrors_physical_tool {
            if let Some(source) = tools
                .iter()
                .find(|tool| !tool.capabilities().contains(Capability::Reference))
            {
                self.registry.manual().set_physical_source(source.uid());
                info!(source = source.uid(), "manual tool mirrors physical tool");
            }
        }

        self.registry.add_real_tools(tools);
        let events = self.selector.set_dominant(&mut self.registry, MANUAL_TOOL_UID);
        self.emit_all(events);

        self.state = TrackingState::Configured;

        // Tools are always reconfigured after a logging-folder change, so
        // loading here keeps history and configuration in step.
        match self.history.load(&self.registry) {
            Ok(report) if !report.is_clean() => {
                let missing = report.missing_tools.join(", ");
                warn!(%missing, "position history references unknown tools");
                self.emit(TrackingEvent::Warning(format!(
                    "position history references tools missing from the configuration: {missing}"
                )));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "loading position history failed");
                self.emit(TrackingEvent::Warning(e.to_string()));
            }
        }

        info!(tools = self.registry.len(), "tracker configured");
        self.emit(TrackingEvent::Configured);
        self.emit(TrackingEvent::StateChanged(TrackingState::Configured));
    }

    // ------------------------------------------------------------------
    // Dominant tool
    // ------------------------------------------------------------------

    /// Make the given tool dominant.
    pub fn set_dominant_tool(&mut self, uid: &str) {
        let events = self.selector.set_dominant(&mut self.registry, uid);
        self.emit_all(events);
    }

    /// Re-evaluate dominant-tool selection after a visibility change.
    pub fn notify_visibility_changed(&mut self) {
        let newest = self
            .playback
            .as_ref()
            .map(PlaybackSession::newest_proxy_timestamp);
        let events = self.selector.check(&mut self.registry, newest);
        self.emit_all(events);
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Enter (`Some(clock)`) or leave (`None`) playback mode.
    ///
    /// Entering requires the controller to be configured; if it is not,
    /// configuration is attempted and polled with the bounded wait from
    /// settings. This is the one sanctioned blocking wait outside
    /// shutdown.
    pub fn set_playback_mode(
        &mut self,
        clock: Option<Arc<PlaybackClock>>,
    ) -> Result<(), TrackingError> {
        let Some(clock) = clock else {
            if let Some(session) = self.playback.take() {
                session.exit(&mut self.registry);
                self.emit(TrackingEvent::Initialized);
                self.emit(TrackingEvent::StateChanged(self.state));
            }
            return Ok(());
        };

        if self.playback.is_some() {
            return Ok(());
        }

        if !self.is_configured() {
            self.set_state(TrackingState::Configured)?;
            for _ in 0..self.settings.playback_poll_attempts {
                self.pump();
                if self.is_configured() || self.pending_target.is_none() {
                    break;
                }
                std::thread::sleep(self.settings.playback_poll_interval);
            }
        }

        if !self.is_configured() {
            let reason = "tracker must be configured before entering playback";
            self.emit(TrackingEvent::Warning(reason.to_string()));
            return Err(TrackingError::Configuration(ConfigError::Validation(
                reason.to_string(),
            )));
        }

        let session = PlaybackSession::enter(&mut self.registry, clock);
        self.playback = Some(session);
        self.emit(TrackingEvent::Initialized);
        self.emit(TrackingEvent::StateChanged(self.state));
        self.notify_visibility_changed();
        Ok(())
    }

    /// Re-apply recorded poses after the playback clock moved, then
    /// re-evaluate dominance (including the manual-override rule).
    pub fn playback_sync(&mut self) {
        let changed = match &self.playback {
            Some(session) => session.sync(),
            None => return,
        };
        for uid in changed {
            let visible = self
                .registry
                .get(&uid)
                .map(|tool| tool.visible())
                .unwrap_or_default();
            self.emit(TrackingEvent::ToolVisibility { uid, visible });
        }
        self.notify_visibility_changed();
    }

    // ------------------------------------------------------------------
    // Position history
    // ------------------------------------------------------------------

    /// Append all position history newer than the checkpoint to the log.
    pub fn save_position_history(&mut self) -> Result<usize, TrackingError> {
        self.history.save(&self.registry)
    }

    /// Per-tool history within `[start, stop]`, skipping tools with no
    /// entries in the range.
    #[must_use]
    pub fn session_history(
        &self,
        start: crate::transform::TimestampMs,
        stop: crate::transform::TimestampMs,
    ) -> Vec<(String, PositionHistory)> {
        self.registry
            .iter()
            .filter_map(|(uid, tool)| {
                let history = tool.session_history(start, stop);
                (!history.is_empty()).then(|| (uid.to_string(), history))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Point the controller at a different configuration file. While
    /// configured this forces a deconfigure-then-reconfigure cycle.
    pub fn set_configuration_file(&mut self, path: PathBuf) {
        if self.settings.config_file.as_deref() == Some(path.as_path()) {
            return;
        }
        self.settings.config_file = Some(path);
        if self.is_configured() {
            self.reconfigure_after_deconfigure = true;
            self.pending_target = Some(TrackingState::None);
            self.step();
        }
    }

    /// Change the logging folder used for position history. While
    /// configured this forces a deconfigure-then-reconfigure cycle.
    pub fn set_logging_folder(&mut self, folder: &Path) {
        if self.settings.logging_folder == folder {
            return;
        }
        self.settings.logging_folder = folder.to_path_buf();
        self.history = PositionHistoryStore::new(folder);
        if self.is_configured() {
            self.reconfigure_after_deconfigure = true;
            self.pending_target = Some(TrackingState::None);
            self.step();
        }
    }

    /// Apply a changed settings snapshot, dispatching on what changed:
    /// configuration file and logging folder reconfigure, the filter
    /// toggle resets every tool's filter.
    pub fn update_settings(&mut self, settings: Settings) {
        if settings.position_filter_enabled != self.settings.position_filter_enabled {
            for (_, tool) in self.registry.iter() {
                tool.reset_position_filter(settings.position_filter_enabled);
            }
        }

        self.selector.auto_select = settings.auto_select_dominant_tool;

        let config_file = settings.config_file.clone();
        let logging_folder = settings.logging_folder.clone();
        self.settings = Settings {
            config_file: self.settings.config_file.clone(),
            logging_folder: self.settings.logging_folder.clone(),
            ..settings
        };
        if let Some(path) = config_file {
            self.set_configuration_file(path);
        }
        self.set_logging_folder(&logging_folder);
    }

    /// Tool tip offset applied by downstream consumers.
    #[must_use]
    pub const fn tooltip_offset(&self) -> f64 {
        self.tooltip_offset
    }

    /// Set the tool tip offset, notifying on change.
    pub fn set_tooltip_offset(&mut self, offset: f64) {
        if (offset - self.tooltip_offset).abs() < f64::EPSILON {
            return;
        }
        self.tooltip_offset = offset;
        self.emit(TrackingEvent::TooltipOffsetChanged(offset));
    }

    // ------------------------------------------------------------------

    fn emit(&mut self, event: TrackingEvent) {
        self.events.emit(&event);
    }

    fn emit_all(&mut self, events: Vec<TrackingEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown(self.settings.worker_shutdown_timeout);
        }
        if self.device_claimed {
            self.device.release();
        }
    }
}
