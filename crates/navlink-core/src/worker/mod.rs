//! The tracker worker: a dedicated thread owning the hardware connection.
//!
//! The worker is the only place hardware calls happen. It receives commands
//! over a channel and posts exactly one completion event per operation; the
//! controller's event pump applies those completions on the orchestrating
//! thread, so the worker never mutates shared state itself.
//!
//! Opening the connection (configure) happens at spawn: the worker reports
//! the discovered tools in its `Configured` completion. Shutdown asks the
//! thread to stop cooperatively and waits a bounded interval; if the thread
//! does not respond it is abandoned and a timeout error is returned. That
//! forced path is sanctioned for shutdown only, never for cancelling an
//! operation mid-flight.

pub mod sim;

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::config::{ToolDescriptor, TrackerDescriptor};
use crate::error::TrackingError;
use crate::tool::CapabilitySet;

/// A tool reported by the tracker connection after a successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTool {
    /// Unique tool identifier.
    pub uid: String,
    /// Human-readable name.
    pub name: String,
    /// Capability tags resolved from the descriptor.
    pub capabilities: CapabilitySet,
    /// Whether this tool is the spatial reference frame.
    pub is_reference: bool,
}

/// The opaque hardware connection driven by the worker thread.
///
/// Implementations wrap the vendor tracking library; the simulated backend
/// in [`sim`] stands in for tests and offline use.
pub trait TrackerBackend: Send {
    /// Open the connection and discover the configured tools.
    fn open(&mut self) -> Result<Vec<DiscoveredTool>, String>;

    /// Initialize (`true`) or uninitialize (`false`) the hardware.
    fn initialize(&mut self, on: bool) -> Result<(), String>;

    /// Start (`true`) or stop (`false`) pose tracking.
    fn track(&mut self, on: bool) -> Result<(), String>;

    /// Tear the connection down. Called once when the worker exits.
    fn close(&mut self);
}

/// Builds a backend from the parsed configuration descriptors.
pub trait TrackerBackendFactory: Send {
    /// Create a backend for one tracker and its tools.
    fn create(
        &self,
        tracker: &TrackerDescriptor,
        tools: &[ToolDescriptor],
    ) -> Box<dyn TrackerBackend>;
}

/// Commands accepted by the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Initialize or uninitialize the hardware.
    Initialize(bool),
    /// Start or stop tracking.
    Track(bool),
    /// Stop the thread cooperatively.
    Shutdown,
}

/// Completion events posted by the worker thread. Exactly one per command
/// (plus the initial `Configured` at spawn).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Result of opening the connection: the discovered tools, or why the
    /// open failed.
    Configured(Result<Vec<DiscoveredTool>, String>),
    /// Hardware is now initialized (`true`) or uninitialized (`false`).
    Initialized(bool),
    /// Tracking is now running (`true`) or stopped (`false`).
    Tracking(bool),
    /// The operation in flight failed.
    Error(String),
}

/// Handle to the worker thread.
pub struct TrackerWorker {
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl TrackerWorker {
    /// Spawn the worker thread. The backend is opened immediately and the
    /// resulting `Configured` completion is the first event on the
    /// returned receiver.
    pub fn spawn(
        backend: Box<dyn TrackerBackend>,
    ) -> Result<(Self, Receiver<WorkerEvent>), TrackingError> {
        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();

        let thread = std::thread::Builder::new()
            .name("tracker-worker".to_string())
            .spawn(move || run(backend, &cmd_rx, &event_tx))
            .map_err(TrackingError::Spawn)?;

        Ok((
            Self {
                commands: cmd_tx,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Ask the worker to initialize (`true`) or uninitialize (`false`).
    pub fn initialize(&self, on: bool) -> Result<(), TrackingError> {
        self.send(WorkerCommand::Initialize(on))
    }

    /// Ask the worker to start (`true`) or stop (`false`) tracking.
    pub fn track(&self, on: bool) -> Result<(), TrackingError> {
        self.send(WorkerCommand::Track(on))
    }

    fn send(&self, command: WorkerCommand) -> Result<(), TrackingError> {
        self.commands
            .send(command)
            .map_err(|_| TrackingError::WorkerUnavailable)
    }

    /// Stop the worker: request cooperative shutdown, wait up to `timeout`
    /// for the thread to finish, and abandon it if it does not.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<(), TrackingError> {
        let _ = self.commands.send(WorkerCommand::Shutdown);

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                // Last resort: the thread keeps running detached. Never
                // used to cancel an operation mid-transition.
                error!(?timeout, "worker thread did not stop in time, abandoning it");
                return Err(TrackingError::ThreadTimeout { waited: timeout });
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        if thread.join().is_err() {
            error!("worker thread panicked during shutdown");
        }
        Ok(())
    }
}

impl Drop for TrackerWorker {
    fn drop(&mut self) {
        // Best effort: ask the thread to stop, do not block in drop.
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }
}

fn run(
    mut backend: Box<dyn TrackerBackend>,
    commands: &Receiver<WorkerCommand>,
    events: &Sender<WorkerEvent>,
) {
    let opened = backend.open();
    let ok = opened.is_ok();
    let _ = events.send(WorkerEvent::Configured(opened));

    if ok {
        info!("tracker connection open");
        while let Ok(command) = commands.recv() {
            debug!(?command, "worker command");
            let event = match command {
                WorkerCommand::Initialize(on) => match backend.initialize(on) {
                    Ok(()) => WorkerEvent::Initialized(on),
                    Err(e) => WorkerEvent::Error(e),
                },
                WorkerCommand::Track(on) => match backend.track(on) {
                    Ok(()) => WorkerEvent::Tracking(on),
                    Err(e) => WorkerEvent::Error(e),
                },
                WorkerCommand::Shutdown => break,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    }

    backend.close();
    debug!("tracker worker exiting");
}

#[cfg(test)]
mod tests {
    use super::sim::{SimFailures, SimTrackerBackend};
    use super::*;

    fn sim_tools() -> Vec<DiscoveredTool> {
        vec![DiscoveredTool {
            uid: "p1".to_string(),
            name: "p1".to_string(),
            capabilities: CapabilitySet::empty(),
            is_reference: false,
        }]
    }

    #[test]
    fn reports_one_completion_per_command() {
        let backend = SimTrackerBackend::new(sim_tools(), SimFailures::default());
        let (mut worker, events) = TrackerWorker::spawn(Box::new(backend)).unwrap();

        assert!(matches!(
            events.recv().unwrap(),
            WorkerEvent::Configured(Ok(tools)) if tools.len() == 1
        ));

        worker.initialize(true).unwrap();
        assert_eq!(events.recv().unwrap(), WorkerEvent::Initialized(true));

        worker.track(true).unwrap();
        assert_eq!(events.recv().unwrap(), WorkerEvent::Tracking(true));

        worker.track(false).unwrap();
        assert_eq!(events.recv().unwrap(), WorkerEvent::Tracking(false));

        worker.shutdown(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn open_failure_reports_configured_err_and_exits() {
        let backend = SimTrackerBackend::new(
            sim_tools(),
            SimFailures {
                open: true,
                ..SimFailures::default()
            },
        );
        let (mut worker, events) = TrackerWorker::spawn(Box::new(backend)).unwrap();
        assert!(matches!(
            events.recv().unwrap(),
            WorkerEvent::Configured(Err(_))
        ));
        worker.shutdown(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn initialize_failure_reports_error_event() {
        let backend = SimTrackerBackend::new(
            sim_tools(),
            SimFailures {
                initialize: true,
                ..SimFailures::default()
            },
        );
        let (mut worker, events) = TrackerWorker::spawn(Box::new(backend)).unwrap();
        assert!(matches!(events.recv().unwrap(), WorkerEvent::Configured(Ok(_))));
        worker.initialize(true).unwrap();
        assert!(matches!(events.recv().unwrap(), WorkerEvent::Error(_)));
        worker.shutdown(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn shutdown_times_out_on_a_stuck_worker() {
        struct StuckBackend;
        impl TrackerBackend for StuckBackend {
            fn open(&mut self) -> Result<Vec<DiscoveredTool>, String> {
                Ok(Vec::new())
            }
            fn initialize(&mut self, _on: bool) -> Result<(), String> {
                std::thread::sleep(Duration::from_secs(5));
                Ok(())
            }
            fn track(&mut self, _on: bool) -> Result<(), String> {
                Ok(())
            }
            fn close(&mut self) {}
        }

        let (mut worker, events) = TrackerWorker::spawn(Box::new(StuckBackend)).unwrap();
        assert!(matches!(events.recv().unwrap(), WorkerEvent::Configured(Ok(_))));
        worker.initialize(true).unwrap();
        let err = worker.shutdown(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, TrackingError::ThreadTimeout { .. }));
    }

    #[test]
    fn commands_after_shutdown_fail_closed() {
        let backend = SimTrackerBackend::new(Vec::new(), SimFailures::default());
        let (mut worker, events) = TrackerWorker::spawn(Box::new(backend)).unwrap();
        assert!(matches!(events.recv().unwrap(), WorkerEvent::Configured(Ok(_))));
        worker.shutdown(Duration::from_secs(1)).unwrap();
        // The channel stays open (sender held by the handle) but the loop
        // is gone; sends still succeed. Dropping the receiver is what the
        // controller observes; here we just assert shutdown is idempotent.
        worker.shutdown(Duration::from_secs(1)).unwrap();
    }
}
