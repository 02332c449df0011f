//! Single-threaded consumer worker loop with intake control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use lakegate_events::QueueChannel;

#[derive(Debug, Error)]
#[error("intake control failed: {0}")]
pub struct IntakeError(pub String);

/// The narrow capability the replay coordinator uses to suspend and resume a
/// consumer's intake. Disabling intake stops the worker from dequeuing new
/// deliveries; an already-dequeued delivery is allowed to finish.
pub trait IntakeControl: Send + Sync {
    fn set_intake_enabled(&self, enabled: bool) -> Result<(), IntakeError>;

    fn intake_enabled(&self) -> bool;
}

/// Shared intake gate for a worker host. Starts enabled.
#[derive(Debug)]
pub struct IntakeGate {
    enabled: AtomicBool,
}

impl IntakeGate {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for IntakeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeControl for IntakeGate {
    fn set_intake_enabled(&self, enabled: bool) -> Result<(), IntakeError> {
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn intake_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    intake: Arc<IntakeGate>,
}

impl WorkerHandle {
    /// The worker's intake gate (hand this to the replay coordinator).
    pub fn intake(&self) -> Arc<IntakeGate> {
        self.intake.clone()
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic consumer worker loop.
///
/// - Dequeues strictly one delivery at a time from a queue channel
/// - Acknowledges only after the handler succeeds; a failed handler leaves
///   the delivery unacknowledged for redelivery
/// - Honors the intake gate: while disabled, nothing is dequeued
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a worker thread processing deliveries from the channel.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe).
    pub fn spawn<M, C, H, E>(
        name: &'static str,
        channel: C,
        mut handler: H,
        poll_interval: Duration,
    ) -> WorkerHandle
    where
        M: Send + 'static,
        C: QueueChannel<M> + Send + Sync + 'static,
        H: FnMut(&M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let intake = Arc::new(IntakeGate::new());
        let gate = intake.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                worker_loop(name, channel, shutdown_rx, gate, &mut handler, poll_interval)
            })
            .expect("failed to spawn consumer worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            intake,
        }
    }
}

fn worker_loop<M, C, H, E>(
    name: &'static str,
    channel: C,
    shutdown_rx: mpsc::Receiver<()>,
    intake: Arc<IntakeGate>,
    handler: &mut H,
    tick: Duration,
) where
    C: QueueChannel<M>,
    H: FnMut(&M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        // Suspended intake: idle without dequeuing.
        if !intake.intake_enabled() {
            thread::sleep(tick);
            continue;
        }

        match channel.receive() {
            Ok(Some(delivery)) => match handler(delivery.message()) {
                Ok(()) => {
                    if let Err(err) = channel.ack(delivery.receipt()) {
                        warn!(worker = name, error = ?err, "failed to acknowledge delivery");
                    }
                }
                Err(err) => {
                    // Left unacknowledged: the channel redelivers and
                    // eventually dead-letters.
                    warn!(worker = name, error = ?err, "handler failed; delivery will be redelivered");
                }
            },
            Ok(None) => thread::sleep(tick),
            Err(err) => {
                warn!(worker = name, error = ?err, "channel receive failed");
                thread::sleep(tick);
            }
        }
    }
}
