//! Replay coordination: suspend live intake, re-scan the object store,
//! republish history, resume live intake.
//!
//! The coordinator is a one-shot orchestration over a state machine:
//!
//! ```text
//! Idle -> Suspending -> Scanning -> Resuming -> Idle
//!              |            |
//!              v            v
//!            Failed       Failed
//! ```
//!
//! `Failed` is also reachable from `Resuming`: if re-enabling intake fails
//! the coordinator halts for operator action rather than retrying, because
//! silently leaving live ingestion suspended is worse than alerting.
//!
//! The scan commits a checkpoint per page **before** fetching the next page,
//! so any interruption (crash, budget, page failure) bounds re-work on
//! restart to at most one page.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use lakegate_core::{KeyMapping, OffsetToken, StreamId};
use lakegate_events::{HistoricalObjectRef, QueueChannel, RetryPolicy};

use crate::channel::send_with_retry;
use crate::ledger::{LedgerError, OffsetLedger};
use crate::object_store::{ObjectStore, VersionPage};
use crate::workers::IntakeControl;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Suspending,
    Scanning,
    Resuming,
    Failed,
}

/// Options for one replay run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Discard the existing checkpoints and re-scan the whole stream.
    pub from_beginning: bool,
}

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Objects listed per page.
    pub page_size: usize,
    /// Execution budget: pages per invocation. When the budget is reached
    /// before the listing is exhausted, the coordinator re-invokes the scan
    /// from the persisted checkpoint (self-chaining).
    pub pages_per_invocation: usize,
    /// Bounded attempts per page before the run aborts in `Failed`.
    pub page_retry: RetryPolicy,
    /// Bounded attempts per published reference.
    pub publish_retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            pages_per_invocation: 100,
            page_retry: RetryPolicy::publish_default(),
            publish_retry: RetryPolicy::publish_default(),
        }
    }
}

/// Result of a completed replay run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub objects_published: u64,
    pub pages_scanned: u64,
    /// Self-chained scan invocations (1 when the budget was never reached).
    pub invocations: u32,
    /// The scan checkpoint after the run, if any page was committed.
    pub final_checkpoint: Option<OffsetToken>,
}

/// Outcome of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStart {
    Completed(ReplaySummary),
    /// A run is already active; the trigger is an idempotent no-op.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to suspend live intake: {0}")]
    Suspend(String),

    #[error("scan aborted after {attempts} attempts on a page: {cause}")]
    ScanAborted { attempts: u32, cause: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Fatal-coordination: the scan finished but live intake could not be
    /// re-enabled. Requires explicit operator action; never auto-retried.
    #[error("failed to resume live intake after scan: {0}")]
    Resume(String),
}

enum ScanProgress {
    Exhausted,
    BudgetReached,
}

/// One-shot replay orchestration.
///
/// `run` is idempotent while active: a second trigger observes
/// [`ReplayStart::AlreadyRunning`]. A run that ended in `Failed` may be
/// re-triggered by an operator and resumes from the last committed
/// checkpoint.
pub struct ReplayCoordinator<C> {
    mapping: KeyMapping,
    objects: Arc<dyn ObjectStore>,
    ledger: Arc<dyn OffsetLedger>,
    replay_channel: C,
    intake: Arc<dyn IntakeControl>,
    config: CoordinatorConfig,
    /// Ledger key for the scan's own progress, separate from the live
    /// stream's checkpoint.
    scan_stream: StreamId,
    state: Mutex<CoordinatorState>,
    last_error: Mutex<Option<String>>,
}

impl<C> ReplayCoordinator<C>
where
    C: QueueChannel<HistoricalObjectRef>,
{
    pub fn new(
        mapping: KeyMapping,
        objects: Arc<dyn ObjectStore>,
        ledger: Arc<dyn OffsetLedger>,
        replay_channel: C,
        intake: Arc<dyn IntakeControl>,
        scan_stream: StreamId,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            mapping,
            objects,
            ledger,
            replay_channel,
            intake,
            config,
            scan_stream,
            state: Mutex::new(CoordinatorState::Idle),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(CoordinatorState::Failed)
    }

    /// Description of the failure that put the coordinator in `Failed`.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn transition(&self, next: CoordinatorState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn fail(&self, cause: &str) {
        error!(cause, "replay coordinator failed");
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(cause.to_string());
        }
        self.transition(CoordinatorState::Failed);
    }

    /// Run a replay to completion (or failure).
    ///
    /// Returns [`ReplayStart::AlreadyRunning`] without touching anything if
    /// another run is active.
    pub fn run(&self, options: ReplayOptions) -> Result<ReplayStart, CoordinatorError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CoordinatorError::Suspend("state lock poisoned".to_string()))?;
            match *state {
                CoordinatorState::Idle | CoordinatorState::Failed => {
                    *state = CoordinatorState::Suspending;
                }
                _ => return Ok(ReplayStart::AlreadyRunning),
            }
        }
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }

        info!(
            from_beginning = options.from_beginning,
            stream = %self.mapping.stream_id(),
            "starting replay"
        );

        // Suspending: stop live dequeuing; in-flight deliveries finish on
        // their own.
        if let Err(e) = self.intake.set_intake_enabled(false) {
            self.fail(&e.to_string());
            return Err(CoordinatorError::Suspend(e.to_string()));
        }

        if options.from_beginning {
            // Administrative replay-from-scratch: both the scan checkpoint
            // and the live stream checkpoint are discarded.
            self.ledger.reset(&self.scan_stream)?;
            self.ledger.reset(&self.mapping.stream_id())?;
        }

        self.transition(CoordinatorState::Scanning);

        let mut summary = ReplaySummary {
            objects_published: 0,
            pages_scanned: 0,
            invocations: 0,
            final_checkpoint: None,
        };

        // Self-chaining: each invocation scans up to the page budget, then
        // re-enters from the persisted checkpoint.
        loop {
            summary.invocations += 1;
            match self.scan_invocation(&mut summary) {
                Ok(ScanProgress::Exhausted) => break,
                Ok(ScanProgress::BudgetReached) => {
                    info!(
                        invocation = summary.invocations,
                        pages = summary.pages_scanned,
                        "scan budget reached; chaining next invocation"
                    );
                }
                Err(e) => {
                    self.fail(&e.to_string());
                    return Err(e);
                }
            }
        }

        // Resuming: re-enable live intake. Failure here is fatal and needs an
        // operator; an automatic retry loop could mask a permanently
        // suspended pipeline.
        self.transition(CoordinatorState::Resuming);
        if let Err(e) = self.intake.set_intake_enabled(true) {
            self.fail(&e.to_string());
            return Err(CoordinatorError::Resume(e.to_string()));
        }

        summary.final_checkpoint = self
            .ledger
            .get(&self.scan_stream)
            .ok()
            .flatten()
            .map(|checkpoint| checkpoint.cursor);
        self.transition(CoordinatorState::Idle);

        info!(
            objects = summary.objects_published,
            pages = summary.pages_scanned,
            invocations = summary.invocations,
            "replay complete"
        );

        Ok(ReplayStart::Completed(summary))
    }

    /// Scan up to `pages_per_invocation` pages from the persisted checkpoint.
    fn scan_invocation(&self, summary: &mut ReplaySummary) -> Result<ScanProgress, CoordinatorError> {
        let mut cursor = self
            .ledger
            .get(&self.scan_stream)?
            .map(|checkpoint| checkpoint.cursor);

        for _ in 0..self.config.pages_per_invocation {
            let page = self.scan_page_with_retry(cursor.as_ref())?;

            let Some(last) = page.versions.last() else {
                return Ok(ScanProgress::Exhausted);
            };
            let page_end = last.offset();

            summary.objects_published += page.versions.len() as u64;
            summary.pages_scanned += 1;

            // Commit the page's end cursor before fetching the next page;
            // restart re-work is bounded to this one page.
            self.ledger.advance(&self.scan_stream, &page_end)?;

            if page.next.is_none() {
                return Ok(ScanProgress::Exhausted);
            }
            cursor = Some(page_end);
        }

        Ok(ScanProgress::BudgetReached)
    }

    /// List and publish one page, with bounded attempts.
    ///
    /// A retried page may republish references already sent in a failed
    /// attempt; the replay consumer's idempotent update rule absorbs the
    /// duplicates.
    fn scan_page_with_retry(
        &self,
        after: Option<&OffsetToken>,
    ) -> Result<VersionPage, CoordinatorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.scan_page(after) {
                Ok(page) => return Ok(page),
                Err(cause) if self.config.page_retry.should_retry(attempt) => {
                    warn!(attempt, cause = %cause, "page scan failed; retrying");
                    std::thread::sleep(self.config.page_retry.delay_for_attempt(attempt));
                }
                Err(cause) => {
                    return Err(CoordinatorError::ScanAborted {
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    fn scan_page(&self, after: Option<&OffsetToken>) -> Result<VersionPage, String> {
        let page = self
            .objects
            .list_versions(self.mapping.prefix(), after, self.config.page_size)
            .map_err(|e| e.to_string())?;

        for version in &page.versions {
            let reference = HistoricalObjectRef {
                object_key: version.key.clone(),
                last_modified: version.last_modified,
                version_id: version.version_id.clone(),
            };
            send_with_retry(
                &self.replay_channel,
                reference,
                &self.config.publish_retry,
                "replay",
            )?;
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{TimeZone, Utc};
    use lakegate_core::ObjectKey;
    use lakegate_events::{DispatchPolicy, InMemoryQueueChannel};

    use crate::ledger::InMemoryOffsetLedger;
    use crate::object_store::InMemoryObjectStore;
    use crate::workers::{IntakeError, IntakeGate};

    use super::*;

    type ReplayQueue = Arc<InMemoryQueueChannel<HistoricalObjectRef>>;

    fn mapping() -> KeyMapping {
        KeyMapping::new("lake", "events/").unwrap()
    }

    fn scan_stream() -> StreamId {
        StreamId::new("replay:lake/events/").unwrap()
    }

    fn seeded_store(count: usize) -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new());
        for i in 0..count {
            store.put(
                ObjectKey::new(format!("events/{i}.json")).unwrap(),
                format!("payload-{i}").into_bytes(),
                Utc.timestamp_opt(i as i64, 0).unwrap(),
            );
        }
        store
    }

    fn coordinator(
        objects: Arc<InMemoryObjectStore>,
        config: CoordinatorConfig,
    ) -> (
        ReplayCoordinator<ReplayQueue>,
        ReplayQueue,
        Arc<InMemoryOffsetLedger>,
        Arc<IntakeGate>,
    ) {
        let ledger = Arc::new(InMemoryOffsetLedger::new());
        let channel: ReplayQueue = Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let intake = Arc::new(IntakeGate::new());

        let coordinator = ReplayCoordinator::new(
            mapping(),
            objects,
            ledger.clone(),
            channel.clone(),
            intake.clone(),
            scan_stream(),
            config,
        );

        (coordinator, channel, ledger, intake)
    }

    fn drain(channel: &ReplayQueue) -> Vec<HistoricalObjectRef> {
        let mut out = Vec::new();
        while let Some(delivery) = channel.receive().unwrap() {
            channel.ack(delivery.receipt()).unwrap();
            out.push(delivery.into_message());
        }
        out
    }

    #[test]
    fn full_scan_publishes_every_version_and_resumes_intake() {
        let (coordinator, channel, _, intake) = coordinator(
            seeded_store(7),
            CoordinatorConfig {
                page_size: 3,
                ..Default::default()
            },
        );

        let outcome = coordinator.run(ReplayOptions::default()).unwrap();
        let ReplayStart::Completed(summary) = outcome else {
            panic!("expected a completed run");
        };

        assert_eq!(summary.objects_published, 7);
        assert_eq!(summary.pages_scanned, 3);
        assert!(summary.final_checkpoint.is_some());
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert!(intake.intake_enabled());

        let published = drain(&channel);
        assert_eq!(published.len(), 7);
        // Oldest first.
        assert_eq!(published[0].object_key.as_str(), "events/0.json");
        assert_eq!(published[6].object_key.as_str(), "events/6.json");
    }

    fn completed(outcome: ReplayStart) -> ReplaySummary {
        match outcome {
            ReplayStart::Completed(summary) => summary,
            ReplayStart::AlreadyRunning => panic!("unexpected concurrent run"),
        }
    }

    #[test]
    fn budget_chains_invocations_and_restart_resumes_after_the_checkpoint() {
        let objects = seeded_store(9);
        let (first, channel, ledger, _) = coordinator(
            objects.clone(),
            CoordinatorConfig {
                page_size: 3,
                pages_per_invocation: 2,
                ..Default::default()
            },
        );

        // The 2-page budget forces a self-chained second invocation.
        let summary = completed(first.run(ReplayOptions::default()).unwrap());
        assert_eq!(summary.invocations, 2);
        assert_eq!(drain(&channel).len(), 9);

        // A fresh coordinator over the same ledger re-publishes nothing: the
        // checkpoint is at the end of the stream.
        let channel2: ReplayQueue = Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let second = ReplayCoordinator::new(
            mapping(),
            objects.clone(),
            ledger.clone(),
            channel2.clone(),
            Arc::new(IntakeGate::new()),
            scan_stream(),
            CoordinatorConfig {
                page_size: 3,
                ..Default::default()
            },
        );

        let summary = completed(second.run(ReplayOptions::default()).unwrap());
        assert_eq!(summary.objects_published, 0);
        assert!(drain(&channel2).is_empty());

        // New objects past the checkpoint are picked up by the next run.
        objects.put(
            ObjectKey::new("events/9.json").unwrap(),
            b"payload-9".to_vec(),
            Utc.timestamp_opt(100, 0).unwrap(),
        );
        let summary = completed(second.run(ReplayOptions::default()).unwrap());
        assert_eq!(summary.objects_published, 1);
        let published = drain(&channel2);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].object_key.as_str(), "events/9.json");
    }

    #[test]
    fn from_beginning_rescans_everything() {
        let (coordinator, channel, ledger, _) = coordinator(
            seeded_store(4),
            CoordinatorConfig {
                page_size: 10,
                ..Default::default()
            },
        );

        coordinator.run(ReplayOptions::default()).unwrap();
        assert_eq!(drain(&channel).len(), 4);

        // Second incremental run: nothing new.
        coordinator.run(ReplayOptions::default()).unwrap();
        assert!(drain(&channel).is_empty());

        // Full reseed: everything again, and the live checkpoint is reset too.
        ledger
            .advance(
                &mapping().stream_id(),
                &OffsetToken::new(
                    Utc.timestamp_opt(3, 0).unwrap(),
                    ObjectKey::new("events/3.json").unwrap(),
                    "v1".parse().unwrap(),
                ),
            )
            .unwrap();

        coordinator
            .run(ReplayOptions {
                from_beginning: true,
            })
            .unwrap();
        assert_eq!(drain(&channel).len(), 4);
        // The live checkpoint was discarded along with the scan checkpoint.
        assert!(ledger.get(&mapping().stream_id()).unwrap().is_none());
    }

    /// Object store that fails listing after `allowed` successful pages.
    struct FailingAfter {
        inner: Arc<InMemoryObjectStore>,
        allowed: AtomicU32,
    }

    impl ObjectStore for FailingAfter {
        fn list_versions(
            &self,
            prefix: &str,
            after: Option<&OffsetToken>,
            limit: usize,
        ) -> Result<VersionPage, crate::object_store::ObjectStoreError> {
            if self
                .allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |a| a.checked_sub(1))
                .is_err()
            {
                return Err(crate::object_store::ObjectStoreError::Transient(
                    "listing throttled".to_string(),
                ));
            }
            self.inner.list_versions(prefix, after, limit)
        }

        fn get_latest(
            &self,
            key: &ObjectKey,
        ) -> Result<crate::object_store::FetchedObject, crate::object_store::ObjectStoreError>
        {
            self.inner.get_latest(key)
        }

        fn get_version(
            &self,
            key: &ObjectKey,
            version_id: &lakegate_core::VersionId,
        ) -> Result<crate::object_store::FetchedObject, crate::object_store::ObjectStoreError>
        {
            self.inner.get_version(key, version_id)
        }
    }

    #[test]
    fn page_failure_aborts_in_failed_state_with_checkpoint_preserved() {
        let inner = seeded_store(9);
        let objects = Arc::new(FailingAfter {
            inner: inner.clone(),
            allowed: AtomicU32::new(2),
        });

        let ledger = Arc::new(InMemoryOffsetLedger::new());
        let channel: ReplayQueue = Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let intake = Arc::new(IntakeGate::new());

        let coordinator = ReplayCoordinator::new(
            mapping(),
            objects,
            ledger.clone(),
            channel.clone(),
            intake.clone(),
            scan_stream(),
            CoordinatorConfig {
                page_size: 3,
                page_retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
        );

        // Pages 1 and 2 succeed (6 objects); page 3's listing fails.
        let err = coordinator.run(ReplayOptions::default()).unwrap_err();
        assert!(matches!(err, CoordinatorError::ScanAborted { .. }));
        assert_eq!(coordinator.state(), CoordinatorState::Failed);
        assert!(coordinator.last_error().is_some());
        assert_eq!(drain(&channel).len(), 6);

        // The checkpoint preserved page 2's end.
        let checkpoint = ledger.get(&scan_stream()).unwrap().unwrap();
        assert_eq!(checkpoint.cursor.key().as_str(), "events/5.json");

        // Retry from Failed: only page 3's objects are republished.
        let second = ReplayCoordinator::new(
            mapping(),
            Arc::new(FailingAfter {
                inner,
                allowed: AtomicU32::new(u32::MAX),
            }),
            ledger.clone(),
            channel.clone(),
            intake,
            scan_stream(),
            CoordinatorConfig {
                page_size: 3,
                ..Default::default()
            },
        );

        let summary = match second.run(ReplayOptions::default()).unwrap() {
            ReplayStart::Completed(s) => s,
            ReplayStart::AlreadyRunning => panic!("unexpected concurrent run"),
        };
        assert_eq!(summary.objects_published, 3);

        let republished = drain(&channel);
        assert_eq!(republished.len(), 3);
        assert_eq!(republished[0].object_key.as_str(), "events/6.json");
        assert_eq!(republished[2].object_key.as_str(), "events/8.json");
    }

    /// Intake control that fails on resume.
    struct StuckIntake {
        inner: IntakeGate,
    }

    impl IntakeControl for StuckIntake {
        fn set_intake_enabled(&self, enabled: bool) -> Result<(), IntakeError> {
            if enabled {
                return Err(IntakeError("binding update rejected".to_string()));
            }
            self.inner.set_intake_enabled(enabled)
        }

        fn intake_enabled(&self) -> bool {
            self.inner.intake_enabled()
        }
    }

    #[test]
    fn resume_failure_is_fatal_and_leaves_failed_state() {
        let objects = seeded_store(2);
        let ledger = Arc::new(InMemoryOffsetLedger::new());
        let channel: ReplayQueue = Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let intake = Arc::new(StuckIntake {
            inner: IntakeGate::new(),
        });

        let coordinator = ReplayCoordinator::new(
            mapping(),
            objects,
            ledger,
            channel,
            intake.clone(),
            scan_stream(),
            CoordinatorConfig::default(),
        );

        let err = coordinator.run(ReplayOptions::default()).unwrap_err();
        assert!(matches!(err, CoordinatorError::Resume(_)));
        assert_eq!(coordinator.state(), CoordinatorState::Failed);

        // Intake is still suspended: exactly the condition an operator must
        // see and act on.
        assert!(!intake.intake_enabled());
    }

    #[test]
    fn second_trigger_while_running_is_a_no_op() {
        let (coordinator, _, _, _) = coordinator(seeded_store(1), CoordinatorConfig::default());

        // Simulate an active run.

        {
            let mut state = coordinator.state.lock().unwrap();
            *state = CoordinatorState::Scanning;
        }

        let outcome = coordinator.run(ReplayOptions::default()).unwrap();
        assert_eq!(outcome, ReplayStart::AlreadyRunning);
    }
}
