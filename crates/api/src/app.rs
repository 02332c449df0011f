use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use lakegate_core::{KeyMapping, StreamId};
use lakegate_events::{
    DispatchPolicy, HistoricalObjectRef, InMemoryQueueChannel, ObjectWriteNotification,
    UpdateDigest,
};
use lakegate_infra::consumers::{IngestionConsumer, ReplayConsumer, UpdatePipeline};
use lakegate_infra::coordinator::{
    CoordinatorConfig, CoordinatorState, ReplayCoordinator, ReplayOptions,
};
use lakegate_infra::ledger::{InMemoryOffsetLedger, OffsetLedger};
use lakegate_infra::object_store::InMemoryObjectStore;
use lakegate_infra::projection_store::InMemoryProjectionStore;
use lakegate_infra::workers::{ConsumerWorker, WorkerHandle};

type Queue<M> = Arc<InMemoryQueueChannel<M>>;
type InMemoryCoordinator = ReplayCoordinator<Queue<HistoricalObjectRef>>;

struct Inner {
    mapping: KeyMapping,
    scan_stream: StreamId,
    objects: Arc<InMemoryObjectStore>,
    ledger: Arc<InMemoryOffsetLedger>,
    projections: Arc<InMemoryProjectionStore>,
    source: Queue<ObjectWriteNotification>,
    digests: Queue<UpdateDigest>,
    coordinator: Arc<InMemoryCoordinator>,
    // Workers stay alive for the lifetime of the services.
    _ingestion_worker: WorkerHandle,
    _replay_worker: WorkerHandle,
}

/// In-memory bridge wiring (dev/test): object store, channels, both consumer
/// workers, and the replay coordinator bound to the ingestion worker's
/// intake gate.
#[derive(Clone)]
pub struct AppServices {
    inner: Arc<Inner>,
}

impl AppServices {
    pub fn in_memory() -> Self {
        let mapping = KeyMapping::new("lakegate-bucket-dev", "events/")
            .expect("dev mapping is valid");
        let scan_stream =
            StreamId::new("replay:lakegate-bucket-dev/events/").expect("dev stream id is valid");

        let objects = Arc::new(InMemoryObjectStore::new());
        let ledger = Arc::new(InMemoryOffsetLedger::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        let pipeline = Arc::new(UpdatePipeline::new(ledger.clone(), projections.clone()));

        let source: Queue<ObjectWriteNotification> =
            Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let replay: Queue<HistoricalObjectRef> =
            Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));
        let digests: Queue<UpdateDigest> =
            Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default()));

        let ingestion = IngestionConsumer::new(
            mapping.clone(),
            objects.clone(),
            pipeline.clone(),
            digests.clone(),
        );
        let ingestion_worker = ConsumerWorker::spawn(
            "ingestion",
            source.clone(),
            move |n: &ObjectWriteNotification| ingestion.handle(n).map(|_| ()),
            Duration::from_millis(50),
        );

        let replay_consumer =
            ReplayConsumer::new(mapping.clone(), objects.clone(), pipeline.clone());
        let replay_worker = ConsumerWorker::spawn(
            "replay",
            replay.clone(),
            move |r: &HistoricalObjectRef| replay_consumer.handle(r).map(|_| ()),
            Duration::from_millis(50),
        );

        let coordinator = Arc::new(ReplayCoordinator::new(
            mapping.clone(),
            objects.clone(),
            ledger.clone(),
            replay,
            ingestion_worker.intake(),
            scan_stream.clone(),
            CoordinatorConfig::default(),
        ));

        Self {
            inner: Arc::new(Inner {
                mapping,
                scan_stream,
                objects,
                ledger,
                projections,
                source,
                digests,
                coordinator,
                _ingestion_worker: ingestion_worker,
                _replay_worker: replay_worker,
            }),
        }
    }

    pub fn objects(&self) -> Arc<InMemoryObjectStore> {
        self.inner.objects.clone()
    }

    pub fn projections(&self) -> Arc<InMemoryProjectionStore> {
        self.inner.projections.clone()
    }

    pub fn source_channel(&self) -> Queue<ObjectWriteNotification> {
        self.inner.source.clone()
    }

    pub fn digest_channel(&self) -> Queue<UpdateDigest> {
        self.inner.digests.clone()
    }
}

/// Build the admin router over the given services.
pub fn build_app(services: AppServices) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/replay", post(trigger_replay))
        .route("/replay/status", get(replay_status))
        .with_state(services)
}

async fn root() -> &'static str {
    "lakegate OK"
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct ReplayRequest {
    #[serde(default)]
    from_beginning: bool,
}

/// Idempotent replay trigger. While a run is active, further triggers
/// observe the current state instead of starting anything.
async fn trigger_replay(
    State(services): State<AppServices>,
    body: Option<Json<ReplayRequest>>,
) -> impl IntoResponse {
    let options = ReplayOptions {
        from_beginning: body.map(|Json(b)| b.from_beginning).unwrap_or(false),
    };

    let coordinator = services.inner.coordinator.clone();
    match coordinator.state() {
        CoordinatorState::Suspending | CoordinatorState::Scanning | CoordinatorState::Resuming => (
            StatusCode::ACCEPTED,
            Json(json!({ "started": false, "state": coordinator.state() })),
        ),
        CoordinatorState::Idle | CoordinatorState::Failed => {
            // The run blocks until the scan completes; keep it off the
            // async runtime. The coordinator's own guard makes concurrent
            // triggers a no-op.
            std::thread::spawn(move || {
                if let Err(e) = coordinator.run(options) {
                    tracing::error!(error = %e, "replay run failed");
                }
            });
            (StatusCode::ACCEPTED, Json(json!({ "started": true })))
        }
    }
}

async fn replay_status(State(services): State<AppServices>) -> impl IntoResponse {
    let inner = &services.inner;

    let live_checkpoint = inner
        .ledger
        .get(&inner.mapping.stream_id())
        .ok()
        .flatten()
        .map(|c| c.cursor.encode());
    let scan_checkpoint = inner
        .ledger
        .get(&inner.scan_stream)
        .ok()
        .flatten()
        .map(|c| c.cursor.encode());

    Json(json!({
        "state": inner.coordinator.state(),
        "last_error": inner.coordinator.last_error(),
        "live_checkpoint": live_checkpoint,
        "scan_checkpoint": scan_checkpoint,
        "projections": inner.projections.len(),
    }))
}
