use crate::graph::StructureGraph;
use crate::tracker::{CoverageTracker, TrackerError};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, warn};

pub const CREATE_FUZZER_PATH: &str = "/observer.ObserverService/CreateFuzzer";
pub const UPDATE_FEATURES_PATH: &str = "/observer.ObserverService/UpdateFeatures";

/// Fuzzer ids are taken as any JSON integer; only equality with the primary
/// id matters, so out-of-domain ids are acknowledged like any non-primary one.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CreateFuzzerRequest {
    pub fuzzer_id: i128,
    pub structure_graph: Option<StructureGraph>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFuzzerResponse {}

/// One hit report. Only `node_index` is read; the counter bits are ignored.
///
/// Any JSON integer decodes, so every bad index surfaces as `OUT_OF_RANGE`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BitCounter {
    pub node_index: i128,
    pub counter: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UpdateFeaturesRequest {
    pub fuzzer_id: i128,
    pub bit_counters: Vec<BitCounter>,
    pub corpus_id: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFeaturesResponse {}

/// Error body returned for failed calls.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: String,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Invalid request body: {0}")]
    InvalidArgument(String),
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidArgument(rejection.body_text())
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Tracker(TrackerError::NotInitialized) => StatusCode::PRECONDITION_FAILED,
            ServiceError::Tracker(TrackerError::IndexOutOfRange { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn rpc_code(&self) -> &'static str {
        match self {
            ServiceError::Tracker(TrackerError::NotInitialized) => "FAILED_PRECONDITION",
            ServiceError::Tracker(TrackerError::IndexOutOfRange { .. }) => "OUT_OF_RANGE",
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = RpcStatus {
            code: self.rpc_code().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// The observer RPC surface over one shared [`CoverageTracker`].
///
/// Clones share the tracker. Every call holds the tracker lock for the whole
/// tracker operation, so concurrent callers never see a half-applied batch.
#[derive(Clone)]
pub struct ObserverService {
    tracker: Arc<Mutex<CoverageTracker>>,
}

impl ObserverService {
    pub fn new(tracker: CoverageTracker) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
        }
    }

    /// Recovers a poisoned lock. Only the progress observer can panic while
    /// it is held, and it runs after the batch is applied.
    fn lock(&self) -> MutexGuard<'_, CoverageTracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| {
            error!("Progress observer panicked, recovering coverage tracker lock");
            self.tracker.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Registers the request's graph. Non-primary fuzzers are acknowledged
    /// without touching the tracker.
    pub fn create_fuzzer(
        &self,
        req: CreateFuzzerRequest,
    ) -> Result<CreateFuzzerResponse, ServiceError> {
        let graph = req.structure_graph.unwrap_or_default();
        debug!(fuzzer_id = req.fuzzer_id, nodes = graph.len(), "CreateFuzzer");
        self.lock().register_graph(req.fuzzer_id, graph);
        Ok(CreateFuzzerResponse {})
    }

    pub fn update_features(
        &self,
        req: UpdateFeaturesRequest,
    ) -> Result<UpdateFeaturesResponse, ServiceError> {
        let indices: Vec<i128> = req.bit_counters.iter().map(|bc| bc.node_index).collect();
        let updated = self.lock().report_hits(&indices).inspect_err(|e| {
            warn!(fuzzer_id = req.fuzzer_id, "UpdateFeatures rejected: {e}");
        })?;
        debug!(
            fuzzer_id = req.fuzzer_id,
            corpus_id = req.corpus_id,
            hits = indices.len(),
            updated,
            "UpdateFeatures"
        );
        Ok(UpdateFeaturesResponse {})
    }

    /// Runs `f` against the tracker under the service lock.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&CoverageTracker) -> R) -> R {
        f(&self.lock())
    }
}

async fn create_fuzzer(
    State(service): State<ObserverService>,
    payload: Result<Json<CreateFuzzerRequest>, JsonRejection>,
) -> Result<Json<CreateFuzzerResponse>, ServiceError> {
    let Json(req) = payload.inspect_err(|e| warn!("CreateFuzzer rejected: {e}"))?;
    service.create_fuzzer(req).map(Json)
}

async fn update_features(
    State(service): State<ObserverService>,
    payload: Result<Json<UpdateFeaturesRequest>, JsonRejection>,
) -> Result<Json<UpdateFeaturesResponse>, ServiceError> {
    let Json(req) = payload.inspect_err(|e| warn!("UpdateFeatures rejected: {e}"))?;
    service.update_features(req).map(Json)
}

pub fn router(service: ObserverService) -> Router {
    Router::new()
        .route(CREATE_FUZZER_PATH, post(create_fuzzer))
        .route(UPDATE_FEATURES_PATH, post(update_features))
        .with_state(service)
}
