pub mod companion;
pub mod config;
pub mod graph;
pub mod observer;
pub mod server;
pub mod service;
pub mod tracker;

pub use companion::{CompanionConfig, CompanionError, CompanionProcess};
pub use config::{CovwatchConfig, ProxySettings, ServiceSettings};
pub use graph::{GraphFunction, GraphNode, StructureGraph};
pub use observer::{CoverageProgress, LogObserver, NoOpObserver, ProgressObserver};
pub use server::{ObserverServer, shutdown_signal};
pub use service::{
    BitCounter, CreateFuzzerRequest, CreateFuzzerResponse, ObserverService, RpcStatus,
    ServiceError, UpdateFeaturesRequest, UpdateFeaturesResponse, router,
};
pub use tracker::{
    CoverageTracker, DEFAULT_PRIMARY_FUZZER_ID, TrackerError, TrackerState, is_primary_fuzzer,
};
