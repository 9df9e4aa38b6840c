//! trackstore: a local, file-system-backed metadata store for experiment
//! tracking.
//!
//! [`FileStore`] persists experiments and runs as directories of small YAML
//! documents, file-per-key params and tags, and append-only metric logs — no
//! external database. [`RunLogger`] adds buffered batch logging with an
//! explicit flush/close lifecycle, and [`LocalArtifactRepository`] stores
//! opaque artifact bytes next to the run.

pub mod artifacts;
pub mod error;
pub mod logger;
pub mod models;
pub mod search;
pub mod storage;
pub mod store;

pub use artifacts::LocalArtifactRepository;
pub use error::{ErrorCode, Result, StoreError};
pub use logger::{LoggerConfig, RunLogger};
pub use models::{
    CreateRun, Experiment, FileInfo, LifecycleStage, Metric, Param, Run, RunData, RunInfo,
    RunStatus, RunTag, ViewType, PARENT_RUN_ID_TAG,
};
pub use search::Filter;
pub use store::{
    FileStore, DEFAULT_EXPERIMENT_ID, SEARCH_MAX_RESULTS_DEFAULT, SEARCH_MAX_RESULTS_THRESHOLD,
};
