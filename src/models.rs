//! Entity types persisted by the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// Reserved tag key holding the id of a run's parent run.
pub const PARENT_RUN_ID_TAG: &str = "trackstore.parentRunId";

/// Soft-delete marker. Deleted entities stay on disk and remain readable,
/// but reject further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    #[default]
    Active,
    Deleted,
}

impl LifecycleStage {
    pub fn is_active(self) -> bool {
        self == LifecycleStage::Active
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStage::Active => write!(f, "active"),
            LifecycleStage::Deleted => write!(f, "deleted"),
        }
    }
}

/// Query-time filter over lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewType {
    ActiveOnly,
    DeletedOnly,
    All,
}

impl ViewType {
    pub fn matches(self, stage: LifecycleStage) -> bool {
        match self {
            ViewType::ActiveOnly => stage == LifecycleStage::Active,
            ViewType::DeletedOnly => stage == LifecycleStage::Deleted,
            ViewType::All => true,
        }
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Scheduled => write!(f, "SCHEDULED"),
            RunStatus::Finished => write!(f, "FINISHED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Killed => write!(f, "KILLED"),
        }
    }
}

/// Named grouping of runs sharing an artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(deserialize_with = "id_from_int_or_string")]
    pub experiment_id: String,
    pub name: String,
    /// Opaque URI; immutable after creation.
    pub artifact_location: String,
    #[serde(default)]
    pub lifecycle_stage: LifecycleStage,
}

/// One timestamped sample of a run metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
}

impl Metric {
    pub fn new(key: impl Into<String>, value: f64, timestamp: i64, step: i64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
            step,
        }
    }
}

/// Run-scoped key/value pair, logged once per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Run-scoped key/value pair; last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

impl RunTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Metadata document of a run, stored at the run directory root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(deserialize_with = "id_from_int_or_string")]
    pub experiment_id: String,
    pub name: String,
    pub user_id: String,
    pub source_type: String,
    pub source_name: String,
    pub entry_point_name: String,
    #[serde(default)]
    pub source_version: Option<String>,
    pub status: RunStatus,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    pub artifact_uri: String,
    #[serde(default)]
    pub lifecycle_stage: LifecycleStage,
}

/// Materialized run data: current metric value per key, plus the full param
/// and tag mappings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunData {
    pub metrics: BTreeMap<String, Metric>,
    pub params: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

/// One execution record under an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub info: RunInfo,
    pub data: RunData,
}

/// Everything needed to create a run. `Default` gives an empty-source run
/// starting now.
#[derive(Debug, Clone)]
pub struct CreateRun {
    pub user_id: String,
    pub name: String,
    pub source_type: String,
    pub source_name: String,
    pub entry_point_name: String,
    pub start_time: i64,
    pub source_version: Option<String>,
    pub tags: Vec<RunTag>,
    pub parent_run_id: Option<String>,
}

impl Default for CreateRun {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            name: String::new(),
            source_type: String::new(),
            source_name: String::new(),
            entry_point_name: String::new(),
            start_time: Utc::now().timestamp_millis(),
            source_version: None,
            tags: vec![],
            parent_run_id: None,
        }
    }
}

/// Artifact listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    pub file_size: Option<u64>,
}

/// Older metadata documents stored ids as YAML integers; decode either form
/// to the canonical string id.
fn id_from_int_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }
    Ok(match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(id) => id.to_string(),
        IntOrString::Str(id) => id,
    })
}
