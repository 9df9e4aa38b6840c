//! File-backed experiment and run store.
//!
//! On-disk layout: one directory per experiment id under the root; one run
//! directory per run id inside its owning experiment; each run holds a
//! `meta.yaml` document plus file-per-key `params/` and `tags/` directories,
//! append-only `metrics/` logs and an `artifacts/` directory delegated to the
//! artifact repository.
//!
//! The store keeps no state across calls other than the root path, so it is
//! cheap to clone and safe to read concurrently. Writes are whole-file
//! replaces, but multi-file operations (`log_batch`) are not atomic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{
    CreateRun, Experiment, LifecycleStage, Metric, Param, Run, RunData, RunInfo, RunStatus,
    RunTag, ViewType, PARENT_RUN_ID_TAG,
};
use crate::search::{self, Filter};
use crate::storage;

/// Id reserved for the default experiment, created at store initialization.
pub const DEFAULT_EXPERIMENT_ID: &str = "0";
pub const DEFAULT_EXPERIMENT_NAME: &str = "Default";

pub const METRICS_FOLDER_NAME: &str = "metrics";
pub const PARAMS_FOLDER_NAME: &str = "params";
pub const TAGS_FOLDER_NAME: &str = "tags";
pub const ARTIFACTS_FOLDER_NAME: &str = "artifacts";

/// Hard ceiling on `max_results` for a single search.
pub const SEARCH_MAX_RESULTS_THRESHOLD: usize = 50_000;
/// Default page size for searches.
pub const SEARCH_MAX_RESULTS_DEFAULT: usize = 1_000;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the root directory if needed.
    ///
    /// If the default experiment has no directory it is created once; a
    /// default experiment that exists but was deleted stays deleted.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        storage::ensure_dir(&store.root)?;
        if !store.exp_dir(DEFAULT_EXPERIMENT_ID).exists() {
            store.create_experiment_with_id(
                DEFAULT_EXPERIMENT_ID.to_string(),
                DEFAULT_EXPERIMENT_NAME,
            )?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_root(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(StoreError::ResourceDoesNotExist(format!(
                "Store root '{}' does not exist",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn exp_dir(&self, experiment_id: &str) -> PathBuf {
        self.root.join(experiment_id)
    }

    // ─── Experiments ─────────────────────────────────────────────────────────

    /// Next experiment id: max of the existing numeric ids plus one. Ids are
    /// never reused because deleted experiments keep their directories.
    fn next_experiment_id(&self) -> Result<String> {
        let max = storage::list_subdirs(&self.root)?
            .iter()
            .filter_map(|id| id.parse::<u64>().ok())
            .max();
        Ok(match max {
            Some(n) => (n + 1).to_string(),
            None => DEFAULT_EXPERIMENT_ID.to_string(),
        })
    }

    fn create_experiment_with_id(&self, experiment_id: String, name: &str) -> Result<String> {
        let exp_dir = self.exp_dir(&experiment_id);
        storage::ensure_dir(&exp_dir)?;
        let experiment = Experiment {
            experiment_id: experiment_id.clone(),
            name: name.to_string(),
            artifact_location: exp_dir.to_string_lossy().into_owned(),
            lifecycle_stage: LifecycleStage::Active,
        };
        storage::save_meta(&exp_dir, &experiment)?;
        Ok(experiment_id)
    }

    /// Create a named experiment and return its id.
    ///
    /// Name uniqueness is global: a deleted experiment still owns its name.
    pub fn create_experiment(&self, name: &str) -> Result<String> {
        self.check_root()?;
        if name.trim().is_empty() {
            return Err(StoreError::InvalidParameterValue(
                "Invalid experiment name: cannot be empty".to_string(),
            ));
        }
        if let Some(existing) = self.get_experiment_by_name(name)? {
            return Err(StoreError::AlreadyExists(format!(
                "Experiment '{name}' already exists in lifecycle stage '{}'",
                existing.lifecycle_stage
            )));
        }
        let experiment_id = self.next_experiment_id()?;
        self.create_experiment_with_id(experiment_id, name)
    }

    pub fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.check_root()?;
        let exp_dir = self.exp_dir(experiment_id);
        if !exp_dir.is_dir() {
            return Err(StoreError::ResourceDoesNotExist(format!(
                "Could not find experiment with ID '{experiment_id}'"
            )));
        }
        let experiment: Experiment = storage::load_meta(&exp_dir)?;
        // A renamed directory no longer agrees with its recorded id.
        if experiment.experiment_id != experiment_id {
            return Err(StoreError::ResourceDoesNotExist(format!(
                "Experiment '{experiment_id}' metadata is in invalid state: recorded id is '{}'",
                experiment.experiment_id
            )));
        }
        Ok(experiment)
    }

    /// Linear scan over all experiments, any lifecycle stage. `None` when no
    /// experiment has that name.
    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        Ok(self
            .list_experiments(ViewType::All)?
            .into_iter()
            .find(|experiment| experiment.name == name))
    }

    /// List experiments matching `view_type`. Corrupt entries are skipped
    /// with a warning instead of failing the whole listing.
    pub fn list_experiments(&self, view_type: ViewType) -> Result<Vec<Experiment>> {
        self.check_root()?;
        let mut experiments = vec![];
        for experiment_id in storage::list_subdirs(&self.root)? {
            match self.get_experiment(&experiment_id) {
                Ok(experiment) if view_type.matches(experiment.lifecycle_stage) => {
                    experiments.push(experiment);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(experiment_id = %experiment_id, error = %err,
                          "skipping malformed experiment");
                }
            }
        }
        Ok(experiments)
    }

    pub fn rename_experiment(&self, experiment_id: &str, new_name: &str) -> Result<()> {
        let mut experiment = self.get_experiment(experiment_id)?;
        if !experiment.lifecycle_stage.is_active() {
            return Err(StoreError::InvalidParameterValue(format!(
                "Cannot rename experiment '{experiment_id}' in non-active lifecycle stage"
            )));
        }
        experiment.name = new_name.to_string();
        storage::save_meta(&self.exp_dir(experiment_id), &experiment)
    }

    pub fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        self.set_experiment_lifecycle(experiment_id, LifecycleStage::Deleted)
    }

    pub fn restore_experiment(&self, experiment_id: &str) -> Result<()> {
        self.set_experiment_lifecycle(experiment_id, LifecycleStage::Active)
    }

    /// Toggle the soft-delete marker in place; the directory never moves.
    fn set_experiment_lifecycle(&self, experiment_id: &str, stage: LifecycleStage) -> Result<()> {
        let mut experiment = self.get_experiment(experiment_id)?;
        experiment.lifecycle_stage = stage;
        storage::save_meta(&self.exp_dir(experiment_id), &experiment)
    }

    // ─── Runs ────────────────────────────────────────────────────────────────

    /// Locate a run's directory by scanning every experiment directory. Run
    /// ids are globally unique, so the first hit is the only one.
    fn find_run_dir(&self, run_id: &str) -> Result<Option<PathBuf>> {
        for experiment_id in storage::list_subdirs(&self.root)? {
            let candidate = self.exp_dir(&experiment_id).join(run_id);
            if candidate.is_dir() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Load a run's metadata, verifying the directory it was found under.
    fn load_run_info(&self, run_id: &str) -> Result<(PathBuf, RunInfo)> {
        self.check_root()?;
        let run_dir = self.find_run_dir(run_id)?.ok_or_else(|| {
            StoreError::ResourceDoesNotExist(format!("Run '{run_id}' not found"))
        })?;
        let info: RunInfo = storage::load_meta(&run_dir)?;
        let parent_experiment = run_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // A dangling experiment reference is corruption, not a silent skip.
        if info.run_id != run_id || info.experiment_id != parent_experiment {
            return Err(StoreError::ResourceDoesNotExist(format!(
                "Run '{run_id}' metadata is in invalid state"
            )));
        }
        Ok((run_dir, info))
    }

    fn check_run_is_active(&self, info: &RunInfo) -> Result<()> {
        if !info.lifecycle_stage.is_active() {
            return Err(StoreError::InvalidParameterValue(format!(
                "The run {} must be in the 'active' state. Current state is '{}'.",
                info.run_id, info.lifecycle_stage
            )));
        }
        Ok(())
    }

    /// Create a run under an active experiment.
    pub fn create_run(&self, experiment_id: &str, request: CreateRun) -> Result<Run> {
        let experiment = self.get_experiment(experiment_id)?;
        if !experiment.lifecycle_stage.is_active() {
            return Err(StoreError::InvalidParameterValue(format!(
                "Could not create run under experiment '{experiment_id}' in non-active \
                 lifecycle stage"
            )));
        }
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.exp_dir(experiment_id).join(&run_id);
        storage::ensure_dir(&run_dir)?;
        for folder in [
            METRICS_FOLDER_NAME,
            PARAMS_FOLDER_NAME,
            TAGS_FOLDER_NAME,
            ARTIFACTS_FOLDER_NAME,
        ] {
            storage::ensure_dir(&run_dir.join(folder))?;
        }
        let info = RunInfo {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            name: request.name,
            user_id: request.user_id,
            source_type: request.source_type,
            source_name: request.source_name,
            entry_point_name: request.entry_point_name,
            source_version: request.source_version,
            status: RunStatus::Running,
            start_time: request.start_time,
            end_time: None,
            artifact_uri: format!(
                "{}/{run_id}/{ARTIFACTS_FOLDER_NAME}",
                experiment.artifact_location
            ),
            lifecycle_stage: LifecycleStage::Active,
        };
        storage::save_meta(&run_dir, &info)?;
        for tag in request.tags {
            self.set_tag(&run_id, tag)?;
        }
        if let Some(parent_run_id) = request.parent_run_id {
            self.set_tag(&run_id, RunTag::new(PARENT_RUN_ID_TAG, parent_run_id))?;
        }
        self.get_run(&run_id)
    }

    /// Assemble a run from its metadata document plus the full param and tag
    /// mappings and the per-metric current values. Works on deleted runs too.
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        let (run_dir, info) = self.load_run_info(run_id)?;
        let data = RunData {
            metrics: self.current_metrics(&run_dir)?,
            params: storage::read_kv_dir(&run_dir.join(PARAMS_FOLDER_NAME))?,
            tags: storage::read_kv_dir(&run_dir.join(TAGS_FOLDER_NAME))?,
        };
        Ok(Run { info, data })
    }

    fn current_metrics(&self, run_dir: &Path) -> Result<BTreeMap<String, Metric>> {
        let metrics_dir = run_dir.join(METRICS_FOLDER_NAME);
        let mut metrics = BTreeMap::new();
        for key in storage::list_keys(&metrics_dir)? {
            let history = storage::read_metric_history(&metrics_dir, &key)?;
            if let Some(current) = storage::max_metric(history) {
                metrics.insert(key, current);
            }
        }
        Ok(metrics)
    }

    /// Log a run parameter. Re-logging a key overwrites, so re-logging the
    /// identical value is a no-op; callers wanting strict write-once must
    /// check first.
    pub fn log_param(&self, run_id: &str, param: Param) -> Result<()> {
        storage::validate_key("param", &param.key)?;
        let (run_dir, info) = self.load_run_info(run_id)?;
        self.check_run_is_active(&info)?;
        storage::write_kv(&run_dir.join(PARAMS_FOLDER_NAME), &param.key, &param.value)
    }

    /// Set a run tag. Always overwrites; values may be multiline.
    pub fn set_tag(&self, run_id: &str, tag: RunTag) -> Result<()> {
        storage::validate_key("tag", &tag.key)?;
        let (run_dir, info) = self.load_run_info(run_id)?;
        self.check_run_is_active(&info)?;
        storage::write_kv(&run_dir.join(TAGS_FOLDER_NAME), &tag.key, &tag.value)
    }

    /// Append a metric sample. Duplicate samples are accepted.
    pub fn log_metric(&self, run_id: &str, metric: Metric) -> Result<()> {
        storage::validate_key("metric", &metric.key)?;
        if !metric.value.is_finite() {
            return Err(StoreError::InvalidParameterValue(format!(
                "Invalid value {} for metric '{}'",
                metric.value, metric.key
            )));
        }
        let (run_dir, info) = self.load_run_info(run_id)?;
        self.check_run_is_active(&info)?;
        storage::append_metric_line(&run_dir.join(METRICS_FOLDER_NAME), &metric)
    }

    /// Full sample history for one metric key, including duplicates.
    pub fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        storage::validate_key("metric", key)?;
        let (run_dir, _) = self.load_run_info(run_id)?;
        storage::read_metric_history(&run_dir.join(METRICS_FOLDER_NAME), key)
    }

    /// Apply metrics, params and tags as one best-effort unit.
    ///
    /// Individual item failures are re-raised as a single
    /// [`StoreError::Internal`] carrying the original message; items applied
    /// before the failure are not rolled back. Duplicate keys within the same
    /// request resolve last-one-wins.
    pub fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        let (_, info) = self.load_run_info(run_id)?;
        self.check_run_is_active(&info)?;
        let outcome = (|| -> Result<()> {
            for metric in metrics {
                self.log_metric(run_id, metric.clone())?;
            }
            for param in params {
                self.log_param(run_id, param.clone())?;
            }
            for tag in tags {
                self.set_tag(run_id, tag.clone())?;
            }
            Ok(())
        })();
        outcome.map_err(|err| match err {
            err @ StoreError::ResourceDoesNotExist(_) => err,
            other => StoreError::Internal(other.to_string()),
        })
    }

    /// Record a run's terminal status and end time.
    pub fn update_run_info(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<RunInfo> {
        let (run_dir, mut info) = self.load_run_info(run_id)?;
        self.check_run_is_active(&info)?;
        info.status = status;
        info.end_time = end_time;
        storage::save_meta(&run_dir, &info)?;
        Ok(info)
    }

    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        self.set_run_lifecycle(run_id, LifecycleStage::Deleted)
    }

    pub fn restore_run(&self, run_id: &str) -> Result<()> {
        self.set_run_lifecycle(run_id, LifecycleStage::Active)
    }

    fn set_run_lifecycle(&self, run_id: &str, stage: LifecycleStage) -> Result<()> {
        let (run_dir, mut info) = self.load_run_info(run_id)?;
        info.lifecycle_stage = stage;
        storage::save_meta(&run_dir, &info)
    }

    /// List run metadata under one experiment, filtered by `view_type`.
    /// Corrupt or mismatched run directories are skipped with a warning.
    pub fn list_run_infos(
        &self,
        experiment_id: &str,
        view_type: ViewType,
    ) -> Result<Vec<RunInfo>> {
        let experiment = self.get_experiment(experiment_id)?;
        let mut infos = vec![];
        for run_id in storage::list_subdirs(&self.exp_dir(&experiment.experiment_id))? {
            match self.load_run_info(&run_id) {
                Ok((_, info)) if view_type.matches(info.lifecycle_stage) => infos.push(info),
                Ok(_) => {}
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "skipping malformed run");
                }
            }
        }
        Ok(infos)
    }

    // ─── Search ──────────────────────────────────────────────────────────────

    /// Materialize, filter, order and paginate runs across experiments.
    ///
    /// Ordering is fully deterministic so that identical requests return
    /// identical pages: default-experiment runs last, then start time
    /// descending, then run id ascending.
    pub fn search_runs(
        &self,
        experiment_ids: &[&str],
        filter: Option<&Filter>,
        view_type: ViewType,
        max_results: usize,
    ) -> Result<Vec<Run>> {
        if max_results > SEARCH_MAX_RESULTS_THRESHOLD {
            return Err(StoreError::InvalidParameterValue(format!(
                "Invalid value for request parameter max_results. It must be at most \
                 {SEARCH_MAX_RESULTS_THRESHOLD}, but got value {max_results}"
            )));
        }
        let mut runs = vec![];
        for experiment_id in experiment_ids {
            for info in self.list_run_infos(experiment_id, view_type)? {
                match self.get_run(&info.run_id) {
                    Ok(run) => {
                        if filter.map_or(true, |f| f.matches(&run)) {
                            runs.push(run);
                        }
                    }
                    Err(err) => {
                        warn!(run_id = %info.run_id, error = %err,
                              "skipping unreadable run during search");
                    }
                }
            }
        }
        runs.sort_by(search::run_ordering);
        runs.truncate(max_results);
        Ok(runs)
    }
}
