use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::layout;
use crate::logging::{LogSink, NullSink};
use crate::steps::StepState;
use crate::version::Version;

/// Everything a step can see during one engine run.
///
/// Created at the start of a run or preview and dropped at its end; the
/// per-step state never outlives the run.
pub struct MigrationContext {
    pub town_root: PathBuf,
    pub from_version: Version,
    pub to_version: Version,
    pub dry_run: bool,
    pub backup_dir: Option<PathBuf>,
    logger: Arc<dyn LogSink>,
    step_state: HashMap<String, StepState>,
}

impl MigrationContext {
    pub fn new(
        town_root: impl Into<PathBuf>,
        from_version: Version,
        to_version: Version,
        dry_run: bool,
    ) -> Self {
        Self {
            town_root: town_root.into(),
            from_version,
            to_version,
            dry_run,
            backup_dir: None,
            logger: Arc::new(NullSink),
            step_state: HashMap::new(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    pub fn log(&self, args: fmt::Arguments<'_>) {
        self.logger.log(args);
    }

    /// `rel` resolved against the town root.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.town_root.join(rel)
    }

    /// Rigs as they are on disk right now.
    pub fn rigs(&self) -> Vec<PathBuf> {
        layout::detect_rigs(&self.town_root)
    }

    pub fn set_step_state(&mut self, step_id: &str, state: StepState) {
        self.step_state.insert(step_id.to_string(), state);
    }

    pub fn step_state(&self, step_id: &str) -> Option<&StepState> {
        self.step_state.get(step_id)
    }

    pub fn take_step_state(&mut self, step_id: &str) -> Option<StepState> {
        self.step_state.remove(step_id)
    }
}

impl fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("town_root", &self.town_root)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("dry_run", &self.dry_run)
            .field("backup_dir", &self.backup_dir)
            .field("step_state", &self.step_state)
            .finish_non_exhaustive()
    }
}
