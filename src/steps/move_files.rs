use std::fs;
use std::path::{Path, PathBuf};

use super::{path_exists, MovedFile, Step, StepState};
use crate::engine::MigrationContext;
use crate::errors::StepError;
use crate::fsops;
use crate::sink_log;

/// Move a fixed set of files from one directory to another.
///
/// Only files whose source exists and whose destination does not are
/// moved. The exact moves are recorded so rollback puts back precisely
/// those files and nothing else.
#[derive(Debug, Clone)]
pub struct MoveFilesStep {
    id: String,
    description: String,
    files: Vec<String>,
    from_dir: PathBuf,
    to_dir: PathBuf,
    key_file: String,
}

impl MoveFilesStep {
    /// `from_dir` and `to_dir` are relative to the town root; an empty
    /// path means the root itself. `key_file` must be readable in `to_dir`
    /// after the move.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        files: &[&str],
        from_dir: impl Into<PathBuf>,
        to_dir: impl Into<PathBuf>,
        key_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            files: files.iter().map(|f| f.to_string()).collect(),
            from_dir: from_dir.into(),
            to_dir: to_dir.into(),
            key_file: key_file.into(),
        }
    }

    fn pairs(&self, root: &Path) -> Vec<(String, PathBuf, PathBuf)> {
        self.files
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    root.join(&self.from_dir).join(name),
                    root.join(&self.to_dir).join(name),
                )
            })
            .collect()
    }

    /// Move every recorded pair back, newest first. Keeps going after a
    /// failure and returns the last error seen.
    fn move_back(moves: &[MovedFile]) -> Result<(), StepError> {
        let mut last_err = None;
        for moved in moves.iter().rev() {
            let result = fsops::move_path(&moved.dst, &moved.src)
                .or_else(|_| fsops::copy_verify_delete(&moved.dst, &moved.src));
            if let Err(err) = result {
                log::warn!(
                    "could not move {} back to {}: {}",
                    moved.dst.display(),
                    moved.src.display(),
                    err
                );
                last_err = Some(StepError::io("restoring", &moved.src, err));
            }
        }
        last_err.map_or(Ok(()), Err)
    }
}

impl Step for MoveFilesStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for (_, src, dst) in self.pairs(&ctx.town_root) {
            if path_exists(&src)? && !path_exists(&dst)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut moved = Vec::new();
        let to_shown = self.to_dir.display().to_string();

        for (name, src, dst) in self.pairs(&ctx.town_root) {
            if !src.exists() || dst.exists() {
                continue;
            }
            if let Err(err) = fsops::move_path(&src, &dst) {
                let err = StepError::io("moving", &src, err);
                if moved.is_empty() {
                    return Err(err);
                }
                sink_log!(
                    ctx,
                    "  Move of {name} failed, putting back {} file(s)",
                    moved.len()
                );
                return Err(err.with_undo(Self::move_back(&moved)));
            }
            sink_log!(ctx, "  Moved {name} to {to_shown}/{name}");
            moved.push(MovedFile { src, dst });
        }

        ctx.set_step_state(&self.id, StepState::MovedFiles(moved));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(StepState::MovedFiles(moved)) = ctx.take_step_state(&self.id) else {
            return Ok(());
        };
        for m in moved.iter().rev() {
            let shown = m.dst.strip_prefix(&ctx.town_root).unwrap_or(&m.dst);
            sink_log!(ctx, "  Moving {} back", shown.display());
        }
        Self::move_back(&moved)
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        let key = ctx.path(&self.to_dir).join(&self.key_file);
        fs::read(&key).map(|_| ()).map_err(|err| {
            StepError::verification(format!(
                "{}/{} not readable: {err}",
                self.to_dir.display(),
                self.key_file
            ))
        })
    }
}
