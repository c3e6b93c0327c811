//! Steps that create or remove directories.

use std::fs;
use std::io;
use std::path::PathBuf;

use super::{display_name, path_exists, FileSnapshot, Step, StepState};
use crate::engine::MigrationContext;
use crate::errors::StepError;
use crate::fsops;
use crate::layout::{GITIGNORE, RUNTIME_DIR};
use crate::sink_log;

/// Remove each directory that is still empty. Used by rollbacks so content
/// written after the directory was created is never deleted.
fn remove_created_dirs(ctx: &MigrationContext, dirs: &[PathBuf]) -> Result<(), StepError> {
    let mut last_err = None;
    for dir in dirs.iter().rev() {
        match fsops::remove_dir_if_empty(dir) {
            Ok(true) => sink_log!(ctx, "  Removed {}/", display_name(dir)),
            Ok(false) => {}
            Err(err) => last_err = Some(StepError::io("removing", dir, err)),
        }
    }
    last_err.map_or(Ok(()), Err)
}

fn create_dir(dir: &std::path::Path) -> Result<(), StepError> {
    fs::create_dir_all(dir).map_err(|err| StepError::io("creating", dir, err))
}

/// Create one directory under the town root.
#[derive(Debug, Clone)]
pub struct CreateDirStep {
    id: String,
    description: String,
    dir: PathBuf,
}

impl CreateDirStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dir: dir.into(),
        }
    }
}

impl Step for CreateDirStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(!path_exists(&ctx.path(&self.dir))?)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let dir = ctx.path(&self.dir);
        create_dir(&dir)?;
        ctx.set_step_state(&self.id, StepState::CreatedDirs(vec![dir]));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(StepState::CreatedDirs(dirs)) = ctx.take_step_state(&self.id) else {
            return Ok(());
        };
        remove_created_dirs(ctx, &dirs)
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        let dir = ctx.path(&self.dir);
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StepError::verification(format!(
                "{}/ is not a directory",
                self.dir.display()
            ))),
            Err(err) => Err(StepError::verification(format!(
                "{}/ not found: {err}",
                self.dir.display()
            ))),
        }
    }
}

/// Create the same subdirectory inside every discovered rig.
#[derive(Debug, Clone)]
pub struct RigSubdirStep {
    id: String,
    description: String,
    subdir: String,
}

impl RigSubdirStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        subdir: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            subdir: subdir.into(),
        }
    }
}

impl Step for RigSubdirStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for rig in ctx.rigs() {
            if !path_exists(&rig.join(&self.subdir))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut created = Vec::new();
        for rig in ctx.rigs() {
            let dir = rig.join(&self.subdir);
            if dir.exists() {
                continue;
            }
            if let Err(err) = create_dir(&dir) {
                // Not rolled back by the engine, so undo our own partial work.
                return Err(err.with_undo(remove_created_dirs(ctx, &created)));
            }
            sink_log!(ctx, "  Created {}/{}/", display_name(&rig), self.subdir);
            created.push(dir);
        }

        ctx.set_step_state(&self.id, StepState::CreatedDirs(created));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(StepState::CreatedDirs(dirs)) = ctx.take_step_state(&self.id) else {
            return Ok(());
        };
        remove_created_dirs(ctx, &dirs)
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        for rig in ctx.rigs() {
            if !rig.join(&self.subdir).is_dir() {
                return Err(StepError::verification(format!(
                    "{}/{}/ not found",
                    display_name(&rig),
                    self.subdir
                )));
            }
        }
        Ok(())
    }
}

const GITIGNORE_PATTERN: &str = ".runtime/";
const GITIGNORE_ENTRY: &str = "# town runtime state (not tracked)\n.runtime/\n";

/// Create `.runtime/` at the root and in every rig, and keep it out of git.
#[derive(Debug, Clone)]
pub struct RuntimeDirsStep {
    id: String,
    description: String,
}

impl RuntimeDirsStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    fn targets(ctx: &MigrationContext) -> Vec<PathBuf> {
        std::iter::once(ctx.path(RUNTIME_DIR))
            .chain(ctx.rigs().into_iter().map(|rig| rig.join(RUNTIME_DIR)))
            .collect()
    }

    fn lists_runtime_dir(contents: &[u8]) -> bool {
        String::from_utf8_lossy(contents)
            .lines()
            .any(|line| line.trim().trim_matches('/') == RUNTIME_DIR)
    }

    fn gitignore_has_entry(ctx: &MigrationContext) -> Result<bool, StepError> {
        let path = ctx.path(GITIGNORE);
        match fs::read(&path) {
            Ok(contents) => Ok(Self::lists_runtime_dir(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StepError::io("reading", &path, err)),
        }
    }

    /// Append the runtime entry to `.gitignore` unless already present.
    /// Returns the snapshot taken before writing, or `None` if untouched.
    fn ensure_gitignore(ctx: &MigrationContext) -> io::Result<Option<FileSnapshot>> {
        let path = ctx.path(GITIGNORE);
        let snapshot = FileSnapshot::capture(&path)?;
        let mut updated = snapshot.original.clone().unwrap_or_default();
        if Self::lists_runtime_dir(&updated) {
            return Ok(None);
        }

        if updated.last().is_some_and(|&b| b != b'\n') {
            updated.push(b'\n');
        }
        updated.extend_from_slice(GITIGNORE_ENTRY.as_bytes());
        fsops::write_atomic(&path, &updated)?;
        Ok(Some(snapshot))
    }
}

impl Step for RuntimeDirsStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for dir in Self::targets(ctx) {
            if !path_exists(&dir)? {
                return Ok(true);
            }
        }
        Ok(!Self::gitignore_has_entry(ctx)?)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut created = Vec::new();
        for dir in Self::targets(ctx) {
            if dir.exists() {
                continue;
            }
            if let Err(err) = create_dir(&dir) {
                return Err(err.with_undo(remove_created_dirs(ctx, &created)));
            }
            let owner = dir.parent().map(display_name).unwrap_or_default();
            sink_log!(ctx, "  Created {owner}/{RUNTIME_DIR}/");
            created.push(dir);
        }

        let gitignore = match Self::ensure_gitignore(ctx) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let err = StepError::io("updating", ctx.path(GITIGNORE), err);
                return Err(err.with_undo(remove_created_dirs(ctx, &created)));
            }
        };

        ctx.set_step_state(&self.id, StepState::RuntimeDirs { created, gitignore });
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(StepState::RuntimeDirs { created, gitignore }) = ctx.take_step_state(&self.id)
        else {
            return Ok(());
        };

        let restored = match &gitignore {
            Some(snapshot) => snapshot
                .restore()
                .map_err(|err| StepError::io("restoring", &snapshot.path, err)),
            None => Ok(()),
        };
        remove_created_dirs(ctx, &created)?;
        restored
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        if !ctx.path(RUNTIME_DIR).is_dir() {
            return Err(StepError::verification(format!("town {RUNTIME_DIR}/ not found")));
        }
        if !Self::gitignore_has_entry(ctx)? {
            return Err(StepError::verification(format!(
                "{GITIGNORE} does not list {GITIGNORE_PATTERN}"
            )));
        }
        Ok(())
    }
}

/// Remove a leftover directory at the root and in every rig, but only
/// when it is empty. Non-empty leftovers are reported and kept.
#[derive(Debug, Clone)]
pub struct CleanupEmptyDirStep {
    id: String,
    description: String,
    dir_name: String,
}

impl CleanupEmptyDirStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        dir_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dir_name: dir_name.into(),
        }
    }

    fn candidates(&self, ctx: &MigrationContext) -> Vec<PathBuf> {
        std::iter::once(ctx.path(&self.dir_name))
            .chain(ctx.rigs().into_iter().map(|rig| rig.join(&self.dir_name)))
            .collect()
    }
}

impl Step for CleanupEmptyDirStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    /// Needed only while some candidate is an empty directory, the one case
    /// `execute` acts on. Non-empty leftovers never make the step pending.
    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for dir in self.candidates(ctx) {
            if !dir.is_dir() {
                continue;
            }
            if fsops::is_empty_dir(&dir).map_err(|err| StepError::io("reading", &dir, err))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut removed = Vec::new();
        for dir in self.candidates(ctx) {
            if !dir.is_dir() {
                continue;
            }
            let shown = dir.strip_prefix(&ctx.town_root).unwrap_or(&dir).display().to_string();
            match fsops::remove_dir_if_empty(&dir) {
                Ok(true) => {
                    sink_log!(ctx, "  Removed empty {shown}/");
                    removed.push(dir);
                }
                Ok(false) => sink_log!(ctx, "  Warning: {shown}/ not empty, skipping removal"),
                Err(err) => sink_log!(ctx, "  Warning: could not remove {shown}/: {err}"),
            }
        }
        ctx.set_step_state(&self.id, StepState::RemovedDirs(removed));
        Ok(())
    }
}
