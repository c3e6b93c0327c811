use std::fs;
use std::io;
use std::path::PathBuf;

use regex::bytes::{NoExpand, Regex};

use super::{FileSnapshot, Step, StepState};
use crate::engine::MigrationContext;
use crate::errors::StepError;
use crate::fsops;
use crate::sink_log;

/// Replace literal patterns inside one file.
///
/// Matching and replacement work on raw bytes, so content that is not valid
/// UTF-8 passes through untouched. The original bytes are kept in the run
/// context and written back verbatim on rollback. A missing file means
/// there is nothing to do.
#[derive(Debug, Clone)]
pub struct RewriteContentStep {
    id: String,
    description: String,
    file: PathBuf,
    replacements: Vec<(String, String)>,
}

impl RewriteContentStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        file: impl Into<PathBuf>,
        replacements: &[(&str, &str)],
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            file: file.into(),
            replacements: replacements
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }

    fn read(&self, ctx: &MigrationContext) -> Result<Option<Vec<u8>>, StepError> {
        let path = ctx.path(&self.file);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StepError::io("reading", path, err)),
        }
    }

    fn has_old_pattern(&self, content: &[u8]) -> bool {
        self.replacements.iter().any(|(from, _)| {
            let from = from.as_bytes();
            !from.is_empty() && content.windows(from.len()).any(|window| window == from)
        })
    }

    /// Apply every replacement in order, matching the patterns literally.
    fn rewrite(&self, original: &[u8]) -> Result<Vec<u8>, StepError> {
        let mut content = original.to_vec();
        for (from, to) in &self.replacements {
            let pattern = Regex::new(&regex::escape(from))
                .map_err(|err| StepError::failed(format!("pattern {from:?}: {err}")))?;
            content = pattern
                .replace_all(&content, NoExpand(to.as_bytes()))
                .into_owned();
        }
        Ok(content)
    }
}

impl Step for RewriteContentStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(self
            .read(ctx)?
            .is_some_and(|content| self.has_old_pattern(&content)))
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let path = ctx.path(&self.file);
        let snapshot =
            FileSnapshot::capture(&path).map_err(|err| StepError::io("reading", &path, err))?;
        let Some(original) = snapshot.original.as_deref() else {
            return Ok(());
        };
        let content = self.rewrite(original)?;

        ctx.set_step_state(&self.id, StepState::FileSnapshot(snapshot.clone()));
        fsops::write_atomic(&path, &content)
            .map_err(|err| StepError::io("writing", &path, err))?;
        sink_log!(ctx, "  Updated {}", self.file.display());
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(StepState::FileSnapshot(snapshot)) = ctx.take_step_state(&self.id) else {
            return Ok(());
        };
        snapshot
            .restore()
            .map_err(|err| StepError::io("restoring", &snapshot.path, err))
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.read(ctx)? {
            Some(content) if self.has_old_pattern(&content) => Err(StepError::verification(
                format!("{} still contains old identifiers", self.file.display()),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use indoc::indoc;
    use tempfile::TempDir;

    const ROUTES: &str = indoc! {r#"
        {"prefix":"gt-","route":"gt-mayor"}
        {"prefix":"gt-","route":"gt-deacon"}
        {"prefix":"gt-","route":"gt-mayor-2"}
    "#};

    fn step() -> RewriteContentStep {
        RewriteContentStep::new(
            "migrate-agent-beads",
            "Migrate agent beads to hq-* prefix",
            ".beads/routes.jsonl",
            &[(r#""gt-mayor""#, r#""hq-mayor""#), (r#""gt-deacon""#, r#""hq-deacon""#)],
        )
    }

    fn ctx(root: &std::path::Path) -> MigrationContext {
        MigrationContext::new(root, Version::new(0, 1, 0), Version::new(0, 2, 0), false)
    }

    #[test]
    fn rewrites_only_exact_identifiers() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        fs::write(tmp.path().join(".beads/routes.jsonl"), ROUTES).unwrap();
        let mut ctx = ctx(tmp.path());
        let step = step();

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();

        let updated = fs::read_to_string(tmp.path().join(".beads/routes.jsonl")).unwrap();
        assert!(updated.contains(r#""hq-mayor""#));
        assert!(updated.contains(r#""hq-deacon""#));
        assert!(updated.contains(r#""gt-mayor-2""#));
        assert!(!step.check(&ctx).unwrap());
    }

    #[test]
    fn rollback_restores_original_bytes() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        let routes = tmp.path().join(".beads/routes.jsonl");
        fs::write(&routes, ROUTES).unwrap();
        let mut ctx = ctx(tmp.path());
        let step = step();

        step.execute(&mut ctx).unwrap();
        step.rollback(&mut ctx).unwrap();

        assert_eq!(fs::read_to_string(&routes).unwrap(), ROUTES);
    }

    #[test]
    fn invalid_utf8_bytes_survive_rewrite() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        let routes = tmp.path().join(".beads/routes.jsonl");
        let mut original = ROUTES.as_bytes().to_vec();
        original.extend_from_slice(b"{\"note\":\"\xff\xfe\"}\n");
        fs::write(&routes, &original).unwrap();
        let mut ctx = ctx(tmp.path());
        let step = step();

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();

        let updated = fs::read(&routes).unwrap();
        assert!(updated.ends_with(b"{\"note\":\"\xff\xfe\"}\n"));
        assert!(!updated.windows(3).any(|w| w == "\u{fffd}".as_bytes()));
        let rewritten_routes = ROUTES
            .replace(r#""gt-mayor""#, r#""hq-mayor""#)
            .replace(r#""gt-deacon""#, r#""hq-deacon""#);
        assert!(updated.starts_with(rewritten_routes.as_bytes()));
        assert_eq!(updated.len(), rewritten_routes.len() + 14);

        step.rollback(&mut ctx).unwrap();
        assert_eq!(fs::read(&routes).unwrap(), original);
    }

    #[test]
    fn replacement_text_is_literal() {
        let step = RewriteContentStep::new("r", "r", "f", &[("a.b", "$0-x")]);
        assert_eq!(step.rewrite(b"a.b axb").unwrap(), b"$0-x axb");
    }

    #[test]
    fn missing_file_needs_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = ctx(tmp.path());
        let step = step();

        assert!(!step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert!(ctx.step_state("migrate-agent-beads").is_none());
    }
}
