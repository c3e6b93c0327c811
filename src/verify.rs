//! Read-only sanity checks on a migrated workspace.
//!
//! The quick set runs automatically after every successful migration. The
//! full set is for operators and adds the secondary config, rig structure
//! and an optional probe of the external beads tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::config::DEFAULT_HEALTH_PROBE;
use crate::layout::{self, MAYOR_DIR, RIGS_CONFIG, SETTINGS_DIR, TOWN_CONFIG};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl VerificationCheck {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub checks: Vec<VerificationCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl VerificationResult {
    fn from_checks(checks: Vec<VerificationCheck>) -> Self {
        let errors: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.message.clone())
            .collect();
        let warnings = checks
            .iter()
            .filter(|c| c.passed && c.message.ends_with("(skipped)"))
            .map(|c| c.message.clone())
            .collect();
        Self {
            success: errors.is_empty(),
            checks,
            errors,
            warnings,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    town_root: PathBuf,
    health_probe: Option<String>,
}

impl Verifier {
    pub fn new(town_root: impl Into<PathBuf>) -> Self {
        Self {
            town_root: town_root.into(),
            health_probe: Some(DEFAULT_HEALTH_PROBE.to_string()),
        }
    }

    /// Tool used by the `beads-accessible` check. `None` skips the check.
    pub fn with_health_probe(mut self, probe: Option<String>) -> Self {
        self.health_probe = probe;
        self
    }

    pub fn verify_quick(&self) -> VerificationResult {
        VerificationResult::from_checks(vec![
            self.check_town_config(),
            self.check_mayor_directory(),
        ])
    }

    pub fn verify(&self) -> VerificationResult {
        VerificationResult::from_checks(vec![
            self.check_town_config(),
            self.check_rigs_config(),
            self.check_mayor_directory(),
            self.check_beads_accessible(),
            self.check_rig_structure(),
        ])
    }

    fn check_town_config(&self) -> VerificationCheck {
        const NAME: &str = "town-config";
        let path = self.town_root.join(MAYOR_DIR).join(TOWN_CONFIG);
        let config = match read_json(&path) {
            Ok(config) => config,
            Err(message) => return VerificationCheck::fail(NAME, message),
        };
        if config.get("name").is_none() {
            return VerificationCheck::fail(NAME, format!("{TOWN_CONFIG} missing 'name' field"));
        }
        VerificationCheck::pass(NAME, format!("{TOWN_CONFIG} is valid"))
    }

    fn check_rigs_config(&self) -> VerificationCheck {
        const NAME: &str = "rigs-config";
        let path = self.town_root.join(MAYOR_DIR).join(RIGS_CONFIG);
        if !path.exists() {
            return VerificationCheck::pass(NAME, format!("{RIGS_CONFIG} not found (optional)"));
        }
        match read_json(&path) {
            Ok(_) => VerificationCheck::pass(NAME, format!("{RIGS_CONFIG} is valid")),
            Err(message) => VerificationCheck::fail(NAME, message),
        }
    }

    fn check_mayor_directory(&self) -> VerificationCheck {
        const NAME: &str = "mayor-directory";
        match fs::metadata(self.town_root.join(MAYOR_DIR)) {
            Ok(meta) if meta.is_dir() => {
                VerificationCheck::pass(NAME, format!("{MAYOR_DIR}/ directory exists"))
            }
            Ok(_) => VerificationCheck::fail(NAME, format!("{MAYOR_DIR}/ is not a directory")),
            Err(_) => VerificationCheck::fail(NAME, format!("{MAYOR_DIR}/ directory not found")),
        }
    }

    fn check_beads_accessible(&self) -> VerificationCheck {
        const NAME: &str = "beads-accessible";
        let Some(probe) = self.health_probe.as_deref() else {
            return VerificationCheck::pass(NAME, "health probe disabled (skipped)");
        };
        let Ok(program) = which::which(probe) else {
            return VerificationCheck::pass(NAME, format!("{probe} not installed (skipped)"));
        };

        let output = match Command::new(&program)
            .args(["list", "--limit", "1"])
            .current_dir(&self.town_root)
            .output()
        {
            Ok(output) => output,
            Err(err) => return VerificationCheck::fail(NAME, format!("running {probe}: {err}")),
        };
        if output.status.success() {
            return VerificationCheck::pass(NAME, "beads database accessible");
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if combined.to_lowercase().contains("no beads") {
            VerificationCheck::pass(NAME, "beads accessible (empty)")
        } else {
            VerificationCheck::fail(NAME, format!("beads database error: {}", combined.trim()))
        }
    }

    fn check_rig_structure(&self) -> VerificationCheck {
        const NAME: &str = "rig-structure";
        let rigs = layout::detect_rigs(&self.town_root);
        if rigs.is_empty() {
            return VerificationCheck::pass(NAME, "no rigs found (ok)");
        }

        let issues: Vec<String> = rigs
            .iter()
            .filter(|rig| !rig.join(SETTINGS_DIR).is_dir())
            .map(|rig| format!("{}: missing {SETTINGS_DIR}/", file_label(rig)))
            .collect();
        if issues.is_empty() {
            VerificationCheck::pass(NAME, format!("{} rig(s) verified", rigs.len()))
        } else {
            VerificationCheck::fail(NAME, issues.join("; "))
        }
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let name = file_label(path);
    let data = fs::read(path).map_err(|err| format!("cannot read {name}: {err}"))?;
    let value: serde_json::Value =
        serde_json::from_slice(&data).map_err(|err| format!("invalid {name} JSON: {err}"))?;
    if !value.is_object() {
        return Err(format!("{name} is not a JSON object"));
    }
    Ok(value)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn migrated_town() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "mayor/town.json", r#"{"name":"t","gt_version":"0.2.0"}"#);
        write(tmp.path(), "mayor/rigs.json", "{}");
        fs::create_dir_all(tmp.path().join("gastown/crew")).unwrap();
        fs::create_dir_all(tmp.path().join("gastown/settings")).unwrap();
        tmp
    }

    fn no_probe(root: &Path) -> Verifier {
        Verifier::new(root).with_health_probe(None)
    }

    #[test]
    fn quick_passes_on_migrated_town() {
        let town = migrated_town();
        let result = no_probe(town.path()).verify_quick();
        assert!(result.success, "{:?}", result.errors);
        let names: Vec<_> = result.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["town-config", "mayor-directory"]);
    }

    #[test]
    fn full_runs_every_check() {
        let town = migrated_town();
        let result = no_probe(town.path()).verify();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.checks.len(), 5);
        assert_eq!(result.warnings, ["health probe disabled (skipped)"]);
    }

    #[test]
    fn missing_name_field_fails() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "mayor/town.json", r#"{"gt_version":"0.2.0"}"#);
        let result = no_probe(tmp.path()).verify_quick();
        assert!(!result.success);
        assert_eq!(result.errors, ["town.json missing 'name' field"]);
    }

    #[test]
    fn rig_without_settings_fails() {
        let town = migrated_town();
        fs::remove_dir(town.path().join("gastown/settings")).unwrap();
        let result = no_probe(town.path()).verify();
        let failed: Vec<_> = result.failed_checks().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, ["rig-structure"]);
        assert!(result.errors[0].contains("gastown: missing settings/"));
    }

    #[test]
    fn missing_probe_tool_is_skipped() {
        let town = migrated_town();
        let result = Verifier::new(town.path())
            .with_health_probe(Some("definitely-not-a-real-tool-4821".into()))
            .verify();
        let probe = result.checks.iter().find(|c| c.name == "beads-accessible").unwrap();
        assert!(probe.passed);
        assert!(probe.message.contains("not installed"));
    }

    #[test]
    fn legacy_town_fails_quick_checks() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "town.json", r#"{"name":"t"}"#);
        let result = no_probe(tmp.path()).verify_quick();
        assert_eq!(result.failed_checks().count(), 2);
    }
}
