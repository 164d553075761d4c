//! pip requirements handler.
//!
//! Entities are grouped per directory. For each directory the first entity is
//! fixed through its provenance (the entry file plus everything it includes
//! with `-r` / `-c`). Later entities whose file was already covered are
//! reported as skipped.

pub mod parser;
pub mod provenance;
pub mod upgrades;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{EntityToFix, FailedEntity, FixChangeSummary, FixedEntity, PluginFixResponse};
use crate::traits::FixError;
use crate::workspace::normalize_path;
use provenance::extract_provenance;
use upgrades::update_dependencies;

/// Support predicate: `Err` carries the skip reason.
pub fn is_supported(entity: &EntityToFix) -> Result<(), &'static str> {
    let Some(remediation) = entity.remediation.as_ref() else {
        return Err("No remediation data available");
    };
    if entity.target_file().is_none() {
        return Err("No target file available");
    }
    if remediation.pin.is_empty() {
        return Err("There is no actionable remediation to apply");
    }
    Ok(())
}

/// Splits entities into fixable ones and skipped ones.
pub fn partition_by_fixable(
    entities: Vec<Arc<EntityToFix>>,
) -> (Vec<Arc<EntityToFix>>, PluginFixResponse) {
    let mut fixable = Vec::new();
    let mut skipped = PluginFixResponse::default();
    for entity in entities {
        match is_supported(&entity) {
            Ok(()) => fixable.push(entity),
            Err(reason) => {
                debug!(reason, "Skipping requirements entity");
                skipped.skip(entity, reason);
            }
        }
    }
    (fixable, skipped)
}

fn target_path(entity: &EntityToFix) -> Result<PathBuf, FixError> {
    entity
        .target_file()
        .map(|f| normalize_path(Path::new(f)))
        .ok_or(FixError::MissingFileName)
}

/// Groups entities by containing directory, keeping input order inside each
/// group.
pub fn group_by_directory(
    entities: Vec<Arc<EntityToFix>>,
) -> BTreeMap<PathBuf, Vec<Arc<EntityToFix>>> {
    let mut groups: BTreeMap<PathBuf, Vec<Arc<EntityToFix>>> = BTreeMap::new();
    for entity in entities {
        let dir = target_path(&entity)
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        groups.entry(dir).or_default().push(entity);
    }
    groups
}

pub async fn pip_requirements_txt(entities: Vec<Arc<EntityToFix>>) -> PluginFixResponse {
    info!(
        "Preparing to fix {} Python requirements.txt projects",
        entities.len()
    );
    let (fixable, mut response) = partition_by_fixable(entities);

    for (dir, group) in group_by_directory(fixable) {
        debug!(dir = %dir.display(), entities = group.len(), "Fixing directory");
        response.merge(fix_directory(group).await);
    }
    response
}

/// Processes the entities of one directory in order. Files reached by an
/// earlier entity are not processed again.
async fn fix_directory(entities: Vec<Arc<EntityToFix>>) -> PluginFixResponse {
    let mut response = PluginFixResponse::default();
    let mut covered_by: HashMap<PathBuf, String> = HashMap::new();
    let mut processed: HashSet<PathBuf> = HashSet::new();

    for entity in entities {
        let target = match target_path(&entity) {
            Ok(target) => target,
            Err(error) => {
                response.fail(entity, error);
                continue;
            }
        };
        if let Some(source) = covered_by.get(&target) {
            response.skip(entity, format!("Fixed through {source}"));
            continue;
        }

        match fix_with_provenance(&entity, &target, &processed).await {
            Ok(FixedProvenance { changes, files }) => {
                let source = entity.target_file().unwrap_or_default().to_string();
                for file in files {
                    covered_by.entry(file.clone()).or_insert_with(|| source.clone());
                    processed.insert(file);
                }
                response.succeeded.push(FixedEntity {
                    original: entity,
                    changes,
                });
            }
            Err(error) => {
                warn!(target_file = %target.display(), %error, "Failed to fix requirements");
                let tip = matches!(error, FixError::NoFixesCouldBeApplied)
                    .then(|| "Apply the changes manually".to_string());
                response.failed.push(FailedEntity {
                    original: entity,
                    error,
                    tip,
                });
            }
        }
    }
    response
}

struct FixedProvenance {
    changes: Vec<FixChangeSummary>,
    /// Every file in the provenance, written or not
    files: Vec<PathBuf>,
}

/// Applies the pin section of the entity's plan to its entry file and every
/// file the entry file includes.
///
/// The entry file only takes direct pins; included files take any matching
/// pin. Files in `skip` are left alone. Messages for changes outside the entry
/// file name the file they apply to.
async fn fix_with_provenance(
    entity: &EntityToFix,
    target: &Path,
    skip: &HashSet<PathBuf>,
) -> Result<FixedProvenance, FixError> {
    let remediation = entity
        .remediation
        .as_ref()
        .ok_or(FixError::MissingRemediationData)?;
    remediation.validate()?;

    let workspace = entity.workspace.as_ref();
    let dir = target.parent().unwrap_or(Path::new(""));
    let base = target
        .file_name()
        .map(|b| b.to_string_lossy().into_owned())
        .ok_or(FixError::MissingFileName)?;
    let provenance = extract_provenance(workspace, dir, &base).await?;

    let mut all_changes = Vec::new();
    for file in provenance.files() {
        if skip.contains(&file.path) {
            debug!(path = %file.path.display(), "Already processed in this directory");
            continue;
        }
        let is_entry = file.path.as_path() == target;
        let result = update_dependencies(&file.requirements, &remediation.pin, is_entry)?;
        let Some(updated_manifest) = result.updated_manifest else {
            debug!(path = %file.path.display(), "Manifest has not changed");
            continue;
        };

        if entity.options.dry_run {
            debug!("Skipping writing changes to file in dry-run mode");
        } else {
            debug!(path = %file.path.display(), "Writing changes to file");
            workspace.write_file(&file.path, &updated_manifest).await?;
        }

        all_changes.extend(result.changes.into_iter().map(|mut change| {
            if !is_entry {
                change.user_message = format!("{} in {}", change.user_message, file.path.display());
            }
            change
        }));
    }

    if all_changes.is_empty() {
        debug!("Manifests have not changed");
        return Err(FixError::NoFixesCouldBeApplied);
    }

    Ok(FixedProvenance {
        changes: all_changes,
        files: provenance.paths().map(Path::to_path_buf).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FixOptions, PinRemediation, RemediationPlan, ScanIdentity};
    use crate::workspace::MemoryWorkspace;

    fn pin_plan(pins: &[(&str, &str, bool)]) -> RemediationPlan {
        RemediationPlan {
            pin: pins
                .iter()
                .map(|(from, to, is_transitive)| {
                    (
                        from.to_string(),
                        PinRemediation {
                            upgrade_to: to.to_string(),
                            vulns: vec![],
                            is_transitive: *is_transitive,
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    fn entity(
        ws: &Arc<MemoryWorkspace>,
        target: &str,
        plan: Option<RemediationPlan>,
        dry_run: bool,
    ) -> Arc<EntityToFix> {
        Arc::new(EntityToFix::new(
            ScanIdentity::new("pip", target),
            plan,
            ws.clone(),
            FixOptions {
                dry_run,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_fixes_single_file() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("requirements.txt", "Django==1.6.1\n"));
        let plan = pin_plan(&[("django@1.6.1", "django@2.0.1", false)]);

        let response =
            pip_requirements_txt(vec![entity(&ws, "requirements.txt", Some(plan), false)]).await;
        assert_eq!(response.succeeded.len(), 1);
        assert_eq!(
            response.succeeded[0].changes[0].user_message,
            "Upgraded Django from 1.6.1 to 2.0.1"
        );
        assert_eq!(ws.contents("requirements.txt").unwrap(), "Django==2.0.1\n");
    }

    #[tokio::test]
    async fn test_transitive_pin_goes_to_included_file() {
        let ws = Arc::new(
            MemoryWorkspace::new()
                .with_file("base.txt", "-r constraints.txt\ntransitive==1.0.0\n")
                .with_file("constraints.txt", "transitive==1.0.0\n"),
        );
        let plan = pin_plan(&[("transitive@1.0.0", "transitive@1.1.1", true)]);

        let response = pip_requirements_txt(vec![entity(&ws, "base.txt", Some(plan), false)]).await;
        assert_eq!(response.succeeded.len(), 1);
        assert_eq!(
            response.succeeded[0].changes[0].user_message,
            "Pinned transitive from 1.0.0 to 1.1.1 in constraints.txt"
        );
        assert_eq!(ws.contents("constraints.txt").unwrap(), "transitive==1.1.1\n");
        assert_eq!(
            ws.contents("base.txt").unwrap(),
            "-r constraints.txt\ntransitive==1.0.0\n"
        );
        assert_eq!(ws.writes(), vec![PathBuf::from("constraints.txt")]);
    }

    #[tokio::test]
    async fn test_no_changes_fails_entity() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("requirements.txt", "click==7.0\n"));
        let plan = pin_plan(&[("django@1.6.1", "django@2.0.1", false)]);

        let response =
            pip_requirements_txt(vec![entity(&ws, "requirements.txt", Some(plan), false)]).await;
        assert_eq!(response.failed.len(), 1);
        assert!(matches!(
            response.failed[0].error,
            FixError::NoFixesCouldBeApplied
        ));
        assert!(ws.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_entities_are_skipped_with_reason() {
        let ws = Arc::new(MemoryWorkspace::new());
        let response = pip_requirements_txt(vec![
            entity(&ws, "a/requirements.txt", None, false),
            entity(&ws, "b/requirements.txt", Some(RemediationPlan::default()), false),
        ])
        .await;

        let reasons: Vec<&str> = response
            .skipped
            .iter()
            .map(|s| s.user_message.as_str())
            .collect();
        assert_eq!(
            reasons,
            vec![
                "No remediation data available",
                "There is no actionable remediation to apply"
            ]
        );
    }

    #[tokio::test]
    async fn test_same_directory_is_processed_once() {
        let ws = Arc::new(
            MemoryWorkspace::new()
                .with_file("app/requirements.txt", "-r base.txt\nDjango==1.6.1\n")
                .with_file("app/base.txt", "six==1.0.0\n")
                .with_file("app/dev.txt", "Django==1.6.1\n"),
        );
        let plan = pin_plan(&[
            ("django@1.6.1", "django@2.0.1", false),
            ("six@1.0.0", "six@1.16.0", false),
        ]);

        let response = pip_requirements_txt(vec![
            entity(&ws, "app/requirements.txt", Some(plan.clone()), false),
            entity(&ws, "app/base.txt", Some(plan.clone()), false),
            entity(&ws, "app/dev.txt", Some(plan), false),
        ])
        .await;

        assert_eq!(response.succeeded.len(), 2);
        assert_eq!(response.skipped.len(), 1);
        assert_eq!(
            response.skipped[0].user_message,
            "Fixed through app/requirements.txt"
        );
        assert_eq!(ws.contents("app/base.txt").unwrap(), "six==1.16.0\n");
        assert_eq!(ws.contents("app/dev.txt").unwrap(), "Django==2.0.1\n");
        assert_eq!(ws.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_reports_same_changes_without_writing() {
        let text = "-r constraints.txt\nDjango==1.6.1\n";
        let plan = pin_plan(&[
            ("django@1.6.1", "django@2.0.1", false),
            ("transitive@1.0.0", "transitive@1.1.1", true),
        ]);
        let fixture = || {
            Arc::new(
                MemoryWorkspace::new()
                    .with_file("requirements.txt", text)
                    .with_file("constraints.txt", "transitive==1.0.0\n"),
            )
        };

        let dry_ws = fixture();
        let dry =
            pip_requirements_txt(vec![entity(&dry_ws, "requirements.txt", Some(plan.clone()), true)])
                .await;
        assert!(dry_ws.writes().is_empty());
        assert_eq!(dry_ws.contents("requirements.txt").unwrap(), text);

        let wet_ws = fixture();
        let wet =
            pip_requirements_txt(vec![entity(&wet_ws, "requirements.txt", Some(plan), false)]).await;
        assert_eq!(wet_ws.writes().len(), 2);
        assert_eq!(dry.succeeded[0].changes, wet.succeeded[0].changes);
        assert_eq!(dry.succeeded[0].changes.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_plan_fails_only_that_entity() {
        let ws = Arc::new(
            MemoryWorkspace::new()
                .with_file("a/requirements.txt", "Django==1.6.1\n")
                .with_file("b/requirements.txt", "Django==1.6.1\n")
                .with_file("c/requirements.txt", "Django==1.6.1\n"),
        );
        let bad = pin_plan(&[("django@1.6.1", "2.0.1", false)]);
        let good = pin_plan(&[("django@1.6.1", "django@2.0.1", false)]);

        let response = pip_requirements_txt(vec![
            entity(&ws, "a/requirements.txt", Some(bad), false),
            entity(&ws, "b/requirements.txt", Some(good.clone()), false),
            entity(&ws, "c/requirements.txt", Some(good), false),
        ])
        .await;
        assert_eq!(response.failed.len(), 1);
        assert!(matches!(
            response.failed[0].error,
            FixError::InvalidRemediation(_)
        ));
        assert_eq!(response.succeeded.len(), 2);
        assert_eq!(ws.contents("b/requirements.txt").unwrap(), "Django==2.0.1\n");
        assert_eq!(ws.contents("c/requirements.txt").unwrap(), "Django==2.0.1\n");
        assert_eq!(ws.contents("a/requirements.txt").unwrap(), "Django==1.6.1\n");
    }
}
