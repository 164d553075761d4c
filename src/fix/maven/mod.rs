//! Maven plugin: applies `upgrade` remediation to `pom.xml` files.

pub mod pom;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::model::{
    split_package_key, EntityToFix, FailedEntity, FixChangeSummary, FixHandlerResultByPlugin,
    FixedEntity, PluginFixResponse, RemediationPlan, UpgradeRemediation,
};
use crate::traits::{FixError, FixHandler};
use pom::{PomDocument, UpgradeOutcome};

pub const PLUGIN_ID: &str = "maven";

const MANUAL_TIP: &str = "Apply the changes manually";

#[derive(Debug, Default, Clone, Copy)]
pub struct MavenFixer;

impl MavenFixer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FixHandler for MavenFixer {
    fn plugin_id(&self) -> &str {
        PLUGIN_ID
    }

    #[instrument(skip(self, entities), fields(count = entities.len()))]
    async fn fix(
        &self,
        entities: Vec<Arc<EntityToFix>>,
    ) -> Result<FixHandlerResultByPlugin, FixError> {
        info!("Preparing to fix {} Java Maven projects", entities.len());
        let mut response = PluginFixResponse::default();
        for (index, entity) in entities.into_iter().enumerate() {
            debug!(item = index + 1, "Fixing pom.xml");
            response.merge(update_dependencies(entity).await);
        }
        Ok(FixHandlerResultByPlugin::single(PLUGIN_ID, response))
    }
}

/// Support predicate: `Err` carries the skip reason.
pub fn is_supported(entity: &EntityToFix) -> Result<(), &'static str> {
    let Some(remediation) = entity.remediation.as_ref() else {
        return Err("No remediation data available");
    };
    if entity.target_file().is_none() {
        return Err("No target file available");
    }
    if remediation.upgrade.is_empty() {
        return Err("There is no actionable remediation to apply");
    }
    Ok(())
}

/// Fixes one pom. The entity fails when the file cannot be read, parsed or
/// written, or when every dependency is already at its target version. A
/// dependency that cannot be found becomes a failed change record instead.
pub async fn update_dependencies(entity: Arc<EntityToFix>) -> PluginFixResponse {
    let mut response = PluginFixResponse::default();
    if let Err(reason) = is_supported(&entity) {
        debug!(reason, "Skipping pom.xml");
        response.skip(entity, reason);
        return response;
    }

    match apply_remediation(&entity).await {
        Ok(changes) => response.succeeded.push(FixedEntity {
            original: entity,
            changes,
        }),
        Err(error) => {
            warn!(
                target_file = entity.target_file().unwrap_or_default(),
                %error,
                "Failed to fix pom.xml"
            );
            response.failed.push(FailedEntity {
                original: entity,
                error,
                tip: Some(MANUAL_TIP.to_string()),
            });
        }
    }
    response
}

async fn apply_remediation(entity: &EntityToFix) -> Result<Vec<FixChangeSummary>, FixError> {
    let remediation: &RemediationPlan = entity
        .remediation
        .as_ref()
        .ok_or(FixError::MissingRemediationData)?;
    let target_file = Path::new(entity.target_file().ok_or(FixError::MissingFileName)?);
    remediation.validate()?;

    let pom_xml = entity.workspace.read_file(target_file).await?;
    let mut pom = PomDocument::parse(&pom_xml)?;

    let changes: Vec<FixChangeSummary> = remediation
        .upgrade
        .iter()
        .filter_map(|(upgrade_from, upgrade)| apply_upgrade(&mut pom, upgrade_from, upgrade))
        .collect();
    if changes.is_empty() {
        debug!("Every dependency is already at its target version");
        return Err(FixError::NoFixesCouldBeApplied);
    }

    if !pom.is_modified() {
        debug!("No dependency could be upgraded, leaving pom.xml untouched");
    } else if entity.options.dry_run {
        debug!("Skipping writing changes to file in dry-run mode");
    } else {
        debug!(path = %target_file.display(), "Writing changes to file");
        entity
            .workspace
            .write_file(target_file, &pom.to_xml())
            .await?;
    }
    Ok(changes)
}

/// Change record for one upgrade; `None` when the pom already has the
/// target version.
fn apply_upgrade(
    pom: &mut PomDocument,
    upgrade_from: &str,
    upgrade: &UpgradeRemediation,
) -> Option<FixChangeSummary> {
    let (package_name, version) = split_package_key(upgrade_from).unwrap_or((upgrade_from, ""));
    let new_version = upgrade.target_version().unwrap_or_default();
    debug!(upgrade_from, "Applying upgrade");

    match pom.upgrade_dependency(package_name, new_version) {
        UpgradeOutcome::Upgraded => Some(
            FixChangeSummary::succeeded(format!(
                "Upgraded {package_name} from {version} to {new_version}"
            ))
            .with_transition(upgrade_from, upgrade.upgrade_to.as_str())
            .with_issue_ids(&upgrade.vulns),
        ),
        UpgradeOutcome::AlreadyAtVersion => None,
        UpgradeOutcome::NotFound => {
            let error = FixError::DependencyNotFound(upgrade_from.to_string());
            Some(
                FixChangeSummary::failed(
                    format!("Failed to upgrade {package_name} from {version} to {new_version}"),
                    error.to_string(),
                    MANUAL_TIP,
                )
                .with_issue_ids(&upgrade.vulns),
            )
        }
    }
}
