//! Matches requirement lines against the pin section of a remediation plan.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::parser::{apply_upgrades, Requirement};
use crate::model::{FixChangeSummary, PinRemediation};
use crate::traits::FixError;

/// Line replacements and change records for one file.
#[derive(Debug, Default)]
pub struct UpgradedRequirements {
    /// New line text keyed by line index
    pub updated: BTreeMap<usize, String>,
    pub changes: Vec<FixChangeSummary>,
}

/// Result of running the resolver and patcher over one file.
#[derive(Debug, Default)]
pub struct UpdatedManifest {
    /// `None` when nothing matched; the file should not be written
    pub updated_manifest: Option<String>,
    pub changes: Vec<FixChangeSummary>,
}

/// Keeps the pins relevant for this pass, keyed by lowercased `name@version`.
///
/// With `direct_upgrades_only`, pins flagged as transitive are left out.
fn relevant_pins(
    pins: &BTreeMap<String, PinRemediation>,
    direct_upgrades_only: bool,
) -> HashMap<String, (&str, &PinRemediation)> {
    pins.iter()
        .filter(|(_, pin)| !(direct_upgrades_only && pin.is_transitive))
        .map(|(key, pin)| (key.to_lowercase(), (key.as_str(), pin)))
        .collect()
}

/// Decides, line by line, which requirements a pin applies to and what the
/// new text is. Lines without a match are left alone and produce no record.
///
/// # Errors
///
/// Returns [`FixError::InvalidRemediation`] when a matching pin has a
/// malformed target.
pub fn generate_upgrades(
    requirements: &[Requirement],
    pins: &BTreeMap<String, PinRemediation>,
    direct_upgrades_only: bool,
) -> Result<UpgradedRequirements, FixError> {
    let lookup = relevant_pins(pins, direct_upgrades_only);
    let mut result = UpgradedRequirements::default();

    for requirement in requirements.iter().filter(|r| r.is_versioned()) {
        let (Some(name), Some(original_name), Some(version)) = (
            requirement.name.as_deref(),
            requirement.original_name.as_deref(),
            requirement.version.as_deref(),
        ) else {
            continue;
        };

        let key = format!("{name}@{version}").to_lowercase();
        let Some((plan_key, pin)) = lookup.get(&key) else {
            continue;
        };
        let new_version = pin.target_version()?;
        if new_version == version {
            continue;
        }
        let Some(updated_line) = requirement.with_version(new_version) else {
            continue;
        };

        let verb = if pin.is_transitive { "Pinned" } else { "Upgraded" };
        debug!(package = original_name, from = version, to = new_version, "{}", verb);
        result.changes.push(
            FixChangeSummary::succeeded(format!(
                "{verb} {original_name} from {version} to {new_version}"
            ))
            .with_transition(*plan_key, pin.upgrade_to.as_str())
            .with_issue_ids(&pin.vulns),
        );
        result.updated.insert(requirement.line, updated_line);
    }

    Ok(result)
}

/// Resolves pins for one parsed file and serializes the result.
pub fn update_dependencies(
    requirements: &[Requirement],
    pins: &BTreeMap<String, PinRemediation>,
    direct_upgrades_only: bool,
) -> Result<UpdatedManifest, FixError> {
    let UpgradedRequirements { updated, changes } =
        generate_upgrades(requirements, pins, direct_upgrades_only)?;
    if updated.is_empty() {
        return Ok(UpdatedManifest::default());
    }
    Ok(UpdatedManifest {
        updated_manifest: Some(apply_upgrades(requirements, &updated)),
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::python::requirements::parser::parse_requirements_file;

    fn pin(upgrade_to: &str, is_transitive: bool) -> PinRemediation {
        PinRemediation {
            upgrade_to: upgrade_to.to_string(),
            vulns: vec!["vuln-1".to_string()],
            is_transitive,
        }
    }

    fn pins(entries: &[(&str, PinRemediation)]) -> BTreeMap<String, PinRemediation> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_upgrade_keeps_written_casing() {
        let reqs = parse_requirements_file("Django==1.6.1");
        let plan = pins(&[("django@1.6.1", pin("django@2.0.1", false))]);

        let result = update_dependencies(&reqs, &plan, true).unwrap();
        assert_eq!(result.updated_manifest.as_deref(), Some("Django==2.0.1"));
        assert_eq!(result.changes.len(), 1);
        let change = &result.changes[0];
        assert!(change.success);
        assert_eq!(change.user_message, "Upgraded Django from 1.6.1 to 2.0.1");
        assert_eq!(change.from.as_deref(), Some("django@1.6.1"));
        assert_eq!(change.to.as_deref(), Some("django@2.0.1"));
        assert_eq!(change.issue_ids, Some(vec!["vuln-1".to_string()]));
    }

    #[test]
    fn test_plan_keys_match_case_insensitively() {
        let reqs = parse_requirements_file("jinja2>=2.7.2 # templating\n");
        let plan = pins(&[("Jinja2@2.7.2", pin("Jinja2@2.11.3", false))]);

        let result = update_dependencies(&reqs, &plan, true).unwrap();
        assert_eq!(
            result.updated_manifest.as_deref(),
            Some("jinja2>=2.11.3 # templating\n")
        );
    }

    #[test]
    fn test_no_match_leaves_file_untouched() {
        let reqs = parse_requirements_file("click==7.0\n# comment\n");
        let plan = pins(&[("django@1.6.1", pin("django@2.0.1", false))]);

        let result = update_dependencies(&reqs, &plan, true).unwrap();
        assert!(result.updated_manifest.is_none());
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_direct_only_pass_ignores_transitive_pins() {
        let reqs = parse_requirements_file("transitive==1.0.0\n");
        let plan = pins(&[("transitive@1.0.0", pin("transitive@1.1.1", true))]);

        let direct = update_dependencies(&reqs, &plan, true).unwrap();
        assert!(direct.updated_manifest.is_none());

        let all = update_dependencies(&reqs, &plan, false).unwrap();
        assert_eq!(all.updated_manifest.as_deref(), Some("transitive==1.1.1\n"));
        assert_eq!(
            all.changes[0].user_message,
            "Pinned transitive from 1.0.0 to 1.1.1"
        );
    }

    #[test]
    fn test_applying_twice_is_idempotent() {
        let plan = pins(&[("django@1.6.1", pin("django@2.0.1", false))]);
        let first = update_dependencies(&parse_requirements_file("Django==1.6.1\n"), &plan, true)
            .unwrap()
            .updated_manifest
            .unwrap();

        let second = update_dependencies(&parse_requirements_file(&first), &plan, true).unwrap();
        assert!(second.updated_manifest.is_none());
        assert!(second.changes.is_empty());
    }

    #[test]
    fn test_malformed_target_is_an_error() {
        let reqs = parse_requirements_file("Django==1.6.1");
        let plan = pins(&[("django@1.6.1", pin("2.0.1", false))]);
        assert!(matches!(
            update_dependencies(&reqs, &plan, true),
            Err(FixError::InvalidRemediation(_))
        ));
    }
}
