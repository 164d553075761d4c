use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::traits::{FixError, Workspace};

/// One manifest found by the scan, together with everything needed to fix it.
#[derive(Debug, Clone)]
pub struct EntityToFix {
    pub identity: ScanIdentity,
    pub remediation: Option<RemediationPlan>,
    pub workspace: Arc<dyn Workspace>,
    pub options: FixOptions,
}

impl EntityToFix {
    pub fn new(
        identity: ScanIdentity,
        remediation: Option<RemediationPlan>,
        workspace: Arc<dyn Workspace>,
        options: FixOptions,
    ) -> Self {
        Self {
            identity,
            remediation,
            workspace,
            options,
        }
    }

    /// Scan type used to pick a plugin; entities without one are grouped
    /// under `missing-type`.
    pub fn scan_type(&self) -> &str {
        self.identity
            .scan_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(MISSING_SCAN_TYPE)
    }

    pub fn target_file(&self) -> Option<&str> {
        self.identity
            .target_file
            .as_deref()
            .filter(|f| !f.is_empty())
    }
}

pub const MISSING_SCAN_TYPE: &str = "missing-type";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIdentity {
    /// Ecosystem tag, e.g. "pip", "poetry", "maven"
    #[serde(rename = "type")]
    pub scan_type: Option<String>,

    /// Manifest path relative to the workspace root
    pub target_file: Option<String>,
}

impl ScanIdentity {
    pub fn new(scan_type: impl Into<String>, target_file: impl Into<String>) -> Self {
        Self {
            scan_type: Some(scan_type.into()),
            target_file: Some(target_file.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixOptions {
    /// Compute changes without writing anything back
    pub dry_run: bool,

    /// Suppress progress logging; the final summary is always produced
    pub quiet: bool,

    /// Workspace root used to build display names
    pub path: PathBuf,
}

// ============================================================================
// Remediation plan
// ============================================================================

/// Upgrade/pin instructions produced by the vulnerability testing service.
///
/// All maps are keyed by `name@version` of the vulnerable package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemediationPlan {
    pub upgrade: BTreeMap<String, UpgradeRemediation>,
    pub pin: BTreeMap<String, PinRemediation>,
    pub patch: BTreeMap<String, serde_json::Value>,
    pub unresolved: Vec<serde_json::Value>,
}

impl RemediationPlan {
    /// Checks the invariants the handlers rely on.
    ///
    /// # Errors
    ///
    /// Returns [`FixError::InvalidRemediation`] when a key appears in both
    /// `upgrade` and `pin`, or when an `upgradeTo` is not a `name@version`.
    pub fn validate(&self) -> Result<(), FixError> {
        if let Some(key) = self.upgrade.keys().find(|k| self.pin.contains_key(*k)) {
            return Err(FixError::InvalidRemediation(format!(
                "{key} is listed as both an upgrade and a pin"
            )));
        }
        for upgrade in self.upgrade.values() {
            upgrade.target_version()?;
        }
        for pin in self.pin.values() {
            pin.target_version()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeRemediation {
    /// Target as `name@version`
    pub upgrade_to: String,

    /// Transitive packages affected by the upgrade
    pub upgrades: Vec<String>,

    /// Vulnerability ids fixed
    pub vulns: Vec<String>,
}

impl UpgradeRemediation {
    pub fn target_version(&self) -> Result<&str, FixError> {
        version_of(&self.upgrade_to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinRemediation {
    /// Target as `name@version`
    pub upgrade_to: String,

    pub vulns: Vec<String>,

    pub is_transitive: bool,
}

impl PinRemediation {
    pub fn target_version(&self) -> Result<&str, FixError> {
        version_of(&self.upgrade_to)
    }
}

/// Splits `name@version` on the last `@`, so scoped names keep their prefix.
pub fn split_package_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('@')
        .filter(|(name, version)| !name.is_empty() && !version.is_empty())
}

fn version_of(key: &str) -> Result<&str, FixError> {
    split_package_key(key)
        .map(|(_, version)| version)
        .ok_or_else(|| FixError::InvalidRemediation(format!("'{key}' is not a name@version")))
}

// ============================================================================
// Change records and outcomes
// ============================================================================

/// Outcome of one attempted edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixChangeSummary {
    pub success: bool,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_ids: Option<Vec<String>>,
}

impl FixChangeSummary {
    pub fn succeeded(user_message: impl Into<String>) -> Self {
        Self {
            success: true,
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn failed(
        user_message: impl Into<String>,
        reason: impl Into<String>,
        tip: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            user_message: user_message.into(),
            reason: Some(reason.into()),
            tip: Some(tip.into()),
            ..Self::default()
        }
    }

    pub fn with_transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }

    pub fn with_issue_ids(mut self, issue_ids: &[String]) -> Self {
        self.issue_ids = Some(issue_ids.to_vec());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FixedEntity {
    pub original: Arc<EntityToFix>,
    pub changes: Vec<FixChangeSummary>,
}

#[derive(Debug, Clone)]
pub struct SkippedEntity {
    pub original: Arc<EntityToFix>,
    pub user_message: String,
}

#[derive(Debug)]
pub struct FailedEntity {
    pub original: Arc<EntityToFix>,
    pub error: FixError,
    pub tip: Option<String>,
}

/// Per-plugin outcome lists. Every entity handed to a plugin ends up in
/// exactly one of them.
#[derive(Debug, Default)]
pub struct PluginFixResponse {
    pub succeeded: Vec<FixedEntity>,
    pub failed: Vec<FailedEntity>,
    pub skipped: Vec<SkippedEntity>,
}

impl PluginFixResponse {
    pub fn merge(&mut self, other: PluginFixResponse) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }

    pub fn skip(&mut self, original: Arc<EntityToFix>, user_message: impl Into<String>) {
        self.skipped.push(SkippedEntity {
            original,
            user_message: user_message.into(),
        });
    }

    pub fn fail(&mut self, original: Arc<EntityToFix>, error: FixError) {
        self.failed.push(FailedEntity {
            original,
            error,
            tip: None,
        });
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Results keyed by plugin name ("python", "maven").
#[derive(Debug, Default)]
pub struct FixHandlerResultByPlugin(pub BTreeMap<String, PluginFixResponse>);

impl FixHandlerResultByPlugin {
    pub fn single(plugin: impl Into<String>, response: PluginFixResponse) -> Self {
        let mut results = Self::default();
        results.0.insert(plugin.into(), response);
        results
    }

    /// Folds `other` in. Lists are appended per plugin, so the result does not
    /// depend on which group finished first.
    pub fn merge(&mut self, other: FixHandlerResultByPlugin) {
        for (plugin, response) in other.0 {
            self.0.entry(plugin).or_default().merge(response);
        }
    }

    pub fn get(&self, plugin: &str) -> Option<&PluginFixResponse> {
        self.0.get(plugin)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PluginFixResponse)> {
        self.0.iter()
    }
}

/// Error messages for whole groups, keyed by scan type.
pub type ExceptionsByScanType = BTreeMap<String, Vec<String>>;

/// Everything [`crate::FixExecutor::fix`] hands back.
#[derive(Debug)]
pub struct FixResults {
    pub results_by_plugin: FixHandlerResultByPlugin,
    pub exceptions_by_scan_type: ExceptionsByScanType,
    pub summary: String,
}

impl fmt::Display for FixResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_plan_deserializes_service_shape() {
        let json = r#"{
            "upgrade": {
                "org.springframework:spring-core@5.0.5.RELEASE": {
                    "upgradeTo": "org.springframework:spring-core@5.0.6.RELEASE",
                    "vulns": ["SNYK-JAVA-ORGSPRINGFRAMEWORK-31651"],
                    "upgrades": ["org.springframework:spring-core"]
                }
            },
            "pin": {
                "transitive@1.0.0": {
                    "upgradeTo": "transitive@1.1.1",
                    "vulns": ["vuln-id"],
                    "isTransitive": true
                }
            },
            "unresolved": []
        }"#;

        let plan: RemediationPlan = serde_json::from_str(json).unwrap();
        assert!(plan.patch.is_empty());
        let pin = &plan.pin["transitive@1.0.0"];
        assert!(pin.is_transitive);
        assert_eq!(pin.target_version().unwrap(), "1.1.1");
        let upgrade = &plan.upgrade["org.springframework:spring-core@5.0.5.RELEASE"];
        assert_eq!(upgrade.target_version().unwrap(), "5.0.6.RELEASE");
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_key_in_upgrade_and_pin() {
        let mut plan = RemediationPlan::default();
        plan.upgrade.insert(
            "django@1.6.1".to_string(),
            UpgradeRemediation {
                upgrade_to: "django@2.0.1".to_string(),
                ..Default::default()
            },
        );
        plan.pin.insert(
            "django@1.6.1".to_string(),
            PinRemediation {
                upgrade_to: "django@2.0.1".to_string(),
                ..Default::default()
            },
        );

        assert!(matches!(
            plan.validate(),
            Err(FixError::InvalidRemediation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_target() {
        let mut plan = RemediationPlan::default();
        plan.pin.insert(
            "django@1.6.1".to_string(),
            PinRemediation {
                upgrade_to: "2.0.1".to_string(),
                ..Default::default()
            },
        );
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_split_package_key_keeps_scope() {
        assert_eq!(
            split_package_key("@angular/core@8.0.0"),
            Some(("@angular/core", "8.0.0"))
        );
        assert_eq!(split_package_key("django"), None);
        assert_eq!(split_package_key("django@"), None);
    }

    #[test]
    fn test_change_summary_serializes_camel_case() {
        let change = FixChangeSummary::succeeded("Upgraded Django from 1.6.1 to 2.0.1")
            .with_transition("django@1.6.1", "django@2.0.1");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["userMessage"], "Upgraded Django from 1.6.1 to 2.0.1");
        assert_eq!(json["from"], "django@1.6.1");
        assert!(json.get("tip").is_none());
    }
}
