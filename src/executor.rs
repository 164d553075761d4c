use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::fix::maven::MavenFixer;
use crate::fix::python::PythonFixer;
use crate::model::{EntityToFix, ExceptionsByScanType, FixHandlerResultByPlugin, FixResults};
use crate::report::show_results_summary;
use crate::traits::{FixError, FixHandler};

const DEFAULT_CONCURRENCY: usize = 3;

/// Maps scan types to the plugin that fixes them.
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn FixHandler>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let python: Arc<dyn FixHandler> = Arc::new(PythonFixer::new());
        Self::empty()
            .with_plugin("pip", Arc::clone(&python))
            .with_plugin("poetry", python)
            .with_plugin("maven", Arc::new(MavenFixer::new()))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.plugins.iter().map(|(k, v)| (k, v.plugin_id())))
            .finish()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Registers `plugin` for `scan_type`, replacing any previous entry.
    pub fn with_plugin(
        mut self,
        scan_type: impl Into<String>,
        plugin: Arc<dyn FixHandler>,
    ) -> Self {
        self.plugins.insert(scan_type.into(), plugin);
        self
    }

    pub fn load_plugin(&self, scan_type: &str) -> Result<Arc<dyn FixHandler>, FixError> {
        self.plugins
            .get(scan_type)
            .cloned()
            .ok_or_else(|| FixError::UnsupportedType(scan_type.to_string()))
    }
}

/// Groups entities by scan type, keeping input order inside each group.
pub fn group_entities_per_scan_type(
    entities: Vec<EntityToFix>,
) -> BTreeMap<String, Vec<Arc<EntityToFix>>> {
    let mut groups: BTreeMap<String, Vec<Arc<EntityToFix>>> = BTreeMap::new();
    for entity in entities {
        groups
            .entry(entity.scan_type().to_string())
            .or_default()
            .push(Arc::new(entity));
    }
    groups
}

/// Scan-type groups that resolve to the same plugin, fixed in one call so the
/// plugin sees every entity it owns at once.
struct PluginBatch {
    plugin: Arc<dyn FixHandler>,
    scan_types: Vec<String>,
    entities: Vec<Arc<EntityToFix>>,
}

/// Top-level entry point: dispatches entities to plugins and collects the
/// outcome of the whole run.
#[derive(Debug, Clone)]
pub struct FixExecutor {
    semaphore: Arc<Semaphore>,
    registry: PluginRegistry,
}

impl Default for FixExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FixExecutor {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            registry: PluginRegistry::default(),
        }
    }

    /// Sets how many plugin batches run at once.
    pub fn with_concurrency(mut self, concurrency_limit: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        self
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Resolves a plugin for every scan-type group and merges groups that
    /// share a plugin. Unknown scan types are reported in the exception map.
    fn batch_per_plugin(
        &self,
        groups: BTreeMap<String, Vec<Arc<EntityToFix>>>,
        exceptions: &mut ExceptionsByScanType,
    ) -> BTreeMap<String, PluginBatch> {
        let mut batches: BTreeMap<String, PluginBatch> = BTreeMap::new();
        for (scan_type, group) in groups {
            let plugin = match self.registry.load_plugin(&scan_type) {
                Ok(plugin) => plugin,
                Err(error) => {
                    warn!(scan_type = %scan_type, %error, "No plugin for scan type");
                    exceptions.entry(scan_type).or_default().push(error.to_string());
                    continue;
                }
            };
            let batch = batches
                .entry(plugin.plugin_id().to_string())
                .or_insert_with(|| PluginBatch {
                    plugin,
                    scan_types: Vec::new(),
                    entities: Vec::new(),
                });
            batch.scan_types.push(scan_type);
            batch.entities.extend(group);
        }
        batches
    }

    /// Fixes every entity and renders the summary.
    ///
    /// A plugin that fails as a whole is recorded under each scan type it was
    /// handling; other plugins are unaffected.
    #[instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn fix(&self, entities: Vec<EntityToFix>) -> FixResults {
        let groups = group_entities_per_scan_type(entities);
        let mut exceptions_by_scan_type = ExceptionsByScanType::new();
        let batches = self.batch_per_plugin(groups, &mut exceptions_by_scan_type);
        info!("Fixing {} plugin batches", batches.len());

        let mut handles = Vec::with_capacity(batches.len());
        for (plugin_id, batch) in batches {
            let PluginBatch {
                plugin,
                scan_types,
                entities,
            } = batch;
            let semaphore = Arc::clone(&self.semaphore);
            let task_plugin_id = plugin_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| FixError::HandlerFailed(format!("Semaphore error: {e}")))?;
                debug!(plugin = %task_plugin_id, entities = entities.len(), "Starting fix");
                let result = plugin.fix(entities).await;
                debug!(plugin = %task_plugin_id, "Finished fix");
                result
            });
            handles.push((plugin_id, scan_types, handle));
        }

        let mut results_by_plugin = FixHandlerResultByPlugin::default();
        for (plugin_id, scan_types, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(FixError::HandlerFailed(join_error.to_string())),
            };
            match outcome {
                Ok(results) => results_by_plugin.merge(results),
                Err(error) => {
                    warn!(plugin = %plugin_id, %error, "Failed to fix batch");
                    let message = error.to_string();
                    for scan_type in scan_types {
                        exceptions_by_scan_type
                            .entry(scan_type)
                            .or_default()
                            .push(message.clone());
                    }
                }
            }
        }

        let summary = show_results_summary(&results_by_plugin, &exceptions_by_scan_type);
        FixResults {
            results_by_plugin,
            exceptions_by_scan_type,
            summary,
        }
    }
}
