//! Python plugin: sorts entities into project types and runs each type's
//! handler on a small bounded pool.

pub mod requirements;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::model::{EntityToFix, FixHandlerResultByPlugin, PluginFixResponse};
use crate::traits::{FixError, FixHandler};

pub const PLUGIN_ID: &str = "python";

const DEFAULT_CONCURRENCY: usize = 5;

/// Python manifest flavours with a handler of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProjectType {
    RequirementsTxt,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::RequirementsTxt => "requirements.txt",
        }
    }

    /// Picks the handler type from the target file name.
    pub fn for_target(target_file: &str) -> Option<Self> {
        let is_txt = Path::new(target_file)
            .extension()
            .is_some_and(|ext| ext == "txt");
        is_txt.then_some(ProjectType::RequirementsTxt)
    }

    async fn handle(self, entities: Vec<Arc<EntityToFix>>) -> PluginFixResponse {
        match self {
            ProjectType::RequirementsTxt => requirements::pip_requirements_txt(entities).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PythonFixer {
    concurrency: usize,
}

impl Default for PythonFixer {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonFixer {
    pub fn new() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets how many project types are processed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Buckets entities by project type. Entities that fit no type are skipped.
pub fn map_entities_per_handler_type(
    entities: Vec<Arc<EntityToFix>>,
) -> (BTreeMap<ProjectType, Vec<Arc<EntityToFix>>>, PluginFixResponse) {
    let mut per_type: BTreeMap<ProjectType, Vec<Arc<EntityToFix>>> = BTreeMap::new();
    let mut skipped = PluginFixResponse::default();

    for entity in entities {
        let Some(target_file) = entity.target_file() else {
            skipped.skip(entity, "No target file available");
            continue;
        };
        match ProjectType::for_target(target_file) {
            Some(project_type) => per_type.entry(project_type).or_default().push(entity),
            None => {
                let user_message = format!("{target_file} is not supported");
                debug!("{}", user_message);
                skipped.skip(entity, user_message);
            }
        }
    }
    (per_type, skipped)
}

/// Runs `handle` once per project type with at most `concurrency` types in
/// flight. A type whose task fails or panics fails each of its entities.
pub async fn fix_per_project_type<K, F, Fut>(
    concurrency: usize,
    per_type: BTreeMap<K, Vec<Arc<EntityToFix>>>,
    handle: F,
) -> PluginFixResponse
where
    K: fmt::Debug + Copy + Send + 'static,
    F: Fn(K, Vec<Arc<EntityToFix>>) -> Fut,
    Fut: Future<Output = PluginFixResponse> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(per_type.len());
    for (project_type, projects) in per_type {
        let semaphore = Arc::clone(&semaphore);
        let work = handle(project_type, projects.clone());
        let task = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| FixError::HandlerFailed(format!("Semaphore error: {e}")))?;
            Ok::<_, FixError>(work.await)
        });
        handles.push((project_type, projects, task));
    }

    let mut results = PluginFixResponse::default();
    for (project_type, projects, task) in handles {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(FixError::HandlerFailed(join_error.to_string())),
        };
        match outcome {
            Ok(response) => results.merge(response),
            Err(error) => {
                warn!(
                    ?project_type,
                    %error,
                    "Failed to fix {} projects",
                    projects.len()
                );
                let message = error.to_string();
                for entity in projects {
                    results.fail(entity, FixError::HandlerFailed(message.clone()));
                }
            }
        }
    }
    results
}

#[async_trait]
impl FixHandler for PythonFixer {
    fn plugin_id(&self) -> &str {
        PLUGIN_ID
    }

    #[instrument(skip(self, entities), fields(count = entities.len()))]
    async fn fix(
        &self,
        entities: Vec<Arc<EntityToFix>>,
    ) -> Result<FixHandlerResultByPlugin, FixError> {
        info!("Looking for supported Python items");
        let (per_type, mut results) = map_entities_per_handler_type(entities);
        for (project_type, projects) in &per_type {
            info!("Processing {} {} items", projects.len(), project_type.as_str());
        }

        results.merge(fix_per_project_type(self.concurrency, per_type, ProjectType::handle).await);
        Ok(FixHandlerResultByPlugin::single(PLUGIN_ID, results))
    }
}
