use std::collections::HashMap;
use std::sync::Arc;

use kitchenline_core::JobKind;

use crate::definition::JobPipeline;

/// Pipeline definitions by job kind.
#[derive(Default, Clone)]
pub struct PipelineRegistry {
    pipelines: HashMap<JobKind, Arc<dyn JobPipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline under its own kind, replacing any previous one.
    pub fn register(&mut self, pipeline: Arc<dyn JobPipeline>) {
        self.pipelines.insert(pipeline.kind(), pipeline);
    }

    pub fn with(mut self, pipeline: Arc<dyn JobPipeline>) -> Self {
        self.register(pipeline);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobPipeline>> {
        self.pipelines.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|k| self.pipelines.contains_key(k))
            .collect()
    }
}

impl core::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
