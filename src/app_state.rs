use std::sync::Arc;

use crate::pipeline::JobRunner;
use crate::services::job_store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
}

impl AppState {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self { runner }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        self.runner.store()
    }
}
