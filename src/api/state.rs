use std::sync::Arc;

use crate::scheduler::Scheduler;
use crate::storage::TaskStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            store: scheduler.store().clone(),
            scheduler,
        }
    }
}
