// master/src/state.rs

use std::sync::Arc;

use crate::service::CoordinatorService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CoordinatorService>,
}

impl AppState {
    pub fn new(service: CoordinatorService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
