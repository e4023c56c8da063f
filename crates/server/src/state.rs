use std::sync::Arc;
use gamearr_core::{AcquisitionService, Config, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    service: Arc<AcquisitionService>,
}

impl AppState {
    pub fn new(config: Config, service: Arc<AcquisitionService>) -> Self {
        Self { config, service }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn service(&self) -> &AcquisitionService {
        self.service.as_ref()
    }
}
