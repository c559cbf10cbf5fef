use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::Config;
use crate::db::DatabaseProxy;
use crate::services::ServiceContext;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db: Arc<DatabaseProxy>,
    config: Arc<Config>,
    services: Arc<ServiceContext>,
}

impl AppState {
    pub fn new(db: Arc<DatabaseProxy>, config: Config) -> Self {
        let services = ServiceContext::from_config(&config);
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db,
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db(&self) -> &DatabaseProxy {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &ServiceContext {
        &self.services
    }
}
