use std::sync::Arc;

use crate::{
    channel::{ChannelAdapter, HttpChannelFactory},
    config::AppConfig,
    db::PgPool,
    jobs::{JobQueue, PgJobQueue},
    notifier::{OpsNotifier, TracingNotifier},
    phone::PhoneNormalizer,
    store::{PgStore, Store},
    tenants::TenantResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn JobQueue>,
    pub channel: Arc<ChannelAdapter>,
    pub ops: Arc<dyn OpsNotifier>,
    pub tenants: TenantResolver,
    pub phones: PhoneNormalizer,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        channel: Arc<ChannelAdapter>,
        ops: Arc<dyn OpsNotifier>,
    ) -> Self {
        let phones = PhoneNormalizer::new(config.default_country_code.clone());
        Self {
            config: Arc::new(config),
            tenants: TenantResolver::new(store.clone()),
            store,
            queue,
            channel,
            ops,
            phones,
        }
    }

    /// Production wiring: Postgres store and queue, HTTP channel client and
    /// log-backed ops notifications.
    pub fn with_pool(pool: PgPool, config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
        let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool).with_lease(config.job_lease));
        let factory = HttpChannelFactory::new(&config.channel_api_base_url)?;
        let channel = Arc::new(ChannelAdapter::new(
            Arc::new(factory),
            config.status_callback_url(),
        ));
        Ok(Self::new(
            config,
            store,
            queue,
            channel,
            Arc::new(TracingNotifier),
        ))
    }
}
