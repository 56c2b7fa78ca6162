use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{Result, TributaryError};
use crate::auth::{Authorizer, TokenAuthorizer};
use crate::broker::{Broker, BrokerHandle};
use crate::config::Config;
use crate::domain::NOTIFICATIONS_CHANNEL;
use crate::fetcher::{CachingFetcher, Fetcher, HttpFetcher, ResponseCache};
use crate::keyspace::Keyspace;
use crate::normalizer::Normalizer;
use crate::router::ChannelRouter;
use crate::search::{MemoryIndex, SearchIndex};
use crate::store::{SqliteStore, Store};
use crate::timeline::{TimelineBackend, Timelines};
use crate::websub::WebSub;

/// Every long-lived component, built once and shared by the server, the
/// scheduler and the CLI.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub keyspace: Arc<Keyspace>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub normalizer: Normalizer,
    pub timelines: Timelines,
    pub router: ChannelRouter,
    pub broker: BrokerHandle,
    pub search: Arc<dyn SearchIndex>,
    pub authorizer: Arc<dyn Authorizer>,
    pub websub: WebSub,
}

impl AppContext {
    /// Must be called from within a tokio runtime; the broker task is
    /// spawned here.
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match &config.storage.database {
            Some(p) => p.clone(),
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let http: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);
        Self::build(config, store, http)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let http: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);
        Self::build(config, store, http)
    }

    /// Wire the components around an existing store and network fetcher.
    /// Responses from `network` are cached in the keyspace.
    pub fn build(
        config: Config,
        store: Arc<SqliteStore>,
        network: Arc<dyn Fetcher + Send + Sync>,
    ) -> Result<Self> {
        let keyspace = Arc::new(Keyspace::new(store.clone()));
        let cache: Arc<dyn ResponseCache> = keyspace.clone();
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(CachingFetcher::new(network, cache));
        let normalizer = Normalizer::new(fetcher.clone());
        let timelines = Timelines::new(
            keyspace.clone(),
            store.clone(),
            &config.storage.default_backend,
        )?;
        let websub = WebSub::new(
            fetcher.clone(),
            normalizer.clone(),
            store.clone(),
            &config.server.base_url,
        )?;

        let ctx = Self {
            authorizer: Arc::new(TokenAuthorizer::new(config.server.auth_token.clone())),
            search: Arc::new(MemoryIndex::new()),
            router: ChannelRouter::new(),
            broker: Broker::spawn(),
            config,
            store,
            keyspace,
            fetcher,
            normalizer,
            timelines,
            websub,
        };
        ctx.load_channels()?;
        Ok(ctx)
    }

    /// Ensure the notifications channel exists and load every channel's
    /// rules. A setting naming an unknown backend fails here.
    fn load_channels(&self) -> Result<()> {
        self.store.add_channel(NOTIFICATIONS_CHANNEL, "Notifications")?;

        let settings = self.store.get_all_settings()?;
        for (uid, setting) in &settings {
            self.timelines.kind_for(setting).map_err(|e| {
                TributaryError::Config(format!("channel {}: {}", uid, e))
            })?;
        }
        tracing::debug!("Loaded settings for {} channels", settings.len());
        self.router.load(settings)
    }

    /// The timeline backend currently configured for a channel.
    pub fn timeline(&self, channel_uid: &str) -> Result<Arc<dyn TimelineBackend>> {
        let setting = self.router.get(channel_uid)?;
        self.timelines.open(channel_uid, &setting)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| TributaryError::Config("Could not find data directory".into()))?;
        let tributary_dir = data_dir.join("tributary");
        std::fs::create_dir_all(&tributary_dir)?;
        Ok(tributary_dir.join("tributary.db"))
    }
}
