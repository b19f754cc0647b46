use super::{HttpIndexingClient, IndexingClient, MockIndexer};
use crate::config::{IndexerConfig, IndexerKind};
use crate::error::{ScreenlogError, ScreenlogResult};
use std::sync::Arc;
use tracing::info;

/// Factory for creating indexing client instances
///
/// Picks the implementation named by the configuration, so the rest of the
/// pipeline only ever sees `dyn IndexingClient`.
pub struct IndexerFactory;

impl IndexerFactory {
    /// Create an indexing client from configuration
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the http client has no API key or
    /// an unusable base url.
    pub fn create(config: &IndexerConfig) -> ScreenlogResult<Arc<dyn IndexingClient>> {
        match config.kind {
            IndexerKind::Mock => {
                info!("using mock indexing service");
                Ok(Arc::new(MockIndexer::new()))
            }
            IndexerKind::Http => {
                let api_key = config.api_key.as_deref().ok_or_else(|| {
                    ScreenlogError::InvalidConfiguration(
                        "an API key is required for the http indexer".to_string(),
                    )
                })?;
                let client = HttpIndexingClient::new(&config.base_url, api_key)?;
                info!(base_url = %client.base_url(), "using http indexing service");
                Ok(Arc::new(client))
            }
        }
    }
}
