//! Network download of resource bytes

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_USER_AGENT: &str = "image-fetch/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads the raw bytes behind a resource identifier
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches identifiers that are HTTP(S) URLs
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError> {
        let url = Url::parse(identifier)
            .map_err(|e| FetchError::InvalidIdentifier(format!("{}: {}", identifier, e)))?;

        debug!(url = %url, "Downloading image");

        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to download image");
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let data = response.bytes().await?.to_vec();
        debug!(url = %url, size = data.len(), "Downloaded image");
        Ok(data)
    }
}
