use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::FetchError;

/// Source of raw filter-list text for a subscription locator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError>;
}

/// Fetches `http(s)://` locators with a shared client and reads `file://`
/// locators from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, locator: &str) -> Result<String, FetchError> {
        let response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError> {
        if let Some(path) = locator.strip_prefix("file://") {
            return read_local(PathBuf::from(path)).await;
        }
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.fetch_http(locator).await;
        }
        Err(FetchError::UnsupportedLocator(locator.to_string()))
    }
}

async fn read_local(path: PathBuf) -> Result<String, FetchError> {
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Ok(text),
        Err(source) => Err(FetchError::File { path, source }),
    }
}
