//! HTTP asset fetcher with an on-disk cache

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{AssetFetcher, FetchError};

/// Downloads assets over HTTP into a cache directory
///
/// A file already present under the requested name is returned without
/// touching the network. Downloads land in a `.part` file first and are
/// renamed into place once complete, so a half-written file is never served
/// as a cache hit.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    /// Where assets are stored
    cache_dir: PathBuf,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpAssetFetcher {
    /// Create a fetcher storing into `cache_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            cache_dir: cache_dir.into(),
            http_client,
        })
    }

    /// The cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn download(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut part_name = target.as_os_str().to_owned();
        part_name.push(".part");
        let part = PathBuf::from(part_name);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| FetchError::Io { path, source }
        };

        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(io_err(&part))?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&bytes).await.map_err(io_err(&part))?;
            written += bytes.len() as u64;
        }

        file.flush().await.map_err(io_err(&part))?;
        drop(file);

        tokio::fs::rename(&part, target)
            .await
            .map_err(io_err(target))?;

        Ok(written)
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str, destination_name: &str) -> Result<PathBuf, FetchError> {
        let target = self.cache_dir.join(destination_name);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path = %target.display(), "Asset cache hit");
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;

        debug!(url = %url, path = %target.display(), "Downloading asset");
        let bytes = self.download(url, &target).await?;
        info!(url = %url, path = %target.display(), bytes = bytes, "Asset downloaded");

        Ok(target)
    }
}
