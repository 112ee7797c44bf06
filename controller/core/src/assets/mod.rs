//! Artwork Asset Fetching
//!
//! Artworks whose format asks for a download are fetched to local storage
//! before their viewer starts. Files are content-addressed: the name is the
//! artwork id followed by the basename of the URL path, so two artworks never
//! collide and a reassigned artwork can reuse its earlier download.
//!
//! Whether a cached file skips the network transfer is up to the fetcher.

mod http;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpAssetFetcher;

/// Errors fetching an asset
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure
    #[error("download of {url} failed: {source}")]
    Http {
        /// The URL being fetched
        url: String,
        /// The underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("download of {url} returned HTTP {status}")]
    Status {
        /// The URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Local storage failure
    #[error("failed to store asset at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The fetcher could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Downloads artwork assets to local files
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `url` and store it under `destination_name`
    ///
    /// Returns the local path of the stored file.
    async fn fetch(&self, url: &str, destination_name: &str) -> Result<PathBuf, FetchError>;
}

/// Last non-empty path segment of a URL, without query or fragment
#[must_use]
pub fn url_basename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        return parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default()
            .to_string();
    }

    // Not an absolute URL; treat it as a plain path
    let path = url.split(['?', '#']).next().unwrap_or_default();
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Local file name for an artwork's asset
///
/// Path separators and NUL are replaced with `_`, and a name made only of
/// dots is escaped, so the result is always a single entry inside the cache
/// directory.
#[must_use]
pub fn content_addressed_name(artwork_id: &str, basename: &str) -> String {
    let name: String = format!("{artwork_id}{basename}")
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    if name.chars().all(|c| c == '.') {
        return format!("_{name}");
    }
    name
}
