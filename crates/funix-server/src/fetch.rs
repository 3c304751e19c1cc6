//! Upload dereferencing: turn a submitted URI into file content.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::debug;

use crate::error::FetchError;
use crate::files::FileStore;

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Bytes, FetchError>;
}

/// Resolves `http(s)://` URLs, `data:` URIs and references into the local
/// [`FileStore`].
pub struct UploadFetcher {
    client: reqwest::Client,
    files: Arc<FileStore>,
}

impl UploadFetcher {
    pub fn new(files: Arc<FileStore>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, files })
    }
}

#[async_trait]
impl Fetch for UploadFetcher {
    async fn fetch(&self, uri: &str) -> Result<Bytes, FetchError> {
        if let Some(key) = FileStore::key_of(uri) {
            return self
                .files
                .get(key)
                .map(|file| file.bytes)
                .ok_or_else(|| FetchError::NotStored(key.to_string()));
        }
        if let Some(rest) = uri.strip_prefix("data:") {
            return decode_data_uri(rest);
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            debug!(%uri, "fetching upload");
            let response = self.client.get(uri).send().await?.error_for_status()?;
            return Ok(response.bytes().await?);
        }
        Err(FetchError::Unsupported(uri.to_string()))
    }
}

/// `[<mime>][;base64],<data>`
fn decode_data_uri(rest: &str) -> Result<Bytes, FetchError> {
    let (meta, data) = rest.split_once(',').ok_or(FetchError::InvalidDataUri)?;
    if meta.ends_with(";base64") {
        STANDARD
            .decode(data)
            .map(Bytes::from)
            .map_err(|_| FetchError::InvalidDataUri)
    } else {
        Ok(Bytes::copy_from_slice(data.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> (UploadFetcher, Arc<FileStore>) {
        let files = Arc::new(FileStore::new());
        (UploadFetcher::new(files.clone(), Duration::from_secs(1)).unwrap(), files)
    }

    #[tokio::test]
    async fn resolves_data_uris_and_stored_files() {
        let (fetcher, files) = fetcher();
        assert_eq!(fetcher.fetch("data:text/plain;base64,aGk=").await.unwrap(), "hi");
        assert_eq!(fetcher.fetch("data:,plain").await.unwrap(), "plain");

        let key = files.put(Bytes::from_static(b"stored"), "text/plain");
        assert_eq!(fetcher.fetch(&FileStore::url(&key)).await.unwrap(), "stored");

        assert!(matches!(fetcher.fetch("/file/nope").await, Err(FetchError::NotStored(_))));
        assert!(matches!(fetcher.fetch("ftp://x").await, Err(FetchError::Unsupported(_))));
        assert!(matches!(fetcher.fetch("data:nocomma").await, Err(FetchError::InvalidDataUri)));
    }
}
