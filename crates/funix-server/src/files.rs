//! Content-addressed store for rendered media, served at `/file/{key}`.

use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

pub const FILE_ROUTE: &str = "/file";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub bytes: Bytes,
    pub mime: String,
}

#[derive(Debug, Default)]
pub struct FileStore {
    files: DashMap<String, StoredFile>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content and return its key. Identical content shares a key.
    pub fn put(&self, bytes: Bytes, mime: impl Into<String>) -> String {
        let key = hex::encode(Sha256::digest(&bytes));
        self.files.entry(key.clone()).or_insert_with(|| StoredFile {
            bytes,
            mime: mime.into(),
        });
        key
    }

    pub fn get(&self, key: &str) -> Option<StoredFile> {
        self.files.get(key).map(|entry| entry.clone())
    }

    /// Relative reference for a stored key.
    pub fn url(key: &str) -> String {
        format!("{FILE_ROUTE}/{key}")
    }

    /// Key of a reference produced by [`FileStore::url`].
    pub fn key_of(reference: &str) -> Option<&str> {
        reference
            .strip_prefix(FILE_ROUTE)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_shares_a_key() {
        let store = FileStore::new();
        let a = store.put(Bytes::from_static(b"png"), "image/png");
        let b = store.put(Bytes::from_static(b"png"), "image/png");
        let c = store.put(Bytes::from_static(b"jpg"), "image/jpeg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(store.get(&c).unwrap().mime, "image/jpeg");

        let url = FileStore::url(&a);
        assert_eq!(FileStore::key_of(&url), Some(a.as_str()));
        assert_eq!(FileStore::key_of("/other/x"), None);
    }
}
