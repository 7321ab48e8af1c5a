// src/snapshot.rs
//! In-memory, expiring store for bed snapshots handed out for human review.
//! Each published image gets a random token and is served until its TTL runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone)]
pub struct SnapshotVault {
    // token -> (image bytes, published at)
    inner: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
    pub ttl: Duration,
    public_url: String,
}

impl SnapshotVault {
    pub fn new(ttl: Duration, public_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Stores the image and returns the review URL for it.
    pub async fn publish(&self, image: Vec<u8>) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let mut map = self.inner.lock().await;
        map.insert(token.clone(), (image, Instant::now()));
        format!("{}/api/v1/snapshots/{}", self.public_url, token)
    }

    /// Returns the image if the token is known and has not expired.
    pub async fn get(&self, token: &str) -> Option<Vec<u8>> {
        let map = self.inner.lock().await;
        map.get(token)
            .filter(|(_, published)| published.elapsed() < self.ttl)
            .map(|(image, _)| image.clone())
    }

    /// Drops expired images to bound memory use.
    pub async fn cleanup(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, (_, published)| published.elapsed() < self.ttl);
        before - map.len()
    }
}
