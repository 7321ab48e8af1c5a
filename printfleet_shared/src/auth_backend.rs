use async_trait::async_trait;
use std::collections::HashMap;

use crate::AuthBackend;

/// Credential table loaded from configuration.
pub struct InMemoryAuthBackend {
    users: HashMap<String, String>,
}

impl InMemoryAuthBackend {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthBackend for InMemoryAuthBackend {
    async fn validate(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map(|pw| pw == password).unwrap_or(false)
    }
}
