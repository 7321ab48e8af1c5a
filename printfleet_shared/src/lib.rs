// printfleet_shared: fleet data model and traits shared by the orchestrator and its front ends

pub mod auth_backend;
pub mod clock;
pub mod model;

pub use auth_backend::InMemoryAuthBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use model::*;

// AuthBackend trait
use async_trait::async_trait;
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    async fn validate(&self, username: &str, password: &str) -> bool;
}
