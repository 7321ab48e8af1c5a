//! Print job orchestration for a fleet of networked 3D printers.

pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod orchestrator;
pub mod poller;
pub mod snapshot;
pub mod store;
pub mod web;

pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use poller::{CompletionPoller, TickReport};
