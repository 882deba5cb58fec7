pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, PgRepository};
pub use error::RepositoryError;
pub use service::{Clock, Collaborators, FixedClock, SystemClock, WorkflowOrchestrator};
