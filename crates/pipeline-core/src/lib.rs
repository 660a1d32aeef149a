pub mod artifacts;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod ids;
pub mod lifecycle;
pub mod memory_repository;
pub mod pg_repository;
pub mod pipeline_controller;
pub mod repository;
pub mod runner;
pub mod types;
pub mod worker;

pub use config::Config;
pub use errors::{CoreError, CoreResult};
pub use lifecycle::{Stage, SubmissionStatus};
pub use repository::WorkRepository;
