pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod middleware;
pub mod router;
pub mod service;
pub mod types;

pub use error::TabulaError;
pub use ingest::{ConflictPolicy, IngestReport, ingest, list_tables};
pub use service::qa::{QaCapability, QueryFacade};
