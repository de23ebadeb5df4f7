//! service-core: Shared infrastructure for the dues workspace.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
