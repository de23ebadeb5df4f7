//! dues-service: condominium dues collection engine and its HTTP surface.
//!
//! The engine (`services::DuesEngine`) generates periodic charges, tracks
//! each resident's debt, issues single-use payment references and records
//! cash redemptions exactly once. It runs on PostgreSQL or fully in memory.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::DuesError;
pub use services::DuesEngine;
