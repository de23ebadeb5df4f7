//! HTTP handlers for dues-service.

pub mod admin;
pub mod cashier;
pub mod dues;
pub mod health;
pub mod history;
