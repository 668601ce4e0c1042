//! HTTP API handlers

pub mod expenses;
pub mod health;

pub use expenses::expense_routes;
pub use health::health_routes;
