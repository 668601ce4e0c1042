//! # Expense Common Library
//!
//! Shared code for the expense pipeline:
//! - Error taxonomy
//! - Data model (Record, Status, Expense)
//! - Bootstrap configuration
//! - Observation events (ExpenseEvent + EventBus)
//! - Record Store and Blob Store collaborators

pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
