//! Data model shared by the stores and the pipeline

mod expense;
mod record;

pub use expense::{Expense, Merchant};
pub use record::{expense_path, json_path, upload_path, Record, Status};
