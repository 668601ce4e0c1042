//! Normalizers
//!
//! Map provider-specific raw JSON to the canonical [`Expense`]. Decoding the
//! payload is strict (bad JSON or a missing document entry fails the
//! conversion); individual fields are lenient and stay at their zero value
//! when absent or unparsable.

mod docu_intel;
mod document_ai;

pub use docu_intel::DocuIntelNormalizer;
pub use document_ai::DocumentAiNormalizer;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use expense_common::models::Expense;
use thiserror::Error;

use crate::schema::{Schema, UnsupportedSchema};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Cannot parse raw payload: {0}")]
    Parse(String),

    #[error("Raw payload has no document entry")]
    MissingDocument,

    #[error(transparent)]
    UnsupportedSchema(#[from] UnsupportedSchema),
}

pub trait Normalizer: Send + Sync {
    fn schema(&self) -> Schema;

    /// Convert raw provider bytes to an Expense. Deterministic for equal input.
    fn to_canonical(&self, raw: &[u8]) -> Result<Expense, NormalizeError>;
}

/// Normalizer for a schema name
pub fn for_schema(name: &str) -> Result<Box<dyn Normalizer>, NormalizeError> {
    let schema: Schema = name.parse()?;
    Ok(normalizer(schema))
}

pub fn normalizer(schema: Schema) -> Box<dyn Normalizer> {
    match schema {
        Schema::DocuIntel => Box::new(DocuIntelNormalizer),
        Schema::DocumentAi => Box::new(DocumentAiNormalizer),
    }
}

/// Parse an amount written with either `.` or `,` as the decimal mark.
///
/// The last separator is the decimal mark when one or two digits follow it;
/// every other separator groups thousands. Currency symbols and spaces are
/// ignored. Text without digits, or that still fails to parse, yields 0.
pub fn parse_money(text: &str) -> f64 {
    let negative = text.trim_start().starts_with('-');
    let body: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    if !body.chars().any(|c| c.is_ascii_digit()) {
        return 0.0;
    }

    let decimal_mark = body
        .rfind(|c| c == '.' || c == ',')
        .filter(|&i| matches!(body.len() - i - 1, 1 | 2));

    let mut normalized = String::with_capacity(body.len());
    for (i, c) in body.char_indices() {
        if c.is_ascii_digit() {
            normalized.push(c);
        } else if Some(i) == decimal_mark {
            normalized.push('.');
        }
    }

    match normalized.parse::<f64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) => 0.0,
    }
}

/// Join a `YYYY-MM-DD` date and an optional `HH:MM[:SS]` time.
/// A missing or unreadable time means midnight; an unreadable date means `None`.
pub(crate) fn join_timestamp(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = time
        .and_then(|t| {
            let t = t.trim();
            NaiveTime::parse_from_str(t, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
                .ok()
        })
        .unwrap_or(NaiveTime::MIN);
    Some(date.and_time(time))
}
