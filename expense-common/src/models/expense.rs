//! Canonical, provider-independent expense

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Financial fields of one document, as produced by a normalizer and
/// rewritten by the post-processors.
///
/// Decoding requires `currency`, `total`, `tax` and `merchant`; only `date`
/// may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Transaction timestamp; `None` when the document carries no date
    #[serde(default)]
    pub date: Option<NaiveDateTime>,

    /// ISO 4217 currency code
    pub currency: String,

    pub total: f64,

    pub tax: f64,

    pub merchant: Merchant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub phone: String,

    /// Company / tax registration number
    #[serde(default, rename = "reg_no")]
    pub registration: String,

    /// Single-line form of the merchant block
    #[serde(default, rename = "string_val")]
    pub raw: String,
}

impl Merchant {
    /// Join the non-empty name, address and phone into `raw`
    pub fn fill_raw(&mut self) {
        self.raw = [&self.name, &self.address, &self.phone]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(" ");
    }
}
