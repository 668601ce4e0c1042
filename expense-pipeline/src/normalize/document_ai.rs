//! Document AI expense normalizer
//!
//! Reads the typed `entities` of a processed Document. Both the REST
//! (camelCase) and the client-library (snake_case) spellings are accepted, and
//! a full process response is unwrapped to its `document`.

use chrono::NaiveDate;
use expense_common::models::{Expense, Merchant};
use serde::Deserialize;

use super::{join_timestamp, parse_money, NormalizeError, Normalizer};
use crate::schema::Schema;

pub struct DocumentAiNormalizer;

/// A full process response (`document`) or a bare Document (`entities`)
#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    document: Option<Document>,
    #[serde(default)]
    entities: Option<Vec<Entity>>,
}

/// An empty Document omits `entities` altogether
#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entity {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default, alias = "mention_text")]
    mention_text: String,
    #[serde(default, alias = "normalized_value")]
    normalized_value: Option<NormalizedValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NormalizedValue {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "date_value")]
    date_value: Option<DateValue>,
    #[serde(default, alias = "datetime_value")]
    datetime_value: Option<DateTimeValue>,
    #[serde(default, alias = "money_value")]
    money_value: Option<MoneyValue>,
}

#[derive(Debug, Default, Deserialize)]
struct DateValue {
    #[serde(default)]
    year: i32,
    #[serde(default)]
    month: u32,
    #[serde(default)]
    day: u32,
}

#[derive(Debug, Default, Deserialize)]
struct DateTimeValue {
    #[serde(default)]
    hours: u32,
    #[serde(default)]
    minutes: u32,
    #[serde(default)]
    seconds: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyValue {
    #[serde(default, alias = "currency_code")]
    currency_code: String,
}

impl Entity {
    /// Normalized text, falling back to the text as printed
    fn text(&self) -> &str {
        match &self.normalized_value {
            Some(value) if !value.text.is_empty() => &value.text,
            _ => &self.mention_text,
        }
    }

    fn date(&self) -> Option<String> {
        let structured = self
            .normalized_value
            .as_ref()
            .and_then(|v| v.date_value.as_ref())
            .and_then(|d| NaiveDate::from_ymd_opt(d.year, d.month, d.day));
        match structured {
            Some(date) => Some(date.format("%Y-%m-%d").to_string()),
            None => Some(self.text().to_string()).filter(|t| !t.is_empty()),
        }
    }

    fn time(&self) -> Option<String> {
        match self.normalized_value.as_ref().and_then(|v| v.datetime_value.as_ref()) {
            Some(t) => Some(format!("{:02}:{:02}:{:02}", t.hours, t.minutes, t.seconds)),
            None => Some(self.text().to_string()).filter(|t| !t.is_empty()),
        }
    }

    fn money_currency(&self) -> Option<&str> {
        self.normalized_value
            .as_ref()
            .and_then(|v| v.money_value.as_ref())
            .map(|m| m.currency_code.as_str())
            .filter(|c| !c.is_empty())
    }
}

impl Normalizer for DocumentAiNormalizer {
    fn schema(&self) -> Schema {
        Schema::DocumentAi
    }

    fn to_canonical(&self, raw: &[u8]) -> Result<Expense, NormalizeError> {
        let payload: Payload =
            serde_json::from_slice(raw).map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let entities = match payload {
            Payload {
                document: Some(document),
                ..
            } => document.entities,
            Payload {
                entities: Some(entities),
                ..
            } => entities,
            _ => return Err(NormalizeError::MissingDocument),
        };

        let mut expense = Expense::default();
        let mut merchant = Merchant::default();
        let mut date: Option<String> = None;
        let mut time: Option<String> = None;
        let mut money_currency: Option<String> = None;

        for entity in &entities {
            match entity.kind.as_str() {
                "receipt_date" => date = entity.date(),
                "purchase_time" => time = entity.time(),
                "supplier_name" => merchant.name = entity.text().to_string(),
                "supplier_address" => merchant.address = entity.text().to_string(),
                "supplier_phone" => merchant.phone = entity.text().to_string(),
                "supplier_tax_id" | "supplier_registration" => {
                    merchant.registration = entity.text().to_string()
                }
                "total_amount" => {
                    expense.total = parse_money(&entity.mention_text);
                    money_currency = entity.money_currency().map(str::to_string);
                }
                "total_tax_amount" => expense.tax = parse_money(&entity.mention_text),
                "currency" => expense.currency = entity.text().to_string(),
                _ => {}
            }
        }

        if expense.currency.is_empty() {
            expense.currency = money_currency.unwrap_or_default();
        }
        expense.date = date.and_then(|d| join_timestamp(&d, time.as_deref()));
        merchant.fill_raw();
        expense.merchant = merchant;

        Ok(expense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "entities": [
                { "type": "supplier_name", "mentionText": "PIZZERIA DA MARIO",
                  "normalizedValue": { "text": "Pizzeria da Mario" } },
                { "type": "supplier_address", "mentionText": "Via Roma 1, Milano" },
                { "type": "supplier_phone", "mentionText": "+39 02 1234" },
                { "type": "receipt_date", "mentionText": "03/02/2024",
                  "normalizedValue": { "text": "2024-02-03",
                                       "dateValue": { "year": 2024, "month": 2, "day": 3 } } },
                { "type": "purchase_time", "mentionText": "20:41",
                  "normalizedValue": { "datetimeValue": { "hours": 20, "minutes": 41 } } },
                { "type": "total_amount", "mentionText": "1.234,50",
                  "normalizedValue": { "moneyValue": { "currencyCode": "EUR", "units": "1234" } } },
                { "type": "total_tax_amount", "mentionText": "222,21" },
                { "type": "line_item", "mentionText": "Margherita 8,00" }
            ]
        })
    }

    #[test]
    fn test_maps_entities() {
        let raw = serde_json::to_vec(&sample()).unwrap();
        let expense = DocumentAiNormalizer.to_canonical(&raw).unwrap();

        assert_eq!(expense.merchant.name, "Pizzeria da Mario");
        assert_eq!(expense.merchant.address, "Via Roma 1, Milano");
        assert_eq!(expense.merchant.phone, "+39 02 1234");
        assert_eq!(expense.date.unwrap().to_string(), "2024-02-03 20:41:00");
        assert_eq!(expense.total, 1234.5);
        assert!((expense.tax - 222.21).abs() < 1e-9);
        assert_eq!(expense.currency, "EUR");
    }

    #[test]
    fn test_unwraps_process_response() {
        let raw = serde_json::to_vec(&json!({ "document": sample() })).unwrap();
        let expense = DocumentAiNormalizer.to_canonical(&raw).unwrap();
        assert_eq!(expense.merchant.name, "Pizzeria da Mario");
    }

    #[test]
    fn test_snake_case_keys() {
        let raw = serde_json::to_vec(&json!({
            "entities": [
                { "type": "currency", "mention_text": "usd",
                  "normalized_value": { "text": "USD" } },
                { "type": "total_amount", "mention_text": "$19.99" }
            ]
        }))
        .unwrap();

        let expense = DocumentAiNormalizer.to_canonical(&raw).unwrap();
        assert_eq!(expense.currency, "USD");
        assert_eq!(expense.total, 19.99);
        assert!(expense.date.is_none());
    }

    #[test]
    fn test_deterministic() {
        let raw = serde_json::to_vec(&sample()).unwrap();
        assert_eq!(
            DocumentAiNormalizer.to_canonical(&raw).unwrap(),
            DocumentAiNormalizer.to_canonical(&raw).unwrap()
        );
    }

    #[test]
    fn test_invalid_payload() {
        assert!(matches!(
            DocumentAiNormalizer.to_canonical(b"[1, 2"),
            Err(NormalizeError::Parse(_))
        ));
        assert!(matches!(
            DocumentAiNormalizer.to_canonical(b"42"),
            Err(NormalizeError::Parse(_))
        ));
    }

    #[test]
    fn test_payload_without_document() {
        assert!(matches!(
            DocumentAiNormalizer.to_canonical(b"{}"),
            Err(NormalizeError::MissingDocument)
        ));

        // An already-canonical expense is not a Document
        let canonical = serde_json::to_vec(&json!({
            "currency": "EUR",
            "total": 12.5,
            "tax": 2.0,
            "merchant": { "name": "Cafe" }
        }))
        .unwrap();
        assert!(matches!(
            DocumentAiNormalizer.to_canonical(&canonical),
            Err(NormalizeError::MissingDocument)
        ));
    }

    #[test]
    fn test_empty_process_response() {
        let raw = serde_json::to_vec(&json!({ "document": { "text": "" } })).unwrap();
        let expense = DocumentAiNormalizer.to_canonical(&raw).unwrap();
        assert_eq!(expense.total, 0.0);
        assert_eq!(expense.merchant.name, "");
    }
}
