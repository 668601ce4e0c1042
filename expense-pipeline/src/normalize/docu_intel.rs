//! Document Intelligence receipt normalizer
//!
//! Reads `analyzeResult.documents[0].fields` of a prebuilt-receipt result.

use expense_common::models::{Expense, Merchant};
use serde::Deserialize;
use std::collections::HashMap;

use super::{join_timestamp, NormalizeError, Normalizer};
use crate::schema::Schema;

pub struct DocuIntelNormalizer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    analyze_result: AnalyzeResult,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    documents: Vec<AnalyzedDocument>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedDocument {
    #[serde(default)]
    fields: HashMap<String, DocumentField>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentField {
    content: Option<String>,
    value_string: Option<String>,
    value_number: Option<f64>,
    value_date: Option<String>,
    value_time: Option<String>,
    value_phone_number: Option<String>,
    value_address: Option<AddressValue>,
    value_currency: Option<CurrencyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressValue {
    house_number: Option<String>,
    road: Option<String>,
    street_address: Option<String>,
    city: Option<String>,
    city_district: Option<String>,
    country_region: Option<String>,
    postal_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyValue {
    amount: Option<f64>,
    currency_code: Option<String>,
}

impl DocumentField {
    fn text(&self) -> Option<&str> {
        self.value_string
            .as_deref()
            .or(self.content.as_deref())
            .filter(|s| !s.is_empty())
    }

    fn amount(&self) -> Option<f64> {
        self.value_number
            .or_else(|| self.value_currency.as_ref().and_then(|c| c.amount))
    }
}

impl AddressValue {
    /// `street, city, country, postal` with empty parts dropped
    fn formatted(&self) -> String {
        let street = match (&self.street_address, &self.house_number, &self.road) {
            (Some(street), _, _) => Some(street.clone()),
            (None, Some(number), Some(road)) => Some(format!("{} {}", number, road)),
            (None, None, Some(road)) => Some(road.clone()),
            _ => None,
        };
        let city = self.city.clone().or_else(|| self.city_district.clone());

        [street, city, self.country_region.clone(), self.postal_code.clone()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn field_of<'a>(fields: &'a HashMap<String, DocumentField>, name: &str) -> Option<&'a DocumentField> {
    fields.get(name)
}

impl Normalizer for DocuIntelNormalizer {
    fn schema(&self) -> Schema {
        Schema::DocuIntel
    }

    fn to_canonical(&self, raw: &[u8]) -> Result<Expense, NormalizeError> {
        let response: AnalyzeResponse =
            serde_json::from_slice(raw).map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let document = response
            .analyze_result
            .documents
            .into_iter()
            .next()
            .ok_or(NormalizeError::MissingDocument)?;
        let fields = document.fields;
        let field = |name: &str| field_of(&fields, name);

        let mut merchant = Merchant {
            name: field("MerchantName")
                .and_then(DocumentField::text)
                .unwrap_or_default()
                .to_string(),
            address: field("MerchantAddress")
                .map(|f| match &f.value_address {
                    Some(address) => address.formatted(),
                    None => f.content.clone().unwrap_or_default(),
                })
                .unwrap_or_default(),
            phone: field("MerchantPhoneNumber")
                .and_then(|f| f.value_phone_number.as_deref().or(f.content.as_deref()))
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };
        merchant.fill_raw();

        let date = field("TransactionDate")
            .and_then(|f| f.value_date.as_deref())
            .and_then(|d| {
                let time = field("TransactionTime").and_then(|f| f.value_time.as_deref());
                join_timestamp(d, time)
            });

        let currency = field("Total")
            .and_then(|f| f.value_currency.as_ref())
            .and_then(|c| c.currency_code.clone())
            .or_else(|| field("Currency").and_then(DocumentField::text).map(str::to_string))
            .unwrap_or_default();

        Ok(Expense {
            date,
            currency,
            total: field("Total").and_then(DocumentField::amount).unwrap_or_default(),
            tax: field("TotalTax").and_then(DocumentField::amount).unwrap_or_default(),
            merchant,
        })
    }
}
