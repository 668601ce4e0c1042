//! Translation post-processor
//!
//! Translates the merchant text fields into the target language, unless the
//! document is already written in it.

use async_trait::async_trait;
use expense_common::models::Expense;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{http_client, EnrichError, PostProcessor, Skip};

const FIELD_MERCHANT: &str = "merchant";
const FIELD_ADDRESS: &str = "merchantAddr";
const FIELD_RAW: &str = "merchantStr";

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Language code (e.g. `de`, `en-US`) of `text`
    async fn detect_language(&self, text: &str) -> Result<String, EnrichError>;

    /// Translate every value of `fields`, keeping the keys
    async fn translate(
        &self,
        fields: &BTreeMap<String, String>,
        target: &str,
    ) -> Result<BTreeMap<String, String>, EnrichError>;
}

pub struct TranslationPostProcess {
    service: Arc<dyn TranslationService>,
    target: String,
    fields: BTreeMap<String, String>,
    translations: BTreeMap<String, String>,
}

impl TranslationPostProcess {
    pub fn new(service: Arc<dyn TranslationService>, target: impl Into<String>) -> Self {
        Self {
            service,
            target: target.into(),
            fields: BTreeMap::new(),
            translations: BTreeMap::new(),
        }
    }
}

/// `en-US` matches `en`
fn same_language(detected: &str, target: &str) -> bool {
    let primary = |code: &str| {
        code.split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    primary(detected) == primary(target)
}

#[async_trait]
impl PostProcessor for TranslationPostProcess {
    fn name(&self) -> &'static str {
        "translation"
    }

    async fn collect_fields(&mut self, expense: &Expense) -> Result<(), Skip> {
        let merchant = &expense.merchant;
        let fields: BTreeMap<String, String> = [
            (FIELD_MERCHANT, &merchant.name),
            (FIELD_ADDRESS, &merchant.address),
            (FIELD_RAW, &merchant.raw),
        ]
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();

        if fields.is_empty() {
            return Err(Skip::new("nothing to translate"));
        }

        let sample = fields.values().cloned().collect::<Vec<_>>().join("\n");
        let detected = self
            .service
            .detect_language(&sample)
            .await
            .map_err(|e| Skip::new(format!("language detection failed: {}", e)))?;
        if same_language(&detected, &self.target) {
            return Err(Skip::new(format!("document language is already '{}'", detected)));
        }

        self.fields = fields;
        Ok(())
    }

    async fn resolve(&mut self) -> Result<(), EnrichError> {
        self.translations = self.service.translate(&self.fields, &self.target).await?;
        Ok(())
    }

    fn apply(&self, expense: &mut Expense) {
        for (key, value) in &self.translations {
            match key.as_str() {
                FIELD_MERCHANT => expense.merchant.name = value.clone(),
                FIELD_ADDRESS => expense.merchant.address = value.clone(),
                FIELD_RAW => expense.merchant.raw = value.clone(),
                _ => {}
            }
        }
    }
}

/// Google Cloud Translation v2 (API key)
pub struct GoogleTranslateClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Detections {
    detections: Vec<Vec<Detection>>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    language: String,
}

#[derive(Debug, Deserialize)]
struct Translations {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

impl GoogleTranslateClient {
    pub fn new(endpoint: &str, api_key: String) -> Result<Self, EnrichError> {
        Ok(Self {
            http: http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, EnrichError> {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| EnrichError::Decode(e.to_string()))?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl TranslationService for GoogleTranslateClient {
    async fn detect_language(&self, text: &str) -> Result<String, EnrichError> {
        let data: Detections = self
            .post("/language/translate/v2/detect", json!({ "q": text }))
            .await?;
        data.detections
            .into_iter()
            .flatten()
            .next()
            .map(|d| d.language)
            .ok_or_else(|| EnrichError::Decode("no language detected".to_string()))
    }

    async fn translate(
        &self,
        fields: &BTreeMap<String, String>,
        target: &str,
    ) -> Result<BTreeMap<String, String>, EnrichError> {
        let (keys, texts): (Vec<&String>, Vec<&String>) = fields.iter().unzip();
        let data: Translations = self
            .post(
                "/language/translate/v2",
                json!({ "q": texts, "target": target, "format": "text" }),
            )
            .await?;

        if data.translations.len() != keys.len() {
            return Err(EnrichError::Decode(format!(
                "expected {} translations, got {}",
                keys.len(),
                data.translations.len()
            )));
        }

        Ok(keys
            .into_iter()
            .cloned()
            .zip(data.translations.into_iter().map(|t| t.translated_text))
            .collect())
    }
}
