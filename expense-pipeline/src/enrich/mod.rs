//! Enrichment post-processors
//!
//! Each post-processor runs in three steps:
//! 1. `collect_fields` copies what it needs from the Expense and checks its
//!    preconditions. A [`Skip`] here is not an error.
//! 2. `resolve` performs the external lookup (rate, translation).
//! 3. `apply` writes the result back into the Expense.
//!
//! A skip or a lookup failure drops only that post-processor; the next one
//! still runs and the Record never fails because of enrichment.

pub mod currency;
pub mod translation;

pub use currency::{CurrencyApiClient, CurrencyPostProcess, CurrencyService};
pub use translation::{GoogleTranslateClient, TranslationPostProcess, TranslationService};

use async_trait::async_trait;
use expense_common::config::{CurrencyConfig, TranslationConfig};
use expense_common::models::Expense;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Timeout for a single enrichment service request
pub(crate) const SERVICE_TIMEOUT: Duration = Duration::from_secs(15);

/// Unmet precondition; the post-processor is skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Skip(pub String);

impl Skip {
    pub fn new(reason: impl Into<String>) -> Self {
        Skip(reason.into())
    }
}

/// External lookup failure
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected service status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cannot decode service response: {0}")]
    Decode(String),

    #[error("Service configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EnrichError {
    fn from(e: reqwest::Error) -> Self {
        EnrichError::Network(e.to_string())
    }
}

#[async_trait]
pub trait PostProcessor: Send {
    fn name(&self) -> &'static str;

    async fn collect_fields(&mut self, expense: &Expense) -> Result<(), Skip>;

    async fn resolve(&mut self) -> Result<(), EnrichError>;

    /// Only called after `collect_fields` and `resolve` both succeeded
    fn apply(&self, expense: &mut Expense);
}

/// What happened to each post-processor in one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichReport {
    pub applied: Vec<&'static str>,
    /// Name and reason
    pub skipped: Vec<(&'static str, String)>,
}

/// Run `processors` in order over `expense`
pub async fn run_post_processors(
    expense: &mut Expense,
    processors: Vec<Box<dyn PostProcessor>>,
) -> EnrichReport {
    let mut report = EnrichReport::default();

    for mut processor in processors {
        let name = processor.name();

        if let Err(skip) = processor.collect_fields(expense).await {
            debug!(post_processor = name, reason = %skip, "Post-processor skipped");
            report.skipped.push((name, skip.0));
            continue;
        }

        if let Err(e) = processor.resolve().await {
            info!(post_processor = name, error = %e, "Post-processor lookup failed, skipping");
            report.skipped.push((name, e.to_string()));
            continue;
        }

        processor.apply(expense);
        report.applied.push(name);
    }

    report
}

/// Builds the post-processor chain for each run: currency, then translation
#[derive(Clone, Default)]
pub struct Enricher {
    currency: Option<(Arc<dyn CurrencyService>, String)>,
    translation: Option<(Arc<dyn TranslationService>, String)>,
}

impl Enricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_currency(mut self, service: Arc<dyn CurrencyService>, target: impl Into<String>) -> Self {
        self.currency = Some((service, target.into()));
        self
    }

    pub fn with_translation(
        mut self,
        service: Arc<dyn TranslationService>,
        target: impl Into<String>,
    ) -> Self {
        self.translation = Some((service, target.into()));
        self
    }

    /// Wire the configured services; absent sections disable that step
    pub fn from_config(
        currency: Option<&CurrencyConfig>,
        translation: Option<&TranslationConfig>,
    ) -> Result<Self, EnrichError> {
        let mut enricher = Self::new();

        if let Some(config) = currency {
            match config {
                CurrencyConfig::CurrencyApi {
                    endpoint,
                    auth_key,
                    target,
                } => {
                    let key = auth_key.clone().ok_or_else(|| {
                        EnrichError::Config("currencyapi requires an auth key".to_string())
                    })?;
                    info!(endpoint = %endpoint, target = %target, "Currency conversion enabled");
                    enricher = enricher
                        .with_currency(Arc::new(CurrencyApiClient::new(endpoint, key)?), target.clone());
                }
            }
        }

        if let Some(config) = translation {
            match config {
                TranslationConfig::Google {
                    endpoint,
                    api_key,
                    target,
                } => {
                    let key = api_key.clone().ok_or_else(|| {
                        EnrichError::Config("google translation requires an api key".to_string())
                    })?;
                    info!(endpoint = %endpoint, target = %target, "Translation enabled");
                    enricher = enricher.with_translation(
                        Arc::new(GoogleTranslateClient::new(endpoint, key)?),
                        target.clone(),
                    );
                }
            }
        }

        Ok(enricher)
    }

    fn post_processors(&self) -> Vec<Box<dyn PostProcessor>> {
        let mut chain: Vec<Box<dyn PostProcessor>> = Vec::new();
        if let Some((service, target)) = &self.currency {
            chain.push(Box::new(CurrencyPostProcess::new(service.clone(), target.clone())));
        }
        if let Some((service, target)) = &self.translation {
            chain.push(Box::new(TranslationPostProcess::new(service.clone(), target.clone())));
        }
        chain
    }

    pub async fn run(&self, expense: &mut Expense) -> EnrichReport {
        run_post_processors(expense, self.post_processors()).await
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, EnrichError> {
    reqwest::Client::builder()
        .timeout(SERVICE_TIMEOUT)
        .build()
        .map_err(|e| EnrichError::Config(format!("Failed to create HTTP client: {}", e)))
}
