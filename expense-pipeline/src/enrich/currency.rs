//! Currency conversion post-processor
//!
//! Converts total and tax into the target currency using the historical rate
//! for the Expense date (today when the Expense has no date).

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use expense_common::models::Expense;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{http_client, EnrichError, PostProcessor, Skip};

#[async_trait]
pub trait CurrencyService: Send + Sync {
    /// Units of `to` per unit of `from` on `as_of`
    async fn get_rate(&self, from: &str, to: &str, as_of: NaiveDate) -> Result<f64, EnrichError>;
}

pub struct CurrencyPostProcess {
    service: Arc<dyn CurrencyService>,
    target: String,
    from: String,
    as_of: Option<NaiveDate>,
    rate: Option<f64>,
}

impl CurrencyPostProcess {
    pub fn new(service: Arc<dyn CurrencyService>, target: impl Into<String>) -> Self {
        Self {
            service,
            target: target.into().to_ascii_uppercase(),
            from: String::new(),
            as_of: None,
            rate: None,
        }
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

#[async_trait]
impl PostProcessor for CurrencyPostProcess {
    fn name(&self) -> &'static str {
        "currency"
    }

    async fn collect_fields(&mut self, expense: &Expense) -> Result<(), Skip> {
        let currency = expense.currency.trim();
        if currency.eq_ignore_ascii_case(&self.target) {
            return Err(Skip::new(format!("already in {}", self.target)));
        }
        if !is_currency_code(currency) {
            return Err(Skip::new(format!("no usable currency code '{}'", currency)));
        }
        if expense.total == 0.0 {
            return Err(Skip::new("total is zero"));
        }

        self.from = currency.to_ascii_uppercase();
        self.as_of = Some(
            expense
                .date
                .map(|d| d.date())
                .unwrap_or_else(|| Utc::now().date_naive()),
        );
        Ok(())
    }

    async fn resolve(&mut self) -> Result<(), EnrichError> {
        let as_of = self
            .as_of
            .ok_or_else(|| EnrichError::Config("rate lookup before collect_fields".to_string()))?;
        let rate = self.service.get_rate(&self.from, &self.target, as_of).await?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EnrichError::Decode(format!("implausible rate {}", rate)));
        }
        self.rate = Some(rate);
        Ok(())
    }

    fn apply(&self, expense: &mut Expense) {
        if let Some(rate) = self.rate {
            expense.total *= rate;
            expense.tax *= rate;
            expense.currency = self.target.clone();
        }
    }
}

/// currencyapi.com historical rates
pub struct CurrencyApiClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    data: HashMap<String, RateValue>,
}

#[derive(Debug, Deserialize)]
struct RateValue {
    value: f64,
}

impl CurrencyApiClient {
    pub fn new(endpoint: &str, api_key: String) -> Result<Self, EnrichError> {
        Ok(Self {
            http: http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CurrencyService for CurrencyApiClient {
    async fn get_rate(&self, from: &str, to: &str, as_of: NaiveDate) -> Result<f64, EnrichError> {
        let date = as_of.format("%Y-%m-%d").to_string();
        let response = self
            .http
            .get(format!("{}/v3/historical", self.endpoint))
            .query(&[("date", date.as_str()), ("base_currency", from), ("currencies", to)])
            .header("apikey", &self.api_key)
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

        let parsed: HistoricalResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Decode(e.to_string()))?;
        parsed
            .data
            .get(to)
            .map(|r| r.value)
            .ok_or_else(|| EnrichError::Decode(format!("no {} rate in response", to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::run_post_processors;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedRate {
        rate: Result<f64, ()>,
        calls: AtomicU32,
        last_query: Mutex<Option<(String, String, NaiveDate)>>,
    }

    impl FixedRate {
        fn new(rate: Result<f64, ()>) -> Arc<Self> {
            Arc::new(Self {
                rate,
                calls: AtomicU32::new(0),
                last_query: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CurrencyService for FixedRate {
        async fn get_rate(&self, from: &str, to: &str, as_of: NaiveDate) -> Result<f64, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some((from.into(), to.into(), as_of));
            self.rate
                .map_err(|_| EnrichError::Network("connection refused".into()))
        }
    }

    fn expense(currency: &str, total: f64, tax: f64) -> Expense {
        Expense {
            date: NaiveDate::from_ymd_opt(2024, 1, 15).and_then(|d| d.and_hms_opt(12, 0, 0)),
            currency: currency.into(),
            total,
            tax,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_converts_total_and_tax() {
        let service = FixedRate::new(Ok(0.5));
        let mut pp = CurrencyPostProcess::new(service.clone(), "EUR");
        let mut exp = expense("usd", 40.0, 8.0);

        pp.collect_fields(&exp).await.unwrap();
        pp.resolve().await.unwrap();
        pp.apply(&mut exp);

        assert_eq!(exp.total, 20.0);
        assert_eq!(exp.tax, 4.0);
        assert_eq!(exp.currency, "EUR");
        assert_eq!(
            *service.last_query.lock().unwrap(),
            Some(("USD".into(), "EUR".into(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        );
    }

    #[tokio::test]
    async fn test_skips_target_currency_and_leaves_expense() {
        let service = FixedRate::new(Ok(2.0));
        let mut exp = expense("EUR", 40.0, 8.0);
        let before = exp.clone();

        let mut pp = CurrencyPostProcess::new(service.clone(), "EUR");
        assert!(pp.collect_fields(&exp).await.is_err());

        let report = run_post_processors(
            &mut exp,
            vec![Box::new(CurrencyPostProcess::new(service.clone(), "EUR"))],
        )
        .await;

        assert_eq!(exp, before);
        assert!(report.applied.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skips_bad_code_and_zero_total() {
        let service = FixedRate::new(Ok(2.0));
        for exp in [expense("", 10.0, 0.0), expense("E U", 10.0, 0.0), expense("US$", 1.0, 0.0), expense("GBP", 0.0, 3.0)] {
            let mut pp = CurrencyPostProcess::new(service.clone(), "EUR");
            assert!(pp.collect_fields(&exp).await.is_err(), "{:?}", exp.currency);
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_skips() {
        let service = FixedRate::new(Err(()));
        let mut exp = expense("USD", 40.0, 8.0);
        let before = exp.clone();

        let report =
            run_post_processors(&mut exp, vec![Box::new(CurrencyPostProcess::new(service, "EUR"))]).await;

        assert_eq!(exp, before);
        assert_eq!(report.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_date_uses_today() {
        let service = FixedRate::new(Ok(1.1));
        let mut exp = expense("USD", 1.0, 0.0);
        exp.date = None;

        let mut pp = CurrencyPostProcess::new(service.clone(), "EUR");
        pp.collect_fields(&exp).await.unwrap();
        pp.resolve().await.unwrap();

        let (_, _, as_of) = service.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(as_of, Utc::now().date_naive());
    }

    #[tokio::test]
    async fn test_currencyapi_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/historical"))
            .and(query_param("date", "2024-01-15"))
            .and(query_param("base_currency", "USD"))
            .and(query_param("currencies", "EUR"))
            .and(header("apikey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": { "last_updated_at": "2024-01-15T23:59:59Z" },
                "data": { "EUR": { "code": "EUR", "value": 0.9134 } }
            })))
            .mount(&server)
            .await;

        let client = CurrencyApiClient::new(&server.uri(), "k".into()).unwrap();
        let rate = client
            .get_rate("USD", "EUR", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .await
            .unwrap();
        assert_eq!(rate, 0.9134);

        let missing = client
            .get_rate("USD", "JPY", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_currencyapi_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = CurrencyApiClient::new(&server.uri(), "k".into()).unwrap();
        let err = client
            .get_rate("USD", "EUR", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Status { status: 429, .. }));
    }
}
