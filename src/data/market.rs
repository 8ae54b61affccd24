//! Daily closing prices from the Yahoo Finance chart API.

use chrono::{DateTime, NaiveDate};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DataError;

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct MarketDataClient {
    http_client: HttpClient,
    base_url: String,
}

impl MarketDataClient {
    pub fn new() -> Result<Self, DataError> {
        Self::with_base_url(YAHOO_CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, DataError> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) stock-forecast")
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Downloads daily closes for `ticker` in `[start, end)`.
    pub async fn fetch_daily_closes(
        &self,
        ticker: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<PriceRecord>, DataError> {
        let (period1, period2) = parse_range(start, end)?;
        info!("Downloading {} closes from {} to {}", ticker, start, end);

        let url = format!("{}/{}", self.base_url, ticker);
        debug!("GET {} period1={} period2={}", url, period1, period2);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match parse_chart(ticker, &body) {
            Err(DataError::ParseError(_)) if !status.is_success() => Err(DataError::ApiError {
                code: status.as_u16().to_string(),
                description: body,
            }),
            other => other,
        }
    }
}

/// Converts `YYYY-MM-DD` bounds to unix seconds at midnight UTC.
fn parse_range(start: &str, end: &str) -> Result<(i64, i64), DataError> {
    let parse = |value: &str| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| DataError::InvalidDateRange(format!("'{}': {}", value, e)))
    };
    let start_date = parse(start)?;
    let end_date = parse(end)?;

    if end_date <= start_date {
        return Err(DataError::InvalidDateRange(format!(
            "end {} is not after start {}",
            end, start
        )));
    }

    let midnight = |date: NaiveDate| date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    match (midnight(start_date), midnight(end_date)) {
        (Some(p1), Some(p2)) => Ok((p1, p2)),
        _ => Err(DataError::InvalidDateRange(format!("{}..{}", start, end))),
    }
}

fn parse_chart(ticker: &str, body: &str) -> Result<Vec<PriceRecord>, DataError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| DataError::ParseError(e.to_string()))?;

    if let Some(error) = response.chart.error {
        return Err(DataError::ApiError {
            code: error.code,
            description: error.description,
        });
    }

    let empty = || DataError::EmptySeries {
        ticker: ticker.to_string(),
    };
    let data = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(empty)?;
    let closes = data
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    // Rows without a close (halts, partial days) are dropped.
    let records: Vec<PriceRecord> = data
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(&ts, close)| {
            let close = close.filter(|c| c.is_finite())?;
            let date = DateTime::from_timestamp(ts, 0)?.date_naive();
            Some(PriceRecord { date, close })
        })
        .collect();

    if records.is_empty() {
        return Err(empty());
    }

    info!("Received {} daily closes for {}", records.len(), ticker);
    Ok(records)
}
