//! HTTP client for exchange market-data endpoints.
//!
//! - `GET /api/v3/klines?symbol=&interval=&limit=`: historical candles
//! - `GET /api/v3/ping`: connectivity check

use crate::error::{RestError, RestResult};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tickstream_core::{normalize_candles, Candle, Interval, Price, Size, Symbol};
use tracing::{debug, info, warn};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest `limit` the klines endpoint accepts.
pub const MAX_KLINES_LIMIT: u32 = 1000;

/// Client for exchange market-data endpoints.
#[derive(Debug, Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - REST API root (e.g., "https://api.binance.com")
    pub fn new(base_url: impl Into<String>) -> RestResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch up to `limit` most recent candles, oldest first.
    ///
    /// `limit` is clamped to `[1, 1000]`. Rows are sorted by open time and
    /// duplicates keep the later row.
    pub async fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> RestResult<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = limit.clamp(1, MAX_KLINES_LIMIT);
        info!(%symbol, %interval, limit, "Fetching kline snapshot");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", interval.as_str()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%symbol, %interval, %status, "Kline snapshot request failed");
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| RestError::Parse(format!("Failed to parse klines response: {e}")))?;

        let candles = rows
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<RestResult<Vec<_>>>()?;
        let candles = normalize_candles(candles);

        debug!(%symbol, %interval, count = candles.len(), "Kline snapshot received");
        Ok(candles)
    }

    /// Lightweight request used to measure endpoint reachability.
    pub async fn ping(&self) -> RestResult<()> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Parse one `[openTime, open, high, low, close, volume, closeTime, ...]` row.
pub(crate) fn parse_kline_row(row: &[Value]) -> RestResult<Candle> {
    if row.len() < 6 {
        return Err(RestError::Parse(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| RestError::Parse(format!("invalid open time: {}", row[0])))?;

    Ok(Candle::new(
        Candle::time_from_millis(open_time),
        decimal_at::<Price>(row, 1, "open")?,
        decimal_at::<Price>(row, 2, "high")?,
        decimal_at::<Price>(row, 3, "low")?,
        decimal_at::<Price>(row, 4, "close")?,
        decimal_at::<Size>(row, 5, "volume")?,
    ))
}

fn decimal_at<T>(row: &[Value], index: usize, field: &str) -> RestResult<T>
where
    T: std::str::FromStr<Err = rust_decimal::Error>,
{
    let raw = match &row[index] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(RestError::Parse(format!("invalid {field}: {other}")));
        }
    };
    raw.parse()
        .map_err(|e| RestError::Parse(format!("invalid {field} {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1700000040000i64, "43000.10", "43100.00", "42950.50", "43050.25", "12.345",
            1700000099999i64, "531000.1", 42, "6.1", "262000.0", "0"
        ]);
        let candle = parse_kline_row(row.as_array().unwrap()).unwrap();

        assert_eq!(candle.time, 1_700_000_040);
        assert_eq!(candle.open.inner(), dec!(43000.10));
        assert_eq!(candle.close.inner(), dec!(43050.25));
        assert_eq!(candle.volume.inner(), dec!(12.345));
    }

    #[test]
    fn test_parse_kline_row_accepts_numeric_prices() {
        let row = json!([1700000040000i64, 1.5, 2, 1, 1.75, 100]);
        let candle = parse_kline_row(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.high.inner(), dec!(2));
    }

    #[test]
    fn test_parse_kline_row_rejects_short_or_bad_rows() {
        let short = json!([1700000040000i64, "1", "2"]);
        assert!(matches!(
            parse_kline_row(short.as_array().unwrap()),
            Err(RestError::Parse(_))
        ));

        let bad_time = json!(["yesterday", "1", "2", "1", "1", "1"]);
        assert!(parse_kline_row(bad_time.as_array().unwrap()).is_err());

        let bad_price = json!([1700000040000i64, "1", "two", "1", "1", "1"]);
        assert!(parse_kline_row(bad_price.as_array().unwrap()).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = MarketDataClient::new("https://api.binance.com/").unwrap();
        assert_eq!(client.base_url(), "https://api.binance.com");
    }
}
