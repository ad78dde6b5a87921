//! Generic REST provider adapter.
//!
//! Wraps a JSON-over-HTTPS market-data API behind the adapter contract.
//! Response-shape quirks stop here: whatever the wire uses, the core sees
//! `PartialRecord`s and normalized candles.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::models::{HoneypotRisk, OhlcvCandle};

use super::adapter::{FieldSet, PartialRecord, ProviderAdapter, Timeframe};
use super::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub supports_batch: bool,
    pub supports_ohlcv_batch: bool,
}

pub struct RestProviderAdapter {
    config: RestProviderConfig,
    client: Client,
}

impl RestProviderAdapter {
    pub fn new(config: RestProviderConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent("gemscout/0.1");

        if let Some(key) = &config.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                "X-API-KEY",
                key.parse().context("invalid provider api key")?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .with_context(|| format!("failed to build http client for {}", config.name))?;

        Ok(Self { config, client })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Map transport and status failures onto the typed error classes.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Server(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            resp.json::<T>()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::RateLimit)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ProviderError::Auth)
        } else if status.is_server_error() {
            Err(ProviderError::Server(format!("status {status}")))
        } else {
            Err(ProviderError::Server(format!("unexpected status {status}")))
        }
    }
}

/// One token's fields as providers commonly ship them.
#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(alias = "address", alias = "mint")]
    token_key: Option<String>,
    symbol: Option<String>,
    #[serde(alias = "name")]
    display_name: Option<String>,
    #[serde(alias = "mc", alias = "marketCap")]
    market_cap: Option<f64>,
    price: Option<f64>,
    liquidity: Option<f64>,
    #[serde(alias = "v24hUSD", alias = "volume24h")]
    volume_24h: Option<f64>,
    #[serde(alias = "trade24h", alias = "txns24h")]
    trades_24h: Option<u64>,
    #[serde(alias = "holder", alias = "holders")]
    holder_count: Option<u64>,
    #[serde(alias = "uniqueWallet24h")]
    unique_traders_24h: Option<u64>,
    #[serde(alias = "securityScore")]
    security_score: Option<f64>,
    #[serde(alias = "devHoldingPct", alias = "creatorPercentage")]
    dev_holding_pct: Option<f64>,
    #[serde(alias = "honeypotRisk")]
    honeypot_risk: Option<String>,
    #[serde(alias = "liquidityLocked")]
    liquidity_locked: Option<bool>,
    #[serde(alias = "verifiedContract", alias = "verified")]
    verified_contract: Option<bool>,
}

impl TokenPayload {
    fn into_record(self, fields: FieldSet) -> PartialRecord {
        let mut rec = PartialRecord::default();

        if fields.market {
            rec.symbol = self.symbol;
            rec.display_name = self.display_name;
            rec.market_cap = self.market_cap;
            rec.price = self.price;
            rec.liquidity = self.liquidity;
        }
        if fields.activity {
            rec.volume_24h = self.volume_24h;
            rec.trades_24h = self.trades_24h;
            rec.unique_traders_24h = self.unique_traders_24h;
        }
        if fields.holders {
            rec.holder_count = self.holder_count;
        }
        if fields.security {
            rec.security_score = self.security_score;
            rec.dev_holding_pct = self.dev_holding_pct;
            rec.honeypot_risk = self.honeypot_risk.as_deref().map(parse_honeypot);
            rec.liquidity_locked = self.liquidity_locked;
            rec.verified_contract = self.verified_contract;
        }

        rec
    }
}

fn parse_honeypot(raw: &str) -> HoneypotRisk {
    match raw.to_ascii_lowercase().as_str() {
        "low" | "none" | "safe" => HoneypotRisk::Low,
        "medium" | "warn" => HoneypotRisk::Medium,
        "high" | "danger" => HoneypotRisk::High,
        _ => HoneypotRisk::Unknown,
    }
}

/// Candle rows arrive under long or abbreviated field names depending on the
/// endpoint; both decode to the same normalized form.
#[derive(Debug, Deserialize)]
struct CandlePayload {
    #[serde(alias = "o")]
    open: f64,
    #[serde(alias = "h")]
    high: f64,
    #[serde(alias = "l")]
    low: f64,
    #[serde(alias = "c")]
    close: f64,
    #[serde(alias = "v")]
    volume: f64,
    #[serde(alias = "t", alias = "unixTime")]
    unix_time: i64,
}

impl From<CandlePayload> for OhlcvCandle {
    fn from(p: CandlePayload) -> Self {
        OhlcvCandle {
            open: p.open,
            high: p.high,
            low: p.low,
            close: p.close,
            volume: p.volume,
            unix_time: p.unix_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenListResponse {
    #[serde(alias = "data", alias = "items")]
    tokens: Vec<TokenPayload>,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(alias = "data", alias = "items")]
    candles: Vec<CandlePayload>,
}

#[derive(Debug, Deserialize)]
struct BatchCandlesResponse {
    #[serde(alias = "data")]
    items: HashMap<String, Vec<CandlePayload>>,
}

#[async_trait]
impl ProviderAdapter for RestProviderAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports_batch(&self) -> bool {
        self.config.supports_batch
    }

    fn supports_ohlcv_batch(&self) -> bool {
        self.config.supports_ohlcv_batch
    }

    async fn batch_fetch(
        &self,
        keys: &[String],
        fields: FieldSet,
    ) -> Result<HashMap<String, PartialRecord>, ProviderError> {
        let resp: TokenListResponse = self
            .get_json(
                self.url("/v1/tokens"),
                &[("keys", keys.join(","))],
            )
            .await?;

        let mut out = HashMap::with_capacity(resp.tokens.len());
        for payload in resp.tokens {
            let Some(key) = payload.token_key.clone() else {
                continue;
            };
            let mut rec = payload.into_record(fields);
            rec.verified = true;
            out.insert(key, rec);
        }
        Ok(out)
    }

    async fn single_fetch(
        &self,
        key: &str,
        fields: FieldSet,
    ) -> Result<Option<PartialRecord>, ProviderError> {
        let resp: Result<TokenPayload, ProviderError> = self
            .get_json(self.url(&format!("/v1/tokens/{key}")), &[])
            .await;

        match resp {
            Ok(payload) => {
                let rec = payload.into_record(fields);
                Ok((!rec.is_empty()).then_some(rec))
            }
            Err(ProviderError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn ohlcv_fetch(
        &self,
        key: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Option<Vec<OhlcvCandle>>, ProviderError> {
        let query = [
            ("timeframe", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let resp: Result<CandlesResponse, ProviderError> = self
            .get_json(self.url(&format!("/v1/ohlcv/{key}")), &query)
            .await;

        match resp {
            Ok(r) if r.candles.is_empty() => Ok(None),
            Ok(r) => Ok(Some(r.candles.into_iter().map(Into::into).collect())),
            Err(ProviderError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn ohlcv_batch_fetch(
        &self,
        keys: &[String],
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<HashMap<String, Vec<OhlcvCandle>>, ProviderError> {
        let resp: BatchCandlesResponse = self
            .get_json(
                self.url("/v1/ohlcv"),
                &[
                    ("keys", keys.join(",")),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(resp
            .items
            .into_iter()
            .map(|(k, candles)| (k, candles.into_iter().map(Into::into).collect()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_decodes_both_shapes() {
        let long = r#"{"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":100.0,"unix_time":1700000000}"#;
        let short = r#"{"o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":100.0,"t":1700000000}"#;

        let a: CandlePayload = serde_json::from_str(long).unwrap();
        let b: CandlePayload = serde_json::from_str(short).unwrap();
        assert_eq!(OhlcvCandle::from(a), OhlcvCandle::from(b));
    }

    #[test]
    fn field_set_limits_what_lands_in_the_record() {
        let payload: TokenPayload = serde_json::from_str(
            r#"{"address":"abc","symbol":"GEM","marketCap":50000.0,"holders":300,"securityScore":80.0}"#,
        )
        .unwrap();

        let rec = payload.into_record(FieldSet::security_only());
        assert!(rec.symbol.is_none());
        assert!(rec.market_cap.is_none());
        assert!(rec.holder_count.is_none());
        assert_eq!(rec.security_score, Some(80.0));
    }

    #[test]
    fn honeypot_strings_normalize() {
        assert_eq!(parse_honeypot("LOW"), HoneypotRisk::Low);
        assert_eq!(parse_honeypot("danger"), HoneypotRisk::High);
        assert_eq!(parse_honeypot("???"), HoneypotRisk::Unknown);
    }
}
