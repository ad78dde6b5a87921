//! Provider adapter contract.
//!
//! One adapter per external data source. Adapters own response-shape
//! normalization: everything handed back to the core uses the partial-record
//! and candle schemas below, and every failure is one of the typed classes
//! in [`ProviderError`](super::error::ProviderError).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{HoneypotRisk, OhlcvCandle};

use super::error::ProviderError;

/// Which field groups a fetch should cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet {
    pub market: bool,
    pub activity: bool,
    pub holders: bool,
    pub security: bool,
}

impl FieldSet {
    pub fn all() -> Self {
        Self {
            market: true,
            activity: true,
            holders: true,
            security: true,
        }
    }

    pub fn market_activity() -> Self {
        Self {
            market: true,
            activity: true,
            holders: true,
            ..Self::default()
        }
    }

    pub fn security_only() -> Self {
        Self {
            security: true,
            ..Self::default()
        }
    }
}

/// Candle timeframes the engine asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H6,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H6 => "6h",
        }
    }
}

/// Fields a provider returned for one token. All optional; `None` means the
/// provider had nothing to say, never "zero".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialRecord {
    pub symbol: Option<String>,
    pub display_name: Option<String>,

    pub market_cap: Option<f64>,
    pub price: Option<f64>,
    pub liquidity: Option<f64>,
    pub volume_24h: Option<f64>,
    pub trades_24h: Option<u64>,
    pub holder_count: Option<u64>,
    pub unique_traders_24h: Option<u64>,

    pub security_score: Option<f64>,
    pub dev_holding_pct: Option<f64>,
    pub honeypot_risk: Option<HoneypotRisk>,
    pub liquidity_locked: Option<bool>,
    pub verified_contract: Option<bool>,

    /// Set by adapters whose lookup is attested (verified listings and the
    /// like). Gives the record merge priority.
    #[serde(default)]
    pub verified: bool,
}

impl PartialRecord {
    /// True when nothing useful came back.
    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.display_name.is_none()
            && self.market_cap.is_none()
            && self.price.is_none()
            && self.liquidity.is_none()
            && self.volume_24h.is_none()
            && self.trades_24h.is_none()
            && self.holder_count.is_none()
            && self.unique_traders_24h.is_none()
            && self.security_score.is_none()
            && self.dev_holding_pct.is_none()
            && self.honeypot_risk.is_none()
            && self.liquidity_locked.is_none()
            && self.verified_contract.is_none()
    }
}

/// The contract every external data source implements.
///
/// Batch endpoints are optional; the planner consults the capability flags
/// and goes straight to individual calls when a provider has none.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_batch(&self) -> bool {
        false
    }

    fn supports_ohlcv_batch(&self) -> bool {
        false
    }

    async fn batch_fetch(
        &self,
        keys: &[String],
        fields: FieldSet,
    ) -> Result<HashMap<String, PartialRecord>, ProviderError>;

    async fn single_fetch(
        &self,
        key: &str,
        fields: FieldSet,
    ) -> Result<Option<PartialRecord>, ProviderError>;

    async fn ohlcv_fetch(
        &self,
        key: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Option<Vec<OhlcvCandle>>, ProviderError>;

    async fn ohlcv_batch_fetch(
        &self,
        keys: &[String],
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<HashMap<String, Vec<OhlcvCandle>>, ProviderError> {
        let _ = (keys, timeframe, limit);
        Err(ProviderError::NotFound)
    }
}
