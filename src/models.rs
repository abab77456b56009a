//! Canonical data model (§3). Inbound messages tolerate many field aliases;
//! everything past the normalization layer uses these strict shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Accepts a JSON string or number, the way feed and REST payloads mix both
/// for price/size fields.
pub fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    value_to_f64(&v).ok_or_else(|| serde::de::Error::custom("expected number or numeric string"))
}

pub fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_str_loose(s: &str) -> Option<Side> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" | "YES" => Some(Side::Buy),
            "SELL" | "NO" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn from_is_buy(is_buy: bool) -> Side {
        if is_buy {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single normalized trade (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub asset_id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub maker: Option<String>,
    pub taker: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// §6 field-alias normalization for a loosely-shaped inbound record.
    pub fn from_raw(raw: &Value) -> Option<Trade> {
        let asset_id = first_string(raw, &["asset_id", "assetId", "market", "token_id", "tokenId"])?;
        let price = first_f64(raw, &["price", "last_price", "lastPrice"])?;
        let size = first_f64(raw, &["size", "amount", "quantity"])?;

        let side = if let Some(s) = first_string(raw, &["side"]) {
            Side::from_str_loose(&s)?
        } else {
            let is_buy = raw
                .get("is_buy")
                .or_else(|| raw.get("isBuy"))
                .and_then(Value::as_bool)?;
            Side::from_is_buy(is_buy)
        };

        let maker = first_string(raw, &["maker", "maker_address"]).map(|a| a.to_lowercase());
        let taker = first_string(raw, &["taker", "taker_address"]).map(|a| a.to_lowercase());

        let id = first_string(raw, &["id", "trade_id"])
            .unwrap_or_else(|| format!("{}-{}", asset_id, Utc::now().timestamp_nanos_opt().unwrap_or_default()));

        let timestamp = first_timestamp(raw, &["timestamp", "created_at", "createdAt"])
            .unwrap_or_else(Utc::now);

        Some(Trade {
            id,
            asset_id,
            price,
            size,
            side,
            maker,
            taker,
            timestamp,
        })
    }

    /// Address used for wallet tracking: maker, else taker.
    pub fn wallet_address(&self) -> Option<&str> {
        self.maker.as_deref().or(self.taker.as_deref())
    }
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Some(v) = raw.get(*k) {
            match v {
                Value::String(s) => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

fn first_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    for k in keys {
        if let Some(v) = raw.get(*k) {
            if let Some(f) = value_to_f64(v) {
                return Some(f);
            }
        }
    }
    None
}

fn first_timestamp(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    for k in keys {
        if let Some(v) = raw.get(*k) {
            if let Some(n) = v.as_i64() {
                return DateTime::from_timestamp_millis(n).or_else(|| DateTime::from_timestamp(n, 0));
            }
            if let Some(s) = v.as_str() {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Some(dt.with_timezone(&Utc));
                }
                if let Ok(n) = s.parse::<i64>() {
                    return DateTime::from_timestamp_millis(n);
                }
            }
        }
    }
    None
}

/// A suspicious-behavior flag attached to a wallet profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousFlag {
    pub flag: String,
    pub added_at: DateTime<Utc>,
    pub metadata: Value,
}

/// Wallet profile (§3). Invariants are enforced by `WalletTracker`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletProfile {
    pub address: String,
    pub first_trade_at: DateTime<Utc>,
    pub last_trade_at: DateTime<Utc>,
    pub total_trades: u64,
    pub total_volume: f64,
    pub avg_trade_size: f64,
    pub max_trade_size: f64,
    pub resolved_positions: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub avg_profit: f64,
    pub risk_score: f64,
    #[serde(default)]
    pub suspicious_flags: Vec<SuspiciousFlag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletProfile {
    pub fn new(address: String, now: DateTime<Utc>) -> Self {
        Self {
            address,
            first_trade_at: now,
            last_trade_at: now,
            total_trades: 0,
            total_volume: 0.0,
            avg_trade_size: 0.0,
            max_trade_size: 0.0,
            resolved_positions: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            avg_profit: 0.0,
            risk_score: 0.0,
            suspicious_flags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn flag_names(&self) -> HashSet<&str> {
        self.suspicious_flags.iter().map(|f| f.flag.as_str()).collect()
    }

    pub fn add_flag(&mut self, flag: &str, metadata: Value, now: DateTime<Utc>) {
        if self.flag_names().contains(flag) {
            return;
        }
        self.suspicious_flags.push(SuspiciousFlag {
            flag: flag.to_string(),
            added_at: now,
            metadata,
        });
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.first_trade_at).num_milliseconds() as f64 / 86_400_000.0
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_days: f64, max_trades: u64) -> bool {
        self.age_days(now) < max_age_days || self.total_trades < max_trades
    }
}

/// Detected pattern (§3), persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: String,
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub event_id: Option<String>,
    pub asset_id: String,
    pub confidence: f64,
    pub direction: Option<Direction>,
    pub severity: Severity,
    pub metadata: Value,
    pub trade_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Whale trade record (§3), persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTradeRecord {
    pub id: String,
    pub asset_id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub notional: f64,
    pub depth_percent: f64,
    pub book_depth: f64,
    pub spread: f64,
    pub spread_percent: f64,
    pub mid_price: f64,
    pub imbalance: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-asset ring-buffer entry for the liquidity tracker (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshotRecord {
    pub asset_id: String,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub total_depth: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid_price: Option<f64>,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Funding event supplied by an external collaborator (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingEvent {
    pub address: String,
    pub source: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Minimal market/event context a signal processor needs. In the full system
/// this is populated from the `events`/`predictions` storage collections
/// (§4.1); §4.9's detectors only ever read the fields below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub event_id: String,
    pub market_id: String,
    pub token_id: String,
    pub liquidity: f64,
    pub end_date: Option<DateTime<Utc>>,
}

/// Output contract shared by every signal processor (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub detected: bool,
    pub confidence: f64,
    pub direction: Option<Direction>,
    pub severity: Severity,
    pub metadata: Value,
}

impl SignalResult {
    pub fn not_detected() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            direction: None,
            severity: Severity::Low,
            metadata: Value::Null,
        }
    }

    /// `calculateAdjustment(signal) = confidence · weight · dirMultiplier`.
    pub fn adjustment(&self, weight: f64) -> f64 {
        let dir_multiplier = match self.direction {
            Some(Direction::Yes) => 1.0,
            Some(Direction::No) => -1.0,
            _ => 0.0,
        };
        self.confidence * weight * dir_multiplier
    }
}

/// Persisted signal record (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub event_id: String,
    pub signal_type: String,
    pub severity: Severity,
    pub confidence: f64,
    pub direction: Option<Direction>,
    pub weight: f64,
    pub adjustment: f64,
    pub metadata: Value,
    pub trade_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trade_from_raw_normalizes_aliases() {
        let raw = json!({
            "asset_id": "tok-1",
            "price": "0.52",
            "amount": 100,
            "side": "buy",
            "maker_address": "0xABC",
            "created_at": "2026-01-01T00:00:00Z",
        });
        let trade = Trade::from_raw(&raw).expect("trade parses");
        assert_eq!(trade.asset_id, "tok-1");
        assert_eq!(trade.price, 0.52);
        assert_eq!(trade.size, 100.0);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.maker.as_deref(), Some("0xabc"));
    }

    #[test]
    fn trade_from_raw_missing_side_uses_is_buy() {
        let raw = json!({
            "token_id": "tok-2",
            "last_price": 0.4,
            "quantity": 5,
            "is_buy": false,
        });
        let trade = Trade::from_raw(&raw).expect("trade parses");
        assert_eq!(trade.side, Side::Sell);
    }

    #[test]
    fn trade_from_raw_missing_required_field_is_none() {
        let raw = json!({ "asset_id": "tok-3", "price": 0.5 });
        assert!(Trade::from_raw(&raw).is_none());
    }

    #[test]
    fn wallet_profile_freshness() {
        let now = Utc::now();
        let mut profile = WalletProfile::new("0xabc".into(), now - chrono::Duration::days(1));
        profile.total_trades = 2;
        assert!(profile.is_fresh(now, 7.0, 10));
        profile.total_trades = 50;
        assert!(profile.is_fresh(now, 7.0, 10)); // still fresh: age < 7 days
    }
}
