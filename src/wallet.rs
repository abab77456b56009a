//! Wallet tracker and funding analyzer (§4.5).
//!
//! Grounded on `signals::wallet_analytics`'s separation of scoring math from
//! storage, and on the reference backend's general style of pure free
//! functions for anything that needs unit testing in isolation from an
//! `Arc<RwLock<...>>`-guarded struct.

use crate::models::{SuspiciousFlag, Trade, WalletProfile};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MAX_AGE_DAYS: f64 = 7.0;
pub const DEFAULT_MAX_TRADES: u64 = 10;
pub const MIN_RESOLVED_POSITIONS: u64 = 20;
pub const MIN_WIN_RATE_FOR_FLAG: f64 = 0.7;

fn flag_weight(flag: &str) -> f64 {
    match flag {
        "high_win_rate" => 10.0,
        "fresh_wallet_large_trade" => 8.0,
        "sniper_cluster_member" => 8.0,
        "unusual_timing" => 6.0,
        "liquidity_impact" => 6.0,
        "coordinated_trading" => 10.0,
        "rapid_position_close" => 5.0,
        _ => 3.0,
    }
}

/// Additive, capped risk score (§4.5).
pub fn calculate_risk_score(profile: &WalletProfile, min_trade_size: f64) -> f64 {
    let mut score = 0.0;

    if profile.resolved_positions >= MIN_RESOLVED_POSITIONS {
        score += if profile.win_rate >= 0.9 {
            30.0
        } else if profile.win_rate >= MIN_WIN_RATE_FOR_FLAG {
            15.0 + (profile.win_rate - MIN_WIN_RATE_FOR_FLAG) / (0.9 - MIN_WIN_RATE_FOR_FLAG) * 15.0
        } else {
            0.0
        };
    }

    let now = Utc::now();
    if profile.is_fresh(now, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_TRADES) && profile.avg_trade_size >= min_trade_size {
        score += 5.0 * (profile.avg_trade_size / min_trade_size).min(5.0);
    }

    if profile.avg_trade_size > 0.0 {
        let ratio = profile.max_trade_size / profile.avg_trade_size;
        score += if ratio > 10.0 {
            20.0
        } else if ratio > 5.0 {
            10.0
        } else if ratio > 3.0 {
            5.0
        } else {
            0.0
        };
    }

    for flag in &profile.suspicious_flags {
        score += flag_weight(&flag.flag);
    }

    score.min(100.0)
}

fn trade_size(trade: &Trade) -> f64 {
    // §4.5: first present of numeric size (already normalized onto
    // `Trade::size`), price*quantity, or makerAmount. The canonical `Trade`
    // shape only ever carries `size`, since aliasing was already resolved by
    // `Trade::from_raw` — this function is the size the tracker uses as-is.
    trade.size
}

pub struct WalletTracker {
    storage: Arc<Storage>,
    min_trade_size: f64,
}

impl WalletTracker {
    pub fn new(storage: Arc<Storage>, min_trade_size: f64) -> Self {
        Self {
            storage,
            min_trade_size,
        }
    }

    /// §4.5 `trackTrade`.
    pub fn track_trade(&self, trade: &Trade) -> anyhow::Result<WalletProfile> {
        let address = trade
            .wallet_address()
            .ok_or_else(|| anyhow::anyhow!("trade has no maker/taker address"))?
            .to_lowercase();

        let now = trade.timestamp;
        let mut profile = self
            .storage
            .get_wallet_profile(&address)
            .unwrap_or_else(|| WalletProfile::new(address.clone(), now));

        let size = trade_size(trade);
        profile.total_trades += 1;
        profile.total_volume += size;
        profile.last_trade_at = now;
        profile.first_trade_at = profile.first_trade_at.min(now);
        profile.avg_trade_size = profile.total_volume / profile.total_trades as f64;
        profile.max_trade_size = profile.max_trade_size.max(size);
        profile.updated_at = now;

        self.check_suspicious_patterns(&mut profile, size, now);
        profile.risk_score = calculate_risk_score(&profile, self.min_trade_size);

        self.storage.upsert_wallet_profile(profile.clone());
        Ok(profile)
    }

    fn check_suspicious_patterns(&self, profile: &mut WalletProfile, trade_size: f64, now: DateTime<Utc>) {
        if profile.is_fresh(now, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_TRADES) && trade_size >= self.min_trade_size {
            profile.add_flag(
                "fresh_wallet_large_trade",
                json!({ "trade_size": trade_size }),
                now,
            );
        }
        if profile.avg_trade_size > 0.0 && trade_size > 5.0 * profile.avg_trade_size {
            profile.add_flag(
                "unusual_trade_size",
                json!({ "trade_size": trade_size, "avg_trade_size": profile.avg_trade_size }),
                now,
            );
        }
    }

    /// §4.5 `updateWalletOnResolution`.
    pub fn update_wallet_on_resolution(&self, address: &str, won: bool, profit: f64) -> anyhow::Result<WalletProfile> {
        let address = address.to_lowercase();
        let mut profile = self
            .storage
            .get_wallet_profile(&address)
            .ok_or_else(|| anyhow::anyhow!("no profile for {address}"))?;

        profile.resolved_positions += 1;
        if won {
            profile.wins += 1;
        } else {
            profile.losses += 1;
        }
        profile.win_rate = if profile.resolved_positions > 0 {
            profile.wins as f64 / profile.resolved_positions as f64
        } else {
            0.0
        };
        let n = profile.resolved_positions as f64;
        profile.avg_profit = profile.avg_profit + (profit - profile.avg_profit) / n;

        let now = Utc::now();
        if profile.resolved_positions >= MIN_RESOLVED_POSITIONS && profile.win_rate >= MIN_WIN_RATE_FOR_FLAG {
            profile.add_flag(
                "high_win_rate",
                json!({ "win_rate": profile.win_rate, "resolved_positions": profile.resolved_positions }),
                now,
            );
        }
        profile.risk_score = calculate_risk_score(&profile, self.min_trade_size);
        profile.updated_at = now;

        self.storage.upsert_wallet_profile(profile.clone());
        Ok(profile)
    }

    pub fn profile(&self, address: &str) -> Option<WalletProfile> {
        self.storage.get_wallet_profile(address)
    }
}

/// Wallet-cluster discovery (§4.5 `FundingAnalyzer`). Funding events are
/// supplied by an external collaborator; this analyzer only indexes and
/// scores them.
pub struct FundingAnalyzer {
    by_address: HashMap<String, Vec<crate::models::FundingEvent>>,
    by_source: HashMap<String, Vec<String>>,
}

impl FundingAnalyzer {
    pub fn new() -> Self {
        Self {
            by_address: HashMap::new(),
            by_source: HashMap::new(),
        }
    }

    pub fn record_funding_event(&mut self, event: crate::models::FundingEvent) {
        self.by_source
            .entry(event.source.clone())
            .or_default()
            .push(event.address.clone());
        self.by_address.entry(event.address.clone()).or_default().push(event);
    }

    pub fn primary_funding_source(&self, address: &str) -> Option<String> {
        let events = self.by_address.get(address)?;
        let mut totals: HashMap<&str, f64> = HashMap::new();
        for e in events {
            *totals.entry(e.source.as_str()).or_insert(0.0) += e.amount;
        }
        totals
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(source, _)| source.to_string())
    }

    /// §4.5 cluster-build confidence: 0.4 same-source, 0.3 same-source funded
    /// within 1h of seed, 0.2 × (commonMarkets/seedMarkets) if commonMarkets
    /// ≥ 2, 0.1 for round-trip. Market-overlap and round-trip inputs are
    /// supplied by the caller (sniper-cluster detector), since they depend on
    /// trade history the funding analyzer doesn't own.
    pub fn connection_confidence(
        &self,
        seed: &str,
        candidate: &str,
        common_markets: usize,
        seed_markets: usize,
        round_trip: bool,
    ) -> f64 {
        let mut confidence = 0.0;

        let seed_source = self.primary_funding_source(seed);
        let candidate_source = self.primary_funding_source(candidate);
        let same_source = seed_source.is_some() && seed_source == candidate_source;

        if same_source {
            confidence += 0.4;

            if let (Some(seed_events), Some(candidate_events)) =
                (self.by_address.get(seed), self.by_address.get(candidate))
            {
                let seed_time = seed_events.first().map(|e| e.timestamp);
                let within_hour = candidate_events.iter().any(|c| {
                    seed_time
                        .map(|st| (c.timestamp - st).num_minutes().abs() <= 60)
                        .unwrap_or(false)
                });
                if within_hour {
                    confidence += 0.3;
                }
            }
        }

        if common_markets >= 2 && seed_markets > 0 {
            confidence += 0.2 * (common_markets as f64 / seed_markets as f64);
        }

        if round_trip {
            confidence += 0.1;
        }

        confidence.min(1.0)
    }
}

impl Default for FundingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn make_trade(asset_id: &str, maker: &str, size: f64, timestamp: DateTime<Utc>) -> Trade {
        Trade {
            id: format!("t-{}", timestamp.timestamp_nanos_opt().unwrap()),
            asset_id: asset_id.to_string(),
            price: 0.5,
            size,
            side: Side::Buy,
            maker: Some(maker.to_string()),
            taker: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn track_trade_updates_profile_stats() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::load(dir.path()).await.unwrap());
        let tracker = WalletTracker::new(storage, 0.02);

        let now = Utc::now();
        tracker.track_trade(&make_trade("tok-1", "0xabc", 100.0, now)).unwrap();
        let profile = tracker.track_trade(&make_trade("tok-1", "0xabc", 300.0, now)).unwrap();

        assert_eq!(profile.total_trades, 2);
        assert_eq!(profile.total_volume, 400.0);
        assert_eq!(profile.avg_trade_size, 200.0);
        assert_eq!(profile.max_trade_size, 300.0);
    }

    #[test]
    fn risk_score_capped_at_100() {
        let mut profile = WalletProfile::new("0xabc".into(), Utc::now() - chrono::Duration::days(200));
        profile.resolved_positions = 50;
        profile.wins = 48;
        profile.win_rate = 0.96;
        profile.avg_trade_size = 1.0;
        profile.max_trade_size = 50.0;
        for flag in ["high_win_rate", "coordinated_trading", "sniper_cluster_member"] {
            profile.add_flag(flag, json!({}), Utc::now());
        }
        let score = calculate_risk_score(&profile, 0.02);
        assert!(score <= 100.0);
        assert!(score > 50.0);
    }

    #[test]
    fn funding_analyzer_same_source_confidence() {
        let mut analyzer = FundingAnalyzer::new();
        let now = Utc::now();
        analyzer.record_funding_event(crate::models::FundingEvent {
            address: "0xseed".into(),
            source: "0xfunder".into(),
            amount: 1000.0,
            timestamp: now,
        });
        analyzer.record_funding_event(crate::models::FundingEvent {
            address: "0xcandidate".into(),
            source: "0xfunder".into(),
            amount: 500.0,
            timestamp: now + chrono::Duration::minutes(30),
        });

        let confidence = analyzer.connection_confidence("0xseed", "0xcandidate", 0, 0, false);
        assert!((confidence - 0.7).abs() < 1e-9);
    }
}
