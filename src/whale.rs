//! Whale detector and probability adjuster (§4.8).
//!
//! The per-asset decaying signal blend is grounded on the reference
//! backend's `signals::wallet_analytics` style of holding small per-entity
//! numeric state behind a lock and recomputing it on each update, rather than
//! the teacher's own (unrelated) whale logic — there isn't a direct analog in
//! the pack for the decay math, so this is original within that idiom.

use crate::analyzer::AnalyzedBook;
use crate::models::{Side, WhaleTradeRecord};
use crate::orderbook::OrderBook;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

pub const DEFAULT_MIN_NOTIONAL_USD: f64 = 1000.0;
pub const DEFAULT_DEPTH_THRESHOLD_PERCENT: f64 = 5.0;
pub const DEFAULT_WHALE_WEIGHT: f64 = 0.15;
pub const DEFAULT_DECAY_HALF_LIFE_MS: i64 = 300_000;
pub const DEFAULT_MAX_SIGNAL_AGE_MS: i64 = 1_800_000;

pub struct WhaleDetector {
    min_notional_usd: f64,
    depth_threshold_percent: f64,
}

impl WhaleDetector {
    pub fn new(min_notional_usd: f64, depth_threshold_percent: f64) -> Self {
        Self {
            min_notional_usd,
            depth_threshold_percent,
        }
    }

    /// §4.8 `analyzeTrade`. Returns `None` if the trade doesn't clear either
    /// threshold, or the book isn't initialized.
    pub fn analyze_trade(
        &self,
        asset_id: &str,
        price: f64,
        size: f64,
        side: Side,
        book: &OrderBook,
    ) -> Option<WhaleTradeRecord> {
        if !book.initialized {
            return None;
        }

        let notional = size * price;
        if notional < self.min_notional_usd {
            return None;
        }

        let analyzed: AnalyzedBook = crate::analyzer::OrderBookAnalyzer::analyze(book);
        let relevant_depth = match side {
            Side::Buy => analyzed.ask_depth,
            Side::Sell => analyzed.bid_depth,
        };
        if relevant_depth == 0.0 {
            return None;
        }

        let depth_percent = size / relevant_depth * 100.0;
        if depth_percent < self.depth_threshold_percent {
            return None;
        }

        Some(WhaleTradeRecord {
            id: format!("whale-{}-{}", asset_id, Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            asset_id: asset_id.to_string(),
            price,
            size,
            side,
            notional,
            depth_percent,
            book_depth: relevant_depth,
            spread: analyzed.spread,
            spread_percent: analyzed.spread_percent,
            mid_price: analyzed.mid_price,
            imbalance: analyzed.imbalance,
            timestamp: Utc::now(),
        })
    }
}

impl Default for WhaleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_NOTIONAL_USD, DEFAULT_DEPTH_THRESHOLD_PERCENT)
    }
}

#[derive(Debug, Clone)]
struct WhaleSignal {
    direction: f64,
    strength: f64,
    timestamp: DateTime<Utc>,
    trades: u64,
    total_notional: f64,
}

pub struct ProbabilityAdjuster {
    signals: RwLock<HashMap<String, WhaleSignal>>,
    whale_weight: f64,
    decay_half_life_ms: i64,
    max_signal_age_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct WhaleActivity {
    pub effective_strength: f64,
    pub net_direction: f64,
    pub trades: u64,
    pub total_notional: f64,
    pub age_ms: i64,
}

impl ProbabilityAdjuster {
    pub fn new(whale_weight: f64, decay_half_life_ms: i64, max_signal_age_ms: i64) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            whale_weight,
            decay_half_life_ms,
            max_signal_age_ms,
        }
    }

    fn decay_factor(&self, age_ms: i64) -> f64 {
        0.5_f64.powf(age_ms as f64 / self.decay_half_life_ms as f64)
    }

    /// §4.8 `recordWhaleTrade`.
    pub fn record_whale_trade(&self, whale: &WhaleTradeRecord) {
        let raw_direction = match whale.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        let raw_strength = (whale.depth_percent / 20.0).min(1.0);
        let now = Utc::now();

        let mut signals = self.signals.write();
        let entry = signals.get(&whale.asset_id).cloned();

        let (combined_direction, combined_strength) = match entry {
            Some(existing) => {
                let age_ms = (now - existing.timestamp).num_milliseconds();
                let decayed_strength = existing.strength * self.decay_factor(age_ms);
                let denom = decayed_strength * 0.5 + raw_strength;
                let direction = if denom > 0.0 {
                    (existing.direction * decayed_strength * 0.5 + raw_direction * raw_strength) / denom
                } else {
                    raw_direction
                };
                (direction, (decayed_strength * 0.5 + raw_strength).min(1.0))
            }
            None => (raw_direction, raw_strength),
        };

        let trades = entry.as_ref().map(|s| s.trades).unwrap_or(0) + 1;
        let total_notional = entry.as_ref().map(|s| s.total_notional).unwrap_or(0.0) + whale.notional;

        signals.insert(
            whale.asset_id.clone(),
            WhaleSignal {
                direction: combined_direction,
                strength: combined_strength,
                timestamp: now,
                trades,
                total_notional,
            },
        );
    }

    /// §4.8 `getAdjustedProbability`. Clamped to [0.01, 0.99].
    pub fn get_adjusted_probability(&self, asset_id: &str, base: f64) -> f64 {
        let now = Utc::now();
        let mut signals = self.signals.write();
        let Some(signal) = signals.get(asset_id) else {
            return base;
        };
        let age_ms = (now - signal.timestamp).num_milliseconds();
        if age_ms > self.max_signal_age_ms {
            signals.remove(asset_id);
            return base;
        }
        let decay = self.decay_factor(age_ms);
        let adjustment = signal.direction * signal.strength * decay * self.whale_weight;
        (base + adjustment).clamp(0.01, 0.99)
    }

    pub fn get_whale_activity(&self, asset_id: &str) -> Option<WhaleActivity> {
        let now = Utc::now();
        let signals = self.signals.read();
        let signal = signals.get(asset_id)?;
        let age_ms = (now - signal.timestamp).num_milliseconds();
        if age_ms > self.max_signal_age_ms {
            return None;
        }
        Some(WhaleActivity {
            effective_strength: signal.strength * self.decay_factor(age_ms),
            net_direction: signal.direction,
            trades: signal.trades,
            total_notional: signal.total_notional,
            age_ms,
        })
    }

    /// Drops all expired signals; returns the count removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut signals = self.signals.write();
        let before = signals.len();
        signals.retain(|_, s| (now - s.timestamp).num_milliseconds() <= self.max_signal_age_ms);
        before - signals.len()
    }

    /// Replays historical whale records younger than `max_signal_age_ms` on
    /// startup, oldest first, so decay state matches "if we'd been running
    /// the whole time".
    pub fn load_from_history(&self, records: &[WhaleTradeRecord]) {
        let now = Utc::now();
        let mut sorted: Vec<&WhaleTradeRecord> = records
            .iter()
            .filter(|r| (now - r.timestamp).num_milliseconds() <= self.max_signal_age_ms)
            .collect();
        sorted.sort_by_key(|r| r.timestamp);
        for record in sorted {
            self.record_whale_trade(record);
        }
    }
}

impl Default for ProbabilityAdjuster {
    fn default() -> Self {
        Self::new(
            DEFAULT_WHALE_WEIGHT,
            DEFAULT_DECAY_HALF_LIFE_MS,
            DEFAULT_MAX_SIGNAL_AGE_MS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whale_record(asset_id: &str, side: Side, depth_percent: f64, timestamp: DateTime<Utc>) -> WhaleTradeRecord {
        WhaleTradeRecord {
            id: "w1".into(),
            asset_id: asset_id.to_string(),
            price: 0.5,
            size: 100.0,
            side,
            notional: 50.0,
            depth_percent,
            book_depth: 1000.0,
            spread: 0.01,
            spread_percent: 2.0,
            mid_price: 0.5,
            imbalance: 0.0,
            timestamp,
        }
    }

    #[test]
    fn scenario_6_probability_adjuster_decay() {
        let adjuster = ProbabilityAdjuster::new(0.15, 300_000, 1_800_000);
        let whale = whale_record("tok-1", Side::Buy, 20.0, Utc::now());
        adjuster.record_whale_trade(&whale);

        let immediate = adjuster.get_adjusted_probability("tok-1", 0.50);
        assert!((immediate - 0.65).abs() < 1e-9);
    }

    #[test]
    fn adjusted_probability_returns_base_when_no_signal() {
        let adjuster = ProbabilityAdjuster::default();
        assert_eq!(adjuster.get_adjusted_probability("tok-unknown", 0.42), 0.42);
    }

    #[test]
    fn adjusted_probability_stays_within_whale_weight_bound() {
        let adjuster = ProbabilityAdjuster::new(0.15, 300_000, 1_800_000);
        let whale = whale_record("tok-1", Side::Buy, 20.0, Utc::now());
        adjuster.record_whale_trade(&whale);
        let adjusted = adjuster.get_adjusted_probability("tok-1", 0.5);
        assert!((adjusted - 0.5).abs() <= 0.15 + 1e-9);
    }

    #[test]
    fn repeated_same_direction_trades_drive_strength_toward_one() {
        let adjuster = ProbabilityAdjuster::new(0.15, 300_000, 1_800_000);
        let mut last_strength = 0.0;
        for _ in 0..5 {
            let whale = whale_record("tok-1", Side::Buy, 20.0, Utc::now());
            adjuster.record_whale_trade(&whale);
            let activity = adjuster.get_whale_activity("tok-1").unwrap();
            assert!(activity.effective_strength >= last_strength - 1e-9);
            last_strength = activity.effective_strength;
        }
        assert!(last_strength > 0.9);
    }

    #[test]
    fn whale_detector_rejects_below_notional_threshold() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(&[(0.5, 10000.0)], &[(0.51, 10000.0)], Utc::now(), None);
        let detector = WhaleDetector::default();
        let result = detector.analyze_trade("tok-1", 0.5, 10.0, Side::Buy, &book);
        assert!(result.is_none());
    }

    #[test]
    fn whale_detector_accepts_large_depth_consuming_trade() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(&[(0.5, 10000.0)], &[(0.51, 1000.0)], Utc::now(), None);
        let detector = WhaleDetector::default();
        let result = detector.analyze_trade("tok-1", 0.51, 100.0, Side::Buy, &book);
        assert!(result.is_some());
        let whale = result.unwrap();
        assert!(whale.depth_percent >= 5.0);
    }
}
