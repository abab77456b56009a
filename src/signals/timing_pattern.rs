//! Timing-pattern detector (§4.9, weight 0.14): trade-volume concentration
//! in the hours before resolution. Window split mirrors the half-open
//! interval resolution recorded for the original open question: recent is
//! `(now-6h, now]`, baseline is `(now-24h, now-6h]`.

use super::{ProcessorContext, SignalProcessor};
use crate::models::{Direction, Severity, Side, SignalResult};
use chrono::Duration;
use serde_json::json;

pub struct TimingPatternProcessor {
    weight: f64,
    window_hours: f64,
    concentration_threshold: f64,
}

impl TimingPatternProcessor {
    pub fn new(weight: f64, window_hours: f64, concentration_threshold: f64) -> Self {
        Self { weight, window_hours, concentration_threshold }
    }
}

impl Default for TimingPatternProcessor {
    fn default() -> Self {
        Self::new(0.14, 48.0, 2.0)
    }
}

impl SignalProcessor for TimingPatternProcessor {
    fn name(&self) -> &'static str {
        "timing-pattern"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_batch(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        let Some(end_date) = ctx.market.end_date else {
            return Some(SignalResult::not_detected());
        };

        let hours_to_resolution = (end_date - ctx.now).num_minutes() as f64 / 60.0;
        if hours_to_resolution > self.window_hours {
            return Some(SignalResult::not_detected());
        }

        let recent_start = ctx.now - Duration::hours(6);
        let baseline_start = ctx.now - Duration::hours(24);

        let market_trades = ctx.trade_history.iter().filter(|t| t.asset_id == ctx.market.token_id);

        let mut recent_yes = 0.0;
        let mut recent_no = 0.0;
        let mut recent_count = 0u64;
        let mut baseline_count = 0u64;

        for trade in market_trades {
            if trade.timestamp > recent_start && trade.timestamp <= ctx.now {
                recent_count += 1;
                match trade.side {
                    Side::Buy => recent_yes += trade.size,
                    Side::Sell => recent_no += trade.size,
                }
            } else if trade.timestamp > baseline_start && trade.timestamp <= recent_start {
                baseline_count += 1;
            }
        }

        let concentration_ratio = if baseline_count > 0 {
            (recent_count as f64 / 6.0) / (baseline_count as f64 / 18.0)
        } else if recent_count > 0 {
            f64::INFINITY
        } else {
            0.0
        };

        if concentration_ratio <= self.concentration_threshold {
            return Some(SignalResult::not_detected());
        }

        let dominant_side = if recent_no > recent_yes {
            Direction::No
        } else {
            Direction::Yes
        };

        let severity = if concentration_ratio > 4.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(SignalResult {
            detected: true,
            confidence: (concentration_ratio / 5.0).min(1.0),
            direction: Some(dominant_side),
            severity,
            metadata: json!({
                "tradesLast6h": recent_count,
                "tradesPrev18h": baseline_count,
                "concentrationRatio": if concentration_ratio.is_finite() { concentration_ratio } else { f64::MAX },
                "dominantSide": dominant_side,
                "hoursToResolution": hours_to_resolution,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketContext, Trade};
    use chrono::Utc;

    fn market(end_in_hours: i64) -> MarketContext {
        MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 1000.0,
            end_date: Some(Utc::now() + Duration::hours(end_in_hours)),
        }
    }

    fn trade_at(hours_ago: i64, size: f64, side: Side) -> Trade {
        Trade {
            id: format!("t-{hours_ago}"),
            asset_id: "tok-1".into(),
            price: 0.5,
            size,
            side,
            maker: None,
            taker: None,
            timestamp: Utc::now() - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn detects_recent_volume_concentration() {
        let market = market(10);
        let trades = vec![
            trade_at(1, 500.0, Side::Buy),
            trade_at(2, 500.0, Side::Buy),
            trade_at(20, 10.0, Side::Sell),
        ];
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: None,
            orderbook: None,
            wallet_profile: None,
            trade_history: &trades,
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = TimingPatternProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
        assert_eq!(result.direction, Some(Direction::Yes));
    }

    #[test]
    fn skips_when_resolution_too_far_out() {
        let market = market(100);
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: None,
            orderbook: None,
            wallet_profile: None,
            trade_history: &[],
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = TimingPatternProcessor::default().process(&ctx).unwrap();
        assert!(!result.detected);
    }
}
