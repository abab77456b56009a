//! Market-only signal processors (§4.9): need only `(event, market)`, so
//! unlike the trade-scoped detectors they run under both dispatch modes.
//! Not part of the hard core the spec's literal scenarios exercise, but
//! share the registry contract.

use super::{ProcessorContext, SignalProcessor};
use crate::models::{Severity, SignalResult};
use serde_json::json;

/// Flags unusually high recent trading volume relative to the market's
/// resting liquidity.
pub struct VolumeSpikeProcessor {
    threshold_ratio: f64,
}

impl Default for VolumeSpikeProcessor {
    fn default() -> Self {
        Self { threshold_ratio: 0.5 }
    }
}

impl SignalProcessor for VolumeSpikeProcessor {
    fn name(&self) -> &'static str {
        "volume-spike"
    }

    fn weight(&self) -> f64 {
        0.08
    }

    fn is_batch(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        if ctx.market.liquidity <= 0.0 {
            return Some(SignalResult::not_detected());
        }
        let recent_volume: f64 = ctx
            .trade_history
            .iter()
            .filter(|t| t.asset_id == ctx.market.token_id)
            .map(|t| t.size)
            .sum();
        let ratio = recent_volume / ctx.market.liquidity;
        if ratio <= self.threshold_ratio {
            return Some(SignalResult::not_detected());
        }
        Some(SignalResult {
            detected: true,
            confidence: (ratio / (self.threshold_ratio * 4.0)).min(1.0),
            direction: None,
            severity: if ratio > self.threshold_ratio * 2.0 {
                Severity::High
            } else {
                Severity::Medium
            },
            metadata: json!({ "recentVolume": recent_volume, "liquidity": ctx.market.liquidity, "ratio": ratio }),
        })
    }
}

/// Flags markets whose resting liquidity dwarfs typical size, making them
/// attractive venues for large coordinated trades.
pub struct HighLiquidityProcessor {
    threshold: f64,
}

impl Default for HighLiquidityProcessor {
    fn default() -> Self {
        Self { threshold: 100_000.0 }
    }
}

impl SignalProcessor for HighLiquidityProcessor {
    fn name(&self) -> &'static str {
        "high-liquidity"
    }

    fn weight(&self) -> f64 {
        0.05
    }

    fn is_batch(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        if ctx.market.liquidity < self.threshold {
            return Some(SignalResult::not_detected());
        }
        Some(SignalResult {
            detected: true,
            confidence: (ctx.market.liquidity / (self.threshold * 5.0)).min(1.0),
            direction: None,
            severity: Severity::Low,
            metadata: json!({ "liquidity": ctx.market.liquidity }),
        })
    }
}

/// Flags event-level probabilities near 0 or 1, where small whale trades
/// move a market disproportionately. Left unimplemented beyond a stub: the
/// registry has no probability feed wired into `MarketContext` yet, so this
/// never detects — kept to preserve the processor-list shape for §4.10.
pub struct ProbabilityExtremeProcessor;

impl Default for ProbabilityExtremeProcessor {
    fn default() -> Self {
        Self
    }
}

impl SignalProcessor for ProbabilityExtremeProcessor {
    fn name(&self) -> &'static str {
        "probability-extreme"
    }

    fn weight(&self) -> f64 {
        0.05
    }

    fn is_batch(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn process(&self, _ctx: &ProcessorContext) -> Option<SignalResult> {
        Some(SignalResult::not_detected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketContext, Side, Trade};
    use chrono::Utc;

    #[test]
    fn volume_spike_detects_high_turnover() {
        let market = MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 1000.0,
            end_date: None,
        };
        let trades: Vec<Trade> = (0..10)
            .map(|i| Trade {
                id: format!("t-{i}"),
                asset_id: "tok-1".into(),
                price: 0.5,
                size: 100.0,
                side: Side::Buy,
                maker: None,
                taker: None,
                timestamp: Utc::now(),
            })
            .collect();
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
        let result = VolumeSpikeProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
    }

    #[test]
    fn high_liquidity_flags_above_threshold() {
        let market = MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 200_000.0,
            end_date: None,
        };
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
        let result = HighLiquidityProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
    }
}
