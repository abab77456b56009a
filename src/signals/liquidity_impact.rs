//! Liquidity-impact detector (§4.9, weight 0.12). Delegates the simulation to
//! `analyzer::OrderBookAnalyzer::calculate_liquidity_impact`.

use super::{ProcessorContext, SignalProcessor};
use crate::analyzer::OrderBookAnalyzer;
use crate::models::{Severity, SignalResult};
use serde_json::json;

pub struct LiquidityImpactProcessor {
    weight: f64,
    threshold: f64,
}

impl LiquidityImpactProcessor {
    pub fn new(weight: f64, threshold: f64) -> Self {
        Self { weight, threshold }
    }
}

impl Default for LiquidityImpactProcessor {
    fn default() -> Self {
        Self::new(0.12, 0.02)
    }
}

impl SignalProcessor for LiquidityImpactProcessor {
    fn name(&self) -> &'static str {
        "liquidity-impact"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_batch(&self) -> bool {
        false
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        let trade = ctx.trade?;
        let book = ctx.orderbook?;

        let impact = OrderBookAnalyzer::calculate_liquidity_impact(trade.size, trade.side, book);
        if impact.impact_percent / 100.0 <= self.threshold {
            return Some(SignalResult::not_detected());
        }

        let severity = if impact.impact_percent > 5.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(SignalResult {
            detected: true,
            confidence: (impact.impact_percent / 10.0).min(1.0),
            direction: None,
            severity,
            metadata: json!({
                "levelsConsumed": impact.levels_consumed,
                "avgFillPrice": impact.avg_fill_price,
                "slippage": impact.slippage,
                "tradeSize": trade.size,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketContext, Side, Trade};
    use crate::orderbook::OrderBook;
    use chrono::Utc;

    #[test]
    fn detects_large_impact_trade() {
        let market = MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 10_000.0,
            end_date: None,
        };
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(&[(0.5, 100.0)], &[(0.51, 50.0)], Utc::now(), None);
        let trade = Trade {
            id: "t1".into(),
            asset_id: "tok-1".into(),
            price: 0.51,
            size: 49.0,
            side: Side::Buy,
            maker: None,
            taker: None,
            timestamp: Utc::now(),
        };
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: Some(&trade),
            orderbook: Some(&book),
            wallet_profile: None,
            trade_history: &[],
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = LiquidityImpactProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
    }
}
