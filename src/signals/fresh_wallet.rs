//! Fresh-wallet detector (§4.9, weight 0.15). Grounded on `wallet.rs`'s
//! freshness rule and on `signals/detector.rs::SignalDetector::detect_*`'s
//! confidence-blend shape.

use super::{ProcessorContext, SignalProcessor};
use crate::models::{Direction, Severity, Side, SignalResult};
use crate::wallet::{DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_TRADES};
use serde_json::json;

pub struct FreshWalletProcessor {
    weight: f64,
    min_trade_size: f64,
}

impl FreshWalletProcessor {
    pub fn new(weight: f64, min_trade_size: f64) -> Self {
        Self { weight, min_trade_size }
    }
}

impl Default for FreshWalletProcessor {
    fn default() -> Self {
        Self::new(0.15, 0.02)
    }
}

impl SignalProcessor for FreshWalletProcessor {
    fn name(&self) -> &'static str {
        "fresh-wallet"
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
        let profile = ctx.wallet_profile?;
        if trade.wallet_address().is_none() || ctx.market.liquidity <= 0.0 {
            return Some(SignalResult::not_detected());
        }

        let fresh = profile.is_fresh(ctx.now, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_TRADES);
        let liquidity_percent = trade.size / ctx.market.liquidity;
        if !fresh || liquidity_percent < self.min_trade_size {
            return Some(SignalResult::not_detected());
        }

        let wallet_age_days = profile.age_days(ctx.now);
        let freshness_score = ((1.0 - wallet_age_days / DEFAULT_MAX_AGE_DAYS).max(0.0)
            + (1.0 - profile.total_trades as f64 / DEFAULT_MAX_TRADES as f64).max(0.0))
            / 2.0;
        let size_score =
            ((liquidity_percent - self.min_trade_size) / (9.0 * self.min_trade_size)).clamp(0.0, 1.0);
        let confidence = 0.6 * freshness_score + 0.4 * size_score;

        let severity = if (wallet_age_days < 1.0 || profile.total_trades < 3)
            && liquidity_percent > 5.0 * self.min_trade_size
        {
            Severity::High
        } else {
            Severity::Medium
        };

        let direction = match trade.side {
            Side::Buy => Direction::Yes,
            Side::Sell => Direction::No,
        };

        Some(SignalResult {
            detected: true,
            confidence: confidence.clamp(0.0, 1.0),
            direction: Some(direction),
            severity,
            metadata: json!({
                "walletAgeDays": wallet_age_days,
                "totalTrades": profile.total_trades,
                "liquidityPercent": liquidity_percent,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketContext, Trade, WalletProfile};
    use chrono::Utc;

    fn market() -> MarketContext {
        MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 10_000.0,
            end_date: None,
        }
    }

    fn trade(size: f64) -> Trade {
        Trade {
            id: "t1".into(),
            asset_id: "tok-1".into(),
            price: 0.5,
            size,
            side: Side::Buy,
            maker: Some("0xabc".into()),
            taker: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn detects_fresh_wallet_with_large_trade() {
        let market = market();
        let trade = trade(500.0);
        let profile = WalletProfile::new("0xabc".into(), Utc::now());
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: Some(&trade),
            orderbook: None,
            wallet_profile: Some(&profile),
            trade_history: &[],
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = FreshWalletProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn skips_below_min_trade_size() {
        let market = market();
        let trade = trade(1.0);
        let profile = WalletProfile::new("0xabc".into(), Utc::now());
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: Some(&trade),
            orderbook: None,
            wallet_profile: Some(&profile),
            trade_history: &[],
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = FreshWalletProcessor::default().process(&ctx).unwrap();
        assert!(!result.detected);
    }
}
