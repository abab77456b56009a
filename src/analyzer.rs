//! Order-book analyzer (§4.7): liquidity-impact simulation, large-order
//! detection, weighted momentum.

use crate::models::Side;
use crate::orderbook::OrderBook;

#[derive(Debug, Clone, Copy)]
pub struct AnalyzedBook {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid_price: f64,
    pub spread: f64,
    pub spread_percent: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub total_depth: f64,
    pub imbalance: f64,
    pub momentum: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LiquidityImpact {
    pub impact_percent: f64,
    pub slippage: f64,
    pub levels_consumed: usize,
    pub avg_fill_price: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LargeOrder {
    pub price: f64,
    pub size: f64,
    pub is_bid: bool,
    pub percent_of_depth: f64,
}

pub struct OrderBookAnalyzer;

impl OrderBookAnalyzer {
    pub fn analyze(book: &OrderBook) -> AnalyzedBook {
        let spread = book.spread();
        let stats = book.stats();

        let mid = spread.mid_price;
        let weighted = |levels: &[crate::orderbook::PriceLevel]| -> f64 {
            if mid == 0.0 {
                return levels.iter().map(|l| l.size).sum();
            }
            levels
                .iter()
                .map(|l| l.size * (1.0 / (1.0 + (l.price - mid).abs() / mid)))
                .sum()
        };

        let weighted_bid = weighted(book.bids());
        let weighted_ask = weighted(book.asks());
        let momentum_total = weighted_bid + weighted_ask;
        let momentum = if momentum_total > 0.0 {
            (weighted_bid - weighted_ask) / momentum_total
        } else {
            0.0
        };

        AnalyzedBook {
            best_bid: book.best_bid().map(|l| l.price),
            best_ask: book.best_ask().map(|l| l.price),
            mid_price: mid,
            spread: spread.spread,
            spread_percent: spread.spread_percent,
            bid_depth: stats.bid_depth,
            ask_depth: stats.ask_depth,
            total_depth: stats.total_depth,
            imbalance: stats.imbalance,
            momentum,
        }
    }

    /// Walks the book consuming liquidity for a simulated trade of
    /// `trade_size`. BUY consumes asks ascending; SELL consumes bids
    /// descending. Empty book returns the 100%-impact sentinel from §4.7.
    pub fn calculate_liquidity_impact(trade_size: f64, side: Side, book: &OrderBook) -> LiquidityImpact {
        let levels: Vec<crate::orderbook::PriceLevel> = match side {
            Side::Buy => book.asks().to_vec(),
            Side::Sell => book.bids().to_vec(),
        };

        let Some(start_price) = levels.first().map(|l| l.price) else {
            return LiquidityImpact {
                impact_percent: 100.0,
                slippage: 100.0,
                levels_consumed: 0,
                avg_fill_price: 0.0,
            };
        };

        let mut remaining = trade_size;
        let mut filled_notional = 0.0;
        let mut filled_size = 0.0;
        let mut last_fill_price = start_price;
        let mut levels_consumed = 0;

        for level in &levels {
            if remaining <= 0.0 {
                break;
            }
            let fill = remaining.min(level.size);
            filled_notional += fill * level.price;
            filled_size += fill;
            last_fill_price = level.price;
            remaining -= fill;
            levels_consumed += 1;
        }

        let avg_fill_price = if filled_size > 0.0 {
            filled_notional / filled_size
        } else {
            0.0
        };

        let impact_percent = (last_fill_price - start_price).abs() / start_price * 100.0;
        let slippage = (avg_fill_price - start_price).abs() / start_price * 100.0;

        LiquidityImpact {
            impact_percent,
            slippage,
            levels_consumed,
            avg_fill_price,
        }
    }

    pub fn detect_large_orders(book: &OrderBook, threshold: f64) -> Vec<LargeOrder> {
        let stats = book.stats();
        let mut out: Vec<LargeOrder> = Vec::new();

        for level in book.bids() {
            if level.size >= threshold {
                out.push(LargeOrder {
                    price: level.price,
                    size: level.size,
                    is_bid: true,
                    percent_of_depth: if stats.bid_depth > 0.0 {
                        level.size / stats.bid_depth * 100.0
                    } else {
                        0.0
                    },
                });
            }
        }
        for level in book.asks() {
            if level.size >= threshold {
                out.push(LargeOrder {
                    price: level.price,
                    size: level.size,
                    is_bid: false,
                    percent_of_depth: if stats.ask_depth > 0.0 {
                        level.size / stats.ask_depth * 100.0
                    } else {
                        0.0
                    },
                });
            }
        }

        out.sort_by(|a, b| b.size.partial_cmp(&a.size).unwrap());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(
            &[(0.50, 1000.0), (0.49, 2000.0)],
            &[(0.51, 500.0), (0.52, 1500.0)],
            Utc::now(),
            None,
        );
        book
    }

    #[test]
    fn liquidity_impact_empty_book_returns_sentinel() {
        let book = OrderBook::new("tok-empty".into());
        let impact = OrderBookAnalyzer::calculate_liquidity_impact(100.0, Side::Buy, &book);
        assert_eq!(impact.impact_percent, 100.0);
        assert_eq!(impact.slippage, 100.0);
        assert_eq!(impact.levels_consumed, 0);
        assert_eq!(impact.avg_fill_price, 0.0);
    }

    #[test]
    fn liquidity_impact_consumes_multiple_levels() {
        let book = sample_book();
        let impact = OrderBookAnalyzer::calculate_liquidity_impact(1000.0, Side::Buy, &book);
        assert_eq!(impact.levels_consumed, 2);
        assert!(impact.avg_fill_price > 0.51);
    }

    #[test]
    fn large_orders_sorted_by_size_descending() {
        let book = sample_book();
        let large = OrderBookAnalyzer::detect_large_orders(&book, 1000.0);
        assert_eq!(large.len(), 2);
        assert!(large[0].size >= large[1].size);
    }

    #[test]
    fn analyze_computes_momentum_in_range() {
        let book = sample_book();
        let analyzed = OrderBookAnalyzer::analyze(&book);
        assert!(analyzed.momentum >= -1.0 && analyzed.momentum <= 1.0);
    }
}
