//! Per-asset order book and manager (§4.4).
//!
//! The sorted-level insertion is grounded directly on
//! `scrapers::polymarket_book_store::apply_level_update`: bids keep
//! `position(|l| l.price <= price)`, asks keep `position(|l| l.price >= price)`.
//! Here the `Vec<PriceLevel>` itself is both the mapping and the sorted
//! sequence, which trivially satisfies the spec's "sorted sequence members
//! equal exactly the mapping's keys" invariant by construction.

use crate::models::Side;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Spread {
    pub spread: f64,
    pub mid_price: f64,
    pub spread_percent: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderBookStats {
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub total_depth: f64,
    pub spread: Spread,
    pub imbalance: f64,
}

/// Inserts or updates `(price, size)` keeping `levels` sorted the way
/// `apply_level_update` does: descending for bids, ascending for asks.
/// `size <= 0` removes the level if present.
pub fn apply_level_update(levels: &mut Vec<PriceLevel>, price: f64, size: f64, is_bid: bool) {
    let cmp = |a: f64, b: f64| if is_bid { a <= b } else { a >= b };
    let existing = levels.iter().position(|l| l.price == price);

    if size <= 0.0 {
        if let Some(idx) = existing {
            levels.remove(idx);
        }
        return;
    }

    if let Some(idx) = existing {
        levels[idx].size = size;
        return;
    }

    let insert_at = levels
        .iter()
        .position(|l| cmp(l.price, price))
        .unwrap_or(levels.len());
    levels.insert(insert_at, PriceLevel { price, size });
}

/// A single per-asset order book (§3, §4.4).
pub struct OrderBook {
    pub asset_id: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub snapshot_hash: Option<String>,
    pub initialized: bool,
}

impl OrderBook {
    pub fn new(asset_id: String) -> Self {
        Self {
            asset_id,
            bids: Vec::new(),
            asks: Vec::new(),
            last_timestamp: None,
            snapshot_hash: None,
            initialized: false,
        }
    }

    /// Clears and rebuilds both sides from a full snapshot. Drops levels with
    /// non-positive price or size. Marks `initialized`.
    pub fn initialize_from_snapshot(
        &mut self,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        timestamp: DateTime<Utc>,
        hash: Option<String>,
    ) {
        self.bids = build_sorted_levels(bids, true);
        self.asks = build_sorted_levels(asks, false);
        self.last_timestamp = Some(timestamp);
        self.snapshot_hash = hash;
        self.initialized = true;
    }

    /// Applies a single incremental delta (§4.4 `applyPriceChange`).
    pub fn apply_price_change(&mut self, price: f64, size: f64, side: Side, timestamp: DateTime<Utc>) {
        if !price.is_finite() {
            return;
        }
        let is_bid = side == Side::Buy;
        let levels = if is_bid { &mut self.bids } else { &mut self.asks };
        apply_level_update(levels, price, size, is_bid);
        self.last_timestamp = Some(timestamp);
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Never divides by zero: if one side is empty, mid price is the present
    /// side; if both are empty, everything is zero.
    pub fn spread(&self) -> Spread {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                let spread = ask.price - bid.price;
                let mid = (bid.price + ask.price) / 2.0;
                let spread_percent = if mid != 0.0 { spread / mid * 100.0 } else { 0.0 };
                Spread {
                    spread,
                    mid_price: mid,
                    spread_percent,
                }
            }
            (Some(bid), None) => Spread {
                spread: 0.0,
                mid_price: bid.price,
                spread_percent: 0.0,
            },
            (None, Some(ask)) => Spread {
                spread: 0.0,
                mid_price: ask.price,
                spread_percent: 0.0,
            },
            (None, None) => Spread::default(),
        }
    }

    pub fn depth(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (
            self.bids.iter().take(n).copied().collect(),
            self.asks.iter().take(n).copied().collect(),
        )
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn imbalance(&self) -> f64 {
        let bid_total: f64 = self.bids.iter().map(|l| l.size).sum();
        let ask_total: f64 = self.asks.iter().map(|l| l.size).sum();
        let denom = bid_total + ask_total;
        if denom == 0.0 {
            0.0
        } else {
            (bid_total - ask_total) / denom
        }
    }

    pub fn stats(&self) -> OrderBookStats {
        let bid_depth: f64 = self.bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = self.asks.iter().map(|l| l.size).sum();
        OrderBookStats {
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            bid_depth,
            ask_depth,
            total_depth: bid_depth + ask_depth,
            spread: self.spread(),
            imbalance: self.imbalance(),
        }
    }

    /// §8 invariant check, exposed for tests and debug assertions.
    pub fn check_invariants(&self) -> bool {
        let strictly_decreasing = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let strictly_increasing = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let no_nonpositive = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|l| l.size > 0.0);
        strictly_decreasing && strictly_increasing && no_nonpositive
    }
}

fn build_sorted_levels(raw: &[(f64, f64)], is_bid: bool) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = raw
        .iter()
        .filter(|(price, size)| *price > 0.0 && *size > 0.0)
        .map(|(price, size)| PriceLevel {
            price: *price,
            size: *size,
        })
        .collect();
    levels.sort_by(|a, b| {
        if is_bid {
            b.price.partial_cmp(&a.price).unwrap()
        } else {
            a.price.partial_cmp(&b.price).unwrap()
        }
    });
    levels
}

/// Manages one `OrderBook` per asset, lazily constructed (§4.4).
pub struct OrderBookManager {
    books: RwLock<HashMap<String, Arc<RwLock<OrderBook>>>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_book(&self, asset_id: &str) -> Arc<RwLock<OrderBook>> {
        if let Some(book) = self.books.read().get(asset_id) {
            return book.clone();
        }
        let mut books = self.books.write();
        books
            .entry(asset_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBook::new(asset_id.to_string()))))
            .clone()
    }

    pub fn get(&self, asset_id: &str) -> Option<Arc<RwLock<OrderBook>>> {
        self.books.read().get(asset_id).cloned()
    }

    pub fn is_initialized(&self, asset_id: &str) -> bool {
        self.get(asset_id).map(|b| b.read().initialized).unwrap_or(false)
    }

    /// Returns `(was_newly_initialized, asset_id)`, or `None` if `asset_id`
    /// could not be extracted by the caller upstream.
    pub fn handle_book_snapshot(
        &self,
        asset_id: &str,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        timestamp: DateTime<Utc>,
        hash: Option<String>,
    ) -> bool {
        let book = self.ensure_book(asset_id);
        let mut book = book.write();
        let was_initialized = book.initialized;
        book.initialize_from_snapshot(bids, asks, timestamp, hash);
        !was_initialized
    }

    /// Applies a delta only if the book is already initialized (pre-snapshot
    /// deltas are discarded, §4.4). Returns whether it was applied.
    pub fn handle_price_change(
        &self,
        asset_id: &str,
        price: f64,
        size: f64,
        side: Side,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let Some(book) = self.get(asset_id) else {
            warn!(asset_id, "price_change for unknown book, dropping");
            return false;
        };
        let mut book = book.write();
        if !book.initialized {
            warn!(asset_id, "price_change before snapshot, dropping");
            return false;
        }
        book.apply_price_change(price, size, side, timestamp);
        true
    }

    /// Disposes all books — required on feed disconnect (§3 lifecycle).
    pub fn clear_all(&self) {
        self.books.write().clear();
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn scenario_1_book_initialization_and_best_prices() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(
            &[(0.60, 1000.0), (0.59, 2000.0)],
            &[(0.61, 1000.0), (0.62, 2000.0)],
            now(),
            None,
        );
        assert_eq!(book.best_bid(), Some(PriceLevel { price: 0.60, size: 1000.0 }));
        assert_eq!(book.best_ask(), Some(PriceLevel { price: 0.61, size: 1000.0 }));
        let spread = book.spread();
        assert!((spread.spread - 0.01).abs() < 1e-9);
        assert!((spread.mid_price - 0.605).abs() < 1e-9);
        assert_eq!(book.imbalance(), 0.0);
    }

    #[test]
    fn scenario_2_delta_removes_a_level() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(
            &[(0.60, 1000.0), (0.59, 2000.0)],
            &[(0.61, 1000.0), (0.62, 2000.0)],
            now(),
            None,
        );
        book.apply_price_change(0.60, 0.0, Side::Buy, now());
        assert_eq!(book.bids().len(), 1);
        assert_eq!(book.bids()[0].price, 0.59);
        assert_eq!(book.best_bid(), Some(PriceLevel { price: 0.59, size: 2000.0 }));
    }

    #[test]
    fn empty_book_boundary_behaviors() {
        let book = OrderBook::new("tok-empty".into());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        let spread = book.spread();
        assert_eq!(spread.spread, 0.0);
        assert_eq!(spread.mid_price, 0.0);
        assert_eq!(book.imbalance(), 0.0);
    }

    #[test]
    fn round_trip_snapshot_then_replay_as_deltas() {
        let mut snapshot_book = OrderBook::new("tok-1".into());
        snapshot_book.initialize_from_snapshot(
            &[(0.60, 1000.0), (0.59, 2000.0)],
            &[(0.61, 1000.0)],
            now(),
            None,
        );

        let mut delta_book = OrderBook::new("tok-1".into());
        delta_book.initialized = true;
        delta_book.apply_price_change(0.60, 1000.0, Side::Buy, now());
        delta_book.apply_price_change(0.59, 2000.0, Side::Buy, now());
        delta_book.apply_price_change(0.61, 1000.0, Side::Sell, now());

        assert_eq!(snapshot_book.bids(), delta_book.bids());
        assert_eq!(snapshot_book.asks(), delta_book.asks());
    }

    #[test]
    fn add_then_remove_returns_to_prior_state() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(&[(0.60, 1000.0)], &[], now(), None);
        let before = book.bids().to_vec();
        book.apply_price_change(0.55, 500.0, Side::Buy, now());
        book.apply_price_change(0.55, 0.0, Side::Buy, now());
        assert_eq!(book.bids(), before.as_slice());
    }

    #[test]
    fn invariants_hold_after_mixed_operations() {
        let mut book = OrderBook::new("tok-1".into());
        book.initialize_from_snapshot(
            &[(0.60, 1000.0), (0.59, 2000.0), (0.58, 500.0)],
            &[(0.61, 1000.0), (0.63, 2000.0)],
            now(),
            None,
        );
        book.apply_price_change(0.615, 300.0, Side::Sell, now());
        book.apply_price_change(0.59, 0.0, Side::Buy, now());
        assert!(book.check_invariants());
    }

    #[test]
    fn manager_discards_price_change_before_snapshot() {
        let manager = OrderBookManager::new();
        let applied = manager.handle_price_change("tok-unseen", 0.5, 100.0, Side::Buy, now());
        assert!(!applied);
    }

    #[test]
    fn manager_applies_price_change_after_snapshot() {
        let manager = OrderBookManager::new();
        manager.handle_book_snapshot("tok-1", &[(0.5, 100.0)], &[(0.6, 100.0)], now(), None);
        let applied = manager.handle_price_change("tok-1", 0.55, 50.0, Side::Buy, now());
        assert!(applied);
        let book = manager.get("tok-1").unwrap();
        assert_eq!(book.read().bids().len(), 2);
    }

    #[test]
    fn manager_reports_newly_initialized_only_once() {
        let manager = OrderBookManager::new();
        let first = manager.handle_book_snapshot("tok-1", &[(0.5, 100.0)], &[], now(), None);
        let second = manager.handle_book_snapshot("tok-1", &[(0.5, 100.0)], &[], now(), None);
        assert!(first);
        assert!(!second);
    }
}
