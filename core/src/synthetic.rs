//! Seeded generator of raw stocktake corpora.
//!
//! Produces weekly count sheets in the European number format and the
//! `%d/%m/%Y` date format, with injected losses, zero-sales weeks and
//! missing deliveries so every indicator has something to find.

use crate::{normalizer::RawRecord, rng::StreamRng};
use chrono::{Duration, NaiveDate};

// ── Shape ────────────────────────────────────────────────────────────────────

const FIRST_PERIOD: (i32, u32, u32) = (2024, 1, 1);
const PERIOD_DAYS: i64 = 7;

const ZERO_SALES_CHANCE: f64 = 0.06;
const NO_SHIPMENT_CHANCE: f64 = 0.2;
const LOSS_EVENT_CHANCE: f64 = 0.1;
const TRANSFER_CHANCE: f64 = 0.45;
const RTV_CHANCE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusShape {
    pub seed: u64,
    pub stores: usize,
    pub periods: usize,
}

impl Default for CorpusShape {
    fn default() -> Self {
        Self {
            seed: 42,
            stores: 8,
            periods: 26,
        }
    }
}

/// Store identifiers in generation order.
pub fn store_id(index: usize) -> String {
    format!("S{:03}", index + 1)
}

/// Render a whole number of units as "1.234,00".
pub fn format_european(units: u64) -> String {
    let digits = units.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("{grouped},00")
}

/// Generate `stores × periods` rows, store-major, periods in calendar order.
pub fn generate(shape: CorpusShape) -> Vec<RawRecord> {
    let Some(first) = NaiveDate::from_ymd_opt(FIRST_PERIOD.0, FIRST_PERIOD.1, FIRST_PERIOD.2) else {
        return Vec::new();
    };

    let mut rows = Vec::with_capacity(shape.stores * shape.periods);
    for store in 0..shape.stores {
        let mut rng = StreamRng::new(shape.seed, store as u64);
        let mut on_hand = rng.between(800, 3000);

        for period in 0..shape.periods {
            let start = first + Duration::days(period as i64 * PERIOD_DAYS);
            let end = start + Duration::days(PERIOD_DAYS - 1);
            let begin = on_hand;

            let shipment = if rng.chance(NO_SHIPMENT_CHANCE) {
                0
            } else {
                rng.between(50, 400)
            };
            let transfer_in = if rng.chance(TRANSFER_CHANCE) {
                rng.between(5, 150)
            } else {
                0
            };
            let available = begin + shipment + transfer_in;
            let transfer_out = if rng.chance(TRANSFER_CHANCE) {
                rng.between(5, 150).min(available / 4)
            } else {
                0
            };
            let rtv = if rng.chance(RTV_CHANCE) {
                rng.between(1, 40).min(available / 10)
            } else {
                0
            };
            let sellable = available - transfer_out - rtv;
            let sales = if rng.chance(ZERO_SALES_CHANCE) {
                0
            } else {
                rng.next_u64_below(sellable * 2 / 5 + 1)
            };
            let expected = sellable - sales;

            // Most weeks count a few units off; some lose a visible share.
            let counted_off = if rng.chance(LOSS_EVENT_CHANCE) {
                expected * rng.between(2, 8) / 100
            } else {
                rng.next_u64_below(4)
            };
            let ending = expected.saturating_sub(counted_off);
            on_hand = ending;

            rows.push(RawRecord {
                store: store_id(store),
                period_start: start.format("%d/%m/%Y").to_string(),
                period_end: Some(end.format("%d/%m/%Y").to_string()),
                beginning_inventory: format_european(begin),
                shipment: Some(format_european(shipment)),
                transfer_in: format_european(transfer_in),
                transfer_out: format_european(transfer_out),
                rtv: format_european(rtv),
                sales: format_european(sales),
                ending_inventory: format_european(ending),
            });
        }
    }

    log::debug!(
        "synthetic: generated {} rows for {} stores (seed {})",
        rows.len(),
        shape.stores,
        shape.seed
    );
    rows
}
