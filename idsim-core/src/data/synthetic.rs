//! Seeded synthetic order flow for demos, tests and benchmarks.
//!
//! Not a market model: it produces plausible-looking hourly books with a
//! daily price shape, a spread around it, and a small share of aggressive
//! orders that cross.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::units::{hour_ceil, price_from_eur, volume_from_mwh, MS_PER_HOUR, MS_PER_MINUTE};
use crate::domain::{LimitOrder, OrderId, Side, Timestamp};

#[derive(Debug, Clone)]
pub struct SyntheticFlow {
    pub seed: u64,
    /// First delivery hour (rounded up to the hour).
    pub first_delivery: Timestamp,
    pub hours: u32,
    pub orders_per_hour: u32,
    /// How long before delivery trading opens.
    pub lead_hours: u32,
    /// Mean price, EUR/MWh.
    pub base_price: f64,
    /// Peak-to-mean amplitude of the daily shape, EUR/MWh.
    pub daily_amplitude: f64,
    /// Typical bid-ask spread, EUR/MWh.
    pub spread: f64,
    /// Largest order, MWh.
    pub max_volume: f64,
    /// Share of orders priced through the opposite side.
    pub aggressive_share: f64,
}

impl Default for SyntheticFlow {
    fn default() -> Self {
        Self {
            seed: 42,
            first_delivery: 0,
            hours: 24,
            orders_per_hour: 200,
            lead_hours: 6,
            base_price: 50.0,
            daily_amplitude: 20.0,
            spread: 2.0,
            max_volume: 5.0,
            aggressive_share: 0.05,
        }
    }
}

impl SyntheticFlow {
    /// Orders sorted by placement time; ids start at 1.
    pub fn generate(&self) -> Vec<LimitOrder> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let first = hour_ceil(self.first_delivery);
        let lead = self.lead_hours.max(1) as i64 * MS_PER_HOUR;
        let gate = 5 * MS_PER_MINUTE;
        let mut orders = Vec::with_capacity((self.hours * self.orders_per_hour) as usize);

        for h in 0..self.hours as i64 {
            let delivery = first + h * MS_PER_HOUR;
            let hour_of_day = (delivery / MS_PER_HOUR).rem_euclid(24) as f64;
            let shape = (std::f64::consts::TAU * (hour_of_day - 6.0) / 24.0).sin();
            let fair = self.base_price + self.daily_amplitude * shape;

            for _ in 0..self.orders_per_hour {
                let start = rng.gen_range(delivery - lead..delivery - gate);
                let lifetime = rng.gen_range(5 * MS_PER_MINUTE..2 * MS_PER_HOUR);
                let cancel = (start + lifetime).min(delivery - gate).max(start + 1);
                let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                let aggressive = rng.gen_bool(self.aggressive_share.clamp(0.0, 1.0));
                let offset = self.spread / 2.0 + rng.gen_range(0.0..self.spread.max(0.01) * 2.0);
                let price = match (side, aggressive) {
                    (Side::Buy, false) | (Side::Sell, true) => fair - offset,
                    (Side::Sell, false) | (Side::Buy, true) => fair + offset,
                };
                let volume = rng.gen_range(0.1..self.max_volume.max(0.2));
                orders.push(LimitOrder {
                    id: OrderId(0),
                    initial_id: OrderId(0),
                    start,
                    cancel,
                    delivery,
                    side,
                    price: price_from_eur(price),
                    volume: volume_from_mwh(volume).max(1),
                });
            }
        }

        orders.sort_by_key(|o| (o.start, o.delivery));
        for (i, order) in orders.iter_mut().enumerate() {
            order.id = OrderId(i as i64 + 1);
            order.initial_id = order.id;
        }
        orders
    }
}
