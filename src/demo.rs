//! Synthetic markets and a threshold detector for paper sessions.
//!
//! Each market is a binary pair whose UP price random-walks around 0.5;
//! DOWN is its complement. Markets roll over when they expire.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, RwLock};

use crate::config::DemoConfig;
use crate::engine::SignalDetector;
use crate::types::{Direction, OrderIntent, OrderSide, Signal, TickContext};

const QUOTED_SPREAD: f64 = 0.01;
const MIN_PRICE: f64 = 0.02;
const MAX_PRICE: f64 = 0.98;

#[derive(Debug, Clone)]
pub struct DemoMarket {
    pub condition_id: String,
    pub up_token: String,
    pub down_token: String,
    pub up_price: f64,
    pub opened_at_ms: i64,
}

impl DemoMarket {
    fn open(now_ms: i64) -> Self {
        let condition_id = format!("0x{}", uuid::Uuid::new_v4().simple());
        Self {
            up_token: format!("{}-up", condition_id),
            down_token: format!("{}-down", condition_id),
            condition_id,
            up_price: 0.5,
            opened_at_ms: now_ms,
        }
    }

    pub fn down_price(&self) -> f64 {
        1.0 - self.up_price
    }

    pub fn token(&self, direction: Direction) -> (&str, f64) {
        match direction {
            Direction::Up => (&self.up_token, self.up_price),
            Direction::Down => (&self.down_token, self.down_price()),
        }
    }
}

/// Markets visible to both the feed and the detector
pub type MarketListing = Arc<RwLock<Vec<DemoMarket>>>;

pub struct SyntheticMarket {
    volatility: f64,
    duration_ms: i64,
    listing: MarketListing,
    rng: StdRng,
}

impl SyntheticMarket {
    pub fn new(config: &DemoConfig, now_ms: i64) -> Self {
        let rng = if config.seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(config.seed)
        };
        let markets = (0..config.markets.max(1)).map(|_| DemoMarket::open(now_ms)).collect();
        Self {
            volatility: config.volatility,
            duration_ms: config.market_duration_secs.max(1) * 1000,
            listing: Arc::new(RwLock::new(markets)),
            rng,
        }
    }

    pub fn listing(&self) -> MarketListing {
        self.listing.clone()
    }

    /// Move prices one step and build the tick snapshot.
    pub fn step(&mut self, now_ms: i64) -> TickContext {
        let mut markets = self.listing.write().unwrap_or_else(|p| p.into_inner());
        let mut ctx = TickContext::new(now_ms);

        for market in markets.iter_mut() {
            if now_ms - market.opened_at_ms >= self.duration_ms {
                *market = DemoMarket::open(now_ms);
            }
            // Uniform noise with the configured standard deviation
            let amplitude = self.volatility * 3f64.sqrt();
            let shock = self.rng.gen_range(-amplitude..=amplitude);
            market.up_price = (market.up_price + shock).clamp(MIN_PRICE, MAX_PRICE);

            let remaining_secs = (self.duration_ms - (now_ms - market.opened_at_ms)) / 1000;
            ctx = ctx
                .with_spot(market.up_token.clone(), market.up_price)
                .with_spot(market.down_token.clone(), market.down_price())
                .with_spread(market.up_token.clone(), QUOTED_SPREAD)
                .with_spread(market.down_token.clone(), QUOTED_SPREAD)
                .with_expiry(market.condition_id.clone(), remaining_secs);
        }
        ctx
    }
}

/// Buys whichever token trades furthest below 0.5, once the discount
/// reaches `entry_edge`.
pub struct EdgeDetector {
    listing: MarketListing,
    entry_edge: f64,
    order_size: f64,
    /// Skip markets this close to expiry
    min_remaining_secs: i64,
}

impl EdgeDetector {
    pub fn new(listing: MarketListing, config: &DemoConfig) -> Self {
        Self {
            listing,
            entry_edge: config.entry_edge,
            order_size: config.order_size,
            min_remaining_secs: 120,
        }
    }
}

impl SignalDetector for EdgeDetector {
    fn detect_entry(&self, ctx: &TickContext) -> Result<Option<Signal>> {
        let markets = self
            .listing
            .read()
            .map_err(|_| anyhow!("market listing poisoned"))?;

        let mut best: Option<(f64, &DemoMarket, Direction)> = None;
        for market in markets.iter() {
            let remaining = ctx.seconds_to_expiry(&market.condition_id).unwrap_or(0);
            if remaining < self.min_remaining_secs {
                continue;
            }
            for direction in [Direction::Up, Direction::Down] {
                let (token, _) = market.token(direction);
                let Some(price) = ctx.spot_price(token) else {
                    continue;
                };
                let edge = 0.5 - price;
                if edge >= self.entry_edge && best.map_or(true, |(e, _, _)| edge > e) {
                    best = Some((edge, market, direction));
                }
            }
        }

        Ok(best.map(|(edge, market, direction)| {
            let (token, _) = market.token(direction);
            Signal {
                id: uuid::Uuid::new_v4().to_string(),
                condition_id: market.condition_id.clone(),
                token_id: token.to_string(),
                direction,
                confidence: (edge / 0.5).min(1.0),
                strategy_id: "edge".to_string(),
                created_at_ms: ctx.now_ms,
            }
        }))
    }

    fn to_order(&self, signal: &Signal, ctx: &TickContext) -> Result<OrderIntent> {
        let price = ctx
            .spot_price(&signal.token_id)
            .ok_or_else(|| anyhow!("no price for {}", signal.token_id))?;
        Ok(OrderIntent {
            condition_id: signal.condition_id.clone(),
            token_id: signal.token_id.clone(),
            side: OrderSide::Buy,
            direction: signal.direction,
            // Venue tick size
            price: (price * 100.0).round() / 100.0,
            size: self.order_size,
        })
    }
}
