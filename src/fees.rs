//! Polymarket taker fee curve.
//!
//! Fee rate peaks at p = 0.5 and falls to zero at the edges:
//! `rate(p) = p * (1 - p) * coefficient`, price clamped to [0.01, 0.99].

use serde::Deserialize;

pub const DEFAULT_FEE_COEFFICIENT: f64 = 0.0624;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FeeModel {
    pub coefficient: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            coefficient: DEFAULT_FEE_COEFFICIENT,
        }
    }
}

impl FeeModel {
    pub fn new(coefficient: f64) -> Self {
        Self { coefficient }
    }

    /// Fee-free model, for venues or tests that report fees explicitly.
    pub fn zero() -> Self {
        Self { coefficient: 0.0 }
    }

    pub fn rate(&self, share_price: f64) -> f64 {
        let p = share_price.clamp(0.01, 0.99);
        (p * (1.0 - p) * self.coefficient).max(0.0)
    }

    /// Fee in USDC for `size` shares traded at `share_price`.
    pub fn fee(&self, share_price: f64, size: f64) -> f64 {
        share_price * size * self.rate(share_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rate_higher_near_center() {
        let model = FeeModel::default();
        assert!(model.rate(0.5) > model.rate(0.1));
        assert!(model.rate(0.5) > model.rate(0.9));
        assert!((model.rate(0.5) - 0.0156).abs() < 1e-12);
    }

    #[test]
    fn fee_scales_with_notional() {
        let model = FeeModel::default();
        let fee = model.fee(0.5, 10.0);
        assert!((fee - 5.0 * 0.0156).abs() < 1e-12);
        assert_eq!(FeeModel::zero().fee(0.5, 10.0), 0.0);
    }

    #[test]
    fn price_is_clamped() {
        let model = FeeModel::default();
        assert_eq!(model.rate(0.0), model.rate(0.01));
        assert_eq!(model.rate(1.5), model.rate(0.99));
    }
}
