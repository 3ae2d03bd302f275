//! Quote feed domain types.

use serde::{Deserialize, Serialize};

/// Subscription key: (base token, quote token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub base: String,
    pub quote: String,
}

impl PairKey {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Quantity levels requested for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityLevels {
    /// Token the quantities are denominated in.
    pub token: String,
    /// Requested quantity levels, in order.
    pub levels: Vec<f64>,
}

/// A desired subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantityLevels,
    /// Request id used for the original subscribe (re-used on resubscribe).
    pub request_id: String,
}

impl Subscription {
    pub fn new(
        base_token: impl Into<String>,
        quote_token: impl Into<String>,
        quantity_token: impl Into<String>,
        levels: Vec<f64>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            base_token: base_token.into(),
            quote_token: quote_token.into(),
            quantity: QuantityLevels {
                token: quantity_token.into(),
                levels,
            },
            request_id: request_id.into(),
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.base_token, &self.quote_token)
    }
}

/// One price update record from a `stream` event.
///
/// Prices are absent when the venue has no quote on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Creation time reported by the venue.
    pub t_create: i64,
    pub quantity: f64,
    pub quantity_token: String,
    #[serde(default)]
    pub sell_price: Option<f64>,
    #[serde(default)]
    pub buy_price: Option<f64>,
    pub base_token: String,
    pub quote_token: String,
}

impl PriceUpdate {
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.base_token, &self.quote_token)
    }

    /// Buy minus sell price, when both sides are quoted.
    pub fn spread(&self) -> Option<f64> {
        match (self.buy_price, self.sell_price) {
            (Some(buy), Some(sell)) => Some(buy - sell),
            _ => None,
        }
    }
}
