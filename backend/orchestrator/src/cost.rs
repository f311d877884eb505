use std::collections::HashMap;

use callforge_core::{CallCost, ProviderKind};
use callforge_telephony::CallFlow;

/// Per-call and per-minute price for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    pub per_call: f64,
    pub per_minute: f64,
    pub currency: String,
}

impl Rate {
    pub fn new(per_call: f64, per_minute: f64, currency: &str) -> Self {
        Self {
            per_call,
            per_minute,
            currency: currency.to_string(),
        }
    }
}

/// Provider price list used to cost completed calls.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<ProviderKind, Rate>,
    self_hosted_fallback: Rate,
    hosted_fallback: Rate,
}

impl Default for RateTable {
    fn default() -> Self {
        let rates = HashMap::from([
            (ProviderKind::Bland, Rate::new(0.05, 0.15, "USD")),
            (ProviderKind::Exotel, Rate::new(0.01, 0.02, "INR")),
            (ProviderKind::Knowlarity, Rate::new(0.01, 0.025, "INR")),
            (ProviderKind::Ozonetel, Rate::new(0.01, 0.02, "INR")),
            (ProviderKind::Plivo, Rate::new(0.005, 0.015, "USD")),
        ]);
        Self {
            rates,
            self_hosted_fallback: Rate::new(0.005, 0.01, "USD"),
            hosted_fallback: Rate::new(0.05, 0.15, "USD"),
        }
    }
}

impl RateTable {
    pub fn with_rate(mut self, provider: ProviderKind, rate: Rate) -> Self {
        self.rates.insert(provider, rate);
        self
    }

    /// Unpriced telephony providers use the generic self-hosted rate; unpriced
    /// voice-AI providers are costed like Bland.
    pub fn rate_for(&self, provider: ProviderKind, flow: CallFlow) -> &Rate {
        self.rates.get(&provider).unwrap_or(match flow {
            CallFlow::SelfHosted => &self.self_hosted_fallback,
            CallFlow::Hosted => &self.hosted_fallback,
        })
    }

    pub fn cost(&self, provider: ProviderKind, flow: CallFlow, duration_seconds: u64) -> CallCost {
        let rate = self.rate_for(provider, flow);
        let minutes = duration_seconds as f64 / 60.0;
        CallCost {
            amount: rate.per_call + minutes * rate.per_minute,
            currency: rate.currency.clone(),
        }
    }
}
