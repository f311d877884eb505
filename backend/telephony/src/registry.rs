use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use callforge_core::ProviderKind;

use crate::config::{ProviderSettings, TelephonyConfig};
use crate::http::build_client;
use crate::provider::ProviderAdapter;
use crate::providers::{
    BlandAdapter, BolnaAdapter, CustomAdapter, ElevenLabsAdapter, ExotelAdapter,
    KnowlarityAdapter, OzonetelAdapter, PlivoAdapter, TataAdapter, VapiAdapter,
};

/// The configured adapters, keyed by provider.
///
/// Built once at startup; the set never changes afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    order: Vec<ProviderKind>,
    default: Option<ProviderKind>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TelephonyConfig) -> Self {
        let client = build_client(config.request_timeout);
        let code = config.country_code.as_str();
        let mut registry = Self::new();

        for settings in &config.providers {
            let adapter: Arc<dyn ProviderAdapter> = match settings.clone() {
                ProviderSettings::Exotel(s) => Arc::new(ExotelAdapter::new(s, client.clone(), code)),
                ProviderSettings::Knowlarity(s) => Arc::new(KnowlarityAdapter::new(s, client.clone(), code)),
                ProviderSettings::Ozonetel(s) => Arc::new(OzonetelAdapter::new(s, client.clone(), code)),
                ProviderSettings::Plivo(s) => Arc::new(PlivoAdapter::new(s, client.clone(), code)),
                ProviderSettings::Tata(s) => Arc::new(TataAdapter::new(s, client.clone(), code)),
                ProviderSettings::Custom(s) => Arc::new(CustomAdapter::new(s, client.clone(), code)),
                ProviderSettings::Bland(s) => Arc::new(BlandAdapter::new(s, client.clone(), code)),
                ProviderSettings::ElevenLabs(s) => Arc::new(ElevenLabsAdapter::new(s, client.clone(), code)),
                ProviderSettings::Bolna(s) => Arc::new(BolnaAdapter::new(s, client.clone(), code)),
                ProviderSettings::Vapi(s) => Arc::new(VapiAdapter::new(s, client.clone(), code)),
            };
            registry.register(adapter);
        }

        registry.default = config.default_provider();
        info!(
            providers = ?registry.order,
            default = ?registry.default,
            "Telephony providers configured"
        );
        registry
    }

    /// Add an adapter. The first registered adapter becomes the default
    /// unless one was chosen explicitly.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let kind = adapter.kind();
        if self.adapters.insert(kind, adapter).is_none() {
            self.order.push(kind);
        }
        if self.default.is_none() {
            self.default = Some(kind);
        }
    }

    pub fn with_default(mut self, kind: ProviderKind) -> Self {
        if self.adapters.contains_key(&kind) {
            self.default = Some(kind);
        }
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn default_kind(&self) -> Option<ProviderKind> {
        self.default
    }

    /// Configured providers in precedence order.
    pub fn kinds(&self) -> &[ProviderKind] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Providers to try for one call: the override (if configured), then the
    /// default, then the rest in precedence order. Each appears once.
    pub fn failover_order(&self, preferred: Option<ProviderKind>) -> Vec<ProviderKind> {
        let mut order = Vec::with_capacity(self.order.len());
        let head = [preferred, self.default];
        for kind in head.into_iter().flatten().chain(self.order.iter().copied()) {
            if self.adapters.contains_key(&kind) && !order.contains(&kind) {
                order.push(kind);
            }
        }
        order
    }
}
