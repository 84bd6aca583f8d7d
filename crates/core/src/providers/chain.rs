use std::sync::Arc;

use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::models::asset::AssetClass;
use crate::models::price::PriceCache;

use super::amfi::AmfiNavSource;
use super::cached::CachedFallbackSource;
use super::live_broker::LiveBrokerSource;
use super::manual::ManualPriceSource;
use super::screener::ScreenerSource;
use super::traits::PriceSource;
use super::yahoo_finance::YahooFinanceSource;

/// Ordered list of price sources.
///
/// Sources are tried by kind (live broker, then scraped, then cached) and,
/// within a kind, in registration order. New sources can be registered
/// without touching the refresh engine.
#[derive(Clone, Default)]
pub struct PriceSourceChain {
    sources: Vec<Arc<dyn PriceSource>>,
    manual: Option<Arc<ManualPriceSource>>,
}

impl PriceSourceChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            manual: None,
        }
    }

    /// Build the chain described by `config`, with manual prices and the
    /// cached fallback over `cache` at the end.
    pub fn with_defaults(config: &SourcesConfig, cache: Arc<PriceCache>) -> Self {
        let mut chain = Self::new();

        if let Some(broker) = &config.broker {
            match LiveBrokerSource::from_config(broker) {
                Ok(source) => chain.register(Arc::new(source)),
                Err(e) => warn!(error = %e, "live broker source disabled"),
            }
        }

        if config.yahoo_enabled {
            match YahooFinanceSource::new(config.yahoo_symbol_suffix.clone()) {
                Ok(source) => chain.register(Arc::new(source)),
                Err(e) => warn!(error = %e, "Yahoo Finance source disabled"),
            }
        }

        if config.screener_enabled {
            chain.register(Arc::new(ScreenerSource::new(
                config.screener_base_url.clone(),
            )));
        }

        if config.amfi_enabled {
            chain.register(Arc::new(AmfiNavSource::new(config.amfi_nav_url.clone())));
        }

        chain = chain.with_manual_prices(Arc::new(ManualPriceSource::new()));
        chain.register(Arc::new(CachedFallbackSource::new(cache)));

        info!(
            sources = ?chain.sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            "price source chain configured"
        );
        chain
    }

    /// Register a new source.
    pub fn register(&mut self, source: Arc<dyn PriceSource>) {
        self.sources.push(source);
    }

    /// Builder-style `register`.
    pub fn with_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.register(source);
        self
    }

    /// Register `source` as the chain's manual price store, the one
    /// `PriceService::set_manual_price` writes to.
    pub fn with_manual_prices(mut self, source: Arc<ManualPriceSource>) -> Self {
        self.register(source.clone());
        self.manual = Some(source);
        self
    }

    pub fn manual_prices(&self) -> Option<&Arc<ManualPriceSource>> {
        self.manual.as_ref()
    }

    /// All sources that support `class`, in fallback order.
    pub fn sources_for(&self, class: AssetClass) -> Vec<Arc<dyn PriceSource>> {
        let mut matching: Vec<Arc<dyn PriceSource>> = self
            .sources
            .iter()
            .filter(|s| s.supported_asset_classes().contains(&class))
            .cloned()
            .collect();
        // Stable: registration order is kept within a kind.
        matching.sort_by_key(|s| s.kind());
        matching
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
