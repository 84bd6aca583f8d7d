use serde::{Deserialize, Serialize};

use super::asset::Asset;
use super::holding::Holding;

/// A user's set of holdings. At most one holding per `(symbol, asset_class)`.
///
/// Portfolio totals are never stored; they are recomputed from the holdings
/// by the valuation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,

    /// Owner identity (user id from the auth layer)
    pub owner: String,

    pub holdings: Vec<Holding>,
}

impl Portfolio {
    pub fn new(id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            holdings: Vec::new(),
        }
    }

    pub fn holding(&self, asset: &Asset) -> Option<&Holding> {
        self.holdings.iter().find(|h| &h.asset == asset)
    }

    pub fn holding_mut(&mut self, asset: &Asset) -> Option<&mut Holding> {
        self.holdings.iter_mut().find(|h| &h.asset == asset)
    }

    /// Get the holding for `asset`, creating an empty one if needed.
    pub fn holding_entry(&mut self, asset: &Asset) -> &mut Holding {
        let idx = match self.holdings.iter().position(|h| &h.asset == asset) {
            Some(idx) => idx,
            None => {
                self.holdings.push(Holding::new(asset.clone()));
                self.holdings.len() - 1
            }
        };
        &mut self.holdings[idx]
    }

    /// Holdings with a positive net quantity.
    pub fn active_holdings(&self) -> Vec<&Holding> {
        self.holdings.iter().filter(|h| h.is_active()).collect()
    }

    /// Assets whose prices need to be kept fresh.
    pub fn tracked_assets(&self) -> Vec<Asset> {
        self.active_holdings()
            .into_iter()
            .map(|h| h.asset.clone())
            .collect()
    }
}
