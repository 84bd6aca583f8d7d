//! In-memory repository, for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::CoreError;
use crate::models::portfolio::Portfolio;

use super::PortfolioRepository;

#[derive(Debug, Default)]
pub struct InMemoryPortfolioRepository {
    portfolios: RwLock<HashMap<String, Portfolio>>,
}

impl InMemoryPortfolioRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_portfolios(portfolios: impl IntoIterator<Item = Portfolio>) -> Self {
        Self {
            portfolios: RwLock::new(
                portfolios
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl PortfolioRepository for InMemoryPortfolioRepository {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>, CoreError> {
        Ok(self.portfolios.read().await.get(id).cloned())
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), CoreError> {
        self.portfolios
            .write()
            .await
            .insert(portfolio.id.clone(), portfolio.clone());
        Ok(())
    }

    async fn list_portfolio_ids(&self) -> Result<Vec<String>, CoreError> {
        let mut ids: Vec<String> = self.portfolios.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
