mod json_file;
mod memory;

pub use json_file::JsonFilePortfolioRepository;
pub use memory::InMemoryPortfolioRepository;

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::portfolio::Portfolio;

/// Where portfolios (and their transaction ledgers) live.
///
/// The engine only reads and writes whole portfolios; implementations decide
/// how they are stored.
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>, CoreError>;

    /// Insert or replace.
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), CoreError>;

    /// Sorted.
    async fn list_portfolio_ids(&self) -> Result<Vec<String>, CoreError>;
}
