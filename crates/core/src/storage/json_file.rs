use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::errors::CoreError;
use crate::models::portfolio::Portfolio;

use super::PortfolioRepository;

/// One pretty-printed JSON document per portfolio.
///
/// ```text
/// data/
///   portfolios/
///     {id}.json
/// ```
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never sees a half-written portfolio.
pub struct JsonFilePortfolioRepository {
    base_path: PathBuf,
}

impl JsonFilePortfolioRepository {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn portfolios_dir(&self) -> PathBuf {
        self.base_path.join("portfolios")
    }

    fn portfolio_file(&self, id: &str) -> Result<PathBuf, CoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CoreError::InvalidInput(format!(
                "portfolio id '{id}' may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(self.portfolios_dir().join(format!("{id}.json")))
    }
}

#[async_trait]
impl PortfolioRepository for JsonFilePortfolioRepository {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>, CoreError> {
        let path = self.portfolio_file(id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let portfolio = serde_json::from_str(&content).map_err(|e| {
                    CoreError::Deserialization(format!("{}: {e}", path.display()))
                })?;
                Ok(Some(portfolio))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), CoreError> {
        let path = self.portfolio_file(&portfolio.id)?;
        fs::create_dir_all(self.portfolios_dir()).await?;

        let content = serde_json::to_string_pretty(portfolio)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize portfolio: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list_portfolio_ids(&self) -> Result<Vec<String>, CoreError> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(self.portfolios_dir()).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}
