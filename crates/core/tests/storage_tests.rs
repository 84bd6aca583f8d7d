// ═══════════════════════════════════════════════════════════════════
// Storage Tests — in-memory and JSON file portfolio repositories
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use portfolio_valuation_core::errors::CoreError;
use portfolio_valuation_core::models::asset::Asset;
use portfolio_valuation_core::models::portfolio::Portfolio;
use portfolio_valuation_core::models::transaction::{Dividend, Transaction};
use portfolio_valuation_core::storage::{
    InMemoryPortfolioRepository, JsonFilePortfolioRepository, PortfolioRepository,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn sample(id: &str) -> Portfolio {
    let mut p = Portfolio::new(id, "asha");
    let infy = Asset::equity("INFY", "Infosys");
    let holding = p.holding_entry(&infy);
    holding
        .transactions
        .push(Transaction::buy(d(2024, 1, 1), dec!(10), dec!(1450.25)).with_fees(dec!(12.5)));
    holding
        .transactions
        .push(Transaction::sell(d(2024, 3, 1), dec!(4), dec!(1600)).with_notes("partial exit"));
    holding.dividends.push(Dividend::new(d(2024, 2, 15), dec!(180)));
    holding.current_price = Some(dec!(1523.45));
    p
}

// ═══════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════

mod in_memory {
    use super::*;

    #[tokio::test]
    async fn save_then_get() {
        let repo = InMemoryPortfolioRepository::new();
        let p = sample("p1");
        repo.save_portfolio(&p).await.unwrap();
        assert_eq!(repo.get_portfolio("p1").await.unwrap(), Some(p));
        assert_eq!(repo.get_portfolio("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_replaces() {
        let repo = InMemoryPortfolioRepository::new();
        let mut p = sample("p1");
        repo.save_portfolio(&p).await.unwrap();
        p.owner = "ravi".into();
        repo.save_portfolio(&p).await.unwrap();
        assert_eq!(repo.get_portfolio("p1").await.unwrap().unwrap().owner, "ravi");
        assert_eq!(repo.list_portfolio_ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ids_are_sorted() {
        let repo = InMemoryPortfolioRepository::with_portfolios(vec![
            Portfolio::new("zeta", "a"),
            Portfolio::new("alpha", "b"),
            Portfolio::new("mid", "c"),
        ]);
        assert_eq!(
            repo.list_portfolio_ids().await.unwrap(),
            vec!["alpha", "mid", "zeta"]
        );
    }
}

// ═══════════════════════════════════════════════════════════════════
// JSON files
// ═══════════════════════════════════════════════════════════════════

mod json_file {
    use super::*;

    #[tokio::test]
    async fn round_trip_keeps_ledger_exact() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFilePortfolioRepository::new(dir.path());
        let p = sample("family-2024");

        repo.save_portfolio(&p).await.unwrap();
        assert!(dir.path().join("portfolios/family-2024.json").exists());
        assert!(!dir.path().join("portfolios/family-2024.json.tmp").exists());

        let loaded = repo.get_portfolio("family-2024").await.unwrap().unwrap();
        assert_eq!(loaded, p);
        let infy = loaded.holding(&Asset::equity("INFY", "Infosys")).unwrap();
        assert_eq!(infy.transactions[0].price, dec!(1450.25));
        assert_eq!(infy.transactions[1].notes.as_deref(), Some("partial exit"));
    }

    #[tokio::test]
    async fn missing_portfolio_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFilePortfolioRepository::new(dir.path());
        assert_eq!(repo.get_portfolio("ghost").await.unwrap(), None);
        assert!(repo.list_portfolio_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsafe_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFilePortfolioRepository::new(dir.path());

        for id in ["../escape", "a/b", "", "with space"] {
            assert!(
                matches!(repo.get_portfolio(id).await, Err(CoreError::InvalidInput(_))),
                "id {id:?} accepted"
            );
        }
        assert!(matches!(
            repo.save_portfolio(&Portfolio::new("../x", "a")).await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn list_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFilePortfolioRepository::new(dir.path());
        repo.save_portfolio(&Portfolio::new("b", "x")).await.unwrap();
        repo.save_portfolio(&Portfolio::new("a", "x")).await.unwrap();
        std::fs::write(dir.path().join("portfolios/notes.txt"), "hello").unwrap();

        assert_eq!(repo.list_portfolio_ids().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_deserialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFilePortfolioRepository::new(dir.path());
        std::fs::create_dir_all(dir.path().join("portfolios")).unwrap();
        std::fs::write(dir.path().join("portfolios/broken.json"), "{ not json").unwrap();

        assert!(matches!(
            repo.get_portfolio("broken").await,
            Err(CoreError::Deserialization(_))
        ));
    }
}
