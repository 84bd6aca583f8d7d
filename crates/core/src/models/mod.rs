pub mod analytics;
pub mod asset;
pub mod holding;
pub mod portfolio;
pub mod price;
pub mod transaction;
