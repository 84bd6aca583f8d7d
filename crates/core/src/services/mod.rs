pub mod cash_flow;
pub mod lots;
pub mod portfolio_service;
pub mod price_service;
pub mod refresh_policy;
pub mod refresh_scheduler;
pub mod returns;
pub mod valuation_service;
