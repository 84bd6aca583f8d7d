pub mod amfi;
pub mod cached;
pub mod chain;
pub mod live_broker;
pub mod manual;
pub mod screener;
pub mod traits;
pub mod yahoo_finance;
