pub mod chain;
pub mod distribution;
pub mod holders;
pub mod ledger;
pub mod market;
pub mod monitor;
pub mod notify;
pub mod retry;
