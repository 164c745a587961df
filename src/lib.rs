pub mod backoff;
pub mod balances;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod crawler;
pub mod error;
pub mod index_store;
pub mod ledger;
