pub mod config;
pub mod engines;
pub mod query;
pub mod session;
