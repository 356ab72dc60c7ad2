pub mod analysis;
pub mod blob;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod export;
pub mod findings;
pub mod jobstore;
pub mod models;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod validation;
