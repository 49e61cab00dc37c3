pub mod api;
pub mod clients;
pub mod config;
pub mod errors;
pub mod models;
pub mod store;
pub mod trigger;
pub mod utils;
pub mod verification;
