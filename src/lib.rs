pub mod auth;
pub mod config;
pub mod constants;
pub mod drive;
pub mod error;
pub mod ga;
pub mod observability;
pub mod recipients;
pub mod server;
pub mod storage;
pub mod sync;
pub mod types;
pub mod webhook;
