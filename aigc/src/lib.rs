pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod retry;
pub mod session;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
