pub mod api;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod middleware;

pub use api::{build_app, AppState};
pub use config::Config;
pub use error::GenerateError;
