pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod records;
pub mod services;
pub mod utils;

pub use error::{AppError, Result};
