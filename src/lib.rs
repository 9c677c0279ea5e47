pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use error::AppError;
pub use models::*;
pub use services::*;
