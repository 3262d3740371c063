pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod history;
pub mod monitor;
pub mod sampler;
pub mod summary;

pub use config::Config;
pub use error::{AppError, Result};
