pub mod config;
pub mod error;
pub mod reading;

pub use config::Config;
pub use error::ValidationError;
pub use reading::*;
