pub mod config;
pub mod error;
pub mod frame;
pub mod iframe;
pub mod payload;

pub use config::ServiceConfig;
pub use error::PayloadError;
pub use frame::{close_code, Frame};
