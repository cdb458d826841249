pub mod activity;
pub mod config;
pub mod error;
pub mod events;

pub use activity::*;
pub use config::{Config, API_KEY_HEADER};
pub use error::BlogdeskError;
pub use events::*;
