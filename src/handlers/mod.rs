pub mod config;
pub mod interviews;

pub use config::*;
pub use interviews::*;
