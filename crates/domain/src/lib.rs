pub mod apikey;
pub mod budget;
pub mod capability;
pub mod config;
pub mod error;
pub mod marathon;
pub mod milestone;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
