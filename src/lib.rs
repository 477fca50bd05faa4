//! Topic in, captioned vertical short out.

pub mod ai;
pub mod assets;
pub mod caption;
pub mod config;
pub mod error;
pub mod imagery;
pub mod layout;
pub mod metadata;
pub mod render;
pub mod speech;
pub mod transcribe;
pub mod upload;

pub use error::{Error, Result};
