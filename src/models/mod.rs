//! Core data models for datagenius.

mod config;
mod credential;
mod entry;
mod error;

pub use config::*;
pub use credential::*;
pub use entry::*;
pub use error::*;
