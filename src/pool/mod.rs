//! Pool module - credential slots and rotation.

mod credentials;

pub use credentials::*;
