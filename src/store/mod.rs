//! Entry storage and dataset files.

mod entries;
mod export;

pub use entries::*;
pub use export::*;
