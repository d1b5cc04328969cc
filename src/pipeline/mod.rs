//! Pipeline module - generation loop and batch modification.

mod controller;
mod modification;
mod state_machine;

#[cfg(test)]
mod test_support;

pub use controller::*;
pub use modification::*;
pub use state_machine::*;
