//! datagenius - unattended synthetic dataset generation with key rotation.
//!
//! ## Architecture
//!
//! - **Credential Pool**: ordered API key slots, each tagged with a provider
//! - **Provider Router**: Gemini and OpenRouter adapters behind two traits
//! - **Loop Controller**: one generation call per tick; rotates keys on
//!   credential failures, backs off on anything else, stops when every
//!   valid key has failed in a row
//! - **Modification Orchestrator**: rewrites selected entries concurrently
//!   and merges the results in one store write
//!
//! ## Entries
//!
//! Every entry has `context`, `input` (starting with `ryha`) and `output`
//! (addressing the user as `boss`). Ids are assigned by the store at append
//! time and always run `1..=n`.

pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod store;

// Re-exports for convenience
pub use client::{EntryGenerator, EntryModifier, ProviderRouter};
pub use models::{Config, DatagenError, Entry, ExportFormat, Result};
pub use pipeline::{LoopController, ModificationReport, RunSnapshot, RunState};
pub use pool::CredentialPool;
pub use store::EntryStore;
