//! Credential pool: ordered key slots and circular rotation over valid ones.
//!
//! All queries are pure and deterministic given the pool contents.

use crate::models::{Credential, DatagenError, Result};

/// Ordered list of credential slots, some possibly empty.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Build a pool; slot indexes are renumbered to match positions.
    pub fn new(credentials: Vec<Credential>) -> Self {
        let credentials = credentials
            .into_iter()
            .enumerate()
            .map(|(index, credential)| Credential { index, ..credential })
            .collect();
        Self { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// Slot indexes whose secret is non-blank, in slot order.
    pub fn valid_indexes(&self) -> Vec<usize> {
        self.credentials
            .iter()
            .filter(|c| c.is_valid())
            .map(|c| c.index)
            .collect()
    }

    pub fn valid_count(&self) -> usize {
        self.credentials.iter().filter(|c| c.is_valid()).count()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.get(index).is_some_and(Credential::is_valid)
    }

    /// Lowest valid slot, if any.
    pub fn first_valid(&self) -> Option<usize> {
        self.credentials.iter().find(|c| c.is_valid()).map(|c| c.index)
    }

    /// Next valid slot strictly after `current` in circular order.
    ///
    /// With a single valid slot this returns that slot again. `current`
    /// does not need to be valid itself.
    pub fn next_valid(&self, current: usize) -> Result<usize> {
        let valid = self.valid_indexes();
        if valid.is_empty() {
            return Err(DatagenError::NoValidCredentials);
        }
        Ok(valid
            .iter()
            .copied()
            .find(|&index| index > current)
            .unwrap_or(valid[0]))
    }
}
