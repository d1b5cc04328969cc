//! In-memory entry store shared by the generation loop and modification.
//!
//! Ids are assigned here, inside the write lock, so `entries[i].id == i + 1`
//! holds no matter how appends and merges interleave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::{DatagenError, Entry, EntryDraft, Result};

/// Ordered, append-only collection of entries.
///
/// Cloning is cheap and yields a handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct EntryStore {
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a previously exported dataset.
    ///
    /// Fails unless ids are exactly `1..=n` in order.
    pub fn from_entries(entries: Vec<Entry>) -> Result<Self> {
        if let Some((position, entry)) = entries
            .iter()
            .enumerate()
            .find(|(i, e)| e.id != *i as u64 + 1)
        {
            return Err(DatagenError::Validation(format!(
                "Dataset ids must run 1..{} in order; row {} has id {}",
                entries.len(),
                position + 1,
                entry.id
            )));
        }
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Append a draft, assigning the next id.
    pub async fn append(&self, draft: EntryDraft) -> Entry {
        let mut entries = self.entries.write().await;
        let entry = draft.into_entry(entries.len() as u64 + 1);
        entries.push(entry.clone());
        entry
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, id: u64) -> Option<Entry> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.entries.read().await.get(index).cloned()
    }

    /// Copy of every entry in id order.
    pub async fn snapshot(&self) -> Vec<Entry> {
        self.entries.read().await.clone()
    }

    /// Up to `limit` entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Entry> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Replace entries by id in a single pass under the write lock.
    ///
    /// Replacements for ids not in the store are ignored and the stored id
    /// is always kept. Returns how many entries were replaced.
    pub async fn apply_replacements(&self, replacements: &HashMap<u64, Entry>) -> usize {
        if replacements.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().await;
        let mut replaced = 0;
        for entry in entries.iter_mut() {
            if let Some(new) = replacements.get(&entry.id) {
                entry.context.clone_from(&new.context);
                entry.input.clone_from(&new.input);
                entry.output.clone_from(&new.output);
                replaced += 1;
            }
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(n: usize) -> EntryDraft {
        EntryDraft {
            context: format!("context {n}"),
            input: format!("ryha do thing {n}"),
            output: format!("Done {n}, boss."),
        }
    }

    #[tokio::test]
    async fn append_assigns_sequential_ids() {
        let store = EntryStore::new();
        for n in 0..3 {
            store.append(draft(n)).await;
        }
        let ids: Vec<u64> = store.snapshot().await.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.get(2).await.unwrap().context, "context 1");
        assert!(store.get(0).await.is_none());
        assert!(store.get(4).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_appends_stay_contiguous() {
        let store = EntryStore::new();
        let handles: Vec<_> = (0..20)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.append(draft(n)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 20);
        assert!(snapshot.iter().enumerate().all(|(i, e)| e.id == i as u64 + 1));
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = EntryStore::new();
        for n in 0..5 {
            store.append(draft(n)).await;
        }
        let ids: Vec<u64> = store.recent(3).await.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(store.recent(100).await.len(), 5);
    }

    #[tokio::test]
    async fn replacements_keep_ids_and_skip_unknown() {
        let store = EntryStore::new();
        store.append(draft(0)).await;
        store.append(draft(1)).await;

        let mut replacements = HashMap::new();
        replacements.insert(
            2,
            Entry {
                id: 2,
                context: "rewritten".into(),
                input: "ryha rewritten".into(),
                output: "Rewritten, boss.".into(),
            },
        );
        replacements.insert(
            99,
            Entry {
                id: 99,
                context: "ghost".into(),
                input: "ryha ghost".into(),
                output: "Boo, boss.".into(),
            },
        );

        assert_eq!(store.apply_replacements(&replacements).await, 1);
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].context, "context 0");
        assert_eq!(snapshot[1].id, 2);
        assert_eq!(snapshot[1].context, "rewritten");
    }

    #[test]
    fn seeding_requires_contiguous_ids() {
        let entries = vec![draft(0).into_entry(1), draft(1).into_entry(3)];
        assert!(matches!(
            EntryStore::from_entries(entries),
            Err(DatagenError::Validation(_))
        ));
        assert!(EntryStore::from_entries(vec![draft(0).into_entry(1)]).is_ok());
    }
}
