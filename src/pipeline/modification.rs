//! Batch modification of existing entries.
//!
//! Flow: ids → lookup (not-found split off) → bounded concurrent client
//! calls → results in request order → one merged store write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::client::{EntryModifier, ModificationRequest};
use crate::models::{Credential, DatagenError, Entry, Result};
use crate::store::EntryStore;

/// One successfully modified entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedEntry {
    pub original: Entry,
    pub modified: Entry,
}

/// Outcome of a modification batch.
#[derive(Debug, Clone)]
pub struct ModificationReport {
    /// In request order
    pub succeeded: Vec<ModifiedEntry>,
    pub failed_ids: Vec<u64>,
    pub not_found_ids: Vec<u64>,
}

impl ModificationReport {
    /// The last successful modification, as shown to the user.
    pub fn preview(&self) -> Option<&ModifiedEntry> {
        self.succeeded.last()
    }
}

/// Runs modification batches against a store.
#[derive(Clone)]
pub struct ModificationOrchestrator {
    modifier: Arc<dyn EntryModifier>,
    store: EntryStore,
    semaphore: Arc<Semaphore>,
}

impl ModificationOrchestrator {
    pub fn new(modifier: Arc<dyn EntryModifier>, store: EntryStore, concurrency: usize) -> Self {
        Self {
            modifier,
            store,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Modify the entries with the given ids according to `instruction`.
    ///
    /// Per-entry failures and unknown ids are reported in the result, not
    /// as errors. Only caller mistakes fail the whole batch.
    pub async fn modify(
        &self,
        ids: &[u64],
        instruction: &str,
        credential: &Credential,
    ) -> Result<ModificationReport> {
        if instruction.trim().is_empty() || ids.is_empty() {
            return Err(DatagenError::Validation(
                "Please provide Entry IDs and a modification instruction.".to_string(),
            ));
        }
        if !credential.is_valid() {
            return Err(DatagenError::Validation(
                "A valid API key is required to modify entries.".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        let mut not_found_ids = Vec::new();
        for &id in ids.iter().filter(|id| seen.insert(**id)) {
            match self.store.get(id).await {
                Some(entry) => targets.push(entry),
                None => not_found_ids.push(id),
            }
        }

        if !not_found_ids.is_empty() {
            warn!(ids = ?not_found_ids, "Could not find entries");
        }

        let mut handles = Vec::with_capacity(targets.len());
        for entry in targets {
            let modifier = Arc::clone(&self.modifier);
            let semaphore = Arc::clone(&self.semaphore);
            let request = ModificationRequest {
                entry: entry.clone(),
                instruction: instruction.to_string(),
                credential: credential.clone(),
            };
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| DatagenError::Internal("Semaphore closed".to_string()))?;
                modifier.modify(request).await
            });
            handles.push((entry, handle));
        }

        let mut succeeded = Vec::new();
        let mut failed_ids = Vec::new();

        for (original, handle) in handles {
            let id = original.id;
            match handle.await {
                Ok(Ok(modified)) if modified.id == id => {
                    succeeded.push(ModifiedEntry { original, modified });
                }
                Ok(Ok(modified)) => {
                    warn!(id = id, returned_id = modified.id, "Modified entry changed its id");
                    failed_ids.push(id);
                }
                Ok(Err(e)) => {
                    warn!(id = id, error = %e, "Modification failed");
                    failed_ids.push(id);
                }
                Err(e) => {
                    warn!(id = id, error = %e, "Task panicked");
                    failed_ids.push(id);
                }
            }
        }

        let replacements: HashMap<u64, Entry> = succeeded
            .iter()
            .map(|m| (m.modified.id, m.modified.clone()))
            .collect();
        let replaced = self.store.apply_replacements(&replacements).await;

        info!(
            succeeded = succeeded.len(),
            failed = failed_ids.len(),
            not_found = not_found_ids.len(),
            replaced = replaced,
            "Modification batch finished"
        );

        Ok(ModificationReport {
            succeeded,
            failed_ids,
            not_found_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{FnModifier, draft, failure, identity_modifier};
    use crate::models::ProviderClass;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key() -> Credential {
        Credential::new(0, "k1", ProviderClass::default_for_slot(0))
    }

    async fn store_with(n: usize) -> EntryStore {
        let store = EntryStore::new();
        for i in 0..n {
            store.append(draft(&format!("entry {}", i + 1))).await;
        }
        store
    }

    fn shorten(request: &ModificationRequest) -> Entry {
        Entry {
            output: "Short, boss".to_string(),
            ..request.entry.clone()
        }
    }

    #[tokio::test]
    async fn splits_success_failure_and_not_found() {
        let store = store_with(2).await;
        let modifier = Arc::new(FnModifier(|request: &ModificationRequest| -> Result<Entry> {
            if request.entry.id == 2 {
                Err(failure("upstream exploded"))
            } else {
                Ok(shorten(request))
            }
        }));
        let orchestrator = ModificationOrchestrator::new(modifier, store.clone(), 4);

        let report = orchestrator.modify(&[1, 2, 99], "shorten", &key()).await.unwrap();

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].original.id, 1);
        assert_eq!(report.failed_ids, vec![2]);
        assert_eq!(report.not_found_ids, vec![99]);
        assert_eq!(report.preview().unwrap().modified.output, "Short, boss");

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot[0].output, "Short, boss");
        assert_eq!(snapshot[1].output, "entry 2, boss");
    }

    #[tokio::test]
    async fn noop_instruction_leaves_entries_unchanged() {
        let store = store_with(3).await;
        let before = store.snapshot().await;
        let orchestrator = ModificationOrchestrator::new(identity_modifier(), store.clone(), 2);

        let report = orchestrator.modify(&[3, 1], "keep as is", &key()).await.unwrap();

        assert!(report.failed_ids.is_empty());
        for item in &report.succeeded {
            assert_eq!(item.modified, item.original);
        }
        assert_eq!(store.snapshot().await, before);
        assert_eq!(report.preview().unwrap().original.id, 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_processed_once_in_first_order() {
        let store = store_with(2).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let modifier = Arc::new(FnModifier(move |request: &ModificationRequest| -> Result<Entry> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(shorten(request))
        }));
        let orchestrator = ModificationOrchestrator::new(modifier, store, 4);

        let report = orchestrator.modify(&[2, 1, 2, 2], "shorten", &key()).await.unwrap();

        let ids: Vec<u64> = report.succeeded.iter().map(|m| m.original.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.preview().unwrap().original.id, 1);
    }

    #[tokio::test]
    async fn changed_id_counts_as_failure() {
        let store = store_with(1).await;
        let modifier = Arc::new(FnModifier(|request: &ModificationRequest| -> Result<Entry> {
            Ok(Entry {
                id: 42,
                ..shorten(request)
            })
        }));
        let orchestrator = ModificationOrchestrator::new(modifier, store.clone(), 4);

        let report = orchestrator.modify(&[1], "shorten", &key()).await.unwrap();

        assert!(report.succeeded.is_empty());
        assert!(report.preview().is_none());
        assert_eq!(report.failed_ids, vec![1]);
        assert_eq!(store.snapshot().await[0].output, "entry 1, boss");
    }

    #[tokio::test]
    async fn rejects_bad_requests_before_any_call() {
        let store = store_with(1).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let modifier = Arc::new(FnModifier(move |request: &ModificationRequest| -> Result<Entry> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(request.entry.clone())
        }));
        let orchestrator = ModificationOrchestrator::new(modifier, store, 4);
        let blank = Credential::new(0, "  ", ProviderClass::default_for_slot(0));

        for (ids, instruction, credential) in [
            (vec![1], "   ", key()),
            (vec![], "shorten", key()),
            (vec![1], "shorten", blank),
        ] {
            assert!(matches!(
                orchestrator.modify(&ids, instruction, &credential).await,
                Err(DatagenError::Validation(_))
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct SlowModifier {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EntryModifier for SlowModifier {
        async fn modify(&self, request: ModificationRequest) -> Result<Entry> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(request.entry)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let store = store_with(6).await;
        let modifier = Arc::new(SlowModifier {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let orchestrator = ModificationOrchestrator::new(modifier.clone(), store, 2);

        let report = orchestrator
            .modify(&[1, 2, 3, 4, 5, 6], "noop", &key())
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 6);
        assert!(modifier.peak.load(Ordering::SeqCst) <= 2);
        let ids: Vec<u64> = report.succeeded.iter().map(|m| m.original.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }
}
