//! Scripted provider fakes for pipeline tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::client::{EntryGenerator, EntryModifier, GenerationRequest, ModificationRequest};
use crate::models::{Credential, DatagenError, Entry, EntryDraft, ProviderClass, ProviderError, Result};
use crate::pool::CredentialPool;

pub fn pool(secrets: &[&str]) -> CredentialPool {
    CredentialPool::new(
        secrets
            .iter()
            .enumerate()
            .map(|(i, s)| Credential::new(i, *s, ProviderClass::default_for_slot(i)))
            .collect(),
    )
}

pub fn draft(context: &str) -> EntryDraft {
    EntryDraft {
        context: context.to_string(),
        input: format!("ryha {context}"),
        output: format!("{context}, boss"),
    }
}

/// Provider-style failure carrying `message` (classified by its text).
pub fn failure(message: &str) -> DatagenError {
    DatagenError::Provider(ProviderError::ApiError {
        status: 400,
        message: message.to_string(),
    })
}

/// One scripted generation outcome.
#[derive(Clone)]
pub enum Step {
    Succeed(EntryDraft),
    Fail(String),
    /// Never completes
    Hang,
    /// Completes with the draft once the gate is notified
    Gated(Arc<Notify>, EntryDraft),
}

/// Generator replaying a script, then repeating `fallback` forever.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<usize>>,
    /// Notified at the start of every call
    pub entered: Notify,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            entered: Notify::new(),
        })
    }

    /// Slot index used by each call so far.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntryGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<EntryDraft> {
        self.calls.lock().unwrap().push(request.credential.index);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.entered.notify_one();

        match step {
            Step::Succeed(draft) => Ok(draft),
            Step::Fail(message) => Err(failure(&message)),
            Step::Hang => std::future::pending().await,
            Step::Gated(gate, draft) => {
                gate.notified().await;
                Ok(draft)
            }
        }
    }
}

/// Modifier backed by a closure.
pub struct FnModifier<F>(pub F);

#[async_trait]
impl<F> EntryModifier for FnModifier<F>
where
    F: Fn(&ModificationRequest) -> Result<Entry> + Send + Sync,
{
    async fn modify(&self, request: ModificationRequest) -> Result<Entry> {
        (self.0)(&request)
    }
}

/// Modifier that returns the entry unchanged.
pub fn identity_modifier() -> Arc<dyn EntryModifier> {
    Arc::new(FnModifier(|request: &ModificationRequest| -> Result<Entry> {
        Ok(request.entry.clone())
    }))
}
