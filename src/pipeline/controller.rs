//! Loop controller: owns the state machine, the store and the driver task.
//!
//! Each `start` spawns one driver for the new epoch. The driver executes
//! directives and re-checks the epoch under the machine lock before and
//! after every call and after every sleep, so a stopped or superseded
//! driver neither issues another request nor appends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

use super::modification::{ModificationOrchestrator, ModificationReport};
use super::state_machine::{
    Directive, Event, RunSnapshot, RunState, StartOutcome, StateMachine,
};
use crate::client::{EntryGenerator, EntryModifier};
use crate::models::{Config, DatagenError, Entry, Result};
use crate::pool::CredentialPool;
use crate::store::EntryStore;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

struct Shared {
    machine: Mutex<StateMachine>,
    store: EntryStore,
    generator: Arc<dyn EntryGenerator>,
    orchestrator: ModificationOrchestrator,
    wake: Notify,
    snapshots: watch::Sender<RunSnapshot>,
    preview_limit: usize,
}

/// Control surface for the generation loop.
///
/// Cheap to clone; clones share the same loop.
#[derive(Clone)]
pub struct LoopController {
    shared: Arc<Shared>,
}

impl LoopController {
    pub fn new(
        config: &Config,
        pool: CredentialPool,
        generator: Arc<dyn EntryGenerator>,
        modifier: Arc<dyn EntryModifier>,
        store: EntryStore,
    ) -> Self {
        let machine = StateMachine::new(pool, &config.generation);
        let orchestrator =
            ModificationOrchestrator::new(modifier, store.clone(), config.modification.concurrency);
        let (snapshots, _) = watch::channel(RunSnapshot {
            active_slot: machine.active_slot(),
            ..RunSnapshot::default()
        });

        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                store,
                generator,
                orchestrator,
                wake: Notify::new(),
                snapshots,
                preview_limit: config.generation.preview_limit,
            }),
        }
    }

    /// Start generating. A no-op while already running; resumes at once
    /// when called during a backoff countdown.
    pub async fn start(&self, prd: &str, temperature: f64) -> Result<()> {
        let mut machine = self.shared.machine.lock().await;
        match machine.start(prd, temperature)? {
            StartOutcome::AlreadyRunning => {
                debug!("Generation already running");
            }
            StartOutcome::Started { epoch, directive } => {
                info!(
                    slot = machine.active_slot(),
                    temperature = temperature,
                    episode = %machine.episode().map(|e| e.id).unwrap_or_default(),
                    "Generation started"
                );
                self.shared.publish(&machine).await;
                drop(machine);
                // wake drivers of older epochs so they notice and exit
                self.shared.wake.notify_waiters();
                tokio::spawn(drive(Arc::clone(&self.shared), epoch, directive));
            }
        }
        Ok(())
    }

    /// Stop generating. Returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut machine = self.shared.machine.lock().await;
        let stopped = machine.stop();
        if stopped {
            info!(entries = self.shared.store.len().await, "Generation stopped by user");
            self.shared.publish(&machine).await;
        }
        drop(machine);
        self.shared.wake.notify_waiters();
        stopped
    }

    /// Modify stored entries using the first valid credential.
    pub async fn modify(&self, ids: &[u64], instruction: &str) -> Result<ModificationReport> {
        let credential = {
            let machine = self.shared.machine.lock().await;
            let pool = machine.pool();
            pool.first_valid()
                .and_then(|index| pool.get(index))
                .cloned()
                .ok_or_else(|| {
                    DatagenError::Validation(
                        "A valid API key is required to modify entries.".to_string(),
                    )
                })?
        };
        self.shared
            .orchestrator
            .modify(ids, instruction, &credential)
            .await
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn store(&self) -> &EntryStore {
        &self.shared.store
    }

    /// Newest entries first, bounded by `generation.preview_limit`.
    pub async fn preview(&self) -> Vec<Entry> {
        self.shared.store.recent(self.shared.preview_limit).await
    }

    pub async fn state(&self) -> RunState {
        self.shared.machine.lock().await.state()
    }
}

impl Shared {
    async fn publish(&self, machine: &StateMachine) {
        let snapshot = machine.snapshot(self.store.len().await);
        self.snapshots.send_replace(snapshot);
    }

    /// Sleep for `delay` unless woken early. Returns false if `epoch` is stale.
    async fn sleep(&self, epoch: u64, delay: Duration) -> bool {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.machine.lock().await.epoch() != epoch {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut notified => {}
        }
        true
    }

    /// Feed a timer event to the machine if `epoch` is still current.
    async fn after_sleep(&self, epoch: u64, delay: Duration, event: Event) -> Option<Directive> {
        if !self.sleep(epoch, delay).await {
            return None;
        }
        let mut machine = self.machine.lock().await;
        if machine.epoch() != epoch {
            return None;
        }
        let next = machine.handle(event);
        self.publish(&machine).await;
        Some(next)
    }
}

/// Driver task for one epoch.
async fn drive(shared: Arc<Shared>, epoch: u64, mut directive: Directive) {
    loop {
        directive = match directive {
            Directive::Generate(request) => {
                let slot = request.credential.index;
                if shared.machine.lock().await.epoch() != epoch {
                    return;
                }
                let outcome = shared.generator.generate(request).await;

                let mut machine = shared.machine.lock().await;
                if machine.epoch() != epoch {
                    debug!(slot = slot, "Discarding result from a stopped episode");
                    return;
                }
                let next = match outcome {
                    Ok(draft) => {
                        let entry = shared.store.append(draft).await;
                        debug!(id = entry.id, slot = slot, "Entry generated");
                        machine.handle(Event::Generated)
                    }
                    Err(e) => {
                        let class = e.failure_class();
                        warn!(slot = slot, class = ?class, error = %e, "Generation failed");
                        machine.handle(Event::Failed {
                            class,
                            message: e.to_string(),
                        })
                    }
                };
                shared.publish(&machine).await;
                if machine.state() == RunState::StoppedExhausted {
                    warn!(
                        failing = ?machine.failing_slots(),
                        "All API keys failing, generation stopped"
                    );
                }
                next
            }
            Directive::Rotate { delay } => {
                match shared.after_sleep(epoch, delay, Event::RotationElapsed).await {
                    Some(next) => next,
                    None => return,
                }
            }
            Directive::Countdown { remaining } => {
                debug!(remaining = remaining, "Backing off");
                match shared
                    .after_sleep(epoch, COUNTDOWN_STEP, Event::CountdownTick)
                    .await
                {
                    Some(next) => next,
                    None => return,
                }
            }
            Directive::Halt => return,
        };
    }
}
