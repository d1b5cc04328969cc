//! Generation loop state machine.
//!
//! Pure: commands and events in, directives out. No I/O and no clocks; the
//! async driver in `controller` executes each directive and reports back.
//!
//! ```text
//! Idle / Stopped* / BackoffWaiting --start--> Running
//! Running --success--> Running                 (streak cleared)
//! Running --credential failure--> Running      (rotate, wait)
//!                                 StoppedExhausted (streak == valid slots)
//! Running --other failure--> BackoffWaiting    (countdown)
//! BackoffWaiting --countdown reaches 0--> Running
//! Running / BackoffWaiting --stop--> StoppedByUser
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::GenerationRequest;
use crate::models::{DatagenError, FailureClass, GenerationConfig, Result};
use crate::pool::CredentialPool;

pub const STOPPED_BY_USER_MESSAGE: &str = "Data generation stopped by user.";

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    BackoffWaiting,
    StoppedByUser,
    StoppedExhausted,
}

impl RunState {
    /// Running or waiting to resume.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::BackoffWaiting)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::BackoffWaiting => "backoff",
            Self::StoppedByUser => "stopped",
            Self::StoppedExhausted => "exhausted",
        };
        f.write_str(label)
    }
}

/// One start-to-stop stretch of generation.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub prd: String,
    pub temperature: f64,
}

/// Outcome reported by the driver after executing a directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The call succeeded and the entry was appended
    Generated,
    Failed { class: FailureClass, message: String },
    /// The post-rotation delay elapsed
    RotationElapsed,
    /// One second of backoff countdown elapsed
    CountdownTick,
}

/// What the driver should do next.
#[derive(Debug, Clone)]
pub enum Directive {
    /// Issue one generation call
    Generate(GenerationRequest),
    /// Sleep, then report [`Event::RotationElapsed`]
    Rotate { delay: Duration },
    /// Sleep one second, then report [`Event::CountdownTick`]
    Countdown { remaining: u32 },
    /// Nothing left to do for this episode
    Halt,
}

/// Result of a `start` command.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A new episode began; the driver for `epoch` should run `directive`
    Started { epoch: u64, directive: Directive },
    /// Already running, nothing changed
    AlreadyRunning,
}

/// UI read model published after every transition.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub state: RunState,
    pub active_slot: usize,
    pub entry_count: usize,
    /// Seconds left before an automatic resume, 0 unless backing off
    pub countdown: u32,
    pub last_error: Option<String>,
    pub failing_slots: Vec<usize>,
    pub episode_id: Option<Uuid>,
    pub episode_started_at: Option<DateTime<Utc>>,
}

/// The generation loop's state and transition rules.
#[derive(Debug)]
pub struct StateMachine {
    pool: CredentialPool,
    backoff_secs: u32,
    rotation_delay: Duration,
    state: RunState,
    /// Bumped by every external start/stop; drivers holding an older value are stale
    epoch: u64,
    episode: Option<Episode>,
    active_slot: usize,
    /// Slots that failed credential-class since the last success
    failing: BTreeSet<usize>,
    countdown: u32,
    last_error: Option<String>,
}

impl StateMachine {
    pub fn new(pool: CredentialPool, settings: &GenerationConfig) -> Self {
        let active_slot = pool.first_valid().unwrap_or(0);
        Self {
            pool,
            backoff_secs: settings.backoff_secs,
            rotation_delay: settings.rotation_delay(),
            state: RunState::Idle,
            epoch: 0,
            episode: None,
            active_slot,
            failing: BTreeSet::new(),
            countdown: 0,
            last_error: None,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn failing_slots(&self) -> Vec<usize> {
        self.failing.iter().copied().collect()
    }

    pub fn episode(&self) -> Option<&Episode> {
        self.episode.as_ref()
    }

    /// Begin (or resume) generation.
    pub fn start(&mut self, prd: &str, temperature: f64) -> Result<StartOutcome> {
        if prd.trim().is_empty() {
            return Err(DatagenError::Validation(
                "Product Requirements Document (PRD) cannot be empty.".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&temperature) {
            return Err(DatagenError::Validation(format!(
                "Temperature must be within [0, 1], got {temperature}"
            )));
        }
        if self.pool.valid_count() == 0 {
            return Err(DatagenError::Validation(
                "Please save at least one valid API key.".to_string(),
            ));
        }
        if self.state == RunState::Running {
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.epoch += 1;
        let directive = self.begin_episode(prd.to_string(), temperature);
        Ok(StartOutcome::Started {
            epoch: self.epoch,
            directive,
        })
    }

    /// Stop generation. Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.epoch += 1;
        self.state = RunState::StoppedByUser;
        self.countdown = 0;
        self.last_error = Some(STOPPED_BY_USER_MESSAGE.to_string());
        true
    }

    /// Apply a driver event.
    pub fn handle(&mut self, event: Event) -> Directive {
        match (self.state, event) {
            (RunState::Running, Event::Generated) => {
                self.failing.clear();
                self.last_error = None;
                self.next_tick()
            }
            (RunState::Running, Event::Failed { class, message }) => match class {
                FailureClass::Credential => self.rotate(),
                FailureClass::Transient => self.back_off(message),
            },
            (RunState::Running, Event::RotationElapsed) => self.next_tick(),
            (RunState::BackoffWaiting, Event::CountdownTick) => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown > 0 {
                    Directive::Countdown {
                        remaining: self.countdown,
                    }
                } else {
                    self.resume()
                }
            }
            _ => Directive::Halt,
        }
    }

    pub fn snapshot(&self, entry_count: usize) -> RunSnapshot {
        RunSnapshot {
            state: self.state,
            active_slot: self.active_slot,
            entry_count,
            countdown: self.countdown,
            last_error: self.last_error.clone(),
            failing_slots: self.failing_slots(),
            episode_id: self.episode.as_ref().map(|e| e.id),
            episode_started_at: self.episode.as_ref().map(|e| e.started_at),
        }
    }

    fn begin_episode(&mut self, prd: String, temperature: f64) -> Directive {
        self.state = RunState::Running;
        self.failing.clear();
        self.countdown = 0;
        self.last_error = None;
        if !self.pool.is_valid(self.active_slot) {
            if let Some(first) = self.pool.first_valid() {
                self.active_slot = first;
            }
        }
        self.episode = Some(Episode {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            prd,
            temperature,
        });
        self.next_tick()
    }

    /// Countdown expiry restarts with the same parameters, within the same epoch.
    fn resume(&mut self) -> Directive {
        match self.episode.take() {
            Some(episode) => self.begin_episode(episode.prd, episode.temperature),
            None => {
                self.state = RunState::Idle;
                Directive::Halt
            }
        }
    }

    fn next_tick(&self) -> Directive {
        match (&self.episode, self.pool.get(self.active_slot)) {
            (Some(episode), Some(credential)) => Directive::Generate(GenerationRequest {
                prd: episode.prd.clone(),
                temperature: episode.temperature,
                credential: credential.clone(),
            }),
            _ => Directive::Halt,
        }
    }

    fn rotate(&mut self) -> Directive {
        self.failing.insert(self.active_slot);

        let valid = self.pool.valid_count();
        if self.failing.len() >= valid {
            self.state = RunState::StoppedExhausted;
            self.last_error = Some(
                DatagenError::Exhausted {
                    failing: self.failing.len(),
                    valid,
                }
                .to_string(),
            );
            return Directive::Halt;
        }

        match self.pool.next_valid(self.active_slot) {
            Ok(next) => {
                self.last_error = Some(format!(
                    "API Key {} failed. Rotating to next key...",
                    self.active_slot + 1
                ));
                self.active_slot = next;
                Directive::Rotate {
                    delay: self.rotation_delay,
                }
            }
            Err(e) => {
                self.state = RunState::StoppedExhausted;
                self.last_error = Some(e.to_string());
                Directive::Halt
            }
        }
    }

    fn back_off(&mut self, message: String) -> Directive {
        self.last_error = Some(message);
        if self.backoff_secs == 0 {
            return self.resume();
        }
        self.state = RunState::BackoffWaiting;
        self.countdown = self.backoff_secs;
        Directive::Countdown {
            remaining: self.countdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, ProviderClass};

    fn machine(secrets: &[&str]) -> StateMachine {
        let pool = CredentialPool::new(
            secrets
                .iter()
                .enumerate()
                .map(|(i, s)| Credential::new(i, *s, ProviderClass::default_for_slot(i)))
                .collect(),
        );
        StateMachine::new(pool, &GenerationConfig::default())
    }

    fn credential_failure() -> Event {
        Event::Failed {
            class: FailureClass::Credential,
            message: "429 rate limit".into(),
        }
    }

    fn started_slot(outcome: StartOutcome) -> usize {
        match outcome {
            StartOutcome::Started {
                directive: Directive::Generate(request),
                ..
            } => request.credential.index,
            other => panic!("expected a generate directive, got {other:?}"),
        }
    }

    #[test]
    fn start_validates_inputs() {
        let mut m = machine(&["k1"]);
        assert!(matches!(m.start("  ", 0.5), Err(DatagenError::Validation(_))));
        assert!(matches!(m.start("prd", 1.5), Err(DatagenError::Validation(_))));
        assert!(matches!(m.start("prd", f64::NAN), Err(DatagenError::Validation(_))));
        assert_eq!(m.state(), RunState::Idle);
        assert_eq!(m.epoch(), 0);

        let mut empty = machine(&["", "  "]);
        assert!(matches!(empty.start("prd", 0.5), Err(DatagenError::Validation(_))));
    }

    #[test]
    fn start_picks_first_valid_slot_and_ignores_repeat() {
        let mut m = machine(&["", "k2", "k3"]);
        assert_eq!(started_slot(m.start("prd", 0.5).unwrap()), 1);
        assert_eq!(m.state(), RunState::Running);
        assert!(matches!(
            m.start("other prd", 0.1).unwrap(),
            StartOutcome::AlreadyRunning
        ));
        assert_eq!(m.epoch(), 1);
        assert_eq!(m.episode().unwrap().prd, "prd");
    }

    #[test]
    fn exhaustion_after_exactly_valid_count_failures() {
        let mut m = machine(&["k1", "", "k3", "k4"]);
        m.start("prd", 0.5).unwrap();

        assert!(matches!(m.handle(credential_failure()), Directive::Rotate { .. }));
        assert_eq!(m.active_slot(), 2);
        assert!(matches!(m.handle(Event::RotationElapsed), Directive::Generate(_)));
        assert!(matches!(m.handle(credential_failure()), Directive::Rotate { .. }));
        assert_eq!(m.active_slot(), 3);
        m.handle(Event::RotationElapsed);
        assert!(matches!(m.handle(credential_failure()), Directive::Halt));

        assert_eq!(m.state(), RunState::StoppedExhausted);
        assert_eq!(m.failing_slots(), vec![0, 2, 3]);
        assert_eq!(
            m.last_error(),
            Some("All provided API keys seem to be failing. Stopping generation.")
        );
    }

    #[test]
    fn success_clears_streak() {
        let mut m = machine(&["k1", "k2"]);
        m.start("prd", 0.5).unwrap();
        m.handle(credential_failure());
        m.handle(Event::RotationElapsed);
        assert_eq!(m.failing_slots(), vec![0]);

        let next = m.handle(Event::Generated);
        assert!(m.failing_slots().is_empty());
        assert!(m.last_error().is_none());
        match next {
            Directive::Generate(request) => assert_eq!(request.credential.index, 1),
            other => panic!("expected generate, got {other:?}"),
        }
    }

    #[test]
    fn transient_failure_counts_down_then_resumes() {
        let mut m = machine(&["k1", "k2"]);
        m.start("prd", 0.3).unwrap();
        m.handle(credential_failure());
        m.handle(Event::RotationElapsed);

        let directive = m.handle(Event::Failed {
            class: FailureClass::Transient,
            message: "upstream exploded".into(),
        });
        assert!(matches!(directive, Directive::Countdown { remaining: 10 }));
        assert_eq!(m.state(), RunState::BackoffWaiting);
        assert_eq!(m.failing_slots(), vec![0]);
        assert_eq!(m.active_slot(), 1);

        for remaining in (1..10).rev() {
            assert!(matches!(
                m.handle(Event::CountdownTick),
                Directive::Countdown { remaining: r } if r == remaining
            ));
        }
        match m.handle(Event::CountdownTick) {
            Directive::Generate(request) => {
                assert_eq!(request.credential.index, 1);
                assert_eq!(request.temperature, 0.3);
            }
            other => panic!("expected generate, got {other:?}"),
        }
        assert_eq!(m.state(), RunState::Running);
        assert!(m.last_error().is_none());
        assert!(m.failing_slots().is_empty());
        // countdown expiry is internal, it does not invalidate the driver
        assert_eq!(m.epoch(), 1);
    }

    #[test]
    fn stop_is_terminal_until_start() {
        let mut m = machine(&["k1"]);
        assert!(!m.stop());
        m.start("prd", 0.5).unwrap();
        assert!(m.stop());
        assert_eq!(m.state(), RunState::StoppedByUser);
        assert_eq!(m.last_error(), Some(STOPPED_BY_USER_MESSAGE));
        assert_eq!(m.epoch(), 2);

        // late events from the old driver are ignored
        assert!(matches!(m.handle(Event::Generated), Directive::Halt));
        assert!(!m.stop());

        assert!(matches!(
            m.start("prd", 0.5).unwrap(),
            StartOutcome::Started { epoch: 3, .. }
        ));
    }

    #[test]
    fn start_during_backoff_resumes_immediately() {
        let mut m = machine(&["k1"]);
        m.start("prd", 0.5).unwrap();
        m.handle(Event::Failed {
            class: FailureClass::Transient,
            message: "boom".into(),
        });
        assert_eq!(m.state(), RunState::BackoffWaiting);

        assert_eq!(started_slot(m.start("prd", 0.5).unwrap()), 0);
        assert_eq!(m.state(), RunState::Running);
        assert_eq!(m.countdown(), 0);
    }

    #[test]
    fn snapshot_reflects_machine() {
        let mut m = machine(&["k1", "k2"]);
        m.start("prd", 0.5).unwrap();
        m.handle(credential_failure());
        let snapshot = m.snapshot(7);
        assert_eq!(snapshot.state, RunState::Running);
        assert_eq!(snapshot.active_slot, 1);
        assert_eq!(snapshot.entry_count, 7);
        assert_eq!(snapshot.failing_slots, vec![0]);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("API Key 1 failed. Rotating to next key...")
        );
        assert!(snapshot.episode_id.is_some());
        assert_eq!(
            snapshot.episode_started_at,
            m.episode().map(|e| e.started_at)
        );
    }
}
