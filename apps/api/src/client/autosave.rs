//! Autosave Scheduler: turns a high-frequency stream of document changes into a
//! low-frequency stream of save attempts.
//!
//! ```text
//! Idle --change--> Pending --quiet period--> Saving --done--> Idle
//!                  ^  |                        |
//!                  +--+ change restarts timer  +--> Pending, if a newer change arrived
//! ```
//!
//! - A save runs only after the input has been stable for the quiet period.
//! - A change whose serialization equals the last scheduled or saved one is ignored.
//! - At most one save is in flight. Changes made meanwhile are picked up afterwards through
//!   the normal debounce path, using the latest data rather than a queued snapshot.
//! - A failed autosave is logged and absorbed. Only [`AutosaveScheduler::flush`] reports errors.
//!
//! The scheduler spawns its timers on the ambient tokio runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::remote::SyncError;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    pub quiet_period: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

/// Where a debounced save goes.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(&self, content: &Value) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending,
    Saving,
}

struct State {
    phase: Phase,
    /// Latest content and its serialization.
    current: Option<(Value, String)>,
    last_scheduled: Option<String>,
    last_saved: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is armed or cancelled; a timer only fires if it still matches.
    generation: u64,
}

struct Inner {
    handler: Arc<dyn SaveHandler>,
    quiet_period: Duration,
    state: Mutex<State>,
    save_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct AutosaveScheduler {
    inner: Arc<Inner>,
}

impl AutosaveScheduler {
    pub fn new(handler: Arc<dyn SaveHandler>, config: AutosaveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                quiet_period: config.quiet_period,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    current: None,
                    last_scheduled: None,
                    last_saved: None,
                    timer: None,
                    generation: 0,
                }),
                save_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Reports the editor's current document. Never blocks on I/O.
    pub fn notify_change(&self, content: &Value) {
        let serialized = match serde_json::to_string(content) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping autosave of unserializable document: {e}");
                return;
            }
        };

        let mut state = self.inner.state();
        if state.last_scheduled.as_deref() == Some(serialized.as_str()) {
            trace!("Document unchanged; nothing to schedule");
            return;
        }
        state.last_scheduled = Some(serialized.clone());
        state.current = Some((content.clone(), serialized));

        if state.phase == Phase::Saving {
            debug!("Save in flight; change will be evaluated when it completes");
            return;
        }
        Inner::arm_timer(&self.inner, &mut state);
    }

    /// Saves the latest content now, skipping the quiet period. Waits for an in-flight save
    /// first. Unlike autosaves, failures are returned to the caller.
    pub async fn flush(&self) -> Result<(), SyncError> {
        {
            let mut state = self.inner.state();
            Inner::cancel_timer(&mut state);
            if state.phase == Phase::Pending {
                state.phase = Phase::Idle;
            }
        }
        Inner::save_current(&self.inner).await.map(|_| ())
    }

    /// Treats `content` as already stored, e.g. right after loading it from the server.
    /// Discards any pending, unsaved change.
    pub fn mark_saved(&self, content: &Value) {
        let serialized = match serde_json::to_string(content) {
            Ok(s) => s,
            Err(e) => {
                warn!("Cannot record unserializable document as saved: {e}");
                return;
            }
        };
        let mut state = self.inner.state();
        Inner::cancel_timer(&mut state);
        if state.phase == Phase::Pending {
            state.phase = Phase::Idle;
        }
        state.current = Some((content.clone(), serialized.clone()));
        state.last_scheduled = Some(serialized.clone());
        state.last_saved = Some(serialized);
    }

    /// Forgets the last saved value so the next change or flush is saved even if identical.
    pub fn reset_baseline(&self) {
        let mut state = self.inner.state();
        state.last_saved = None;
        state.last_scheduled = None;
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase
    }

    pub fn has_unsaved_changes(&self) -> bool {
        let state = self.inner.state();
        match &state.current {
            Some((_, serialized)) => state.last_saved.as_deref() != Some(serialized.as_str()),
            None => false,
        }
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_timer(state: &mut State) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
    }

    fn arm_timer(this: &Arc<Self>, state: &mut State) {
        Self::cancel_timer(state);
        let generation = state.generation;
        state.phase = Phase::Pending;

        let inner = Arc::clone(this);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            inner.fire(generation).await;
        }));
    }

    async fn fire(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            if state.phase != Phase::Pending {
                return;
            }
        }
        if let Err(e) = Self::save_current(&self).await {
            warn!("Autosave failed; will retry on the next change: {e}");
        }
    }

    /// Returns whether a save was attempted.
    async fn save_current(this: &Arc<Self>) -> Result<bool, SyncError> {
        let _guard = this.save_lock.lock().await;

        let (content, serialized) = {
            let mut state = this.state();
            let pending = match &state.current {
                Some((_, serialized))
                    if state.last_saved.as_deref() != Some(serialized.as_str()) =>
                {
                    state.current.clone()
                }
                _ => None,
            };
            match pending {
                Some(pending) => {
                    state.phase = Phase::Saving;
                    pending
                }
                None => {
                    if state.timer.is_none() {
                        state.phase = Phase::Idle;
                    }
                    return Ok(false);
                }
            }
        };

        let result = this.handler.save(&content).await;

        let mut state = this.state();
        match &result {
            Ok(()) => {
                trace!("Autosave stored {} bytes", serialized.len());
                state.last_saved = Some(serialized.clone());
            }
            Err(_) => {
                // Let the same content be scheduled again.
                if state.last_scheduled.as_deref() == Some(serialized.as_str()) {
                    state.last_scheduled = state.last_saved.clone();
                }
            }
        }
        state.phase = Phase::Idle;

        let changed_meanwhile = state
            .current
            .as_ref()
            .map_or(false, |(_, latest)| *latest != serialized);
        if changed_meanwhile {
            Self::arm_timer(this, &mut state);
        } else {
            // Anything armed while this save ran covered the content just stored.
            Self::cancel_timer(&mut state);
        }
        result.map(|()| true)
    }
}
