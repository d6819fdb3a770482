//! Session state and the controller that owns it.
//!
//! The controller is the only writer. Tools request changes through intents;
//! the transport reports delivery and disconnects. Everything else gets a
//! [`SessionView`] copy.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use palaver_core::{EndTrigger, Intent, Mode, ToolResponse};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    /// Ends once the farewell output has been delivered
    PendingEnd,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedTimeout {
    pub tool_id: String,
    pub reason: Option<String>,
}

/// Read-only copy of the session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub mode: Mode,
    pub lifecycle: Lifecycle,
    /// User turn counter; budgets and loop detection reset when it advances
    pub turn: u64,
    /// Model output counter; part of the fallback idempotency key
    pub model_turn: u64,
    pub total_calls_this_turn: u32,
    pub retrieval_calls_this_turn: u32,
    pub suppress_audio: bool,
    pub suppress_transcript: bool,
    pub timeouts: Vec<RecordedTimeout>,
}

impl SessionView {
    pub fn new(session_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            session_id: session_id.into(),
            mode,
            lifecycle: Lifecycle::Active,
            turn: 1,
            model_turn: 0,
            total_calls_this_turn: 0,
            retrieval_calls_this_turn: 0,
            suppress_audio: false,
            suppress_transcript: false,
            timeouts: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle != Lifecycle::Ended
    }

    pub fn pending_end(&self) -> bool {
        self.lifecycle == Lifecycle::PendingEnd
    }
}

struct SessionState {
    view: SessionView,
    cache: LruCache<String, ToolResponse>,
}

/// Shared handle to one session's state. Clones refer to the same session,
/// so a transport task can `close()` while a call is in flight.
#[derive(Clone)]
pub struct StateController {
    inner: Arc<Mutex<SessionState>>,
}

impl StateController {
    pub fn new(session_id: impl Into<String>, mode: Mode, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                view: SessionView::new(session_id, mode),
                cache: LruCache::new(capacity),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn view(&self) -> SessionView {
        self.state().view.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().view.is_active()
    }

    /// Read one state field by name, as JSON.
    pub fn get(&self, key: &str) -> Option<Value> {
        let view = self.view();
        serde_json::to_value(view).ok()?.get(key).cloned()
    }

    /// Apply an intent. Returns whether the state changed. Illegal
    /// transitions and unknown intents are logged and ignored.
    pub fn apply(&self, intent: &Intent) -> bool {
        let mut state = self.state();
        let view = &mut state.view;
        let applied = match intent {
            Intent::EndSession { trigger } => match (view.lifecycle, trigger) {
                (Lifecycle::Ended, _) => false,
                (_, EndTrigger::Immediate) => {
                    view.lifecycle = Lifecycle::Ended;
                    true
                }
                (Lifecycle::Active, EndTrigger::AfterFarewell) => {
                    view.lifecycle = Lifecycle::PendingEnd;
                    true
                }
                (Lifecycle::PendingEnd, EndTrigger::AfterFarewell) => false,
            },
            Intent::CancelPendingEnd => {
                if view.lifecycle == Lifecycle::PendingEnd {
                    view.lifecycle = Lifecycle::Active;
                    true
                } else {
                    false
                }
            }
            Intent::SuppressAudio { suppressed } if view.is_active() => {
                view.suppress_audio = *suppressed;
                true
            }
            Intent::SuppressTranscript { suppressed } if view.is_active() => {
                view.suppress_transcript = *suppressed;
                true
            }
            Intent::RecordTimeout { tool_id, reason } if view.is_active() => {
                view.timeouts.push(RecordedTimeout {
                    tool_id: tool_id.clone(),
                    reason: reason.clone(),
                });
                true
            }
            Intent::Unknown => {
                warn!(session_id = %view.session_id, "ignoring unknown intent");
                return false;
            }
            _ => false,
        };

        if applied {
            info!(
                session_id = %view.session_id,
                intent = intent.kind(),
                lifecycle = ?view.lifecycle,
                "applied intent"
            );
        } else {
            debug!(
                session_id = %view.session_id,
                intent = intent.kind(),
                lifecycle = ?view.lifecycle,
                "intent not applicable in current state"
            );
        }
        applied
    }

    /// The farewell (or any output) reached the user. Completes a pending end.
    pub fn mark_output_delivered(&self) -> bool {
        let mut state = self.state();
        if state.view.lifecycle == Lifecycle::PendingEnd {
            state.view.lifecycle = Lifecycle::Ended;
            info!(session_id = %state.view.session_id, "session ended after farewell");
            true
        } else {
            false
        }
    }

    /// The connection is gone. Later results for this session are discarded.
    pub fn close(&self) {
        let mut state = self.state();
        if state.view.lifecycle != Lifecycle::Ended {
            state.view.lifecycle = Lifecycle::Ended;
            info!(session_id = %state.view.session_id, "session closed");
        }
        state.cache.clear();
    }

    /// Start a new user turn: per-turn counters reset.
    pub(crate) fn begin_turn(&self) -> u64 {
        let mut state = self.state();
        let view = &mut state.view;
        view.turn += 1;
        view.total_calls_this_turn = 0;
        view.retrieval_calls_this_turn = 0;
        view.turn
    }

    pub(crate) fn begin_model_turn(&self) -> u64 {
        let mut state = self.state();
        state.view.model_turn += 1;
        state.view.model_turn
    }

    pub(crate) fn record_call(&self, retrieval: bool) {
        let mut state = self.state();
        state.view.total_calls_this_turn += 1;
        if retrieval {
            state.view.retrieval_calls_this_turn += 1;
        }
    }

    pub(crate) fn cached(&self, key: &str) -> Option<ToolResponse> {
        self.state().cache.peek(key).cloned()
    }

    pub(crate) fn cache(&self, key: String, response: ToolResponse) {
        self.state().cache.put(key, response);
    }
}
