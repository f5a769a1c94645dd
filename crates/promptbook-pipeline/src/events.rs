//! Execution progress events.
//!
//! Emits [`ExecutionEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (CLI progress output, hosts, tests) can follow a run without
//! coupling to the engine internals. Every event carries the id of its run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_title: String,
        template_count: usize,
    },
    RunCompleted {
        run_id: Uuid,
        is_successful: bool,
        duration_ms: u64,
    },
    TemplateStarted {
        run_id: Uuid,
        template: String,
        execution_type: String,
    },
    JokerUsed {
        run_id: Uuid,
        template: String,
        joker: String,
    },
    AttemptFailed {
        run_id: Uuid,
        template: String,
        attempt: usize,
        error: String,
    },
    TemplateCompleted {
        run_id: Uuid,
        template: String,
        attempts: usize,
        duration_ms: u64,
    },
    TemplateFailed {
        run_id: Uuid,
        template: String,
        error: String,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. }
            | ExecutionEvent::TemplateStarted { run_id, .. }
            | ExecutionEvent::JokerUsed { run_id, .. }
            | ExecutionEvent::AttemptFailed { run_id, .. }
            | ExecutionEvent::TemplateCompleted { run_id, .. }
            | ExecutionEvent::TemplateFailed { run_id, .. } => *run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
