//! Protocol dispatcher
//!
//! Routes decoded board frames to semantic handlers and builds outgoing
//! requests. Owns the task registry: which program fragment started which
//! task id, and where each task is in its lifecycle.

use super::codec::{encode_kind, Frame};
use super::control::{ControlMessage, ControlSelector};
use super::descriptor::MessageKind;
use super::value::{decode_text, TaskError, Value};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{trace, warn};

/// Lifecycle of one task id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Done,
    Errored,
}

/// Registry entry linking a task id to the fragment that owns it
#[derive(Debug, Clone)]
pub struct PendingTask<O> {
    pub owner: O,
    pub state: TaskState,
}

/// Receiver of task and output events
///
/// Task events are only delivered for ids with a registered owner.
pub trait TaskSink {
    /// Identifies the program fragment a task belongs to
    type Owner: Clone;

    fn task_started(&mut self, owner: &Self::Owner, task_id: u8);
    fn task_done(&mut self, owner: &Self::Owner, task_id: u8);
    fn task_value(&mut self, owner: &Self::Owner, task_id: u8, value: Value);
    fn task_error(&mut self, owner: &Self::Owner, task_id: u8, error: TaskError);
    fn debug_output(&mut self, task_id: u8, text: String);

    /// A task was put back to idle without the board reporting it: after a
    /// reconnect, `stopAll` or `systemReset`
    fn task_reset(&mut self, _owner: &Self::Owner, _task_id: u8) {}

    fn variable_value(&mut self, _var_id: u8, _value: Value) {}
    fn version(&mut self, _version: String) {}
    fn broadcast(&mut self, _message: String) {}
}

/// Receiver of JSON control messages
pub trait ControlSink {
    fn on_control(&mut self, selector: ControlSelector, arguments: &[JsonValue]);
}

impl ControlSink for () {
    fn on_control(&mut self, _selector: ControlSelector, _arguments: &[JsonValue]) {}
}

pub struct ProtocolDispatcher<S: TaskSink, C: ControlSink = ()> {
    tasks: HashMap<u8, PendingTask<S::Owner>>,
    sink: S,
    control: C,
}

impl<S: TaskSink> ProtocolDispatcher<S, ()> {
    pub fn new(sink: S) -> Self {
        Self::with_control(sink, ())
    }
}

impl<S: TaskSink, C: ControlSink> ProtocolDispatcher<S, C> {
    pub fn with_control(sink: S, control: C) -> Self {
        Self {
            tasks: HashMap::new(),
            sink,
            control,
        }
    }

    // =========================================================================
    // Task registry
    // =========================================================================

    /// Associate a task id with its owner; any previous entry is replaced
    pub fn register_task(&mut self, task_id: u8, owner: S::Owner) {
        self.tasks.insert(
            task_id,
            PendingTask {
                owner,
                state: TaskState::Idle,
            },
        );
    }

    pub fn task_state(&self, task_id: u8) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|t| t.state)
    }

    pub fn task(&self, task_id: u8) -> Option<&PendingTask<S::Owner>> {
        self.tasks.get(&task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Move every running task back to idle (board went away)
    pub fn reset_running(&mut self) {
        self.move_to_idle(|state| state == TaskState::Running);
    }

    fn set_all_idle(&mut self) {
        self.move_to_idle(|state| state != TaskState::Idle);
    }

    /// Set matching tasks idle and tell the sink, in task id order
    fn move_to_idle(&mut self, matches: impl Fn(TaskState) -> bool) {
        let mut ids: Vec<u8> = self
            .tasks
            .iter()
            .filter(|(_, task)| matches(task.state))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.state = TaskState::Idle;
                self.sink.task_reset(&task.owner, id);
            }
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Route one decoded frame
    ///
    /// Only a malformed JSON control envelope is reported as an error.
    pub fn handle(&mut self, frame: Frame) -> Result<()> {
        let task_id = frame.task_id;
        match frame.kind {
            MessageKind::TaskStarted => {
                if let Some(task) = self.transition(task_id, TaskState::Running) {
                    self.sink.task_started(&task, task_id);
                }
            }
            MessageKind::TaskDone => {
                if let Some(task) = self.transition(task_id, TaskState::Done) {
                    self.sink.task_done(&task, task_id);
                }
            }
            MessageKind::TaskReturned => {
                if let Some(task) = self.transition(task_id, TaskState::Done) {
                    self.sink.task_value(&task, task_id, frame.value());
                }
            }
            MessageKind::TaskError => {
                if let Some(task) = self.transition(task_id, TaskState::Errored) {
                    self.sink
                        .task_error(&task, task_id, TaskError::parse(&frame.payload));
                }
            }
            MessageKind::OutputString => self.sink.debug_output(task_id, frame.text()),
            MessageKind::VarValue => self.sink.variable_value(task_id, frame.value()),
            MessageKind::Version => self.sink.version(frame.text()),
            MessageKind::Broadcast => self.sink.broadcast(decode_text(&frame.payload)),
            MessageKind::JsonMessage => {
                let message = ControlMessage::from_payload(&frame.payload)?;
                match message.known_selector() {
                    Some(selector) => self.control.on_control(selector, &message.arguments),
                    None => warn!("Ignoring unknown control selector: {}", message.selector),
                }
            }
            other => trace!("unhandled {} task={} len={}", other, task_id, frame.payload.len()),
        }
        Ok(())
    }

    /// Set a task's state and return its owner, or None if unregistered
    fn transition(&mut self, task_id: u8, state: TaskState) -> Option<S::Owner> {
        let task = self.tasks.get_mut(&task_id)?;
        task.state = state;
        Some(task.owner.clone())
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Encode an IDE request and apply its effect on the registry
    ///
    /// # Errors
    ///
    /// `UnknownSelector` for names not in the table or not sendable by the
    /// IDE; `PayloadTooLarge` from the codec.
    pub fn build(&mut self, selector: &str, task_id: u8, payload: &[u8]) -> Result<Bytes> {
        let kind = MessageKind::from_selector(selector)
            .filter(|k| k.direction().is_outbound())
            .ok_or_else(|| BridgeError::UnknownSelector {
                selector: selector.to_string(),
            })?;
        let bytes = encode_kind(kind, task_id, payload)?;

        match kind {
            MessageKind::StopAll | MessageKind::SystemReset => self.set_all_idle(),
            MessageKind::DeleteChunk => {
                self.tasks.remove(&task_id);
            }
            MessageKind::DeleteAllCode => self.tasks.clear(),
            _ => {}
        }
        Ok(bytes)
    }
}
