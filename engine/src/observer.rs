//! Callbacks the scheduler drives while a batch runs.

use crate::call::ToolCall;
use crate::editor::EditorType;
use crate::modify::ModifyError;

/// Receives batch progress. Every method runs on the batch task and must not
/// block; forward to a channel for anything slow (prompting the user, IO).
pub trait SchedulerObserver: Send + Sync {
    /// Any call changed state. `calls` is the whole batch, in request order.
    fn on_tool_calls_update(&self, _calls: &[ToolCall]) {}

    /// Every call is terminal. Fires exactly once per batch, after the
    /// scheduler is free to accept the next batch.
    fn on_all_tool_calls_complete(&self, _calls: &[ToolCall]) {}

    /// Cumulative live output of an executing call.
    fn on_output_update(&self, _call_id: &str, _output: &str) {}

    /// A modify request for an awaiting call could not be carried out.
    /// The call keeps waiting for a decision.
    fn on_modify_failed(&self, _call_id: &str, _error: &ModifyError) {}

    /// Editor for the modify flow. `None` disables it.
    fn preferred_editor(&self) -> Option<EditorType> {
        None
    }
}

/// Ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}
