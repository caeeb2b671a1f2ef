//! Tool call execution engine for Anvil.
//!
//! The [`Scheduler`] drives batches of model-issued tool calls through
//! validation, confirmation, execution and result conversion. UIs plug in
//! through [`SchedulerObserver`]; telemetry through [`TelemetrySink`].

mod call;
mod convert;
mod editor;
mod modify;
mod observer;
mod scheduler;
mod telemetry;

pub use call::{
    ToolCall, ToolCallError, ToolCallResponse, ToolCallState, ToolCallStatus,
    first_awaiting_approval,
};
pub use convert::{cancelled_response, convert_to_function_response, error_response};
pub use editor::{DiffEditor, EditorFut, EditorType, ProcessDiffEditor};
pub use modify::{ModifyError, ModifyOutcome, apply_inline_modification, modify_with_editor};
pub use observer::{NoopObserver, SchedulerObserver};
pub use scheduler::{BatchHandle, Scheduler, SchedulerError};
pub use telemetry::{
    ChannelTelemetry, NoopTelemetry, TelemetrySink, ToolCallEvent, TracingTelemetry,
};
