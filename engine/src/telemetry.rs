//! Fire-and-forget telemetry for finished tool calls.

use anvil_tools::ErrorKind;
use anvil_types::ConfirmationOutcome;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::call::{ToolCall, ToolCallState};

/// One finished call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallEvent {
    pub function_name: String,
    pub call_id: String,
    pub prompt_id: String,
    pub status: &'static str,
    pub success: bool,
    pub duration_ms: u64,
    pub decision: Option<ConfirmationOutcome>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl ToolCallEvent {
    /// Build the event for a terminal call. `None` while the call is still running.
    #[must_use]
    pub fn from_call(call: &ToolCall) -> Option<Self> {
        let state = call.state();
        if !state.is_terminal() {
            return None;
        }
        let error = call.response().and_then(|r| r.error.as_ref());
        Some(Self {
            function_name: call.name().to_string(),
            call_id: call.call_id().to_string(),
            prompt_id: call.request.prompt_id.clone(),
            status: state.as_str(),
            success: state == ToolCallState::Success,
            duration_ms: call.status.duration_ms().unwrap_or_default(),
            decision: call.outcome,
            error: error.map(|e| e.message.clone()),
            error_kind: error.map(|e| ErrorKind::as_str(e.kind)),
        })
    }
}

/// Receiver of telemetry events. `record` runs on the scheduler's batch task,
/// so implementations must return immediately and never fail.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: ToolCallEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: ToolCallEvent) {}
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: ToolCallEvent) {
        info!(
            target: "anvil::telemetry",
            tool = %event.function_name,
            call_id = %event.call_id,
            prompt_id = %event.prompt_id,
            status = event.status,
            duration_ms = event.duration_ms,
            decision = event.decision.map(ConfirmationOutcome::as_str),
            error_kind = event.error_kind,
            "tool call finished"
        );
    }
}

/// Publishes events on an unbounded channel. Events are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: mpsc::UnboundedSender<ToolCallEvent>,
}

impl ChannelTelemetry {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ToolCallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn record(&self, event: ToolCallEvent) {
        let _ = self.tx.send(event);
    }
}
