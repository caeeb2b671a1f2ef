//! Per-call state tracked by the scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anvil_tools::{ConfirmationDetails, ErrorKind, Tool};
use anvil_types::{ConfirmationOutcome, Part, ToolCallRequest, ToolResultDisplay};
use serde_json::Value;

/// Error attached to a terminal call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallError {
    pub kind: ErrorKind,
    pub message: String,
}

/// What a finished call reports back: the model-facing parts and the
/// user-facing display.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub response_parts: Vec<Part>,
    pub result_display: Option<ToolResultDisplay>,
    pub error: Option<ToolCallError>,
}

/// Status discriminant, used for transition checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCallState {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Validating => 0,
            Self::AwaitingApproval => 1,
            Self::Scheduled => 2,
            Self::Executing => 3,
            Self::Success | Self::Error | Self::Cancelled => 4,
        }
    }

    /// Whether a call may move from `self` to `next`.
    ///
    /// Transitions only move forward. `AwaitingApproval` may re-enter itself
    /// (the modify flow); nothing leaves a terminal state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::AwaitingApproval, Self::AwaitingApproval) => true,
            // Execution is only reachable through scheduling.
            (Self::Validating | Self::AwaitingApproval, Self::Executing) => false,
            // Approval was either granted or cancelled; success needs execution.
            (Self::Validating | Self::AwaitingApproval | Self::Scheduled, Self::Success) => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ToolCallStatus {
    Validating,
    AwaitingApproval {
        details: ConfirmationDetails,
        /// An editor session or inline modification is in flight.
        modifying: bool,
    },
    Scheduled,
    Executing {
        live_output: Option<String>,
        pid: Option<u32>,
    },
    Success {
        response: ToolCallResponse,
        duration_ms: u64,
    },
    Error {
        response: ToolCallResponse,
        duration_ms: u64,
    },
    Cancelled {
        response: ToolCallResponse,
        duration_ms: u64,
    },
}

impl ToolCallStatus {
    #[must_use]
    pub const fn state(&self) -> ToolCallState {
        match self {
            Self::Validating => ToolCallState::Validating,
            Self::AwaitingApproval { .. } => ToolCallState::AwaitingApproval,
            Self::Scheduled => ToolCallState::Scheduled,
            Self::Executing { .. } => ToolCallState::Executing,
            Self::Success { .. } => ToolCallState::Success,
            Self::Error { .. } => ToolCallState::Error,
            Self::Cancelled { .. } => ToolCallState::Cancelled,
        }
    }

    #[must_use]
    pub fn response(&self) -> Option<&ToolCallResponse> {
        match self {
            Self::Success { response, .. }
            | Self::Error { response, .. }
            | Self::Cancelled { response, .. } => Some(response),
            _ => None,
        }
    }

    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Success { duration_ms, .. }
            | Self::Error { duration_ms, .. }
            | Self::Cancelled { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        }
    }
}

/// One call of a batch.
#[derive(Clone)]
pub struct ToolCall {
    pub request: ToolCallRequest,
    /// Arguments the tool will run with. Starts as `request.args`; the modify
    /// flow rewrites it.
    pub args: Value,
    /// `None` when the name did not resolve.
    pub tool: Option<Arc<dyn Tool>>,
    pub status: ToolCallStatus,
    /// The user's answer, once the call has been confirmed or cancelled.
    pub outcome: Option<ConfirmationOutcome>,
    pub(crate) started_at: Instant,
}

impl ToolCall {
    /// A fresh call in `Validating`.
    #[must_use]
    pub fn new(request: ToolCallRequest, tool: Option<Arc<dyn Tool>>) -> Self {
        Self {
            args: request.args.clone(),
            request,
            tool,
            status: ToolCallStatus::Validating,
            outcome: None,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.request.name
    }

    #[must_use]
    pub fn state(&self) -> ToolCallState {
        self.status.state()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    #[must_use]
    pub fn confirmation(&self) -> Option<&ConfirmationDetails> {
        match &self.status {
            ToolCallStatus::AwaitingApproval { details, .. } => Some(details),
            _ => None,
        }
    }

    #[must_use]
    pub fn response(&self) -> Option<&ToolCallResponse> {
        self.status.response()
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCall")
            .field("call_id", &self.request.call_id)
            .field("name", &self.request.name)
            .field("resolved", &self.tool.is_some())
            .field("status", &self.status)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// The call a UI should prompt for: the first one awaiting approval that is
/// not in the middle of a modification.
#[must_use]
pub fn first_awaiting_approval(calls: &[ToolCall]) -> Option<&ToolCall> {
    calls.iter().find(|call| {
        matches!(
            call.status,
            ToolCallStatus::AwaitingApproval {
                modifying: false,
                ..
            }
        )
    })
}
