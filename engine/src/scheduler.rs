//! Tool call scheduler.
//!
//! A [`Scheduler`] runs one batch of tool calls at a time. Each batch is owned
//! by a single tokio task that holds every [`ToolCall`] and mutates them one
//! event at a time:
//!
//! ```text
//! Validating --(unknown tool | invalid args | duplicate id)--> Error
//! Validating --(no confirmation needed)--> Scheduled --> Executing
//! Validating --(confirmation needed)--> AwaitingApproval
//! AwaitingApproval --(proceed)--> Scheduled
//! AwaitingApproval --(modify with editor)--> AwaitingApproval
//! AwaitingApproval --(cancel | signal)--> Cancelled
//! Executing --> Success | Error | Cancelled
//! ```
//!
//! Confirmation checks, executions and editor sessions run in their own tasks
//! and report back over the batch's event channel, so a call waiting for the
//! user never holds up its siblings.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anvil_tools::{
    ConfirmationDetails, ConfirmationKind, ErrorKind, Tool, ToolCtx, ToolError, ToolEvent,
    ToolRegistry,
};
use anvil_types::{
    ApprovalMode, ConfirmationOutcome, ConfirmationPayload, ToolCallRequest, ToolResult,
    ToolResultDisplay,
};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call::{ToolCall, ToolCallError, ToolCallResponse, ToolCallState, ToolCallStatus};
use crate::convert::{cancelled_response, convert_to_function_response, error_response};
use crate::editor::{DiffEditor, ProcessDiffEditor};
use crate::modify::{ModifyError, ModifyOutcome, apply_inline_modification, modify_with_editor};
use crate::observer::SchedulerObserver;
use crate::telemetry::{NoopTelemetry, TelemetrySink, ToolCallEvent};

const TOOL_EVENT_CHANNEL_CAPACITY: usize = 64;

const SIGNAL_CANCEL_REASON: &str = "User cancelled tool execution.";
const USER_CANCEL_REASON: &str = "User did not allow tool call";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("a tool call batch is already running")]
    BatchInProgress,
    #[error("no tool call batch is running")]
    NoActiveBatch,
    #[error("no tool call with id '{call_id}' in the running batch")]
    UnknownCall { call_id: String },
    #[error("tool call batch failed: {message}")]
    BatchFailed { message: String },
}

/// Everything the batch task reacts to.
enum BatchEvent {
    Resolve {
        call_id: String,
        outcome: ConfirmationOutcome,
        payload: Option<ConfirmationPayload>,
        signal: CancellationToken,
    },
    ConfirmationChecked {
        index: usize,
        result: Result<Option<ConfirmationDetails>, ToolError>,
    },
    Modified {
        index: usize,
        /// Set for inline modifications, which proceed once the args are rebuilt.
        proceed: Option<ConfirmationOutcome>,
        result: Result<ModifyOutcome, ModifyError>,
    },
    Output {
        index: usize,
        event: ToolEvent,
    },
    Finished {
        index: usize,
        result: Result<ToolResult, ToolError>,
    },
}

struct ActiveBatch {
    id: u64,
    call_ids: HashSet<String>,
    events: mpsc::UnboundedSender<BatchEvent>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveBatch>>>;

/// Frees the scheduler for the next batch. Also runs on drop so a batch task
/// that dies does not leave the slot taken.
struct SlotRelease {
    slot: ActiveSlot,
    id: u64,
}

impl SlotRelease {
    fn release(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|batch| batch.id == self.id) {
            *slot = None;
        }
    }
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a scheduled batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: u64,
    join: JoinHandle<Vec<ToolCall>>,
}

impl BatchHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for every call to finish and return them in request order.
    pub async fn wait(self) -> Result<Vec<ToolCall>, SchedulerError> {
        self.join.await.map_err(|e| SchedulerError::BatchFailed {
            message: e.to_string(),
        })
    }
}

pub struct Scheduler {
    registry: Arc<ToolRegistry>,
    observer: Arc<dyn SchedulerObserver>,
    telemetry: Arc<dyn TelemetrySink>,
    diff_editor: Arc<dyn DiffEditor>,
    approval_mode: ApprovalMode,
    active: ActiveSlot,
    next_batch_id: AtomicU64,
}

impl Scheduler {
    pub fn new(registry: Arc<ToolRegistry>, observer: Arc<dyn SchedulerObserver>) -> Self {
        Self {
            registry,
            observer,
            telemetry: Arc::new(NoopTelemetry),
            diff_editor: Arc::new(ProcessDiffEditor),
            approval_mode: ApprovalMode::Default,
            active: Arc::new(Mutex::new(None)),
            next_batch_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn with_diff_editor(mut self, diff_editor: Arc<dyn DiffEditor>) -> Self {
        self.diff_editor = diff_editor;
        self
    }

    #[must_use]
    pub fn with_approval_mode(mut self, approval_mode: ApprovalMode) -> Self {
        self.approval_mode = approval_mode;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        self.approval_mode
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start a batch. Progress is reported through the observer; the handle
    /// resolves with the finished calls.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        signal: CancellationToken,
    ) -> Result<BatchHandle, SchedulerError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SchedulerError::BatchInProgress);
        }

        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let (events, rx) = mpsc::unbounded_channel();
        *slot = Some(ActiveBatch {
            id,
            call_ids: requests.iter().map(|r| r.call_id.clone()).collect(),
            events: events.clone(),
        });
        drop(slot);

        debug!(batch = id, calls = requests.len(), "scheduling tool call batch");
        let calls = requests
            .into_iter()
            .map(|request| {
                let tool = self.registry.get(&request.name);
                ToolCall::new(request, tool)
            })
            .collect();
        let batch = Batch {
            id,
            calls,
            signal,
            events,
            observer: Arc::clone(&self.observer),
            telemetry: Arc::clone(&self.telemetry),
            diff_editor: Arc::clone(&self.diff_editor),
            approval_mode: self.approval_mode,
        };
        let release = SlotRelease {
            slot: Arc::clone(&self.active),
            id,
        };
        let join = tokio::spawn(batch.run(rx, release));
        Ok(BatchHandle { id, join })
    }

    /// Answer the confirmation prompt of a call awaiting approval.
    ///
    /// `signal` bounds the editor session started by
    /// [`ConfirmationOutcome::ModifyWithEditor`]. Answers for calls that are no
    /// longer awaiting approval are logged and ignored.
    pub fn resolve_confirmation(
        &self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        signal: &CancellationToken,
        payload: Option<ConfirmationPayload>,
    ) -> Result<(), SchedulerError> {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(batch) = slot.as_ref() else {
            return Err(SchedulerError::NoActiveBatch);
        };
        if !batch.call_ids.contains(call_id) {
            return Err(SchedulerError::UnknownCall {
                call_id: call_id.to_string(),
            });
        }
        batch
            .events
            .send(BatchEvent::Resolve {
                call_id: call_id.to_string(),
                outcome,
                payload,
                signal: signal.clone(),
            })
            .map_err(|_| SchedulerError::NoActiveBatch)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("approval_mode", &self.approval_mode)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

struct Batch {
    id: u64,
    calls: Vec<ToolCall>,
    signal: CancellationToken,
    events: mpsc::UnboundedSender<BatchEvent>,
    observer: Arc<dyn SchedulerObserver>,
    telemetry: Arc<dyn TelemetrySink>,
    diff_editor: Arc<dyn DiffEditor>,
    approval_mode: ApprovalMode,
}

impl Batch {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<BatchEvent>,
        release: SlotRelease,
    ) -> Vec<ToolCall> {
        self.start();

        let signal = self.signal.clone();
        let mut cancel_handled = false;
        while !self.is_complete() {
            tokio::select! {
                biased;
                () = signal.cancelled(), if !cancel_handled => {
                    cancel_handled = true;
                    self.cancel_pending();
                }
                Some(event) = rx.recv() => self.handle(event),
                else => {
                    warn!(batch = self.id, "batch event channel closed with calls pending");
                    break;
                }
            }
        }

        debug!(batch = self.id, "tool call batch complete");
        release.release();
        self.observer.on_all_tool_calls_complete(&self.calls);
        self.calls
    }

    fn is_complete(&self) -> bool {
        self.calls.iter().all(ToolCall::is_terminal)
    }

    fn notify(&self) {
        self.observer.on_tool_calls_update(&self.calls);
    }

    fn start(&mut self) {
        self.notify();
        let mut seen = HashSet::new();
        for index in 0..self.calls.len() {
            let call_id = self.calls[index].call_id().to_string();
            if !seen.insert(call_id.clone()) {
                self.fail(index, ToolError::DuplicateToolCallId { id: call_id });
            } else if self.signal.is_cancelled() {
                self.cancel(index, SIGNAL_CANCEL_REASON);
            } else {
                self.validate(index);
            }
        }
    }

    fn validate(&mut self, index: usize) -> bool {
        let call = &self.calls[index];
        let Some(tool) = call.tool.clone() else {
            let name = call.name().to_string();
            return self.fail(index, ToolError::UnknownTool { name });
        };
        if let Err(e) = tool.validate_params(&call.args) {
            return self.fail(index, e);
        }
        if self.approval_mode == ApprovalMode::Yolo {
            return self.schedule_call(index);
        }

        let args = call.args.clone();
        let signal = self.signal.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(tool.should_confirm_execute(&args, &signal))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ToolError::execution(
                        tool.name(),
                        format!("Confirmation check panicked: {}", panic_message(&payload)),
                    ))
                });
            let _ = events.send(BatchEvent::ConfirmationChecked { index, result });
        });
        false
    }

    fn handle(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::Resolve {
                call_id,
                outcome,
                payload,
                signal,
            } => self.on_resolve(&call_id, outcome, payload, signal),
            BatchEvent::ConfirmationChecked { index, result } => {
                self.on_confirmation_checked(index, result)
            }
            BatchEvent::Modified {
                index,
                proceed,
                result,
            } => self.on_modified(index, proceed, result),
            BatchEvent::Output { index, event } => self.on_output(index, event),
            BatchEvent::Finished { index, result } => self.on_finished(index, result),
        };
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Apply `status` if the move is legal and publish the new snapshot.
    /// Illegal moves are logged and dropped.
    fn set_status(&mut self, index: usize, status: ToolCallStatus) -> bool {
        let call = &mut self.calls[index];
        let from = call.state();
        let to = status.state();
        if !from.can_transition_to(to) {
            warn!(
                batch = self.id,
                call_id = %call.call_id(),
                %from,
                %to,
                "rejected illegal tool call transition"
            );
            return false;
        }
        debug!(
            batch = self.id,
            call_id = %call.call_id(),
            tool = %call.name(),
            %from,
            %to,
            "tool call transition"
        );
        call.status = status;
        if to.is_terminal()
            && let Some(event) = ToolCallEvent::from_call(call)
        {
            self.telemetry.record(event);
        }
        self.notify();
        true
    }

    fn fail(&mut self, index: usize, error: ToolError) -> bool {
        let call = &self.calls[index];
        let message = error.to_string();
        let response = ToolCallResponse {
            call_id: call.call_id().to_string(),
            response_parts: error_response(call.name(), call.call_id(), &message),
            result_display: Some(ToolResultDisplay::Text(message.clone())),
            error: Some(ToolCallError {
                kind: error.kind(),
                message,
            }),
        };
        let duration_ms = call.elapsed_ms();
        self.set_status(
            index,
            ToolCallStatus::Error {
                response,
                duration_ms,
            },
        )
    }

    fn cancel(&mut self, index: usize, reason: &str) -> bool {
        let call = &self.calls[index];
        let response = ToolCallResponse {
            call_id: call.call_id().to_string(),
            response_parts: cancelled_response(call.name(), call.call_id(), reason),
            result_display: Some(ToolResultDisplay::Text(reason.to_string())),
            error: None,
        };
        let duration_ms = call.elapsed_ms();
        self.set_status(
            index,
            ToolCallStatus::Cancelled {
                response,
                duration_ms,
            },
        )
    }

    /// Move every call that has not started executing to `Cancelled`.
    /// Executing calls observe the signal through their context.
    fn cancel_pending(&mut self) {
        debug!(batch = self.id, "batch signal cancelled");
        for index in 0..self.calls.len() {
            if matches!(
                self.calls[index].state(),
                ToolCallState::Validating
                    | ToolCallState::AwaitingApproval
                    | ToolCallState::Scheduled
            ) {
                self.cancel(index, SIGNAL_CANCEL_REASON);
            }
        }
    }

    fn schedule_call(&mut self, index: usize) -> bool {
        if self.signal.is_cancelled() {
            return self.cancel(index, SIGNAL_CANCEL_REASON);
        }
        if !self.set_status(index, ToolCallStatus::Scheduled) {
            return false;
        }
        self.dispatch(index);
        true
    }

    fn dispatch(&mut self, index: usize) {
        let call = &self.calls[index];
        let Some(tool) = call.tool.clone() else {
            let name = call.name().to_string();
            self.fail(index, ToolError::UnknownTool { name });
            return;
        };
        let call_id = call.call_id().to_string();
        let args = call.args.clone();
        if !self.set_status(
            index,
            ToolCallStatus::Executing {
                live_output: None,
                pid: None,
            },
        ) {
            return;
        }
        tokio::spawn(execute_call(
            index,
            tool,
            call_id,
            args,
            self.signal.child_token(),
            self.events.clone(),
        ));
    }

    // ------------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------------

    fn on_confirmation_checked(
        &mut self,
        index: usize,
        result: Result<Option<ConfirmationDetails>, ToolError>,
    ) -> bool {
        // The batch may have been cancelled while the check ran.
        if self.calls[index].state() != ToolCallState::Validating {
            return false;
        }
        match result {
            Err(e) => self.fail(index, e),
            Ok(None) => self.schedule_call(index),
            Ok(Some(details))
                if self.approval_mode == ApprovalMode::AutoEdit && details.is_edit() =>
            {
                debug!(call_id = %self.calls[index].call_id(), "edit auto-approved");
                self.schedule_call(index)
            }
            Ok(Some(details)) => self.set_status(
                index,
                ToolCallStatus::AwaitingApproval {
                    details,
                    modifying: false,
                },
            ),
        }
    }

    fn on_resolve(
        &mut self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        payload: Option<ConfirmationPayload>,
        signal: CancellationToken,
    ) -> bool {
        let Some(index) = self
            .calls
            .iter()
            .position(|c| c.call_id() == call_id && c.state() == ToolCallState::AwaitingApproval)
        else {
            warn!(call_id, %outcome, "confirmation for a call that is not awaiting approval");
            return false;
        };
        let ToolCallStatus::AwaitingApproval { details, modifying } = &self.calls[index].status
        else {
            return false;
        };
        if *modifying {
            warn!(call_id, %outcome, "modification in progress; confirmation ignored");
            return false;
        }
        let hook = details.on_confirm.clone();
        debug!(call_id, %outcome, "confirmation resolved");

        match outcome {
            ConfirmationOutcome::Cancel => {
                hook.fire(outcome);
                self.calls[index].outcome = Some(outcome);
                self.cancel(index, USER_CANCEL_REASON)
            }
            ConfirmationOutcome::ModifyWithEditor => self.start_editor_session(index, signal),
            ConfirmationOutcome::ProceedOnce
            | ConfirmationOutcome::ProceedAlways
            | ConfirmationOutcome::ProceedAlwaysServer
            | ConfirmationOutcome::ProceedAlwaysTool => {
                self.calls[index].outcome = Some(outcome);
                if let Some(new_content) = payload.and_then(|p| p.new_content) {
                    if self.start_inline_modification(index, outcome, new_content) {
                        return true;
                    }
                    warn!(call_id, "inline content ignored: tool is not modifiable");
                }
                hook.fire(outcome);
                self.schedule_call(index)
            }
        }
    }

    fn set_modifying(&mut self, index: usize, value: bool) {
        if let ToolCallStatus::AwaitingApproval { modifying, .. } = &mut self.calls[index].status {
            *modifying = value;
            self.notify();
        }
    }

    /// The call stays in `AwaitingApproval`; observers decide how to surface it.
    fn modify_failed(&self, index: usize, error: &ModifyError) {
        let call_id = self.calls[index].call_id();
        warn!(call_id = %call_id, %error, "modification failed");
        self.observer.on_modify_failed(call_id, error);
    }

    fn start_editor_session(&mut self, index: usize, signal: CancellationToken) -> bool {
        let call = &self.calls[index];
        let Some(tool) = call.tool.clone() else {
            return false;
        };
        if tool.as_modifiable().is_none() {
            let name = call.name().to_string();
            self.modify_failed(index, &ModifyError::NotModifiable { tool: name });
            return false;
        }
        let Some(editor) = self.observer.preferred_editor() else {
            self.modify_failed(index, &ModifyError::NoEditor);
            return false;
        };

        let args = call.args.clone();
        let batch_signal = self.signal.clone();
        let diff_editor = Arc::clone(&self.diff_editor);
        let events = self.events.clone();
        self.calls[index].outcome = Some(ConfirmationOutcome::ModifyWithEditor);
        self.set_modifying(index, true);

        tokio::spawn(async move {
            let result = match tool.as_modifiable() {
                Some(modifiable) => tokio::select! {
                    result = modify_with_editor(
                        modifiable,
                        &args,
                        &editor,
                        diff_editor.as_ref(),
                        &signal,
                    ) => result,
                    () = batch_signal.cancelled() => Err(ModifyError::Cancelled),
                },
                None => Err(ModifyError::NotModifiable {
                    tool: tool.name().to_string(),
                }),
            };
            let _ = events.send(BatchEvent::Modified {
                index,
                proceed: None,
                result,
            });
        });
        true
    }

    fn start_inline_modification(
        &mut self,
        index: usize,
        outcome: ConfirmationOutcome,
        new_content: String,
    ) -> bool {
        let call = &self.calls[index];
        let Some(tool) = call.tool.clone() else {
            return false;
        };
        if tool.as_modifiable().is_none() {
            return false;
        }
        let args = call.args.clone();
        let events = self.events.clone();
        self.set_modifying(index, true);

        tokio::spawn(async move {
            let result = match tool.as_modifiable() {
                Some(modifiable) => apply_inline_modification(modifiable, &args, &new_content).await,
                None => Err(ModifyError::NotModifiable {
                    tool: tool.name().to_string(),
                }),
            };
            let _ = events.send(BatchEvent::Modified {
                index,
                proceed: Some(outcome),
                result,
            });
        });
        true
    }

    fn on_modified(
        &mut self,
        index: usize,
        proceed: Option<ConfirmationOutcome>,
        result: Result<ModifyOutcome, ModifyError>,
    ) -> bool {
        let call = &mut self.calls[index];
        let ToolCallStatus::AwaitingApproval { details, modifying } = &mut call.status else {
            // Cancelled while the editor was open.
            return false;
        };
        *modifying = false;
        let hook = details.on_confirm.clone();

        match result {
            Ok(modified) => {
                if let ConfirmationKind::Edit {
                    file_diff,
                    original_content,
                    new_content,
                    ..
                } = &mut details.kind
                {
                    *file_diff = modified.file_diff;
                    // An empty read of a missing file keeps the "new file" marker.
                    if original_content.is_some() || !modified.old_content.is_empty() {
                        *original_content = Some(modified.old_content);
                    }
                    *new_content = modified.new_content;
                }
                call.args = modified.updated_params;
                debug!(call_id = %call.call_id(), "tool call arguments modified by user");
            }
            Err(e) => {
                if proceed.is_some() {
                    warn!(call_id = %call.call_id(), error = %e, "modification failed");
                    let error = match e {
                        ModifyError::Tool(error) => error,
                        other => ToolError::execution(call.name(), other.to_string()),
                    };
                    return self.fail(index, error);
                }
                self.modify_failed(index, &e);
            }
        }

        match proceed {
            Some(outcome) => {
                hook.fire(outcome);
                self.schedule_call(index)
            }
            // Back to the prompt with the updated diff; never auto-advance.
            None => {
                self.notify();
                true
            }
        }
    }

    fn on_output(&mut self, index: usize, event: ToolEvent) -> bool {
        let ToolCallStatus::Executing { live_output, pid } = &mut self.calls[index].status else {
            return false;
        };
        match event {
            ToolEvent::OutputUpdate {
                tool_call_id,
                output,
            } => {
                *live_output = Some(output.clone());
                self.observer.on_output_update(&tool_call_id, &output);
            }
            ToolEvent::ProcessSpawned {
                tool_call_id,
                pid: spawned,
            } => {
                debug!(call_id = %tool_call_id, pid = spawned, "tool spawned process");
                *pid = Some(spawned);
            }
        }
        self.notify();
        true
    }

    fn on_finished(&mut self, index: usize, result: Result<ToolResult, ToolError>) -> bool {
        let call = &self.calls[index];
        if call.state() != ToolCallState::Executing {
            return false;
        }
        match result {
            Ok(ToolResult {
                llm_content,
                return_display,
            }) => {
                let response = ToolCallResponse {
                    call_id: call.call_id().to_string(),
                    response_parts: convert_to_function_response(
                        call.name(),
                        call.call_id(),
                        llm_content,
                    ),
                    result_display: Some(return_display),
                    error: None,
                };
                let duration_ms = call.elapsed_ms();
                self.set_status(
                    index,
                    ToolCallStatus::Success {
                        response,
                        duration_ms,
                    },
                )
            }
            Err(e) if e.kind() == ErrorKind::Cancelled || self.signal.is_cancelled() => {
                self.cancel(index, &e.to_string())
            }
            Err(e) => self.fail(index, e),
        }
    }
}

/// Run one tool, forwarding its live events to the batch task.
async fn execute_call(
    index: usize,
    tool: Arc<dyn Tool>,
    call_id: String,
    args: Value,
    signal: CancellationToken,
    events: mpsc::UnboundedSender<BatchEvent>,
) {
    let (tx, mut rx) = mpsc::channel(TOOL_EVENT_CHANNEL_CAPACITY);
    let mut ctx = ToolCtx::new(call_id, signal).with_output(tx);

    let outcome = {
        let execution = AssertUnwindSafe(tool.execute(args, &mut ctx)).catch_unwind();
        tokio::pin!(execution);
        loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    let _ = events.send(BatchEvent::Output { index, event });
                }
                outcome = &mut execution => break outcome,
            }
        }
    };
    drop(ctx);
    // Updates published right before the tool returned.
    while let Ok(event) = rx.try_recv() {
        let _ = events.send(BatchEvent::Output { index, event });
    }

    let result = outcome.unwrap_or_else(|payload| {
        Err(ToolError::execution(
            tool.name(),
            format!("Tool panicked: {}", panic_message(&payload)),
        ))
    });
    let _ = events.send(BatchEvent::Finished { index, result });
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
