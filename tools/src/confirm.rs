//! Confirmation details a tool attaches to a call that needs user approval.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anvil_types::ConfirmationOutcome;

type ConfirmFn = Box<dyn FnOnce(ConfirmationOutcome) + Send>;

/// Single-fire continuation invoked with the user's decision.
///
/// Clones share the same slot, so however many snapshots of a call exist the
/// callback runs at most once.
#[derive(Clone)]
pub struct ConfirmHook {
    slot: Arc<Mutex<Option<ConfirmFn>>>,
}

impl ConfirmHook {
    pub fn new(callback: impl FnOnce(ConfirmationOutcome) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    #[must_use]
    pub fn noop() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the continuation. Returns `false` if it already ran (or never existed).
    pub fn fire(&self, outcome: ConfirmationOutcome) -> bool {
        let callback = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for ConfirmHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmHook")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// What the user is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationKind {
    Edit {
        file_name: String,
        file_path: PathBuf,
        file_diff: String,
        /// `None` when the file does not exist yet.
        original_content: Option<String>,
        new_content: String,
    },
    Exec {
        command: String,
        root_command: String,
    },
    Mcp {
        server_name: String,
        tool_name: String,
        tool_display_name: String,
    },
    Info {
        prompt: String,
        urls: Vec<String>,
    },
}

impl ConfirmationKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Edit { .. } => "edit",
            Self::Exec { .. } => "exec",
            Self::Mcp { .. } => "mcp",
            Self::Info { .. } => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmationDetails {
    pub title: String,
    pub kind: ConfirmationKind,
    pub on_confirm: ConfirmHook,
}

impl ConfirmationDetails {
    pub fn new(title: impl Into<String>, kind: ConfirmationKind) -> Self {
        Self {
            title: title.into(),
            kind,
            on_confirm: ConfirmHook::noop(),
        }
    }

    #[must_use]
    pub fn with_on_confirm(mut self, callback: impl FnOnce(ConfirmationOutcome) + Send + 'static) -> Self {
        self.on_confirm = ConfirmHook::new(callback);
        self
    }

    #[must_use]
    pub fn is_edit(&self) -> bool {
        matches!(self.kind, ConfirmationKind::Edit { .. })
    }
}
